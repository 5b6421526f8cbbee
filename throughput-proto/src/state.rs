use std::{fmt, time::Duration};

use crate::{ConnectionParameters, DiscoveryState, ModeConfig, Phy, Role, TestType};

/// Lifecycle state of a role
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum State {
    /// No connection
    #[default]
    Disconnected,
    /// Connected, but the client has not subscribed to everything a test needs
    Connected,
    /// Ready to run a test
    Subscribed,
    /// A test is running
    Test,
    /// A test was stopped and the result is being exchanged
    TestFinish,
}

impl State {
    /// Whether a connection is open
    pub fn is_connected(self) -> bool {
        !matches!(self, State::Disconnected)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            State::Disconnected => "Disconnected",
            State::Connected => "Connected",
            State::Subscribed => "Subscribed",
            State::Test => "Test",
            State::TestFinish => "Test finish",
        })
    }
}

/// Negotiated link properties of the current connection
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ConnectionSettings {
    /// Connection interval in 1.25 ms units
    pub interval: u16,
    /// Responder latency in connection events
    pub latency: u16,
    /// Supervision timeout in 10 ms units
    pub timeout: u16,
    /// Link-layer PDU payload size
    pub pdu_size: u16,
    /// ATT MTU
    pub mtu_size: u16,
    /// Test payload size
    pub data_size: u16,
}

/// Outcome of one test run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TestReport {
    /// Role that measured
    pub role: Option<Role>,
    /// Mechanism used for the data
    pub test_type: Option<TestType>,
    /// Payload bytes transferred
    pub bytes: u32,
    /// Notifications or indications transferred
    pub operations: u32,
    /// Packets inferred as lost by the receiver
    pub lost: u32,
    /// Empty or corrupt packets seen by the receiver
    pub errors: u32,
    /// Measured throughput in bits per second
    pub throughput: u32,
    /// Throughput reported by the transmitting peer, if it arrived
    pub peer_throughput: Option<u32>,
    /// Test duration
    pub elapsed: Duration,
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {} ops over {:.3}s: {} bps, {} lost, {} errors",
            self.bytes,
            self.operations,
            self.elapsed.as_secs_f64(),
            self.throughput,
            self.lost,
            self.errors,
        )?;
        if let Some(peer) = self.peer_throughput {
            write!(f, ", peer measured {peer} bps")?;
        }
        Ok(())
    }
}

/// Snapshot of everything a role exposes about itself
#[derive(Debug, Clone, PartialEq)]
pub struct TestStatus {
    /// Which role this is
    pub role: Role,
    /// Lifecycle state
    pub state: State,
    /// Discovery progress against the peer's server
    pub discovery: DiscoveryState,
    /// Configured stop condition
    pub mode: ModeConfig,
    /// Selected or running test type
    pub test_type: Option<TestType>,
    /// Connection PHY
    pub phy: Phy,
    /// Scanner PHY, central only
    pub scan_phy: Phy,
    /// Requested TX power in dBm
    pub tx_power_requested: i16,
    /// TX power in effect in dBm
    pub tx_power: i16,
    /// Remote power reporting is enabled
    pub power_control: bool,
    /// Deep sleep is allowed during a test
    pub deep_sleep: bool,
    /// Last RSSI reading in dBm
    pub rssi: i8,
    /// Negotiated link properties
    pub connection: ConnectionSettings,
    /// Connection parameters requested for new connections, central only
    pub requested_parameters: ConnectionParameters,
    /// Notifications are enabled on the data characteristic
    pub notifications: bool,
    /// Indications are enabled on the data characteristic
    pub indications: bool,
    /// Counters of the current or most recent test
    pub report: TestReport,
}
