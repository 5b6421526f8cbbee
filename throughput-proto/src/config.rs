use std::time::Duration;

use crate::{gatt, Address, ModeConfig, Phy, TestType};

/// Connection timing requested from the stack
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnectionParameters {
    /// Shortest acceptable connection interval, in 1.25 ms units
    pub min_interval: u16,
    /// Longest acceptable connection interval, in 1.25 ms units
    pub max_interval: u16,
    /// Responder latency in connection events
    pub latency: u16,
    /// Supervision timeout in 10 ms units
    pub timeout: u16,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            min_interval: 80,
            max_interval: 80,
            latency: 0,
            timeout: 100,
        }
    }
}

/// Attribute handles of the local GATT database
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GattDb {
    /// Transmission control characteristic
    pub transmission_on: u16,
    /// Test data as notifications
    pub notifications: u16,
    /// Test data as indications
    pub indications: u16,
    /// Throughput result
    pub result: u16,
    /// Published link-layer PDU size
    pub pdu_size: u16,
    /// Published ATT MTU
    pub mtu_size: u16,
    /// Published connection PHY
    pub connection_phy: u16,
    /// Published connection interval
    pub connection_interval: u16,
    /// Published responder latency
    pub responder_latency: u16,
    /// Published supervision timeout
    pub supervision_timeout: u16,
}

impl Default for GattDb {
    fn default() -> Self {
        Self {
            notifications: 0x0010,
            indications: 0x0013,
            transmission_on: 0x0016,
            result: 0x0019,
            connection_phy: 0x001d,
            connection_interval: 0x0020,
            responder_latency: 0x0023,
            supervision_timeout: 0x0026,
            pdu_size: 0x0029,
            mtu_size: 0x002c,
        }
    }
}

/// Parameters of the receiving, scanning side of the test
///
/// Defaults connect on 1M, receive notifications and run until stopped.
#[derive(Debug, Clone)]
pub struct CentralConfig {
    pub(crate) mode: ModeConfig,
    pub(crate) test_type: TestType,
    pub(crate) tx_power: i16,
    pub(crate) power_control: bool,
    pub(crate) deep_sleep: bool,
    pub(crate) mtu: u16,
    pub(crate) phy: Phy,
    pub(crate) scan_phy: Phy,
    pub(crate) connection: ConnectionParameters,
    pub(crate) device_name: String,
    pub(crate) allowlist: Vec<Address>,
    pub(crate) refresh_interval: Duration,
    pub(crate) result_timeout: Duration,
}

impl CentralConfig {
    /// Stop condition of the first test
    pub fn mode(&mut self, value: ModeConfig) -> &mut Self {
        self.mode = value;
        self
    }

    /// Data mechanism requested from the peer. Defaults to notifications.
    pub fn test_type(&mut self, value: TestType) -> &mut Self {
        self.test_type = value;
        self
    }

    /// Requested TX power in dBm
    ///
    /// Adaptive frequency hopping is enabled above 10 dBm. Defaults to 10.
    pub fn tx_power(&mut self, value: i16) -> &mut Self {
        self.tx_power = value;
        self
    }

    /// Whether remote power reporting is enabled on new connections
    pub fn power_control(&mut self, value: bool) -> &mut Self {
        self.power_control = value;
        self
    }

    /// Whether the application may deep sleep during a test
    pub fn deep_sleep(&mut self, value: bool) -> &mut Self {
        self.deep_sleep = value;
        self
    }

    /// Largest ATT MTU to negotiate. Defaults to 250.
    pub fn mtu(&mut self, value: u16) -> &mut Self {
        self.mtu = value;
        self
    }

    /// PHY for new connections
    ///
    /// Falls back to 1M when the stack rejects it.
    pub fn phy(&mut self, value: Phy) -> &mut Self {
        self.phy = value;
        self
    }

    /// PHY to scan on
    pub fn scan_phy(&mut self, value: Phy) -> &mut Self {
        self.scan_phy = value;
        self
    }

    /// Parameters proposed for new connections
    pub fn connection(&mut self, value: ConnectionParameters) -> &mut Self {
        self.connection = value;
        self
    }

    /// Complete local name prefix a peer must advertise. Defaults to `"Throughput Test"`.
    pub fn device_name(&mut self, value: impl Into<String>) -> &mut Self {
        self.device_name = value.into();
        self
    }

    /// Addresses allowed to connect to; empty admits everyone
    pub fn allowlist(&mut self, value: Vec<Address>) -> &mut Self {
        self.allowlist = value;
        self
    }

    /// Period of RSSI readings while idle. Defaults to 1 second.
    pub fn refresh_interval(&mut self, value: Duration) -> &mut Self {
        self.refresh_interval = value;
        self
    }

    /// How long to wait for the peer's result after stopping. Defaults to 1 second.
    pub fn result_timeout(&mut self, value: Duration) -> &mut Self {
        self.result_timeout = value;
        self
    }
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            mode: ModeConfig::continuous(),
            test_type: TestType::Notification,
            tx_power: 10,
            power_control: false,
            deep_sleep: false,
            mtu: 250,
            phy: Phy::Le1M,
            scan_phy: Phy::Le1M,
            connection: ConnectionParameters::default(),
            device_name: gatt::DEVICE_NAME.into(),
            allowlist: Vec::new(),
            refresh_interval: Duration::from_secs(1),
            result_timeout: Duration::from_secs(1),
        }
    }
}

/// Parameters of the transmitting, advertising side of the test
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    pub(crate) mode: ModeConfig,
    pub(crate) tx_power: i16,
    pub(crate) power_control: bool,
    pub(crate) deep_sleep: bool,
    pub(crate) mtu: u16,
    pub(crate) notification_size: u16,
    pub(crate) indication_size: u16,
    pub(crate) device_name: String,
    pub(crate) coded_advertising: bool,
    pub(crate) gattdb: GattDb,
    pub(crate) refresh_interval: Duration,
    pub(crate) indication_timeout: Duration,
}

impl PeripheralConfig {
    /// Stop condition of the first test
    pub fn mode(&mut self, value: ModeConfig) -> &mut Self {
        self.mode = value;
        self
    }

    /// Requested TX power in dBm. Defaults to 10.
    pub fn tx_power(&mut self, value: i16) -> &mut Self {
        self.tx_power = value;
        self
    }

    /// Whether remote power reporting is enabled on new connections
    pub fn power_control(&mut self, value: bool) -> &mut Self {
        self.power_control = value;
        self
    }

    /// Whether the application may deep sleep during a test
    pub fn deep_sleep(&mut self, value: bool) -> &mut Self {
        self.deep_sleep = value;
        self
    }

    /// Largest ATT MTU to negotiate. Defaults to 250.
    pub fn mtu(&mut self, value: u16) -> &mut Self {
        self.mtu = value;
        self
    }

    /// Fixed notification payload size; `0` packs whole PDUs into the MTU
    pub fn notification_size(&mut self, value: u16) -> &mut Self {
        self.notification_size = value;
        self
    }

    /// Fixed indication payload size; `0` fills the MTU
    pub fn indication_size(&mut self, value: u16) -> &mut Self {
        self.indication_size = value;
        self
    }

    /// Complete local name to advertise. Defaults to `"Throughput Test"`.
    pub fn device_name(&mut self, value: impl Into<String>) -> &mut Self {
        self.device_name = value.into();
        self
    }

    /// Whether to also advertise on the coded PHY. Defaults to `true`.
    pub fn coded_advertising(&mut self, value: bool) -> &mut Self {
        self.coded_advertising = value;
        self
    }

    /// Handles of the local throughput service
    pub fn gattdb(&mut self, value: GattDb) -> &mut Self {
        self.gattdb = value;
        self
    }

    /// Period of RSSI readings while idle. Defaults to 1 second.
    pub fn refresh_interval(&mut self, value: Duration) -> &mut Self {
        self.refresh_interval = value;
        self
    }

    /// How long to wait for an indication confirmation. Defaults to 500 ms.
    pub fn indication_timeout(&mut self, value: Duration) -> &mut Self {
        self.indication_timeout = value;
        self
    }
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            mode: ModeConfig::continuous(),
            tx_power: 10,
            power_control: false,
            deep_sleep: false,
            mtu: 250,
            notification_size: 0,
            indication_size: 0,
            device_name: gatt::DEVICE_NAME.into(),
            coded_advertising: true,
            gattdb: GattDb::default(),
            refresh_interval: Duration::from_secs(1),
            indication_timeout: Duration::from_millis(500),
        }
    }
}
