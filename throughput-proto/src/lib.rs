//! Low-level protocol logic for the Bluetooth LE GATT throughput test
//!
//! throughput-proto contains a fully deterministic implementation of both sides of the throughput
//! test. It contains no radio or host-stack code and does not get any timestamps from the
//! operating system. Outbound calls go through the [`GattStack`] trait, inbound stack events are
//! fed in as [`StackEvent`]s, and the caller supplies the current time.
//!
//! The most important types are [`Central`], which scans for a throughput server, discovers its
//! characteristics, subscribes and measures received data, and [`Peripheral`], which advertises
//! the throughput service and streams notifications or indications. Both are driven by the same
//! three entry points: [`handle_event`](Central::handle_event) for stack events,
//! [`step`](Central::step) from the application's main loop, and
//! [`handle_timeout`](Central::handle_timeout) once [`poll_timeout`](Central::poll_timeout) has
//! elapsed.

#![warn(missing_docs)]
#![cfg_attr(test, allow(dead_code))]
// Fixes welcome:
#![allow(clippy::too_many_arguments)]

use std::fmt;

mod allowlist;
pub use crate::allowlist::{Address, AddressParseError, Allowlist};

mod central;
pub use crate::central::Central;

mod config;
pub use crate::config::{CentralConfig, ConnectionParameters, GattDb, PeripheralConfig};

pub mod discovery;
pub use crate::discovery::{Characteristics, DiscoveryState};

mod error;
pub use crate::error::Error;

pub mod gatt;

pub mod loopback;

mod mode;
pub use crate::mode::{Measurement, ModeConfig, ModeController, TestMode};

mod observer;
pub use crate::observer::{LogObserver, Observer};

pub mod payload;

mod peripheral;
pub use crate::peripheral::Peripheral;

mod sequence;
pub use crate::sequence::{PayloadGenerator, SequenceTracker};

mod stack;
pub use crate::stack::{
    AddressType, AdvertisingSet, AttOpcode, ConnectionHandle, GattStack, ScanReport, ServerStatus,
    StackEvent,
};

mod stack_error;
pub use crate::stack_error::StackError;

mod state;
pub use crate::state::{ConnectionSettings, State, TestReport, TestStatus};

#[cfg(test)]
mod tests;

mod timer;

/// Which side of the throughput test a role implements
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Role {
    /// Scans, connects and receives data
    Central = 0,
    /// Advertises and transmits data
    Peripheral = 1,
}

impl Role {
    #[inline]
    /// Shorthand for `self == Role::Central`
    pub fn is_central(self) -> bool {
        self == Role::Central
    }

    #[inline]
    /// Shorthand for `self == Role::Peripheral`
    pub fn is_peripheral(self) -> bool {
        self == Role::Peripheral
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Role::Central => "Central",
            Role::Peripheral => "Peripheral",
        })
    }
}

/// GATT mechanism used to push test data from the server to the client
///
/// The discriminants match the client characteristic configuration bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TestType {
    /// Unacknowledged server-initiated updates
    Notification = 1,
    /// Server-initiated updates that the client must confirm
    Indication = 2,
}

impl TestType {
    /// Decode the wire value, rejecting `0` (disabled) and unknown bits
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TestType::Notification),
            2 => Some(TestType::Indication),
            _ => None,
        }
    }

    /// Client characteristic configuration bit for this type
    pub fn flag(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            TestType::Notification => "notification",
            TestType::Indication => "indication",
        })
    }
}

/// Physical radio layer mode of a link or scanner
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Phy {
    /// 1M PHY, uncoded
    Le1M = 0x01,
    /// 2M PHY, uncoded
    Le2M = 0x02,
    /// Coded PHY with S=8 coding, 125 kbit/s
    Coded125k = 0x04,
    /// Coded PHY with S=2 coding, 500 kbit/s
    Coded500k = 0x08,
}

impl Phy {
    /// Decode the stack's PHY coding value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Phy::Le1M),
            0x02 => Some(Phy::Le2M),
            0x04 => Some(Phy::Coded125k),
            0x08 => Some(Phy::Coded500k),
            _ => None,
        }
    }

    /// PHYs the local side accepts from the peer when `self` is preferred
    ///
    /// Both coded rates share one accepted-PHY bit.
    pub fn accepted(self) -> u8 {
        match self {
            Phy::Coded500k => Phy::Coded125k as u8,
            phy => phy as u8,
        }
    }

    /// The PHY tried next when cycling through connection PHYs
    pub(crate) fn next(self) -> Self {
        match self {
            Phy::Le1M => Phy::Le2M,
            Phy::Le2M => Phy::Coded125k,
            Phy::Coded125k => Phy::Coded500k,
            Phy::Coded500k => Phy::Le1M,
        }
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Phy::Le1M => "1M",
            Phy::Le2M => "2M",
            Phy::Coded125k => "125k",
            Phy::Coded500k => "500k",
        })
    }
}
