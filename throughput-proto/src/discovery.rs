//! Progress of connecting to a throughput server and subscribing to its characteristics

use std::fmt;

use crate::{gatt, ConnectionHandle, Error, GattStack, StackError};

/// Step of the connect/discover/subscribe sequence
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum DiscoveryState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Looking for an advertiser with the right name
    Scanning,
    /// A connection is being opened
    Connecting,
    /// Looking for the throughput service
    DiscoveringService,
    /// Looking for the characteristics of the throughput service
    DiscoveringCharacteristics,
    /// Writing the configuration of the notification characteristic
    EnablingNotification,
    /// Writing the configuration of the indication characteristic
    EnablingIndication,
    /// Writing the configuration of the transmission control characteristic
    EnablingTransmissionControl,
    /// Writing the configuration of the result characteristic
    SubscribingResult,
    /// Everything is subscribed
    Subscribed,
}

impl DiscoveryState {
    /// Whether a GATT client procedure is outstanding in this state
    pub fn awaits_procedure(self) -> bool {
        use DiscoveryState::*;
        matches!(
            self,
            DiscoveringService
                | DiscoveringCharacteristics
                | EnablingNotification
                | EnablingIndication
                | EnablingTransmissionControl
                | SubscribingResult
        )
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DiscoveryState::*;
        f.pad(match *self {
            Idle => "idle",
            Scanning => "scanning",
            Connecting => "connecting",
            DiscoveringService => "discovering service",
            DiscoveringCharacteristics => "discovering characteristics",
            EnablingNotification => "enabling notification",
            EnablingIndication => "enabling indication",
            EnablingTransmissionControl => "enabling transmission control",
            SubscribingResult => "subscribing result",
            Subscribed => "subscribed",
        })
    }
}

/// One of the characteristics of the throughput service
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Characteristic {
    /// Test data as notifications
    Notifications = 0,
    /// Test data as indications
    Indications = 1,
    /// Transmission control
    Transmission = 2,
    /// Throughput result
    Result = 3,
}

impl Characteristic {
    const VALUES: [Self; 4] = [
        Self::Notifications,
        Self::Indications,
        Self::Transmission,
        Self::Result,
    ];

    /// Identify a characteristic by UUID
    pub fn from_uuid(uuid: gatt::Uuid) -> Option<Self> {
        match uuid {
            gatt::NOTIFICATIONS => Some(Self::Notifications),
            gatt::INDICATIONS => Some(Self::Indications),
            gatt::TRANSMISSION_ON => Some(Self::Transmission),
            gatt::RESULT => Some(Self::Result),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of [`Characteristic`]s
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Characteristics(u8);

impl Characteristics {
    /// No characteristics
    pub const EMPTY: Self = Self(0);
    /// The data and transmission control characteristics
    pub const CLIENT: Self = Self(0b0111);
    /// Every characteristic of the service
    pub const ALL: Self = Self(0b1111);

    /// Add `c` to the set
    pub fn insert(&mut self, c: Characteristic) {
        self.0 |= c.bit();
    }

    /// Whether `c` is in the set
    pub fn has(self, c: Characteristic) -> bool {
        self.0 & c.bit() != 0
    }

    /// Whether every member of `other` is in the set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the set is empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of members
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Characteristic::VALUES.iter().filter(|c| self.has(**c)))
            .finish()
    }
}

/// Tracks the discovery and subscription sequence against one peer
///
/// The machine only reports what the next step is; the owning role issues the matching stack
/// call and commits the step with [`set_state`](Self::set_state) once the call was accepted.
#[derive(Debug, Clone)]
pub struct Discovery {
    state: DiscoveryState,
    required: Characteristics,
    found: Characteristics,
    service: Option<u32>,
    handles: [Option<u16>; 4],
}

impl Discovery {
    /// Create an idle machine that needs `required` before subscribing
    pub fn new(required: Characteristics) -> Self {
        Self {
            state: DiscoveryState::Idle,
            required,
            found: Characteristics::EMPTY,
            service: None,
            handles: [None; 4],
        }
    }

    /// Current step
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Commit a step; returns whether it changed
    pub fn set_state(&mut self, state: DiscoveryState) -> bool {
        if self.state == state {
            return false;
        }
        tracing::debug!(from = %self.state, to = %state, "discovery");
        self.state = state;
        true
    }

    /// Forget the peer: back to `Idle` with nothing found
    pub fn reset(&mut self) {
        self.set_state(DiscoveryState::Idle);
        self.found = Characteristics::EMPTY;
        self.service = None;
        self.handles = [None; 4];
    }

    /// Forget found characteristics, keeping the current step
    pub fn clear_found(&mut self) {
        self.found = Characteristics::EMPTY;
        self.handles = [None; 4];
    }

    /// Characteristics found so far
    pub fn found(&self) -> Characteristics {
        self.found
    }

    /// Handle of the throughput service, once seen
    pub fn service(&self) -> Option<u32> {
        self.service
    }

    /// Value handle of `c`, once seen
    pub fn handle(&self, c: Characteristic) -> Option<u16> {
        self.handles[c as usize]
    }

    /// Which characteristic, if any, has value handle `handle`
    pub fn lookup(&self, handle: u16) -> Option<Characteristic> {
        Characteristic::VALUES
            .into_iter()
            .find(|&c| self.handles[c as usize] == Some(handle))
    }

    /// Record a discovered service; returns whether it is the throughput service
    pub fn on_service(&mut self, service: u32, uuid: gatt::Uuid) -> bool {
        if uuid != gatt::SERVICE {
            return false;
        }
        self.service = Some(service);
        true
    }

    /// Record a discovered characteristic
    pub fn on_characteristic(&mut self, handle: u16, uuid: gatt::Uuid) -> Option<Characteristic> {
        let c = Characteristic::from_uuid(uuid)?;
        self.handles[c as usize] = Some(handle);
        self.found.insert(c);
        Some(c)
    }

    /// Step that follows the completion of the outstanding procedure
    ///
    /// Returns `Ok(None)` when nothing is outstanding or the current step cannot advance yet,
    /// such as a service discovery that did not see the throughput service.
    pub fn complete(&self, result: u16) -> Result<Option<DiscoveryState>, Error> {
        use DiscoveryState::*;
        if !self.state.awaits_procedure() {
            return Ok(None);
        }
        StackError::check(result).map_err(Error::Procedure)?;
        Ok(match self.state {
            DiscoveringService if self.service.is_some() => Some(DiscoveringCharacteristics),
            DiscoveringCharacteristics if self.found.contains(self.required) => {
                Some(EnablingNotification)
            }
            EnablingNotification => Some(EnablingIndication),
            EnablingIndication => Some(EnablingTransmissionControl),
            EnablingTransmissionControl if self.required.has(Characteristic::Result) => {
                Some(SubscribingResult)
            }
            EnablingTransmissionControl | SubscribingResult => Some(Subscribed),
            _ => None,
        })
    }

    /// Issue the stack call that performs step `next`
    ///
    /// Steps without a GATT procedure need no call.
    pub(crate) fn request<S: GattStack>(
        &self,
        stack: &mut S,
        connection: ConnectionHandle,
        next: DiscoveryState,
    ) -> Result<(), Error> {
        use DiscoveryState::*;
        let handle = |c| self.handle(c).ok_or(Error::InvalidState);
        match next {
            DiscoveringService => stack.discover_primary_services(connection, gatt::SERVICE)?,
            DiscoveringCharacteristics => {
                let service = self.service.ok_or(Error::InvalidState)?;
                stack.discover_characteristics(connection, service)?
            }
            EnablingNotification => stack.set_characteristic_notification(
                connection,
                handle(Characteristic::Notifications)?,
                gatt::CCCD_NOTIFICATION,
            )?,
            EnablingIndication => stack.set_characteristic_notification(
                connection,
                handle(Characteristic::Indications)?,
                gatt::CCCD_INDICATION,
            )?,
            EnablingTransmissionControl => stack.set_characteristic_notification(
                connection,
                handle(Characteristic::Transmission)?,
                gatt::CCCD_NOTIFICATION,
            )?,
            SubscribingResult => stack.set_characteristic_notification(
                connection,
                handle(Characteristic::Result)?,
                gatt::CCCD_INDICATION,
            )?,
            Idle | Scanning | Connecting | Subscribed => {}
        }
        Ok(())
    }
}
