//! In-memory stack that links a [`Central`] to a [`Peripheral`]
//!
//! [`SimStack`] implements [`GattStack`] by queueing every call as a [`Command`]. [`Loopback`]
//! owns one role of each kind, turns the commands of one side into the [`StackEvent`]s the other
//! side would see from a real radio, and advances a simulated clock. It is used to exercise both
//! roles end to end without hardware.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::trace;

use crate::{
    config::{CentralConfig, ConnectionParameters, GattDb, PeripheralConfig},
    gatt::{self, Uuid},
    Address, AddressType, AdvertisingSet, AttOpcode, Central, ConnectionHandle, Error, GattStack,
    LogObserver, Observer, Peripheral, Phy, Role, ScanReport, ServerStatus, StackError, StackEvent,
};

/// Handle of the one connection a [`Loopback`] carries
pub const CONNECTION: ConnectionHandle = ConnectionHandle(1);

/// A call made on a [`SimStack`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    SetTxPower { min: i16, max: i16 },
    SetMaxMtu(u16),
    ConfigureAfh(bool),
    AdvertiserStart { set: AdvertisingSet, data: Bytes },
    AdvertiserStop(AdvertisingSet),
    ScannerStart(Phy),
    ScannerStop,
    SetDefaultConnectionParameters(ConnectionParameters),
    ConnectionOpen { address: Address, phy: Phy },
    ConnectionClose,
    SetConnectionParameters(ConnectionParameters),
    SetPreferredPhy { preferred: Phy, accepted: u8 },
    SetRemotePowerReporting(bool),
    GetRssi,
    DiscoverPrimaryServices(Uuid),
    DiscoverCharacteristics(u32),
    SetCharacteristicNotification { characteristic: u16, flags: u8 },
    SendConfirmation,
    WriteWithoutResponse { characteristic: u16, value: Bytes },
    Notification { characteristic: u16, value: Bytes },
    Indication { characteristic: u16, value: Bytes },
    UserWriteResponse { attribute: u16, accepted: bool },
    WriteAttributeValue { attribute: u16, value: Bytes },
    NotifyAll { attribute: u16, value: Bytes },
}

impl Command {
    /// Name of the [`GattStack`] method that produced this command
    pub fn method(&self) -> &'static str {
        use Command::*;
        match self {
            SetTxPower { .. } => "set_tx_power",
            SetMaxMtu(_) => "set_max_mtu",
            ConfigureAfh(_) => "configure_afh",
            AdvertiserStart { .. } => "advertiser_start",
            AdvertiserStop(_) => "advertiser_stop",
            ScannerStart(_) => "scanner_start",
            ScannerStop => "scanner_stop",
            SetDefaultConnectionParameters(_) => "set_default_connection_parameters",
            ConnectionOpen { .. } => "connection_open",
            ConnectionClose => "connection_close",
            SetConnectionParameters(_) => "set_connection_parameters",
            SetPreferredPhy { .. } => "set_preferred_phy",
            SetRemotePowerReporting(_) => "set_remote_power_reporting",
            GetRssi => "get_rssi",
            DiscoverPrimaryServices(_) => "discover_primary_services",
            DiscoverCharacteristics(_) => "discover_characteristics",
            SetCharacteristicNotification { .. } => "set_characteristic_notification",
            SendConfirmation => "send_characteristic_confirmation",
            WriteWithoutResponse { .. } => "write_without_response",
            Notification { .. } => "send_notification",
            Indication { .. } => "send_indication",
            UserWriteResponse { .. } => "send_user_write_response",
            WriteAttributeValue { .. } => "write_attribute_value",
            NotifyAll { .. } => "notify_all",
        }
    }
}

/// A [`GattStack`] that queues calls for a [`Loopback`] to carry out
#[derive(Debug)]
pub struct SimStack {
    outbox: VecDeque<Command>,
    history: Option<Vec<Command>>,
    failures: HashMap<&'static str, VecDeque<StackError>>,
    supported_phys: u8,
    max_tx_power: i16,
    max_mtu: u16,
    att_mtu: u16,
    drop_every: Option<(u16, u32)>,
    notifications: u32,
    dropped: u32,
}

impl SimStack {
    /// Largest ATT MTU the simulated controller supports
    pub const MAX_MTU: u16 = 250;
    /// Smallest ATT MTU of any link
    pub const MIN_MTU: u16 = 23;

    /// Create a stack that supports every PHY and records its history
    pub fn new() -> Self {
        Self {
            outbox: VecDeque::new(),
            history: Some(Vec::new()),
            failures: HashMap::new(),
            supported_phys: Phy::Le1M as u8
                | Phy::Le2M as u8
                | Phy::Coded125k as u8
                | Phy::Coded500k as u8,
            max_tx_power: 100,
            max_mtu: Self::MAX_MTU,
            att_mtu: Self::MIN_MTU,
            drop_every: None,
            notifications: 0,
            dropped: 0,
        }
    }

    /// Stop recording calls in [`history`](Self::history)
    pub fn without_history(mut self) -> Self {
        self.history = None;
        self
    }

    /// Restrict the PHYs the controller accepts
    pub fn supported_phys(&mut self, phys: &[Phy]) -> &mut Self {
        self.supported_phys = phys.iter().fold(0, |acc, phy| acc | *phy as u8);
        self
    }

    /// Make the next call of `method` fail with `error`
    ///
    /// Failures queued for the same method are returned in order, one per call.
    pub fn fail_next(&mut self, method: &'static str, error: StackError) -> &mut Self {
        self.failures.entry(method).or_default().push_back(error);
        self
    }

    /// Silently lose every `n`th notification sent on `characteristic`
    pub fn drop_every(&mut self, characteristic: u16, n: u32) -> &mut Self {
        self.drop_every = Some((characteristic, n.max(1)));
        self
    }

    /// Notifications lost so far
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Calls made so far, oldest first
    pub fn history(&self) -> &[Command] {
        self.history.as_deref().unwrap_or_default()
    }

    /// Calls of `method` made so far
    pub fn calls<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a Command> + 'a {
        self.history()
            .iter()
            .filter(move |c| c.method() == method)
    }

    /// Forget the recorded history
    pub fn clear_history(&mut self) {
        if let Some(history) = &mut self.history {
            history.clear();
        }
    }

    /// Next call not yet carried out
    pub fn poll_command(&mut self) -> Option<Command> {
        self.outbox.pop_front()
    }

    fn check(&mut self, method: &'static str) -> Result<(), StackError> {
        match self.failures.get_mut(method).and_then(VecDeque::pop_front) {
            Some(error) => {
                trace!(method, %error, "injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn check_phy(&self, phy: Phy) -> Result<(), StackError> {
        match self.supported_phys & phy as u8 {
            0 => Err(StackError::INVALID_PARAMETER),
            _ => Ok(()),
        }
    }

    fn push(&mut self, command: Command) {
        if let Some(history) = &mut self.history {
            history.push(command.clone());
        }
        self.outbox.push_back(command);
    }

    fn call(&mut self, command: Command) -> Result<(), StackError> {
        self.check(command.method())?;
        self.push(command);
        Ok(())
    }
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new()
    }
}

impl GattStack for SimStack {
    fn set_tx_power(&mut self, min: i16, max: i16) -> Result<(i16, i16), StackError> {
        self.call(Command::SetTxPower { min, max })?;
        Ok((min, max.min(self.max_tx_power)))
    }

    fn set_max_mtu(&mut self, mtu: u16) -> Result<u16, StackError> {
        self.call(Command::SetMaxMtu(mtu))?;
        self.max_mtu = mtu.clamp(Self::MIN_MTU, Self::MAX_MTU);
        Ok(self.max_mtu)
    }

    fn configure_afh(&mut self, enabled: bool) -> Result<(), StackError> {
        self.call(Command::ConfigureAfh(enabled))
    }

    fn advertiser_start(&mut self, set: AdvertisingSet, data: &[u8]) -> Result<(), StackError> {
        if set == AdvertisingSet::Coded {
            self.check_phy(Phy::Coded125k)?;
        }
        self.call(Command::AdvertiserStart {
            set,
            data: Bytes::copy_from_slice(data),
        })
    }

    fn advertiser_stop(&mut self, set: AdvertisingSet) -> Result<(), StackError> {
        self.call(Command::AdvertiserStop(set))
    }

    fn scanner_start(&mut self, phy: Phy) -> Result<(), StackError> {
        self.check_phy(phy)?;
        self.call(Command::ScannerStart(phy))
    }

    fn scanner_stop(&mut self) -> Result<(), StackError> {
        self.call(Command::ScannerStop)
    }

    fn set_default_connection_parameters(
        &mut self,
        params: &ConnectionParameters,
    ) -> Result<(), StackError> {
        self.call(Command::SetDefaultConnectionParameters(*params))
    }

    fn connection_open(
        &mut self,
        address: Address,
        _address_type: AddressType,
        phy: Phy,
    ) -> Result<ConnectionHandle, StackError> {
        self.check_phy(phy)?;
        self.call(Command::ConnectionOpen { address, phy })?;
        Ok(CONNECTION)
    }

    fn connection_close(&mut self, _: ConnectionHandle) -> Result<(), StackError> {
        self.call(Command::ConnectionClose)
    }

    fn set_connection_parameters(
        &mut self,
        _: ConnectionHandle,
        params: &ConnectionParameters,
    ) -> Result<(), StackError> {
        if params.min_interval > params.max_interval {
            return Err(StackError::INVALID_PARAMETER);
        }
        self.call(Command::SetConnectionParameters(*params))
    }

    fn set_preferred_phy(
        &mut self,
        _: ConnectionHandle,
        preferred: Phy,
        accepted: u8,
    ) -> Result<(), StackError> {
        self.check_phy(preferred)?;
        self.call(Command::SetPreferredPhy {
            preferred,
            accepted,
        })
    }

    fn set_remote_power_reporting(
        &mut self,
        _: ConnectionHandle,
        enabled: bool,
    ) -> Result<(), StackError> {
        self.call(Command::SetRemotePowerReporting(enabled))
    }

    fn get_rssi(&mut self, _: ConnectionHandle) -> Result<(), StackError> {
        self.call(Command::GetRssi)
    }

    fn get_mtu(&mut self, _: ConnectionHandle) -> Result<u16, StackError> {
        self.check("get_mtu")?;
        Ok(self.att_mtu)
    }

    fn discover_primary_services(
        &mut self,
        _: ConnectionHandle,
        uuid: Uuid,
    ) -> Result<(), StackError> {
        self.call(Command::DiscoverPrimaryServices(uuid))
    }

    fn discover_characteristics(
        &mut self,
        _: ConnectionHandle,
        service: u32,
    ) -> Result<(), StackError> {
        self.call(Command::DiscoverCharacteristics(service))
    }

    fn set_characteristic_notification(
        &mut self,
        _: ConnectionHandle,
        characteristic: u16,
        flags: u8,
    ) -> Result<(), StackError> {
        self.call(Command::SetCharacteristicNotification {
            characteristic,
            flags,
        })
    }

    fn send_characteristic_confirmation(&mut self, _: ConnectionHandle) -> Result<(), StackError> {
        self.call(Command::SendConfirmation)
    }

    fn write_without_response(
        &mut self,
        _: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError> {
        self.call(Command::WriteWithoutResponse {
            characteristic,
            value: Bytes::copy_from_slice(value),
        })
    }

    fn send_notification(
        &mut self,
        _: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError> {
        self.check("send_notification")?;
        if let Some((handle, n)) = self.drop_every {
            if handle == characteristic {
                self.notifications += 1;
                if self.notifications % n == 0 {
                    self.dropped += 1;
                    return Ok(());
                }
            }
        }
        self.push(Command::Notification {
            characteristic,
            value: Bytes::copy_from_slice(value),
        });
        Ok(())
    }

    fn send_indication(
        &mut self,
        _: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError> {
        self.call(Command::Indication {
            characteristic,
            value: Bytes::copy_from_slice(value),
        })
    }

    fn send_user_write_response(
        &mut self,
        _: ConnectionHandle,
        attribute: u16,
        accepted: bool,
    ) -> Result<(), StackError> {
        self.call(Command::UserWriteResponse {
            attribute,
            accepted,
        })
    }

    fn write_attribute_value(&mut self, attribute: u16, value: &[u8]) -> Result<(), StackError> {
        self.call(Command::WriteAttributeValue {
            attribute,
            value: Bytes::copy_from_slice(value),
        })
    }

    fn notify_all(&mut self, attribute: u16, value: &[u8]) -> Result<(), StackError> {
        self.call(Command::NotifyAll {
            attribute,
            value: Bytes::copy_from_slice(value),
        })
    }
}

/// Simulated radio link between a central and a peripheral
///
/// Each [`step`](Self::step) carries out every queued stack call, delivers the resulting events
/// and steps both roles once. Time only moves forward in [`drive_for`](Self::drive_for) and
/// [`drive_until`](Self::drive_until).
pub struct Loopback<CO = LogObserver, PO = LogObserver> {
    /// Scanning, receiving side
    pub central: Central<SimStack, CO>,
    /// Advertising, transmitting side
    pub peripheral: Peripheral<SimStack, PO>,
    /// Current simulated time
    pub time: Instant,
    /// Simulated time taken by one step while the link is busy
    pub tick: Duration,
    /// Link-layer PDU payload size reported on connection
    pub pdu_size: u16,
    /// RSSI reported to both sides, in dBm
    pub rssi: i8,
    central_address: Address,
    peripheral_address: Address,
    central_db: GattDb,
    peripheral_db: GattDb,
    events: VecDeque<(Role, StackEvent)>,
    advertising: Option<Bytes>,
    scanning: bool,
    reported: bool,
    connected: bool,
    default_parameters: ConnectionParameters,
    /// Handle of the last indication each side sent, awaiting confirmation
    indicated: [Option<u16>; 2],
}

impl Loopback {
    /// Link two roles built from the given configurations, logging through `tracing`
    pub fn new(central: CentralConfig, peripheral: PeripheralConfig) -> Self {
        Self::with_observers(central, LogObserver, peripheral, LogObserver)
    }
}

impl<CO: Observer, PO: Observer> Loopback<CO, PO> {
    /// Link two roles with custom observers
    pub fn with_observers(
        central: CentralConfig,
        central_observer: CO,
        peripheral: PeripheralConfig,
        peripheral_observer: PO,
    ) -> Self {
        let peripheral_db = peripheral.gattdb;
        Self {
            central: Central::new(central, SimStack::new(), central_observer),
            peripheral: Peripheral::new(peripheral, SimStack::new(), peripheral_observer),
            time: Instant::now(),
            tick: Duration::from_millis(1),
            pdu_size: 251,
            rssi: -40,
            central_address: Address([0x01, 0x00, 0x00, 0x00, 0x00, 0xc0]),
            peripheral_address: Address([0x02, 0x00, 0x00, 0x00, 0x00, 0xc0]),
            central_db: GattDb::default(),
            peripheral_db,
            events: VecDeque::new(),
            advertising: None,
            scanning: false,
            reported: false,
            connected: false,
            default_parameters: ConnectionParameters::default(),
            indicated: [None; 2],
        }
    }

    /// Replace both stacks before the roles are enabled
    pub fn with_stacks(mut self, central: SimStack, peripheral: SimStack) -> Self {
        *self.central.stack_mut() = central;
        *self.peripheral.stack_mut() = peripheral;
        self
    }

    /// Address the peripheral advertises from
    pub fn peripheral_address(&self) -> Address {
        self.peripheral_address
    }

    /// Enable both roles
    pub fn enable(&mut self) -> Result<(), Error> {
        self.peripheral.enable(self.time)?;
        self.central.enable(self.time)?;
        Ok(())
    }

    /// Whether a connection is up
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Deliver `event` to `role` at the next step
    pub fn inject(&mut self, role: Role, event: StackEvent) {
        self.events.push_back((role, event));
    }

    /// Carry out queued calls, deliver events, step both roles and handle due timers
    ///
    /// Returns whether anything happened.
    pub fn step(&mut self) -> Result<bool, Error> {
        let mut active = self.pump()?;
        self.central.step(self.time)?;
        self.peripheral.step(self.time)?;
        active |= self.pump()?;
        self.central.handle_timeout(self.time)?;
        self.peripheral.handle_timeout(self.time)?;
        active |= self.pump()?;
        Ok(active)
    }

    /// Step until nothing happens without advancing time
    pub fn drive(&mut self) -> Result<(), Error> {
        while self.step()? {}
        Ok(())
    }

    /// Run for `duration` of simulated time
    pub fn drive_for(&mut self, duration: Duration) -> Result<(), Error> {
        let end = self.time + duration;
        self.drive_until(end, |_| false)?;
        Ok(())
    }

    /// Run until `done` holds or simulated time reaches `deadline`
    ///
    /// Busy steps advance time by [`tick`](Self::tick); idle steps jump to the next timer.
    /// Returns whether `done` was satisfied.
    pub fn drive_until(
        &mut self,
        deadline: Instant,
        mut done: impl FnMut(&Self) -> bool,
    ) -> Result<bool, Error> {
        loop {
            if done(self) {
                return Ok(true);
            }
            if self.time >= deadline {
                return Ok(false);
            }
            let next = match self.step()? {
                true => self.time + self.tick,
                false => self
                    .next_timeout()
                    .unwrap_or(deadline)
                    .max(self.time + self.tick),
            };
            self.time = next.min(deadline);
        }
    }

    fn next_timeout(&self) -> Option<Instant> {
        match (self.central.poll_timeout(), self.peripheral.poll_timeout()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Turn queued calls into events and deliver events until both sides are quiet
    fn pump(&mut self) -> Result<bool, Error> {
        let mut active = false;
        loop {
            let mut progress = false;
            while let Some(command) = self.central.stack_mut().poll_command() {
                self.carry_out(Role::Central, command);
                progress = true;
            }
            while let Some(command) = self.peripheral.stack_mut().poll_command() {
                self.carry_out(Role::Peripheral, command);
                progress = true;
            }
            self.report_advertisement();
            while let Some((role, event)) = self.events.pop_front() {
                trace!(%role, ?event, "deliver");
                match role {
                    Role::Central => self.central.handle_event(self.time, event)?,
                    Role::Peripheral => self.peripheral.handle_event(self.time, event)?,
                }
                progress = true;
            }
            if !progress {
                return Ok(active);
            }
            active = true;
        }
    }

    fn report_advertisement(&mut self) {
        let Some(data) = &self.advertising else {
            return;
        };
        if !self.scanning || self.reported || self.connected {
            return;
        }
        self.reported = true;
        self.events.push_back((
            Role::Central,
            StackEvent::ScanReport(ScanReport {
                address: self.peripheral_address,
                address_type: AddressType::Public,
                connectable: true,
                scannable: true,
                extended: false,
                complete: true,
                data: data.clone(),
            }),
        ));
    }

    fn carry_out(&mut self, from: Role, command: Command) {
        let to = peer(from);
        let connection = CONNECTION;
        match command {
            Command::AdvertiserStart { data, .. } => {
                self.advertising = Some(data);
                self.reported = false;
            }
            Command::AdvertiserStop(_) => self.advertising = None,
            Command::ScannerStart(_) => {
                self.scanning = true;
                self.reported = false;
            }
            Command::ScannerStop => self.scanning = false,
            Command::SetDefaultConnectionParameters(params) => self.default_parameters = params,
            Command::ConnectionOpen { address, phy } => {
                if address != self.peripheral_address || self.advertising.is_none() {
                    return;
                }
                self.open(phy);
            }
            Command::ConnectionClose => {
                if !self.connected {
                    return;
                }
                self.connected = false;
                self.indicated = [None; 2];
                self.events.push_back((
                    from,
                    StackEvent::ConnectionClosed {
                        connection,
                        reason: StackError::CONNECTION_TERMINATED,
                    },
                ));
                self.events.push_back((
                    to,
                    StackEvent::ConnectionClosed {
                        connection,
                        reason: StackError::REMOTE_USER_TERMINATED,
                    },
                ));
            }
            Command::SetConnectionParameters(params) => self.parameters(params),
            Command::SetPreferredPhy { preferred, .. } => {
                for role in [from, to] {
                    self.events.push_back((
                        role,
                        StackEvent::PhyStatus {
                            connection,
                            phy: preferred,
                        },
                    ));
                }
            }
            Command::GetRssi => self.events.push_back((
                from,
                StackEvent::Rssi {
                    connection,
                    rssi: self.rssi,
                },
            )),
            Command::DiscoverPrimaryServices(uuid) => {
                if uuid == gatt::SERVICE {
                    self.events.push_back((
                        from,
                        StackEvent::Service {
                            connection,
                            service: 1,
                            uuid,
                        },
                    ));
                }
                self.complete(from);
            }
            Command::DiscoverCharacteristics(_) => {
                for (characteristic, uuid) in self.served(to) {
                    self.events.push_back((
                        from,
                        StackEvent::Characteristic {
                            connection,
                            characteristic,
                            uuid,
                        },
                    ));
                }
                self.complete(from);
            }
            Command::SetCharacteristicNotification {
                characteristic,
                flags,
            } => {
                self.events.push_back((
                    to,
                    StackEvent::ServerCharacteristicStatus {
                        connection,
                        characteristic,
                        status: ServerStatus::ClientConfig,
                        client_config: flags,
                    },
                ));
                self.complete(from);
            }
            Command::SendConfirmation => {
                if let Some(characteristic) = self.indicated[to as usize].take() {
                    self.events.push_back((
                        to,
                        StackEvent::ServerCharacteristicStatus {
                            connection,
                            characteristic,
                            status: ServerStatus::Confirmation,
                            client_config: 0,
                        },
                    ));
                }
            }
            Command::WriteWithoutResponse {
                characteristic,
                value,
            } => self.events.push_back((
                to,
                StackEvent::ServerAttributeValue {
                    connection,
                    attribute: characteristic,
                    value,
                },
            )),
            Command::Notification {
                characteristic,
                value,
            } => self.value(to, characteristic, AttOpcode::Notification, value),
            Command::Indication {
                characteristic,
                value,
            } => {
                self.indicated[from as usize] = Some(characteristic);
                self.value(to, characteristic, AttOpcode::Indication, value);
            }
            Command::SetTxPower { .. }
            | Command::SetMaxMtu(_)
            | Command::ConfigureAfh(_)
            | Command::SetRemotePowerReporting(_)
            | Command::UserWriteResponse { .. }
            | Command::WriteAttributeValue { .. }
            | Command::NotifyAll { .. } => {}
        }
    }

    fn open(&mut self, phy: Phy) {
        let connection = CONNECTION;
        self.connected = true;
        self.scanning = false;
        self.advertising = None;
        let mtu = self
            .central
            .stack()
            .max_mtu
            .min(self.peripheral.stack().max_mtu);
        self.central.stack_mut().att_mtu = mtu;
        self.peripheral.stack_mut().att_mtu = mtu;

        self.events.push_back((
            Role::Central,
            StackEvent::ConnectionOpened {
                connection,
                address: self.peripheral_address,
                address_type: AddressType::Public,
            },
        ));
        self.events.push_back((
            Role::Peripheral,
            StackEvent::ConnectionOpened {
                connection,
                address: self.central_address,
                address_type: AddressType::Public,
            },
        ));
        self.parameters(self.default_parameters);
        for role in [Role::Central, Role::Peripheral] {
            self.events
                .push_back((role, StackEvent::MtuExchanged { connection, mtu }));
            self.events
                .push_back((role, StackEvent::PhyStatus { connection, phy }));
        }
    }

    fn parameters(&mut self, params: ConnectionParameters) {
        for role in [Role::Central, Role::Peripheral] {
            self.events.push_back((
                role,
                StackEvent::ConnectionParameters {
                    connection: CONNECTION,
                    interval: params.max_interval,
                    latency: params.latency,
                    timeout: params.timeout,
                    tx_size: self.pdu_size,
                },
            ));
        }
    }

    fn value(&mut self, to: Role, characteristic: u16, opcode: AttOpcode, value: Bytes) {
        self.events.push_back((
            to,
            StackEvent::CharacteristicValue {
                connection: CONNECTION,
                characteristic,
                opcode,
                value,
            },
        ));
    }

    fn complete(&mut self, to: Role) {
        self.events.push_back((
            to,
            StackEvent::ProcedureCompleted {
                connection: CONNECTION,
                result: 0,
            },
        ));
    }

    /// Characteristics the server of `role` exposes
    fn served(&self, role: Role) -> Vec<(u16, Uuid)> {
        let db = match role {
            Role::Central => self.central_db,
            Role::Peripheral => self.peripheral_db,
        };
        let mut out = vec![
            (db.notifications, gatt::NOTIFICATIONS),
            (db.indications, gatt::INDICATIONS),
            (db.transmission_on, gatt::TRANSMISSION_ON),
        ];
        if role == Role::Peripheral {
            out.push((db.result, gatt::RESULT));
        }
        out
    }
}

fn peer(role: Role) -> Role {
    match role {
        Role::Central => Role::Peripheral,
        Role::Peripheral => Role::Central,
    }
}
