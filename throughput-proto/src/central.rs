use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::{
    config::{CentralConfig, ConnectionParameters},
    discovery::{Characteristic, Characteristics, Discovery, DiscoveryState},
    gatt,
    mode::ModeController,
    timer::{Timer, TimerTable},
    Address, AddressType, Allowlist, AttOpcode, ConnectionHandle, ConnectionSettings, Error,
    GattStack, LogObserver, ModeConfig, Observer, Phy, Role, ScanReport, SequenceTracker,
    StackError, StackEvent, State, TestReport, TestStatus, TestType,
};

/// Receiving side of the throughput test
///
/// Scans for a peripheral advertising the configured name, connects, discovers and subscribes to
/// the throughput service, then counts the data the peripheral pushes. Tests are started locally
/// with [`start`](Self::start) or remotely when the peripheral announces a transmission.
///
/// The central owns its stack handle and observer. Drive it by feeding stack events to
/// [`handle_event`](Self::handle_event), calling [`step`](Self::step) from the main loop, and
/// calling [`handle_timeout`](Self::handle_timeout) once [`poll_timeout`](Self::poll_timeout)
/// has passed.
pub struct Central<S, O = LogObserver> {
    stack: S,
    observer: O,
    config: CentralConfig,
    enabled: bool,
    state: State,
    discovery: Discovery,
    allowlist: Allowlist,
    connection: Option<ConnectionHandle>,
    mode: ModeController,
    sequence: SequenceTracker,
    timers: TimerTable,
    test_type: TestType,
    phy: Phy,
    scan_phy: Phy,
    tx_power_requested: i16,
    tx_power: i16,
    power_control: bool,
    deep_sleep: bool,
    mtu: u16,
    rssi: i8,
    settings: ConnectionSettings,
    params: ConnectionParameters,
    notifications: bool,
    indications: bool,
    report: TestReport,
    /// A stop was requested and has not been acted on
    finish_requested: bool,
    /// "Transmission off" was written; waiting for the peer's result
    awaiting_result: bool,
    measured: bool,
}

impl<S: GattStack, O: Observer> Central<S, O> {
    /// Create a disabled central
    pub fn new(config: CentralConfig, stack: S, observer: O) -> Self {
        let allowlist = config.allowlist.iter().copied().collect();
        Self {
            stack,
            observer,
            enabled: false,
            state: State::Disconnected,
            discovery: Discovery::new(Characteristics::ALL),
            allowlist,
            connection: None,
            mode: ModeController::new(config.mode),
            sequence: SequenceTracker::new(),
            timers: TimerTable::default(),
            test_type: config.test_type,
            phy: config.phy,
            scan_phy: config.scan_phy,
            tx_power_requested: config.tx_power,
            tx_power: config.tx_power,
            power_control: config.power_control,
            deep_sleep: config.deep_sleep,
            mtu: config.mtu,
            rssi: 0,
            settings: ConnectionSettings {
                mtu_size: config.mtu,
                ..ConnectionSettings::default()
            },
            params: config.connection,
            notifications: false,
            indications: false,
            report: TestReport {
                role: Some(Role::Central),
                ..TestReport::default()
            },
            finish_requested: false,
            awaiting_result: false,
            measured: false,
            config,
        }
    }

    /// Apply the configuration to the stack and start scanning
    pub fn enable(&mut self, _now: Instant) -> Result<(), Error> {
        self.state = State::Disconnected;
        self.reset_variables();
        self.observer.on_state_change(self.state);
        self.observer.on_role_set(Role::Central);
        self.scanning_start()?;
        self.enabled = true;
        Ok(())
    }

    /// Process an event from the stack
    ///
    /// Events are ignored until the central is enabled.
    pub fn handle_event(&mut self, now: Instant, event: StackEvent) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        match event {
            StackEvent::ScanReport(report) => {
                if !(report.connectable || report.scannable) {
                    return Ok(());
                }
                if report.extended && !report.complete {
                    return Ok(());
                }
                self.handle_scan_report(report)?;
            }
            StackEvent::ConnectionOpened { connection, .. } => {
                self.connection = Some(connection);
                self.set_state(State::Connected);
                self.stack
                    .set_remote_power_reporting(connection, self.power_control)?;
                self.discovery.request(
                    &mut self.stack,
                    connection,
                    DiscoveryState::DiscoveringService,
                )?;
                self.set_discovery_state(DiscoveryState::DiscoveringService);
            }
            StackEvent::ConnectionParameters {
                interval,
                latency,
                timeout,
                tx_size,
                ..
            } => {
                self.settings.interval = interval;
                self.settings.latency = latency;
                self.settings.timeout = timeout;
                self.settings.pdu_size = tx_size;
                self.observer
                    .on_connection_timings_change(interval, latency, timeout);
                self.observer.on_connection_settings_change(&self.settings);
            }
            StackEvent::ProcedureCompleted { result, .. } => {
                self.on_procedure_completed(now, result)?;
            }
            StackEvent::Service { service, uuid, .. } => {
                if self.discovery.on_service(service, uuid) {
                    debug!(service, "throughput service found");
                }
            }
            StackEvent::Characteristic {
                characteristic,
                uuid,
                ..
            } => {
                if self
                    .discovery
                    .on_characteristic(characteristic, uuid)
                    .is_some()
                {
                    self.observer
                        .on_characteristics_found(self.discovery.found());
                }
            }
            StackEvent::CharacteristicValue {
                connection,
                characteristic,
                opcode,
                value,
            } => {
                self.on_characteristic_value(now, connection, characteristic, opcode, value)?;
            }
            StackEvent::MtuExchanged { mtu, .. } => {
                self.settings.mtu_size = mtu;
                self.observer.on_connection_settings_change(&self.settings);
            }
            StackEvent::PhyStatus { phy, .. } => {
                self.phy = phy;
                self.observer.on_phy_change(phy);
            }
            StackEvent::ConnectionClosed { reason, .. } => {
                debug!(%reason, "connection closed");
                self.timers.stop(Timer::RssiRefresh);
                self.timers.stop(Timer::ResultTimeout);
                self.set_state(State::Disconnected);
                self.reset_variables();
                self.scanning_start()?;
            }
            StackEvent::Rssi { rssi, .. } => {
                self.rssi = rssi;
                self.observer.on_rssi_change(rssi);
            }
            StackEvent::TxPower { power_level, .. } => {
                if self.state != State::Test {
                    self.tx_power = i16::from(power_level);
                    self.observer.on_tx_power_change(self.tx_power);
                }
            }
            StackEvent::ServerCharacteristicStatus { .. }
            | StackEvent::ServerAttributeValue { .. } => {}
        }
        Ok(())
    }

    /// Advance a running test: stop on expiry and exchange the result
    pub fn step(&mut self, now: Instant) -> Result<(), Error> {
        if !self.enabled || self.state != State::Test {
            return Ok(());
        }
        if self.mode.time_expired(now) {
            self.finish_requested = true;
        }
        if self.finish_requested && !self.awaiting_result {
            self.request_transmission_off(now)?;
        }
        Ok(())
    }

    /// The earliest time at which [`handle_timeout`](Self::handle_timeout) has work to do
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.peek()
    }

    /// Process timers that have expired by `now`
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        while let Some((timer, _)) = self.timers.expire_before(now) {
            trace!(?timer, "timeout");
            match timer {
                Timer::RssiRefresh => {
                    self.timers
                        .set(Timer::RssiRefresh, now + self.config.refresh_interval);
                    if let (Some(conn), true) = (self.connection, self.state != State::Test) {
                        self.stack.get_rssi(conn)?;
                    }
                }
                Timer::ResultTimeout => {
                    if self.state == State::Test && self.awaiting_result {
                        debug!("no result from peer");
                        self.finish(now);
                    }
                }
                Timer::IndicationTimeout => {}
            }
        }
        Ok(())
    }

    /// Ask the peripheral to start transmitting
    pub fn start(&mut self, now: Instant) -> Result<(), Error> {
        if !self.enabled || self.state != State::Subscribed {
            return Err(Error::InvalidState);
        }
        self.handle_start(now, true)
    }

    /// Ask the peripheral to stop at the next step
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.enabled || self.state != State::Test {
            return Err(Error::InvalidState);
        }
        self.finish_requested = true;
        Ok(())
    }

    /// Change the stop condition of subsequent tests
    pub fn set_mode(&mut self, mode: ModeConfig) -> Result<(), Error> {
        self.check_idle()?;
        self.mode.set_config(mode);
        self.observer.on_mode_change(mode);
        Ok(())
    }

    /// Change the largest ATT MTU to negotiate
    pub fn set_mtu_size(&mut self, mtu: u16) -> Result<(), Error> {
        self.check_idle()?;
        self.mtu = self.stack.set_max_mtu(mtu)?;
        self.settings.mtu_size = self.mtu;
        self.observer.on_connection_settings_change(&self.settings);
        Ok(())
    }

    /// Change TX power and sleep settings, then restart scanning to apply them
    pub fn set_tx_power(
        &mut self,
        power: i16,
        power_control: bool,
        deep_sleep: bool,
    ) -> Result<(), Error> {
        self.check_idle()?;
        self.tx_power_requested = power;
        self.power_control = power_control;
        self.deep_sleep = deep_sleep;
        self.scanning_restart()
    }

    /// Request new parameters for the open connection
    pub fn set_connection_parameters(&mut self, params: ConnectionParameters) -> Result<(), Error> {
        let conn = self.connected_idle()?;
        self.params = params;
        self.stack.set_connection_parameters(conn, &params)?;
        Ok(())
    }

    /// Change the parameters proposed for future connections
    ///
    /// Takes effect when scanning next starts.
    pub fn set_default_connection_parameters(
        &mut self,
        params: ConnectionParameters,
    ) -> Result<(), Error> {
        self.check_idle()?;
        self.params = params;
        Ok(())
    }

    /// Select the data mechanism from its client configuration value
    pub fn set_type(&mut self, value: u8) -> Result<(), Error> {
        self.check_idle()?;
        self.test_type = TestType::from_u8(value).ok_or(Error::InvalidType)?;
        Ok(())
    }

    /// Restart scanning on `phy`
    pub fn set_scan_phy(&mut self, phy: Phy) -> Result<(), Error> {
        if !self.enabled || self.state != State::Disconnected {
            return Err(Error::InvalidState);
        }
        self.scanning_stop()?;
        self.scan_phy = phy;
        self.scanning_start()
    }

    /// Request `phy` for the open connection
    pub fn set_connection_phy(&mut self, phy: Phy) -> Result<(), Error> {
        let conn = self.connected_idle()?;
        self.stack.set_preferred_phy(conn, phy, phy.accepted())?;
        Ok(())
    }

    /// PHY to request for the next connection
    pub fn set_default_phy(&mut self, phy: Phy) -> Result<(), Error> {
        if !self.enabled || self.state != State::Disconnected {
            return Err(Error::InvalidState);
        }
        self.phy = phy;
        Ok(())
    }

    /// Move to the next PHY
    ///
    /// While connected, cycles the connection through 1M, 2M, 125k coded and 500k coded, falling
    /// back to 1M when the stack refuses. While disconnected, toggles scanning between 1M and
    /// 125k coded.
    pub fn change_phy(&mut self) -> Result<(), Error> {
        if !self.enabled {
            return Err(Error::InvalidState);
        }
        match self.state {
            State::Connected | State::Subscribed => {
                let next = self.phy.next();
                match self.set_connection_phy(next) {
                    Err(e) if next != Phy::Le1M => {
                        debug!(phy = %next, error = %e, "PHY refused, falling back to 1M");
                        self.set_connection_phy(Phy::Le1M)
                    }
                    res => res,
                }
            }
            State::Disconnected => match self.scan_phy {
                Phy::Le1M => self.set_scan_phy(Phy::Coded125k),
                _ => self.set_scan_phy(Phy::Le1M),
            },
            State::Test | State::TestFinish => Err(Error::InvalidState),
        }
    }

    /// Allow connections to `address`
    ///
    /// Returns whether the address was newly added.
    pub fn allowlist_add(&mut self, address: Address) -> Result<bool, Error> {
        self.check_idle()?;
        Ok(self.allowlist.add(address, AddressType::Public))
    }

    /// Allow connections to every device
    pub fn allowlist_clear(&mut self) -> Result<(), Error> {
        self.check_idle()?;
        self.allowlist.clear();
        Ok(())
    }

    /// Drop the connection or the running scan and start over with the current settings
    pub fn scanning_restart(&mut self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        let close = self.state != State::Disconnected;
        match (close, self.connection) {
            (true, Some(conn)) => self.stack.connection_close(conn)?,
            _ => self.scanning_stop()?,
        }
        self.set_state(State::Disconnected);
        self.reset_variables();
        if !close {
            self.scanning_start()?;
        }
        Ok(())
    }

    /// Whether the application may enter deep sleep
    pub fn is_ok_to_sleep(&self) -> bool {
        !(self.enabled && !self.deep_sleep && self.state == State::Test)
    }

    /// Whether [`enable`](Self::enable) has succeeded
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// Discovery step
    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    /// Current allowlist
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Snapshot of the central's settings, link and counters
    pub fn status(&self) -> TestStatus {
        TestStatus {
            role: Role::Central,
            state: self.state,
            discovery: self.discovery.state(),
            mode: self.mode.config(),
            test_type: Some(self.test_type),
            phy: self.phy,
            scan_phy: self.scan_phy,
            tx_power_requested: self.tx_power_requested,
            tx_power: self.tx_power,
            power_control: self.power_control,
            deep_sleep: self.deep_sleep,
            rssi: self.rssi,
            connection: self.settings,
            requested_parameters: self.params,
            notifications: self.notifications,
            indications: self.indications,
            report: self.report,
        }
    }

    /// The stack handle
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The stack handle, mutably
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// The observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    fn check_idle(&self) -> Result<(), Error> {
        match self.enabled && self.state != State::Test {
            true => Ok(()),
            false => Err(Error::InvalidState),
        }
    }

    fn connected_idle(&self) -> Result<ConnectionHandle, Error> {
        match (self.enabled, self.state, self.connection) {
            (true, State::Connected | State::Subscribed, Some(conn)) => Ok(conn),
            _ => Err(Error::InvalidState),
        }
    }

    fn handle_scan_report(&mut self, report: ScanReport) -> Result<(), Error> {
        if self.discovery.state() != DiscoveryState::Scanning
            || !gatt::advertises_name(&report.data, self.config.device_name.as_bytes())
        {
            return Ok(());
        }
        if !self.allowlist.allows(&report.address) {
            trace!(address = %report.address, "not on the allowlist");
            return Ok(());
        }

        info!(address = %report.address, "scanning stop");
        self.stack.scanner_stop()?;
        let conn = match self
            .stack
            .connection_open(report.address, report.address_type, self.phy)
        {
            Err(StackError::INVALID_PARAMETER) if self.phy != Phy::Le1M => {
                warn!(phy = %self.phy, "connection PHY is not supported, using 1M");
                self.phy = Phy::Le1M;
                self.stack
                    .connection_open(report.address, report.address_type, self.phy)?
            }
            res => res?,
        };
        self.connection = Some(conn);
        self.set_discovery_state(DiscoveryState::Connecting);
        Ok(())
    }

    fn on_procedure_completed(&mut self, now: Instant, result: u16) -> Result<(), Error> {
        let Some(next) = self.discovery.complete(result)? else {
            return Ok(());
        };
        let conn = self.connection.ok_or(Error::InvalidState)?;
        self.discovery.request(&mut self.stack, conn, next)?;
        match next {
            DiscoveryState::EnablingIndication => {
                self.notifications = true;
                self.observer.on_notification_change(true);
            }
            DiscoveryState::EnablingTransmissionControl => {
                self.indications = true;
                self.observer.on_indication_change(true);
            }
            DiscoveryState::Subscribed => {
                self.set_state(State::Subscribed);
                self.restart_refresh_timer_at(now);
            }
            _ => {}
        }
        self.set_discovery_state(next);
        Ok(())
    }

    fn on_characteristic_value(
        &mut self,
        now: Instant,
        connection: ConnectionHandle,
        characteristic: u16,
        opcode: AttOpcode,
        value: Bytes,
    ) -> Result<(), Error> {
        match self.discovery.lookup(characteristic) {
            Some(Characteristic::Transmission) => {
                let on = value.first().copied().unwrap_or(gatt::TRANSMISSION_OFF);
                match (on, self.state) {
                    (gatt::TRANSMISSION_OFF, State::Test) => self.finish_requested = true,
                    (gatt::TRANSMISSION_OFF, _) => {}
                    (_, State::Subscribed) => self.handle_start(now, false)?,
                    _ => {}
                }
            }
            Some(Characteristic::Result) => {
                if opcode != AttOpcode::Indication {
                    return Ok(());
                }
                self.stack.send_characteristic_confirmation(connection)?;
                if let Some(bytes) = value.get(..4) {
                    let mut buf = [0; 4];
                    buf.copy_from_slice(bytes);
                    self.report.peer_throughput = Some(u32::from_le_bytes(buf));
                }
                if self.state == State::Test {
                    self.finish(now);
                }
            }
            Some(c @ (Characteristic::Notifications | Characteristic::Indications)) => {
                if c == Characteristic::Indications && opcode == AttOpcode::Indication {
                    self.stack.send_characteristic_confirmation(connection)?;
                }
                if self.state != State::Test {
                    trace!(len = value.len(), "data outside of a test");
                    return Ok(());
                }
                self.sequence.check(&value);
                let len = value.len() as u16;
                if self.settings.data_size != len {
                    self.settings.data_size = len;
                    self.observer.on_data_size_change(len);
                }
                if self.mode.record(u32::from(len)) {
                    self.finish_requested = true;
                }
            }
            None => {}
        }
        Ok(())
    }

    fn handle_start(&mut self, now: Instant, send_transmission_on: bool) -> Result<(), Error> {
        if send_transmission_on {
            let conn = self.connection.ok_or(Error::InvalidState)?;
            let handle = self
                .discovery
                .handle(Characteristic::Transmission)
                .ok_or(Error::InvalidState)?;
            self.stack
                .write_without_response(conn, handle, &[self.test_type.flag()])?;
        }

        self.report = TestReport {
            role: Some(Role::Central),
            test_type: Some(self.test_type),
            ..TestReport::default()
        };
        self.sequence.reset();
        self.finish_requested = false;
        self.awaiting_result = false;
        self.measured = false;
        self.timers.stop(Timer::RssiRefresh);
        self.timers.stop(Timer::ResultTimeout);

        self.set_state(State::Test);
        self.observer.on_start();
        self.mode.start(now);
        Ok(())
    }

    fn measure(&mut self, now: Instant) {
        if self.measured {
            return;
        }
        self.measured = true;
        let m = self.mode.measure(now);
        self.report.bytes = m.bytes;
        self.report.operations = m.operations;
        self.report.elapsed = m.elapsed;
        self.report.throughput = m.throughput;
    }

    /// Measure, then tell the peer to stop and wait for its result
    fn request_transmission_off(&mut self, now: Instant) -> Result<(), Error> {
        self.measure(now);
        let conn = self.connection.ok_or(Error::InvalidState)?;
        let handle = self
            .discovery
            .handle(Characteristic::Transmission)
            .ok_or(Error::InvalidState)?;
        self.stack
            .write_without_response(conn, handle, &[gatt::TRANSMISSION_OFF])?;
        self.awaiting_result = true;
        self.timers
            .set(Timer::ResultTimeout, now + self.config.result_timeout);
        Ok(())
    }

    fn finish(&mut self, now: Instant) {
        self.measure(now);
        self.finish_requested = false;
        self.awaiting_result = false;
        self.timers.stop(Timer::ResultTimeout);
        self.report.lost = self.sequence.lost();
        self.report.errors = self.sequence.errors();
        self.observer.on_finish(&self.report);
        self.set_state(State::Subscribed);
        self.restart_refresh_timer_at(now);
    }

    fn scanning_start(&mut self) -> Result<(), Error> {
        self.stack.configure_afh(self.tx_power_requested > 10)?;
        self.discovery.clear_found();

        let (_, max) = self
            .stack
            .set_tx_power(gatt::TX_POWER_MIN, self.tx_power_requested.saturating_mul(10))?;
        self.tx_power = max / 10;
        self.observer.on_tx_power_change(self.tx_power);

        self.settings.mtu_size = self.stack.set_max_mtu(self.mtu)?;
        self.stack.set_default_connection_parameters(&self.params)?;

        match self.stack.scanner_start(self.scan_phy) {
            Err(e) if self.scan_phy != Phy::Le1M => {
                warn!(phy = %self.scan_phy, error = %e, "scanning PHY is not supported, using 1M");
                self.scan_phy = Phy::Le1M;
                self.stack.scanner_start(self.scan_phy)?;
            }
            res => res?,
        }
        info!(phy = %self.scan_phy, "scanning started");
        self.set_discovery_state(DiscoveryState::Scanning);
        Ok(())
    }

    fn scanning_stop(&mut self) -> Result<(), Error> {
        if self.discovery.state() == DiscoveryState::Scanning {
            info!("scanning stop");
            self.stack.scanner_stop()?;
            self.set_discovery_state(DiscoveryState::Idle);
        }
        Ok(())
    }

    fn reset_variables(&mut self) {
        self.connection = None;
        if self.discovery.state() != DiscoveryState::Idle {
            self.discovery.reset();
            self.observer
                .on_discovery_state_change(DiscoveryState::Idle);
        } else {
            self.discovery.reset();
        }
        self.mode.reset();
        self.sequence.reset();
        self.notifications = false;
        self.indications = false;
        self.finish_requested = false;
        self.awaiting_result = false;
        self.measured = false;
        self.report = TestReport {
            role: Some(Role::Central),
            ..TestReport::default()
        };
    }

    fn restart_refresh_timer_at(&mut self, now: Instant) {
        self.timers
            .set(Timer::RssiRefresh, now + self.config.refresh_interval);
    }

    fn set_state(&mut self, state: State) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "central state");
        self.state = state;
        self.observer.on_state_change(state);
    }

    fn set_discovery_state(&mut self, state: DiscoveryState) {
        if self.discovery.set_state(state) {
            self.observer.on_discovery_state_change(state);
        }
    }
}
