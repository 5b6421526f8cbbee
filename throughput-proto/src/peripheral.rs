use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::{
    config::PeripheralConfig,
    discovery::{Characteristic, Characteristics, Discovery, DiscoveryState},
    gatt,
    mode::ModeController,
    payload::PayloadSizer,
    timer::{Timer, TimerTable},
    AdvertisingSet, AttOpcode, ConnectionHandle, ConnectionSettings, Error, GattStack,
    LogObserver, ModeConfig, Observer, PayloadGenerator, Phy, Role, SequenceTracker, ServerStatus,
    StackError, StackEvent, State, TestReport, TestStatus, TestType,
};

/// Transmitting side of the throughput test
///
/// Advertises the throughput service, tracks which of its characteristics the connected client
/// has subscribed to, and pushes generated payloads as notifications or indications while a test
/// runs. At the end of a test the measured throughput is indicated on the result characteristic.
///
/// The peripheral also acts as a client of the central's server: it discovers the central's
/// characteristics after connecting and counts data the central pushes in a test the central
/// started.
pub struct Peripheral<S, O = LogObserver> {
    stack: S,
    observer: O,
    config: PeripheralConfig,
    enabled: bool,
    state: State,
    discovery: Discovery,
    connection: Option<ConnectionHandle>,
    mode: ModeController,
    generator: PayloadGenerator,
    sequence: SequenceTracker,
    sizer: PayloadSizer,
    timers: TimerTable,
    test_type: Option<TestType>,
    phy: Phy,
    tx_power_requested: i16,
    tx_power: i16,
    power_control: bool,
    deep_sleep: bool,
    mtu: u16,
    rssi: i8,
    settings: ConnectionSettings,
    notifications: bool,
    indications: bool,
    result_indicated: bool,
    transmission_indicated: bool,
    report: TestReport,
    /// The running test was started by the central, which transmits
    central_test: bool,
    finish_requested: bool,
    /// The stop came from the client, which needs no "transmission off" back
    remote_stop: bool,
    indication_pending: bool,
    indication_confirmed: bool,
    indication_timed_out: bool,
    /// "Transmission off" still has to be notified before the result
    off_pending: bool,
    result_sent: bool,
}

impl<S: GattStack, O: Observer> Peripheral<S, O> {
    /// Create a disabled peripheral
    pub fn new(config: PeripheralConfig, stack: S, observer: O) -> Self {
        Self {
            stack,
            observer,
            enabled: false,
            state: State::Disconnected,
            discovery: Discovery::new(Characteristics::CLIENT),
            connection: None,
            mode: ModeController::new(config.mode),
            generator: PayloadGenerator::new(),
            sequence: SequenceTracker::new(),
            sizer: PayloadSizer::new(config.notification_size, config.indication_size),
            timers: TimerTable::default(),
            test_type: None,
            phy: Phy::Le1M,
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
            notifications: false,
            indications: false,
            result_indicated: false,
            transmission_indicated: false,
            report: TestReport {
                role: Some(Role::Peripheral),
                ..TestReport::default()
            },
            central_test: false,
            finish_requested: false,
            remote_stop: false,
            indication_pending: false,
            indication_confirmed: false,
            indication_timed_out: false,
            off_pending: false,
            result_sent: false,
            config,
        }
    }

    /// Apply the configuration to the stack and start advertising
    pub fn enable(&mut self, _now: Instant) -> Result<(), Error> {
        self.state = State::Disconnected;
        self.observer.on_state_change(self.state);
        self.observer.on_role_set(Role::Peripheral);
        self.observer.on_mode_change(self.mode.config());
        self.mtu = self.stack.set_max_mtu(self.mtu)?;
        self.settings.mtu_size = self.mtu;
        self.advertising_start()?;
        self.enabled = true;
        Ok(())
    }

    /// Process an event from the stack
    ///
    /// Events are ignored until the peripheral is enabled.
    pub fn handle_event(&mut self, now: Instant, event: StackEvent) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        match event {
            StackEvent::ConnectionOpened {
                connection,
                address,
                ..
            } => {
                if self.state != State::Disconnected {
                    debug!(%address, "ignoring a second connection");
                    return Ok(());
                }
                info!(%address, "connection opened");
                self.advertising_stop()?;
                self.connection = Some(connection);
                self.set_state(State::Connected);
                self.refresh_connected_state();
                self.restart_refresh_timer_at(now);
                self.stack
                    .set_remote_power_reporting(connection, self.power_control)?;
                self.discovery.request(
                    &mut self.stack,
                    connection,
                    DiscoveryState::DiscoveringService,
                )?;
                self.set_discovery_state(DiscoveryState::DiscoveringService);
            }
            StackEvent::ConnectionClosed { reason, .. } => {
                debug!(%reason, "connection closed");
                self.timers.reset();
                self.set_state(State::Disconnected);
                self.reset_variables();
                self.advertising_start()?;
            }
            StackEvent::ConnectionParameters {
                connection,
                interval,
                latency,
                timeout,
                tx_size,
            } => {
                self.settings.mtu_size = self.stack.get_mtu(connection)?;
                self.settings.pdu_size = tx_size;
                self.settings.interval = interval;
                self.settings.latency = latency;
                self.settings.timeout = timeout;
                self.update_payload_sizes();

                let db = self.config.gattdb;
                self.publish(db.pdu_size, &[saturate_u8(tx_size)])?;
                self.publish(db.mtu_size, &[saturate_u8(self.settings.mtu_size)])?;
                self.publish(
                    db.connection_interval,
                    &u32::from(interval).to_le_bytes(),
                )?;
                self.publish(db.responder_latency, &u32::from(latency).to_le_bytes())?;
                self.publish(db.supervision_timeout, &u32::from(timeout).to_le_bytes())?;
                self.observer
                    .on_connection_timings_change(interval, latency, timeout);
            }
            StackEvent::MtuExchanged { mtu, .. } => {
                self.settings.mtu_size = mtu;
                self.update_payload_sizes();
                self.publish(self.config.gattdb.mtu_size, &[saturate_u8(mtu)])?;
            }
            StackEvent::PhyStatus { phy, .. } => {
                self.phy = phy;
                self.observer.on_phy_change(phy);
                self.publish(self.config.gattdb.connection_phy, &[phy as u8])?;
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
            StackEvent::ServerCharacteristicStatus {
                characteristic,
                status,
                client_config,
                ..
            } => self.on_server_status(characteristic, status, client_config),
            StackEvent::ServerAttributeValue {
                connection,
                attribute,
                value,
            } => {
                if attribute == self.config.gattdb.transmission_on {
                    self.on_transmission_write(now, connection, &value)?;
                }
            }
            StackEvent::Service { service, uuid, .. } => {
                self.discovery.on_service(service, uuid);
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
            StackEvent::ProcedureCompleted { result, .. } => {
                let Some(next) = self.discovery.complete(result)? else {
                    return Ok(());
                };
                let conn = self.connection.ok_or(Error::InvalidState)?;
                self.discovery.request(&mut self.stack, conn, next)?;
                self.set_discovery_state(next);
            }
            StackEvent::CharacteristicValue {
                connection,
                characteristic,
                opcode,
                value,
            } => self.on_characteristic_value(now, connection, characteristic, opcode, value)?,
            StackEvent::ScanReport(_) => {}
        }
        Ok(())
    }

    /// Send the next payload of a running test, or continue finishing one
    ///
    /// A send the stack refuses is retried on the next call.
    pub fn step(&mut self, now: Instant) -> Result<(), Error> {
        if !self.enabled || self.central_test {
            return Ok(());
        }
        match (self.state, self.test_type) {
            (State::Test, Some(TestType::Indication)) => self.step_indication(now),
            (State::Test, Some(TestType::Notification)) => self.step_notification(now),
            (State::TestFinish, _) => self.stop_test(now, false),
            _ => Ok(()),
        }
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
                    self.restart_refresh_timer_at(now);
                    if let (Some(conn), false) = (self.connection, self.state == State::Test) {
                        self.stack.get_rssi(conn)?;
                    }
                }
                Timer::IndicationTimeout => {
                    if self.indication_pending {
                        debug!(state = %self.state, "indication was not confirmed in time");
                        self.indication_pending = false;
                        self.indication_timed_out = true;
                    }
                }
                Timer::ResultTimeout => {}
            }
        }
        Ok(())
    }

    /// Start a test of the given client configuration type
    ///
    /// Fails with [`Error::InvalidType`] unless the client enabled that type.
    pub fn start(&mut self, now: Instant, test_type: u8) -> Result<(), Error> {
        if !self.enabled || self.state != State::Subscribed {
            return Err(Error::InvalidState);
        }
        let ty = match TestType::from_u8(test_type) {
            Some(TestType::Notification) if self.notifications => TestType::Notification,
            Some(TestType::Indication) if self.indications => TestType::Indication,
            _ => return Err(Error::InvalidType),
        };
        self.handle_start(now, ty, true)
    }

    /// Stop the running test at the next step
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

    /// Change TX power and sleep settings
    ///
    /// Drops the connection, or restarts advertising, so the power takes effect.
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
        match self.connection {
            Some(conn) => self.stack.connection_close(conn)?,
            None => self.advertising_start()?,
        }
        Ok(())
    }

    /// Change the maximum MTU and the payload size overrides
    ///
    /// An open connection is closed so the MTU is renegotiated.
    pub fn set_data_size(
        &mut self,
        mtu: u16,
        indication_size: u16,
        notification_size: u16,
    ) -> Result<(), Error> {
        self.check_idle()?;
        self.mtu = self.stack.set_max_mtu(mtu)?;
        self.sizer.set_requested(notification_size, indication_size);
        self.update_payload_sizes();
        if let Some(conn) = self.connection {
            self.stack.connection_close(conn)?;
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

    /// Discovery step against the central's server
    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    /// Requested and current payload sizes
    pub fn payload_sizes(&self) -> PayloadSizer {
        self.sizer
    }

    /// Largest ATT MTU the stack accepted
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Snapshot of the peripheral's settings, link and counters
    pub fn status(&self) -> TestStatus {
        TestStatus {
            role: Role::Peripheral,
            state: self.state,
            discovery: self.discovery.state(),
            mode: self.mode.config(),
            test_type: self.test_type,
            phy: self.phy,
            scan_phy: Phy::Le1M,
            tx_power_requested: self.tx_power_requested,
            tx_power: self.tx_power,
            power_control: self.power_control,
            deep_sleep: self.deep_sleep,
            rssi: self.rssi,
            connection: self.settings,
            requested_parameters: Default::default(),
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
        match self.enabled && !matches!(self.state, State::Test | State::TestFinish) {
            true => Ok(()),
            false => Err(Error::InvalidState),
        }
    }

    fn on_server_status(&mut self, characteristic: u16, status: ServerStatus, client_config: u8) {
        let db = self.config.gattdb;
        match status {
            ServerStatus::Confirmation => {
                if characteristic == db.result || characteristic == db.indications {
                    self.indication_confirmed = true;
                }
                return;
            }
            ServerStatus::ClientConfig => {}
        }

        if characteristic == db.notifications {
            self.notifications = client_config & gatt::CCCD_NOTIFICATION != 0;
            self.observer.on_notification_change(self.notifications);
        } else if characteristic == db.indications {
            self.indications = client_config & gatt::CCCD_INDICATION != 0;
            self.observer.on_indication_change(self.indications);
        } else if characteristic == db.result {
            self.result_indicated = client_config & gatt::CCCD_INDICATION != 0;
        } else if characteristic == db.transmission_on {
            self.transmission_indicated = client_config != gatt::CCCD_DISABLE;
        } else {
            return;
        }
        trace!(characteristic, client_config, "client configuration");
        self.refresh_connected_state();
    }

    /// Remote start or stop through the transmission characteristic
    fn on_transmission_write(
        &mut self,
        now: Instant,
        connection: ConnectionHandle,
        value: &[u8],
    ) -> Result<(), Error> {
        let data = value.first().copied().unwrap_or(gatt::TRANSMISSION_OFF);
        let mut accepted = false;
        match (data, self.state) {
            (gatt::TRANSMISSION_OFF, State::Test) => {
                self.finish_requested = true;
                self.remote_stop = true;
                accepted = true;
            }
            (gatt::TRANSMISSION_OFF, _) => {}
            (data, State::Subscribed) => {
                if let Some(ty) = self.select_type(data) {
                    self.handle_start(now, ty, false)?;
                    accepted = true;
                }
            }
            _ => {}
        }
        let attribute = self.config.gattdb.transmission_on;
        if let Err(e) = self
            .stack
            .send_user_write_response(connection, attribute, accepted)
        {
            debug!(error = %e, accepted, "write response not sent");
        }
        Ok(())
    }

    /// Test type for a remote start request
    ///
    /// When the client enabled both mechanisms, bit 0 of the request selects notifications and
    /// bit 1 indications. Otherwise whichever is enabled is used.
    fn select_type(&self, data: u8) -> Option<TestType> {
        match (self.notifications, self.indications) {
            (true, true) if data & TestType::Notification.flag() != 0 => {
                Some(TestType::Notification)
            }
            (true, true) if data & TestType::Indication.flag() != 0 => Some(TestType::Indication),
            (true, true) => None,
            (true, false) => Some(TestType::Notification),
            (false, true) => Some(TestType::Indication),
            (false, false) => None,
        }
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
                    (gatt::TRANSMISSION_OFF, State::Test) if self.central_test => {
                        self.central_test = false;
                        self.stop_test(now, false)?;
                    }
                    (gatt::TRANSMISSION_OFF, _) => {}
                    (on, State::Subscribed) => {
                        let ty = TestType::from_u8(on).unwrap_or(TestType::Notification);
                        self.central_test = true;
                        self.handle_start(now, ty, false)?;
                    }
                    _ => {}
                }
            }
            Some(Characteristic::Notifications | Characteristic::Indications) => {
                if opcode == AttOpcode::Indication {
                    self.stack.send_characteristic_confirmation(connection)?;
                }
                if self.state != State::Test || !self.central_test {
                    return Ok(());
                }
                self.sequence.check(&value);
                self.mode.record(value.len() as u32);
            }
            Some(Characteristic::Result) | None => {}
        }
        Ok(())
    }

    fn handle_start(&mut self, now: Instant, ty: TestType, send_on: bool) -> Result<(), Error> {
        let conn = self.connection.ok_or(Error::InvalidState)?;
        if send_on {
            self.stack.send_notification(
                conn,
                self.config.gattdb.transmission_on,
                &[gatt::TRANSMISSION_STARTED],
            )?;
        }

        self.report = TestReport {
            role: Some(Role::Peripheral),
            test_type: Some(ty),
            ..TestReport::default()
        };
        self.reset_test_flags();
        self.sequence.reset();
        self.generator.reset();
        self.timers.stop(Timer::IndicationTimeout);
        self.timers.stop(Timer::RssiRefresh);

        self.test_type = Some(ty);
        let size = self.sizer.for_type(ty);
        self.generator.generate(usize::from(size));
        if self.settings.data_size != size {
            self.settings.data_size = size;
            self.observer.on_data_size_change(size);
        }

        self.set_state(State::Test);
        self.observer.on_start();
        self.mode.start(now);
        Ok(())
    }

    fn step_notification(&mut self, now: Instant) -> Result<(), Error> {
        if self.finish_requested || self.mode.time_expired(now) {
            return self.stop_test(now, !self.remote_stop);
        }
        let conn = self.connection.ok_or(Error::InvalidState)?;
        let payload = self.generator.payload();
        match self
            .stack
            .send_notification(conn, self.config.gattdb.notifications, payload)
        {
            Ok(()) => {
                let len = payload.len() as u32;
                let limit = self.mode.record(len);
                self.generator.generate(usize::from(self.sizer.notification()));
                if limit {
                    return self.stop_test(now, !self.remote_stop);
                }
            }
            Err(e) => trace!(error = %e, "notification not sent, retrying"),
        }
        Ok(())
    }

    fn step_indication(&mut self, now: Instant) -> Result<(), Error> {
        if self.indication_pending {
            if !self.indication_confirmed {
                return Ok(());
            }
            self.indication_pending = false;
            self.indication_confirmed = false;
            self.timers.stop(Timer::IndicationTimeout);
            let len = self.generator.payload().len() as u32;
            if self.mode.record(len) {
                return self.stop_test(now, !self.remote_stop);
            }
            self.generator.generate(usize::from(self.sizer.indication()));
        }
        if self.indication_timed_out || self.finish_requested || self.mode.time_expired(now) {
            return self.stop_test(now, !self.remote_stop);
        }

        let conn = self.connection.ok_or(Error::InvalidState)?;
        match self.stack.send_indication(
            conn,
            self.config.gattdb.indications,
            self.generator.payload(),
        ) {
            Ok(()) => {
                self.indication_pending = true;
                self.timers
                    .set(Timer::IndicationTimeout, now + self.config.indication_timeout);
            }
            Err(e) => trace!(error = %e, "indication not sent, retrying"),
        }
        Ok(())
    }

    /// Drive the end of a test: announce it, indicate the result, wait for the confirmation
    fn stop_test(&mut self, now: Instant, send_off: bool) -> Result<(), Error> {
        if self.state == State::Test {
            debug!(send_off, "stopping test");
            self.set_state(State::TestFinish);
            self.timers.stop(Timer::IndicationTimeout);
            self.reset_test_flags();
            self.off_pending = send_off;
            let m = self.mode.measure(now);
            self.report.bytes = m.bytes;
            self.report.operations = m.operations;
            self.report.elapsed = m.elapsed;
            self.report.throughput = m.throughput;
            self.report.lost = self.sequence.lost();
            self.report.errors = self.sequence.errors();
        }
        let Some(conn) = self.connection else {
            return Ok(());
        };
        let db = self.config.gattdb;

        if self.off_pending {
            match self
                .stack
                .send_notification(conn, db.transmission_on, &[gatt::TRANSMISSION_OFF])
            {
                Ok(()) => self.off_pending = false,
                Err(e) => {
                    trace!(error = %e, "transmission off not sent, retrying");
                    return Ok(());
                }
            }
        }

        if !self.result_sent {
            let result = self.report.throughput.to_le_bytes();
            match self.stack.send_indication(conn, db.result, &result) {
                Ok(()) => {
                    self.result_sent = true;
                    self.indication_pending = true;
                    self.timers
                        .set(Timer::IndicationTimeout, now + self.config.indication_timeout);
                }
                Err(e) => {
                    trace!(error = %e, "result not sent, retrying");
                    return Ok(());
                }
            }
        }

        if self.indication_confirmed || self.indication_timed_out {
            self.finish_test(now);
        }
        Ok(())
    }

    fn finish_test(&mut self, now: Instant) {
        self.timers.stop(Timer::IndicationTimeout);
        self.reset_test_flags();
        self.result_sent = false;
        self.test_type = None;
        self.central_test = false;
        self.set_state(self.connected_state());
        self.restart_refresh_timer_at(now);
        self.observer.on_finish(&self.report);
    }

    fn reset_test_flags(&mut self) {
        self.finish_requested = false;
        self.remote_stop = false;
        self.indication_pending = false;
        self.indication_confirmed = false;
        self.indication_timed_out = false;
        self.off_pending = false;
        self.result_sent = false;
    }

    /// Re-derive `Connected` or `Subscribed` from the client configuration
    fn refresh_connected_state(&mut self) {
        if matches!(self.state, State::Connected | State::Subscribed) {
            self.set_state(self.connected_state());
        }
    }

    fn connected_state(&self) -> State {
        let ready = (self.notifications || self.indications)
            && self.result_indicated
            && self.transmission_indicated;
        match ready {
            true => State::Subscribed,
            false => State::Connected,
        }
    }

    fn update_payload_sizes(&mut self) {
        self.sizer
            .update(self.settings.pdu_size, self.settings.mtu_size);
        self.observer.on_connection_settings_change(&self.settings);
    }

    fn publish(&mut self, attribute: u16, value: &[u8]) -> Result<(), Error> {
        self.stack.write_attribute_value(attribute, value)?;
        self.stack.notify_all(attribute, value)?;
        Ok(())
    }

    fn advertising_start(&mut self) -> Result<(), Error> {
        self.advertising_stop()?;

        let (_, max) = self
            .stack
            .set_tx_power(gatt::TX_POWER_MIN, self.tx_power_requested.saturating_mul(10))?;
        self.tx_power = max / 10;
        self.observer.on_tx_power_change(self.tx_power);

        let data = gatt::advertising_data(&self.config.device_name);
        self.stack.advertiser_start(AdvertisingSet::Legacy, &data)?;
        if self.config.coded_advertising {
            match self.stack.advertiser_start(AdvertisingSet::Coded, &data) {
                Err(StackError::INVALID_PARAMETER) => {
                    warn!("coded PHY advertising is not supported");
                }
                res => res?,
            }
        }
        info!(name = %self.config.device_name, "advertising started");
        Ok(())
    }

    fn advertising_stop(&mut self) -> Result<(), Error> {
        self.stack.advertiser_stop(AdvertisingSet::Legacy)?;
        if self.config.coded_advertising {
            self.stack.advertiser_stop(AdvertisingSet::Coded)?;
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
        self.notifications = false;
        self.indications = false;
        self.result_indicated = false;
        self.transmission_indicated = false;
        self.central_test = false;
        self.test_type = None;
        self.reset_test_flags();
        self.mode.reset();
        self.sequence.reset();
        self.settings = ConnectionSettings {
            mtu_size: self.mtu,
            ..ConnectionSettings::default()
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
        debug!(from = %self.state, to = %state, "peripheral state");
        self.state = state;
        self.observer.on_state_change(state);
    }

    fn set_discovery_state(&mut self, state: DiscoveryState) {
        if self.discovery.set_state(state) {
            self.observer.on_discovery_state_change(state);
        }
    }
}

fn saturate_u8(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        loopback::{Command, SimStack, CONNECTION},
        Address, AddressType, GattDb,
    };

    const DB: GattDb = GattDb {
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
    };

    fn enabled(config: PeripheralConfig, stack: SimStack) -> (Peripheral<SimStack>, Instant) {
        let now = Instant::now();
        let mut peripheral = Peripheral::new(config, stack, LogObserver);
        peripheral.enable(now).unwrap();
        (peripheral, now)
    }

    fn open(peripheral: &mut Peripheral<SimStack>, now: Instant) {
        peripheral
            .handle_event(
                now,
                StackEvent::ConnectionOpened {
                    connection: CONNECTION,
                    address: Address([1, 2, 3, 4, 5, 6]),
                    address_type: AddressType::Public,
                },
            )
            .unwrap();
    }

    fn client_config(characteristic: u16, client_config: u8) -> StackEvent {
        StackEvent::ServerCharacteristicStatus {
            connection: CONNECTION,
            characteristic,
            status: ServerStatus::ClientConfig,
            client_config,
        }
    }

    fn confirmation(characteristic: u16) -> StackEvent {
        StackEvent::ServerCharacteristicStatus {
            connection: CONNECTION,
            characteristic,
            status: ServerStatus::Confirmation,
            client_config: 0,
        }
    }

    fn transmission_write(value: u8) -> StackEvent {
        StackEvent::ServerAttributeValue {
            connection: CONNECTION,
            attribute: DB.transmission_on,
            value: Bytes::copy_from_slice(&[value]),
        }
    }

    /// A value the central pushes on one of its own characteristics
    fn central_value(characteristic: u16, value: &[u8]) -> StackEvent {
        StackEvent::CharacteristicValue {
            connection: CONNECTION,
            characteristic,
            opcode: AttOpcode::Notification,
            value: Bytes::copy_from_slice(value),
        }
    }

    fn transmission_off_sent(peripheral: &Peripheral<SimStack>) -> bool {
        peripheral.stack().history().contains(&Command::Notification {
            characteristic: DB.transmission_on,
            value: Bytes::from_static(&[gatt::TRANSMISSION_OFF]),
        })
    }

    /// Connect and let the client subscribe to the data characteristics in `types`
    fn subscribed(types: u8) -> (Peripheral<SimStack>, Instant) {
        let (mut peripheral, now) = enabled(PeripheralConfig::default(), SimStack::new());
        open(&mut peripheral, now);
        for event in [
            client_config(DB.notifications, types & gatt::CCCD_NOTIFICATION),
            client_config(DB.indications, types & gatt::CCCD_INDICATION),
            client_config(DB.transmission_on, gatt::CCCD_NOTIFICATION),
            client_config(DB.result, gatt::CCCD_INDICATION),
        ] {
            peripheral.handle_event(now, event).unwrap();
        }
        assert_eq!(peripheral.state(), State::Subscribed);
        peripheral.stack_mut().clear_history();
        (peripheral, now)
    }

    fn advertised(peripheral: &Peripheral<SimStack>) -> Vec<AdvertisingSet> {
        peripheral
            .stack()
            .calls("advertiser_start")
            .filter_map(|c| match c {
                Command::AdvertiserStart { set, .. } => Some(*set),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn advertises_on_both_sets() {
        let (peripheral, _) = enabled(PeripheralConfig::default(), SimStack::new());
        assert_eq!(
            advertised(&peripheral),
            [AdvertisingSet::Legacy, AdvertisingSet::Coded]
        );
        assert_eq!(peripheral.state(), State::Disconnected);

        let mut stack = SimStack::new();
        stack.supported_phys(&[Phy::Le1M]);
        let (peripheral, _) = enabled(PeripheralConfig::default(), stack);
        assert_eq!(advertised(&peripheral), [AdvertisingSet::Legacy]);
        assert!(peripheral.is_enabled());
    }

    #[test]
    fn subscription_tracking() {
        let (mut peripheral, now) = enabled(PeripheralConfig::default(), SimStack::new());
        open(&mut peripheral, now);
        assert_eq!(peripheral.state(), State::Connected);
        assert_eq!(
            peripheral.discovery_state(),
            DiscoveryState::DiscoveringService
        );
        assert!(peripheral.stack().calls("advertiser_stop").count() > 0);

        for event in [
            client_config(DB.notifications, gatt::CCCD_NOTIFICATION),
            client_config(DB.transmission_on, gatt::CCCD_NOTIFICATION),
        ] {
            peripheral.handle_event(now, event).unwrap();
        }
        assert_eq!(peripheral.state(), State::Connected);
        peripheral
            .handle_event(now, client_config(DB.result, gatt::CCCD_INDICATION))
            .unwrap();
        assert_eq!(peripheral.state(), State::Subscribed);

        peripheral
            .handle_event(now, client_config(DB.notifications, gatt::CCCD_DISABLE))
            .unwrap();
        assert_eq!(peripheral.state(), State::Connected);
        assert!(!peripheral.status().notifications);
    }

    #[test]
    fn remote_write_starts_a_test() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        let write = transmission_write;

        peripheral.handle_event(now, write(1)).unwrap();
        assert_eq!(peripheral.state(), State::Test);
        assert_eq!(peripheral.status().test_type, Some(TestType::Notification));
        assert_eq!(
            peripheral.stack().history(),
            [Command::UserWriteResponse {
                attribute: DB.transmission_on,
                accepted: true
            }]
        );

        peripheral.handle_event(now, write(1)).unwrap();
        assert_eq!(
            peripheral.stack().history().last(),
            Some(&Command::UserWriteResponse {
                attribute: DB.transmission_on,
                accepted: false
            })
        );

        peripheral.handle_event(now, write(0)).unwrap();
        peripheral.step(now).unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
        assert!(!transmission_off_sent(&peripheral));
        assert_matches!(
            peripheral.stack().history().last(),
            Some(Command::Indication { characteristic, .. }) if *characteristic == DB.result
        );
    }

    #[test]
    fn local_stop_announces_transmission_off() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        peripheral.start(now, 1).unwrap();
        peripheral.step(now).unwrap();
        peripheral.stop().unwrap();
        peripheral.step(now).unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
        assert!(transmission_off_sent(&peripheral));
    }

    #[test]
    fn refused_write_response_is_not_an_error() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        peripheral
            .stack_mut()
            .fail_next("send_user_write_response", StackError::INVALID_STATE)
            .fail_next("send_user_write_response", StackError::INVALID_STATE);

        peripheral.handle_event(now, transmission_write(1)).unwrap();
        assert_eq!(peripheral.state(), State::Test);
        peripheral.step(now).unwrap();

        peripheral.handle_event(now, transmission_write(0)).unwrap();
        peripheral.step(now).unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
    }

    #[test]
    fn central_started_test_is_received() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        for (characteristic, uuid) in [(0x30, gatt::NOTIFICATIONS), (0x36, gatt::TRANSMISSION_ON)] {
            peripheral
                .handle_event(
                    now,
                    StackEvent::Characteristic {
                        connection: CONNECTION,
                        characteristic,
                        uuid,
                    },
                )
                .unwrap();
        }

        peripheral
            .handle_event(now, central_value(0x36, &[TestType::Notification.flag()]))
            .unwrap();
        assert_eq!(peripheral.state(), State::Test);
        assert_eq!(peripheral.status().test_type, Some(TestType::Notification));
        peripheral.step(now).unwrap();
        assert_eq!(peripheral.stack().calls("send_notification").count(), 0);

        for counter in [0, 1, 5] {
            peripheral
                .handle_event(now, central_value(0x30, &[counter, b'a', b'b', b'c']))
                .unwrap();
        }

        let later = now + Duration::from_millis(100);
        peripheral
            .handle_event(later, central_value(0x36, &[gatt::TRANSMISSION_OFF]))
            .unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
        assert!(!transmission_off_sent(&peripheral));
        assert_matches!(
            peripheral.stack().history().last(),
            Some(Command::Indication { characteristic, .. }) if *characteristic == DB.result
        );

        peripheral
            .handle_event(later, confirmation(DB.result))
            .unwrap();
        peripheral.step(later).unwrap();
        assert_eq!(peripheral.state(), State::Subscribed);
        let report = peripheral.status().report;
        assert_eq!(report.operations, 3);
        assert_eq!(report.bytes, 12);
        assert_eq!(report.lost, 3);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn start_requires_an_enabled_type() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        assert_matches!(peripheral.start(now, 2), Err(Error::InvalidType));
        assert_matches!(peripheral.start(now, 0), Err(Error::InvalidType));
        assert_matches!(peripheral.start(now, 7), Err(Error::InvalidType));
        assert_eq!(peripheral.state(), State::Subscribed);

        peripheral.start(now, 1).unwrap();
        assert_eq!(
            peripheral.stack().history(),
            [Command::Notification {
                characteristic: DB.transmission_on,
                value: Bytes::from_static(&[gatt::TRANSMISSION_STARTED]),
            }]
        );
        assert_matches!(peripheral.start(now, 1), Err(Error::InvalidState));
        assert_matches!(
            peripheral.set_data_size(247, 0, 0),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn connection_parameters_are_published() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        peripheral
            .handle_event(
                now,
                StackEvent::ConnectionParameters {
                    connection: CONNECTION,
                    interval: 40,
                    latency: 2,
                    timeout: 300,
                    tx_size: 251,
                },
            )
            .unwrap();

        let written = peripheral
            .stack()
            .calls("write_attribute_value")
            .cloned()
            .collect::<Vec<_>>();
        let attr = |attribute: u16, value: &[u8]| Command::WriteAttributeValue {
            attribute,
            value: Bytes::copy_from_slice(value),
        };
        assert_eq!(
            written,
            [
                attr(DB.pdu_size, &[251]),
                attr(DB.mtu_size, &[SimStack::MIN_MTU as u8]),
                attr(DB.connection_interval, &40u32.to_le_bytes()),
                attr(DB.responder_latency, &2u32.to_le_bytes()),
                attr(DB.supervision_timeout, &300u32.to_le_bytes()),
            ]
        );
        assert_eq!(peripheral.stack().calls("notify_all").count(), 5);

        let settings = peripheral.status().connection;
        assert_eq!(settings.pdu_size, 251);
        assert_eq!(settings.interval, 40);
    }

    #[test]
    fn unconfirmed_indication_ends_the_test() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_INDICATION);
        peripheral.start(now, TestType::Indication.flag()).unwrap();
        peripheral.stack_mut().clear_history();

        peripheral.step(now).unwrap();
        peripheral.step(now).unwrap();
        assert_eq!(peripheral.stack().calls("send_indication").count(), 1);
        let deadline = now + Duration::from_millis(500);
        assert_eq!(peripheral.poll_timeout(), Some(deadline));

        peripheral.handle_timeout(deadline).unwrap();
        peripheral.step(deadline).unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
        assert_matches!(
            peripheral.stack().history().last(),
            Some(Command::Indication { characteristic, value }) if *characteristic == DB.result
                && value[..] == 0u32.to_le_bytes()
        );

        peripheral
            .handle_event(deadline, confirmation(DB.result))
            .unwrap();
        peripheral.step(deadline).unwrap();
        assert_eq!(peripheral.state(), State::Subscribed);
        assert_eq!(peripheral.status().report.operations, 0);
        assert_eq!(peripheral.status().test_type, None);
    }

    #[test]
    fn confirmed_indications_are_counted() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_INDICATION);
        peripheral
            .handle_event(
                now,
                StackEvent::ConnectionParameters {
                    connection: CONNECTION,
                    interval: 40,
                    latency: 0,
                    timeout: 300,
                    tx_size: 27,
                },
            )
            .unwrap();
        assert_eq!(peripheral.payload_sizes().indication(), SimStack::MIN_MTU - 3);
        peripheral.set_mode(ModeConfig::fixed_length(1)).unwrap();
        peripheral.start(now, TestType::Indication.flag()).unwrap();

        peripheral.step(now).unwrap();
        peripheral
            .handle_event(now, confirmation(DB.indications))
            .unwrap();
        let later = now + Duration::from_millis(10);
        peripheral.step(later).unwrap();
        assert_eq!(peripheral.state(), State::TestFinish);
        assert_eq!(peripheral.status().report.operations, 1);
        assert_eq!(peripheral.stack().calls("send_indication").count(), 2);
    }

    #[test]
    fn sleep_is_blocked_only_while_testing() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        assert!(peripheral.is_ok_to_sleep());
        peripheral.start(now, 1).unwrap();
        assert!(!peripheral.is_ok_to_sleep());

        let mut config = PeripheralConfig::default();
        config.deep_sleep(true);
        let (mut peripheral, now) = enabled(config, SimStack::new());
        open(&mut peripheral, now);
        for event in [
            client_config(DB.notifications, gatt::CCCD_NOTIFICATION),
            client_config(DB.transmission_on, gatt::CCCD_NOTIFICATION),
            client_config(DB.result, gatt::CCCD_INDICATION),
        ] {
            peripheral.handle_event(now, event).unwrap();
        }
        peripheral.start(now, 1).unwrap();
        assert!(peripheral.is_ok_to_sleep());
    }

    #[test]
    fn close_resets_and_readvertises() {
        let (mut peripheral, now) = subscribed(gatt::CCCD_NOTIFICATION);
        peripheral.start(now, 1).unwrap();
        peripheral
            .handle_event(
                now,
                StackEvent::ConnectionClosed {
                    connection: CONNECTION,
                    reason: StackError::TIMEOUT,
                },
            )
            .unwrap();
        assert_eq!(peripheral.state(), State::Disconnected);
        assert_eq!(peripheral.discovery_state(), DiscoveryState::Idle);
        assert_eq!(peripheral.poll_timeout(), None);
        assert_eq!(
            advertised(&peripheral),
            [AdvertisingSet::Legacy, AdvertisingSet::Coded]
        );
        assert!(!peripheral.status().notifications);
        assert_matches!(peripheral.start(now, 1), Err(Error::InvalidState));
    }
}
