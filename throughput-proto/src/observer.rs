use tracing::{debug, info, trace};

use crate::{
    Characteristics, ConnectionSettings, DiscoveryState, ModeConfig, Phy, Role, State,
    TestReport,
};

/// Application hooks invoked by a role as its state changes
///
/// Every method has a default that logs the change, so an implementation only overrides the
/// notifications it displays or records.
pub trait Observer {
    /// The role was enabled
    fn on_role_set(&mut self, role: Role) {
        info!(%role, "role set");
    }

    /// The lifecycle state changed
    fn on_state_change(&mut self, state: State) {
        info!(%state, "state changed");
    }

    /// The discovery step changed
    fn on_discovery_state_change(&mut self, state: DiscoveryState) {
        debug!(%state, "discovery state changed");
    }

    /// The stop condition changed
    fn on_mode_change(&mut self, mode: ModeConfig) {
        debug!(
            mode = %mode.mode,
            fixed_data_size = mode.fixed_data_size,
            fixed_time = ?mode.fixed_time,
            "mode changed"
        );
    }

    /// A test started
    fn on_start(&mut self) {
        info!("test started");
    }

    /// A test finished
    fn on_finish(&mut self, report: &TestReport) {
        info!(%report, "test finished");
    }

    /// The TX power in effect changed, in dBm
    fn on_tx_power_change(&mut self, power: i16) {
        debug!(power, "tx power changed");
    }

    /// A new RSSI reading arrived, in dBm
    fn on_rssi_change(&mut self, rssi: i8) {
        trace!(rssi, "rssi");
    }

    /// The connection PHY changed
    fn on_phy_change(&mut self, phy: Phy) {
        debug!(%phy, "phy changed");
    }

    /// PDU, MTU or payload size changed
    fn on_connection_settings_change(&mut self, settings: &ConnectionSettings) {
        debug!(
            pdu = settings.pdu_size,
            mtu = settings.mtu_size,
            data = settings.data_size,
            "connection settings changed"
        );
    }

    /// Interval, latency or supervision timeout changed
    fn on_connection_timings_change(&mut self, interval: u16, latency: u16, timeout: u16) {
        debug!(interval, latency, timeout, "connection timings changed");
    }

    /// Notifications on the data characteristic were enabled or disabled
    fn on_notification_change(&mut self, enabled: bool) {
        debug!(enabled, "notifications changed");
    }

    /// Indications on the data characteristic were enabled or disabled
    fn on_indication_change(&mut self, enabled: bool) {
        debug!(enabled, "indications changed");
    }

    /// Another characteristic of the peer's service was found
    fn on_characteristics_found(&mut self, found: Characteristics) {
        debug!(?found, "characteristics found");
    }

    /// The size of received payloads changed
    fn on_data_size_change(&mut self, size: u16) {
        debug!(size, "data size changed");
    }
}

/// An [`Observer`] that only logs
#[derive(Debug, Default, Copy, Clone)]
pub struct LogObserver;

impl Observer for LogObserver {}
