use bytes::Bytes;

use crate::{config::ConnectionParameters, gatt::Uuid, Address, Phy, StackError};

/// Stack-assigned identifier of an open connection
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionHandle(pub u8);

/// Kind of a Bluetooth device address
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum AddressType {
    /// Public device address
    #[default]
    Public,
    /// Random device address
    Random,
}

/// Advertising sets the peripheral runs
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AdvertisingSet {
    /// Legacy connectable and scannable advertising on the 1M PHY
    Legacy,
    /// Extended connectable advertising on the coded PHY
    Coded,
}

/// ATT opcode a characteristic value arrived with
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AttOpcode {
    /// Handle value notification, no confirmation expected
    Notification,
    /// Handle value indication, must be confirmed
    Indication,
    /// Any other opcode, such as a read response
    Other(u8),
}

/// What changed on a local server characteristic
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ServerStatus {
    /// The client rewrote its client characteristic configuration
    ClientConfig,
    /// The client confirmed an indication
    Confirmation,
}

/// An advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Advertiser address
    pub address: Address,
    /// Advertiser address kind
    pub address_type: AddressType,
    /// The advertisement accepts connections
    pub connectable: bool,
    /// The advertiser answers scan requests
    pub scannable: bool,
    /// Reported through the extended advertising path
    pub extended: bool,
    /// All fragments of an extended advertisement were received
    pub complete: bool,
    /// Advertising data records
    pub data: Bytes,
}

/// Asynchronous event reported by the Bluetooth host stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// An advertisement was received while scanning
    ScanReport(ScanReport),
    /// A connection was established
    ConnectionOpened {
        /// New connection
        connection: ConnectionHandle,
        /// Peer address
        address: Address,
        /// Peer address kind
        address_type: AddressType,
    },
    /// A connection was closed
    ConnectionClosed {
        /// Closed connection
        connection: ConnectionHandle,
        /// Why it closed
        reason: StackError,
    },
    /// Link-layer parameters were (re)negotiated
    ConnectionParameters {
        /// Affected connection
        connection: ConnectionHandle,
        /// Connection interval in 1.25 ms units
        interval: u16,
        /// Responder latency in connection events
        latency: u16,
        /// Supervision timeout in 10 ms units
        timeout: u16,
        /// Maximum link-layer PDU payload the local side transmits
        tx_size: u16,
    },
    /// The PHY of a connection changed
    PhyStatus {
        /// Affected connection
        connection: ConnectionHandle,
        /// PHY now in use
        phy: Phy,
    },
    /// A requested RSSI reading is available
    Rssi {
        /// Affected connection
        connection: ConnectionHandle,
        /// Signal strength in dBm
        rssi: i8,
    },
    /// The local TX power of a connection changed
    TxPower {
        /// Affected connection
        connection: ConnectionHandle,
        /// Power in dBm
        power_level: i8,
    },
    /// ATT MTU exchange finished
    MtuExchanged {
        /// Affected connection
        connection: ConnectionHandle,
        /// Negotiated ATT MTU
        mtu: u16,
    },
    /// A primary service was discovered
    Service {
        /// Affected connection
        connection: ConnectionHandle,
        /// Service handle
        service: u32,
        /// Service UUID
        uuid: Uuid,
    },
    /// A characteristic was discovered
    Characteristic {
        /// Affected connection
        connection: ConnectionHandle,
        /// Characteristic value handle
        characteristic: u16,
        /// Characteristic UUID
        uuid: Uuid,
    },
    /// The outstanding GATT client procedure finished
    ProcedureCompleted {
        /// Affected connection
        connection: ConnectionHandle,
        /// Zero on success, a stack status otherwise
        result: u16,
    },
    /// A remote characteristic value arrived
    CharacteristicValue {
        /// Affected connection
        connection: ConnectionHandle,
        /// Characteristic value handle
        characteristic: u16,
        /// How the value was delivered
        opcode: AttOpcode,
        /// The value
        value: Bytes,
    },
    /// A local characteristic's client state changed
    ServerCharacteristicStatus {
        /// Affected connection
        connection: ConnectionHandle,
        /// Local characteristic
        characteristic: u16,
        /// What changed
        status: ServerStatus,
        /// New client configuration bits, for [`ServerStatus::ClientConfig`]
        client_config: u8,
    },
    /// A client wrote a local attribute that requires a user response
    ServerAttributeValue {
        /// Affected connection
        connection: ConnectionHandle,
        /// Local attribute
        attribute: u16,
        /// Written value
        value: Bytes,
    },
}

/// Outbound interface to the Bluetooth host stack
///
/// Every call either takes effect or fails with the stack's status. Results of asynchronous
/// operations (connections, discovery, MTU exchange) come back later as [`StackEvent`]s.
///
/// Power is passed in units of 0.1 dBm.
pub trait GattStack {
    /// Request a TX power range, returning the `(min, max)` actually applied
    fn set_tx_power(&mut self, min: i16, max: i16) -> Result<(i16, i16), StackError>;
    /// Set the largest ATT MTU to negotiate, returning the value the stack accepted
    fn set_max_mtu(&mut self, mtu: u16) -> Result<u16, StackError>;
    /// Enable or disable adaptive frequency hopping
    fn configure_afh(&mut self, enabled: bool) -> Result<(), StackError>;

    /// Start advertising the device name and throughput service on `set`
    fn advertiser_start(&mut self, set: AdvertisingSet, data: &[u8]) -> Result<(), StackError>;
    /// Stop advertising on `set`
    fn advertiser_stop(&mut self, set: AdvertisingSet) -> Result<(), StackError>;

    /// Start scanning on `phy`
    fn scanner_start(&mut self, phy: Phy) -> Result<(), StackError>;
    /// Stop scanning
    fn scanner_stop(&mut self) -> Result<(), StackError>;

    /// Parameters proposed for future connections
    fn set_default_connection_parameters(
        &mut self,
        params: &ConnectionParameters,
    ) -> Result<(), StackError>;
    /// Initiate a connection
    fn connection_open(
        &mut self,
        address: Address,
        address_type: AddressType,
        phy: Phy,
    ) -> Result<ConnectionHandle, StackError>;
    /// Close a connection
    fn connection_close(&mut self, connection: ConnectionHandle) -> Result<(), StackError>;
    /// Request new parameters for an open connection
    fn set_connection_parameters(
        &mut self,
        connection: ConnectionHandle,
        params: &ConnectionParameters,
    ) -> Result<(), StackError>;
    /// Request a PHY change; `accepted` is a bitmask of PHYs the peer may choose
    fn set_preferred_phy(
        &mut self,
        connection: ConnectionHandle,
        preferred: Phy,
        accepted: u8,
    ) -> Result<(), StackError>;
    /// Enable or disable TX power change reports from the peer
    fn set_remote_power_reporting(
        &mut self,
        connection: ConnectionHandle,
        enabled: bool,
    ) -> Result<(), StackError>;
    /// Request an RSSI reading
    fn get_rssi(&mut self, connection: ConnectionHandle) -> Result<(), StackError>;
    /// ATT MTU currently in effect
    fn get_mtu(&mut self, connection: ConnectionHandle) -> Result<u16, StackError>;

    /// Discover primary services with the given UUID
    fn discover_primary_services(
        &mut self,
        connection: ConnectionHandle,
        uuid: Uuid,
    ) -> Result<(), StackError>;
    /// Discover the characteristics of a service
    fn discover_characteristics(
        &mut self,
        connection: ConnectionHandle,
        service: u32,
    ) -> Result<(), StackError>;
    /// Write a remote client characteristic configuration
    fn set_characteristic_notification(
        &mut self,
        connection: ConnectionHandle,
        characteristic: u16,
        flags: u8,
    ) -> Result<(), StackError>;
    /// Confirm the last received indication
    fn send_characteristic_confirmation(
        &mut self,
        connection: ConnectionHandle,
    ) -> Result<(), StackError>;
    /// Write a remote characteristic without waiting for a response
    fn write_without_response(
        &mut self,
        connection: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError>;

    /// Notify a local characteristic to one client
    fn send_notification(
        &mut self,
        connection: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError>;
    /// Indicate a local characteristic to one client
    fn send_indication(
        &mut self,
        connection: ConnectionHandle,
        characteristic: u16,
        value: &[u8],
    ) -> Result<(), StackError>;
    /// Answer a client write that required a user response
    fn send_user_write_response(
        &mut self,
        connection: ConnectionHandle,
        attribute: u16,
        accepted: bool,
    ) -> Result<(), StackError>;
    /// Update a local attribute value
    fn write_attribute_value(&mut self, attribute: u16, value: &[u8]) -> Result<(), StackError>;
    /// Notify a local attribute to every subscribed client
    fn notify_all(&mut self, attribute: u16, value: &[u8]) -> Result<(), StackError>;
}
