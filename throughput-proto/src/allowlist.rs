use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::AddressType;

/// Bluetooth device address
///
/// Stored in over-the-air order, least significant byte first; displayed and parsed in the usual
/// `AA:BB:CC:DD:EE:FF` form with the most significant byte first.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Address(pub [u8; 6]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Failure to parse an [`Address`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid Bluetooth address {0:?}")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_owned());
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for byte in out.iter_mut().rev() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        match parts.next() {
            Some(_) => Err(err()),
            None => Ok(Address(out)),
        }
    }
}

/// Addresses the central is allowed to connect to
///
/// An empty list admits every device. Entries are matched on the address alone.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<(Address, AddressType)>,
}

impl Allowlist {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `address`, ignoring duplicates
    ///
    /// Returns whether the address was newly added.
    pub fn add(&mut self, address: Address, address_type: AddressType) -> bool {
        if self.contains(&address) {
            return false;
        }
        tracing::info!(%address, "adding address to the allowlist");
        self.entries.push((address, address_type));
        true
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether `address` is listed
    pub fn contains(&self, address: &Address) -> bool {
        self.entries.iter().any(|(a, _)| a == address)
    }

    /// Whether a device at `address` may be connected to
    pub fn allows(&self, address: &Address) -> bool {
        self.entries.is_empty() || self.contains(address)
    }

    /// Listed addresses in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &(Address, AddressType)> + '_ {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Address> for Allowlist {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        let mut list = Self::new();
        for address in iter {
            list.add(address, AddressType::Public);
        }
        list
    }
}
