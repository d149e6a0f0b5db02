// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Key material selection.
//!
//! Packs are provisioned under one of two key sets: one for a specific
//! vendor, identified by the 12-bit customer ID Maxim programs into every
//! ROM ID, and a generic one for everyone else. Only the DS28E30 families
//! carry certificates at all.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cert::CONSTANT_LEN;
use crate::crypto::ecdsa::PublicKey;
use crate::onewire::RomId;

/// The customer ID selecting the vendor key set.
pub const VENDOR_CUSTOMER_ID: u16 = 0x050;

/// Family codes of chips that carry certificates.
pub const FAMILIES: [u8; 2] = [0xdb, 0x5b];

/// The keys a chip's certificate is checked against.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyMaterial {
    /// The key that signs device certificates.
    pub system: PublicKey,
    /// The key that authorizes authenticated writes.
    pub authority: PublicKey,
    /// The constant bound into every certificate.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::hex"))]
    pub certificate_constant: [u8; CONSTANT_LEN],
}

/// Both key sets.
///
/// Either may be absent; a chip whose key set is absent can never
/// authenticate.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeySets {
    /// Keys for chips with [`VENDOR_CUSTOMER_ID`].
    #[cfg_attr(feature = "serde", serde(default))]
    pub vendor: Option<KeyMaterial>,
    /// Keys for every other chip.
    #[cfg_attr(feature = "serde", serde(default))]
    pub generic: Option<KeyMaterial>,
}

impl KeySets {
    /// Picks the key set for the chip with ROM ID `rom`.
    pub fn select(&self, rom: &RomId) -> Option<&KeyMaterial> {
        if !FAMILIES.contains(&rom.family()) {
            warn!("family {:#04x} carries no certificate", rom.family());
            return None;
        }
        let keys = if rom.customer_id() == VENDOR_CUSTOMER_ID {
            self.vendor.as_ref()
        } else {
            self.generic.as_ref()
        };
        trace!(
            "customer id {:#05x}: key set {}",
            rom.customer_id(),
            if keys.is_some() { "found" } else { "missing" },
        );
        keys
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::fake;

    fn material(tag: u8) -> KeyMaterial {
        KeyMaterial {
            system: PublicKey {
                x: [tag; 32],
                y: [tag; 32],
            },
            authority: PublicKey::default(),
            certificate_constant: [tag; CONSTANT_LEN],
        }
    }

    #[test]
    fn select_by_customer_id() {
        let sets = KeySets {
            vendor: Some(material(1)),
            generic: Some(material(2)),
        };
        let vendor = RomId::new(fake::ROM).unwrap();
        let generic = RomId::new(fake::GENERIC_ROM).unwrap();
        assert_eq!(vendor.customer_id(), VENDOR_CUSTOMER_ID);
        assert_ne!(generic.customer_id(), VENDOR_CUSTOMER_ID);

        assert_eq!(sets.select(&vendor), Some(&material(1)));
        assert_eq!(sets.select(&generic), Some(&material(2)));
    }

    #[test]
    fn other_families_have_no_keys() {
        let sets = KeySets {
            vendor: Some(material(1)),
            generic: Some(material(2)),
        };
        let mut bytes = fake::ROM;
        bytes[0] = 0x5b;
        bytes[7] = crate::crc::crc8(&bytes[..7]);
        assert!(sets.select(&RomId::new(bytes).unwrap()).is_some());

        bytes[0] = 0x28;
        bytes[7] = crate::crc::crc8(&bytes[..7]);
        assert_eq!(sets.select(&RomId::new(bytes).unwrap()), None);
    }

    #[test]
    fn missing_set() {
        let sets = KeySets {
            vendor: None,
            generic: Some(material(2)),
        };
        assert_eq!(sets.select(&RomId::new(fake::ROM).unwrap()), None);
    }
}
