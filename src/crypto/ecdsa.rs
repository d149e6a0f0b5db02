// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! P-256 ECDSA with SHA-256.
//!
//! Keys and signatures are handled in the fixed-width big-endian form the
//! chip uses: 32-byte coordinates and 32-byte scalars. Messages are always
//! plaintext; engines hash them internally.

use static_assertions::assert_obj_safe;
use zerocopy::AsBytes;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::crypto::Ciphers;

/// The width of a P-256 coordinate or scalar, in bytes.
pub const SCALAR_LEN: usize = 32;

/// An uncompressed P-256 public key.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, AsBytes)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct PublicKey {
    /// The affine x-coordinate.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::hex"))]
    pub x: [u8; SCALAR_LEN],
    /// The affine y-coordinate.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::hex"))]
    pub y: [u8; SCALAR_LEN],
}

impl PublicKey {
    /// Returns the SEC1 uncompressed encoding of this key.
    pub fn to_sec1(&self) -> [u8; 1 + 2 * SCALAR_LEN] {
        let mut out = [0x04; 1 + 2 * SCALAR_LEN];
        out[1..1 + SCALAR_LEN].copy_from_slice(&self.x);
        out[1 + SCALAR_LEN..].copy_from_slice(&self.y);
        out
    }

    /// Parses a SEC1 uncompressed encoding.
    pub fn from_sec1(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 1 + 2 * SCALAR_LEN || bytes[0] != 0x04 {
            return None;
        }
        let mut key = Self::default();
        key.x.copy_from_slice(&bytes[1..1 + SCALAR_LEN]);
        key.y.copy_from_slice(&bytes[1 + SCALAR_LEN..]);
        Some(key)
    }
}

/// An ECDSA signature.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, AsBytes)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct Signature {
    /// The `r` scalar.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::hex"))]
    pub r: [u8; SCALAR_LEN],
    /// The `s` scalar.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::hex"))]
    pub s: [u8; SCALAR_LEN],
}

/// An error returned by a signature operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The key could not be parsed.
    BadKey,
    /// Indicates an unspecified error, including signature check failures.
    Unspecified,
}

/// A signature-verification engine, already primed with a key.
///
/// There is no way to extract the key back out of a `Verify` value.
pub trait Verify {
    /// Verifies `signature` over the concatenation of `message`.
    ///
    /// Failures, including signature check failures, are included in the
    /// `Err` variant.
    fn verify(
        &mut self,
        message: &[&[u8]],
        signature: &Signature,
    ) -> Result<(), Error>;
}
assert_obj_safe!(Verify);

/// A signing engine, already primed with a keypair.
///
/// Nothing in the authentication flow signs; this is used to provision
/// chips and to produce authority signatures for authenticated writes.
pub trait Sign {
    /// Returns the public half of the keypair.
    fn public_key(&self) -> PublicKey;

    /// Creates a signature over the concatenation of `message`.
    fn sign(&mut self, message: &[&[u8]]) -> Result<Signature, Error>;
}
assert_obj_safe!(Sign);

/// Verifies `signature` over `message` under `key`.
///
/// Returns `false` for invalid keys as well as bad signatures.
pub fn verify(
    ciphers: &mut (impl Ciphers + ?Sized),
    key: &PublicKey,
    message: &[&[u8]],
    signature: &Signature,
) -> bool {
    match ciphers.verifier(key) {
        Some(v) => v.verify(message, signature).is_ok(),
        None => {
            warn!("rejected public key {:02x?}", key.x);
            false
        }
    }
}
