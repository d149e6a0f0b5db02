// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Device certificates.
//!
//! A DS28E30 is provisioned with a certificate binding its public key to its
//! identity: a signature, by a system-wide authority key, over
//!
//! ```text
//! device_pub_x (32) || device_pub_y (32) || constant (16) || rom (8) || manid (2)
//! ```
//!
//! The last three fields are the "custom fields", which pin the certificate
//! to a single physical chip. The signature itself is stored in two of the
//! chip's memory pages.

use zerocopy::AsBytes;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Signature;
use crate::crypto::Ciphers;
use crate::onewire::RomId;

/// The length of the certificate constant.
pub const CONSTANT_LEN: usize = 16;

/// The fields a certificate binds its subject key to.
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsBytes)]
#[repr(C)]
pub struct CustomFields {
    /// The certificate constant of the key set the chip was provisioned
    /// under.
    pub constant: [u8; CONSTANT_LEN],
    /// The chip's ROM ID.
    pub rom: [u8; 8],
    /// The chip's manufacturer ID.
    pub manid: [u8; 2],
}

impl CustomFields {
    /// Builds the custom fields for a chip.
    pub fn new(constant: &[u8; CONSTANT_LEN], rom: &RomId, manid: [u8; 2]) -> Self {
        Self {
            constant: *constant,
            rom: *rom.as_bytes(),
            manid,
        }
    }
}

/// The signed body of a certificate.
#[derive(AsBytes)]
#[repr(C)]
struct Body {
    subject: PublicKey,
    custom: CustomFields,
}

/// Verifies that `issuer` signed `subject` bound to `custom`.
///
/// Returns `false` on any failure, including an invalid issuer key.
pub fn verify_certificate(
    ciphers: &mut (impl Ciphers + ?Sized),
    signature: &Signature,
    subject: &PublicKey,
    custom: &CustomFields,
    issuer: &PublicKey,
) -> bool {
    let body = Body {
        subject: *subject,
        custom: *custom,
    };
    let ok = ecdsa::verify(ciphers, issuer, &[body.as_bytes()], signature);
    if !ok {
        info!("certificate for {:02x?} failed to verify", custom.rom);
    }
    ok
}

/// Returns the bytes a certificate signature covers, for provisioning.
pub fn certificate_body(subject: &PublicKey, custom: &CustomFields) -> [u8; 90] {
    let body = Body {
        subject: *subject,
        custom: *custom,
    };
    let mut out = [0; 90];
    out.copy_from_slice(body.as_bytes());
    out
}
