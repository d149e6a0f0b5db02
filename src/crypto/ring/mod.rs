// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of crypto traits, using the [`ring`] crate.
//!
//! This module provides software implementations of [`crypto`] traits
//! suitable for hosts without a crypto accelerator, and for tools that
//! provision chips. Signing depends on the `std` feature flag.
//!
//! Types in this module, much like those in [`crypto`], should not be imported
//! directly. Instead, names such as `ring::ecdsa::Verifier` should be used
//! instead.
//!
//! The [`ring` warranty disclaimer] applies to this module as well.
//!
//! [`ring` warranty disclaimer]: https://github.com/briansmith/ring/blob/main/README.md

pub mod ecdsa;
pub mod sha256;

#[cfg(doc)]
use crate::crypto;

use crate::crypto::ecdsa as ecdsa_traits;
use crate::crypto::sha256 as sha256_traits;

pub use ring::error::Unspecified;

/// A [`crypto::Ciphers`] built on top of `ring`.
#[derive(Default)]
pub struct Ciphers {
    sha256: sha256::Hasher,
    verifier: Option<ecdsa::Verifier>,
}

impl Ciphers {
    /// Returns a new `Ciphers`.
    pub fn new() -> Self {
        Default::default()
    }
}

impl crate::crypto::Ciphers for Ciphers {
    fn sha256(&mut self) -> &mut dyn sha256_traits::Hash {
        &mut self.sha256
    }

    fn verifier<'a>(
        &'a mut self,
        key: &ecdsa_traits::PublicKey,
    ) -> Option<&'a mut dyn ecdsa_traits::Verify> {
        self.verifier = Some(ecdsa::Verifier::new(key));
        self.verifier
            .as_mut()
            .map(|v| v as &mut dyn ecdsa_traits::Verify)
    }
}
