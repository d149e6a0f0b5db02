// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of ECDSA based on `ring`.

use ring::signature::VerificationAlgorithm as _;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Signature;
use crate::crypto::ecdsa::SCALAR_LEN;

/// A `ring`-based [`ecdsa::Verify`] for fixed-width P-256 signatures.
pub struct Verifier {
    key: [u8; 1 + 2 * SCALAR_LEN],
}

impl Verifier {
    /// Creates a new `Verifier` for the given public key.
    pub fn new(key: &PublicKey) -> Self {
        Self { key: key.to_sec1() }
    }
}

impl ecdsa::Verify for Verifier {
    fn verify(
        &mut self,
        message: &[&[u8]],
        signature: &Signature,
    ) -> Result<(), ecdsa::Error> {
        // The message is small and bounded; the largest one the chip signs
        // is a certificate body.
        let mut buf = [0u8; 256];
        let mut len = 0;
        for part in message {
            let end = len + part.len();
            if end > buf.len() {
                return Err(ecdsa::Error::Unspecified);
            }
            buf[len..end].copy_from_slice(part);
            len = end;
        }

        let mut sig = [0u8; 2 * SCALAR_LEN];
        sig[..SCALAR_LEN].copy_from_slice(&signature.r);
        sig[SCALAR_LEN..].copy_from_slice(&signature.s);

        ring::signature::ECDSA_P256_SHA256_FIXED
            .verify(
                untrusted::Input::from(&self.key[..]),
                untrusted::Input::from(&buf[..len]),
                untrusted::Input::from(&sig[..]),
            )
            .map_err(|_| ecdsa::Error::Unspecified)
    }
}

#[cfg(feature = "std")]
pub use signer::Signer;

#[cfg(feature = "std")]
mod signer {
    use ring::rand::SystemRandom;
    use ring::signature::EcdsaKeyPair;
    use ring::signature::KeyPair as _;
    use ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING as ALGO;

    use super::*;

    /// A `ring`-based [`ecdsa::Sign`] producing fixed-width P-256
    /// signatures.
    ///
    /// Requires the `std` feature flag to be enabled.
    pub struct Signer {
        keypair: EcdsaKeyPair,
        rng: SystemRandom,
    }

    impl Signer {
        /// Creates a new `Signer` from the given PKCS#8-encoded private key.
        pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, ecdsa::Error> {
            let keypair = EcdsaKeyPair::from_pkcs8(&ALGO, pkcs8)
                .map_err(|_| ecdsa::Error::BadKey)?;
            Ok(Self {
                keypair,
                rng: SystemRandom::new(),
            })
        }

        /// Generates a fresh keypair, returning the signer and the PKCS#8
        /// encoding of its private key.
        pub fn generate() -> Result<(Self, Vec<u8>), ecdsa::Error> {
            let rng = SystemRandom::new();
            let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ALGO, &rng)
                .map_err(|_| ecdsa::Error::Unspecified)?;
            let signer = Self::from_pkcs8(pkcs8.as_ref())?;
            Ok((signer, pkcs8.as_ref().to_vec()))
        }
    }

    impl ecdsa::Sign for Signer {
        fn public_key(&self) -> PublicKey {
            // `from_pkcs8` only accepts P-256 keys, whose public halves are
            // always 65-byte uncompressed points.
            PublicKey::from_sec1(self.keypair.public_key().as_ref())
                .unwrap_or_default()
        }

        fn sign(&mut self, message: &[&[u8]]) -> Result<Signature, ecdsa::Error> {
            let message = message.concat();
            let sig = self
                .keypair
                .sign(&self.rng, &message)
                .map_err(|_| ecdsa::Error::Unspecified)?;

            let bytes = sig.as_ref();
            if bytes.len() != 2 * SCALAR_LEN {
                return Err(ecdsa::Error::Unspecified);
            }
            let mut out = Signature::default();
            out.r.copy_from_slice(&bytes[..SCALAR_LEN]);
            out.s.copy_from_slice(&bytes[SCALAR_LEN..]);
            Ok(out)
        }
    }
}
