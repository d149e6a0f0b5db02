// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Chip authentication.
//!
//! An [`Authenticator`] proves a chip genuine in two steps: the chip signs a
//! page and a fresh challenge with its private key, and its certificate
//! shows that key was issued for this chip by the system key. Everything
//! read from the chip along the way is cached, so a verdict can be
//! recomputed against different keys without talking to the chip again.
//!
//! Each challenge is the SHA-256 of the previous round's signature. The
//! first round hashes 64 zero bytes.

use zerocopy::AsBytes as _;

use crate::cert;
use crate::cert::CustomFields;
use crate::crypto::ecdsa;
use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Signature;
use crate::crypto::sha256;
use crate::crypto::Ciphers;
use crate::device::page;
use crate::device::Ds28e30;
use crate::device::Identity;
use crate::device::Page;
use crate::device::PageAuthMessage;
use crate::keys::KeyMaterial;
use crate::onewire;
use crate::onewire::Bus;
use crate::xpc;

/// The result of an authentication attempt.
///
/// Variants are ordered from "could not even find a chip" to "genuine".
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Outcome {
    /// Nothing answered on the bus.
    NoDevice,
    /// The chip could not be talked to reliably.
    CrcError,
    /// The chip answered, and is not genuine.
    NotAuthenticated,
    /// The chip is genuine.
    Authenticated,
}

impl Outcome {
    /// Returns whether this is [`Outcome::Authenticated`].
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }

    /// Returns whether the check could not be carried out, as opposed to
    /// having been carried out and failed.
    pub fn is_communication_error(self) -> bool {
        matches!(self, Self::NoDevice | Self::CrcError)
    }

    fn from_error(e: &xpc::Error) -> Self {
        match e {
            xpc::Error::Link(onewire::Error::NoPresence) => Self::NoDevice,
            _ => Self::CrcError,
        }
    }
}

/// The page and its contents used for the last challenge.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
struct CachedPage {
    number: u8,
    data: Page,
}

/// Runs authentication for one chip, caching what it reads.
#[derive(Clone, Debug, Default)]
pub struct Authenticator {
    identity: Option<Identity>,
    device_key: Option<PublicKey>,
    certificate: Option<Signature>,
    page: Option<CachedPage>,
    last: Signature,
    challenge: sha256::Digest,
    outcome: Option<Outcome>,
}

impl Authenticator {
    /// Creates an authenticator with nothing cached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached chip identity.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Returns the cached device public key.
    pub fn device_public_key(&self) -> Option<&PublicKey> {
        self.device_key.as_ref()
    }

    /// Returns the cached device certificate.
    pub fn certificate(&self) -> Option<&Signature> {
        self.certificate.as_ref()
    }

    /// Returns the outcome of the most recent attempt.
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Returns the challenge sent in the most recent attempt.
    pub fn last_challenge(&self) -> &sha256::Digest {
        &self.challenge
    }

    /// Forgets the cached contents of `page`, after it has been rewritten.
    pub fn invalidate_page(&mut self, page: u8) {
        if self.page.map(|p| p.number) == Some(page) {
            self.page = None;
        }
    }

    /// Forgets everything read from the chip.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn hydrate<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
        page_number: u8,
    ) -> crate::Result<(Identity, PublicKey, Signature, Page), xpc::Error> {
        let identity = match self.identity {
            Some(id) => id,
            None => {
                let id = dev.read_identity()?;
                trace!("identity: {:?}", id);
                *self.identity.insert(id)
            }
        };
        let key = match self.device_key {
            Some(k) => k,
            None => *self.device_key.insert(dev.read_device_public_key()?),
        };
        let certificate = match self.certificate {
            Some(c) => c,
            None => {
                let r = dev.read_memory(page::CERT_R)?;
                let s = dev.read_memory(page::CERT_S)?;
                *self.certificate.insert(Signature { r, s })
            }
        };
        let data = match self.page {
            Some(p) if p.number == page_number => p.data,
            _ => {
                let data = dev.read_memory(page_number)?;
                self.page = Some(CachedPage {
                    number: page_number,
                    data,
                });
                data
            }
        };
        Ok((identity, key, certificate, data))
    }

    /// Runs a full authentication against `page_number`.
    ///
    /// `keys` is the key set selected for this chip; without one, the chip
    /// can never be authenticated.
    pub fn authenticate<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
        ciphers: &mut (impl Ciphers + ?Sized),
        keys: Option<&KeyMaterial>,
        page_number: u8,
    ) -> Outcome {
        let outcome = self.run(dev, ciphers, keys, page_number);
        info!("authentication of page {}: {:?}", page_number, outcome);
        self.outcome = Some(outcome);
        outcome
    }

    fn run<B: Bus>(
        &mut self,
        dev: &mut Ds28e30<B>,
        ciphers: &mut (impl Ciphers + ?Sized),
        keys: Option<&KeyMaterial>,
        page_number: u8,
    ) -> Outcome {
        let (identity, key, certificate, data) =
            match self.hydrate(dev, page_number) {
                Ok(x) => x,
                Err(e) => return Outcome::from_error(e.as_ref()),
            };

        let mut challenge = [0; 32];
        if ciphers
            .sha256()
            .hash_contiguous(self.last.as_bytes(), &mut challenge)
            .is_err()
        {
            error!("could not derive a challenge");
            return Outcome::CrcError;
        }
        self.challenge = challenge;

        let signature =
            match dev.compute_read_page_auth(page_number, false, &challenge) {
                Ok(s) => s,
                Err(e) => return Outcome::from_error(e.as_ref()),
            };
        self.last = signature;

        let message = PageAuthMessage::new(
            &identity.rom,
            false,
            &data,
            &challenge,
            page_number,
            identity.manid,
        );
        if !ecdsa::verify(ciphers, &key, &[message.as_bytes()], &signature) {
            warn!("page authentication signature rejected");
            return Outcome::NotAuthenticated;
        }

        let keys = match keys {
            Some(k) => k,
            None => {
                warn!("no key set for {:?}", identity.rom);
                return Outcome::NotAuthenticated;
            }
        };
        let custom = CustomFields::new(
            &keys.certificate_constant,
            &identity.rom,
            identity.manid,
        );
        if !cert::verify_certificate(
            ciphers,
            &certificate,
            &key,
            &custom,
            &keys.system,
        ) {
            return Outcome::NotAuthenticated;
        }

        Outcome::Authenticated
    }
}
