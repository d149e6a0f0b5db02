// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of [`crypto::sha256`] based on `ring`.
//!
//! [`crypto::sha256`]: ../../sha256/index.html

use ring::digest;

use crate::crypto::sha256;

/// A `ring`-based [`sha256::Hash`].
#[derive(Default)]
pub struct Hasher {
    _priv: (),
}

impl Hasher {
    /// Creates a new `Hasher`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl sha256::Hash for Hasher {
    fn hash_vectored(
        &mut self,
        parts: &[&[u8]],
        out: &mut sha256::Digest,
    ) -> Result<(), sha256::Error> {
        let mut ctx = digest::Context::new(&digest::SHA256);
        for part in parts {
            ctx.update(part);
        }
        out.copy_from_slice(ctx.finish().as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256::Hash as _;

    // SHA-256("abc"), from FIPS 180-2 appendix B.1.
    const ABC_SHA256: sha256::Digest = [
        0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde,
        0x5d, 0xae, 0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c,
        0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
    ];

    #[test]
    fn sha() {
        let mut sha = Hasher::new();
        let mut digest = sha256::Digest::default();

        sha.hash_contiguous(b"abc", &mut digest).unwrap();
        assert_eq!(digest, ABC_SHA256);

        digest = Default::default();
        sha.hash_vectored(&[b"a", b"", b"bc"], &mut digest).unwrap();
        assert_eq!(digest, ABC_SHA256);
    }
}
