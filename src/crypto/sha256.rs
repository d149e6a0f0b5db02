// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! SHA-256.

/// A SHA-256 digest.
pub type Digest = [u8; 32];

/// An error returned by a hashing operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Indicates an unspecified, internal error.
    Unspecified,
}

/// A SHA-256 engine.
pub trait Hash {
    /// Hashes the concatenation of `parts` into `out`.
    fn hash_vectored(
        &mut self,
        parts: &[&[u8]],
        out: &mut Digest,
    ) -> Result<(), Error>;

    /// Hashes `bytes` into `out`.
    fn hash_contiguous(
        &mut self,
        bytes: &[u8],
        out: &mut Digest,
    ) -> Result<(), Error> {
        self.hash_vectored(&[bytes], out)
    }
}
