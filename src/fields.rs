// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Where battery telemetry lives in the shadowed pages.
//!
//! A [`MemoryMap`] names a byte range for every stored value. Packs from
//! different vendors lay their pages out differently, so the map is
//! configuration rather than a set of constants; [`MemoryMap::DEFAULT`] is
//! the layout used when nothing else is configured.
//!
//! Integers are stored big-endian.

use byteorder::BigEndian;
use byteorder::ByteOrder as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::device::page;
use crate::device::PAGE_LEN;
use crate::pages::PAGE_COUNT;

/// Errors from validating a [`MemoryMap`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// A field runs off the end of its page, or off the end of the shadow.
    OutOfRange,
    /// A field lives in a certificate page.
    ReservedPage,
    /// Two fields overlap.
    Overlap,
    /// A field shares a page with the first-use date or the heatmap.
    SharedPage,
    /// A value does not fit in its field.
    TooWide,
}

/// A byte range within one page.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Field {
    /// The page.
    pub page: u8,
    /// The offset of the first byte within the page.
    pub offset: u8,
    /// The length, in bytes.
    pub len: u8,
}

impl Field {
    /// Creates a new field.
    pub const fn new(page: u8, offset: u8, len: u8) -> Self {
        Self { page, offset, len }
    }

    fn end(self) -> usize {
        self.offset as usize + self.len as usize
    }

    fn overlaps(self, other: Field) -> bool {
        self.page == other.page
            && (self.offset as usize) < other.end()
            && (other.offset as usize) < self.end()
    }

    /// Decodes a big-endian integer out of `bytes`, which must be exactly as
    /// long as this field.
    pub fn decode(self, bytes: &[u8]) -> u64 {
        match bytes.len() {
            0 => 0,
            n => BigEndian::read_uint(bytes, n.min(8)),
        }
    }

    /// Encodes `value` big-endian into `out`, which must be exactly as long
    /// as this field.
    pub fn encode(self, value: u64, out: &mut [u8]) -> crate::Result<(), Error> {
        let n = out.len();
        check!(n <= 8, Error::TooWide);
        check!(n == 8 || value >> (8 * n) == 0, Error::TooWide);
        if n > 0 {
            BigEndian::write_uint(out, value, n);
        }
        Ok(())
    }
}

/// The locations of every stored value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MemoryMap {
    /// The factory-written QR code, read as text.
    pub qr_code: Field,
    /// The first-use date, as ASCII `YYYYMMDD`.
    ///
    /// Its page is write-protected once the date is set.
    pub first_use_date: Field,
    /// The accumulated discharge level, in hundredths of a cycle.
    pub discharge_level: Field,
    /// How long the battery has been held at full charge.
    pub full_status_usage: Field,
    /// Battery state of health.
    pub bsoh: Field,
    /// Battery state of health, before filtering.
    pub bsoh_raw: Field,
    /// Adjusted state of charge.
    pub asoc: Field,
    /// Whether the first-article-inspection window has expired.
    pub fai_expired: Field,
    /// The three pages holding the packed heatmap, in order.
    pub heatmap: [u8; 3],
}

impl MemoryMap {
    /// The default layout.
    pub const DEFAULT: Self = Self {
        qr_code: Field::new(page::USER_0, 0, 32),
        first_use_date: Field::new(1, 0, 8),
        discharge_level: Field::new(2, 0, 4),
        full_status_usage: Field::new(2, 4, 4),
        bsoh: Field::new(2, 8, 4),
        bsoh_raw: Field::new(2, 12, 4),
        asoc: Field::new(2, 16, 4),
        fai_expired: Field::new(2, 20, 2),
        heatmap: [3, 6, 7],
    };

    /// Returns every field, paired with its name.
    pub fn fields(&self) -> [(&'static str, Field); 8] {
        [
            ("qr_code", self.qr_code),
            ("first_use_date", self.first_use_date),
            ("discharge_level", self.discharge_level),
            ("full_status_usage", self.full_status_usage),
            ("bsoh", self.bsoh),
            ("bsoh_raw", self.bsoh_raw),
            ("asoc", self.asoc),
            ("fai_expired", self.fai_expired),
        ]
    }

    /// Returns the fields holding integers.
    pub fn integers(&self) -> [Field; 6] {
        [
            self.discharge_level,
            self.full_status_usage,
            self.bsoh,
            self.bsoh_raw,
            self.asoc,
            self.fai_expired,
        ]
    }

    /// Checks that the layout is usable.
    ///
    /// Integer fields are at most four bytes wide. Every field must fit in a shadowed page outside the certificate, no
    /// two fields may overlap, and nothing but the first-use date may live
    /// on its page, since that page is eventually locked. The heatmap pages
    /// must be distinct and hold nothing else.
    pub fn validate(&self) -> crate::Result<(), Error> {
        let reserved = [page::CERT_R, page::CERT_S];
        let fields = self.fields();

        for &p in &self.heatmap {
            check!((p as usize) < PAGE_COUNT, Error::OutOfRange);
            check!(!reserved.contains(&p), Error::ReservedPage);
        }
        let [h0, h1, h2] = self.heatmap;
        check!(h0 != h1 && h1 != h2 && h0 != h2, Error::Overlap);

        for (i, &(name, f)) in fields.iter().enumerate() {
            trace!("validating {}: {:?}", name, f);
            check!((f.page as usize) < PAGE_COUNT, Error::OutOfRange);
            check!(f.len > 0 && f.end() <= PAGE_LEN, Error::OutOfRange);
            check!(!reserved.contains(&f.page), Error::ReservedPage);
            check!(!self.heatmap.contains(&f.page), Error::SharedPage);

            if f != self.first_use_date {
                check!(
                    f.page != self.first_use_date.page,
                    Error::SharedPage
                );
            }
            for &(_, g) in &fields[i + 1..] {
                check!(!f.overlaps(g), Error::Overlap);
            }
        }
        for f in &self.integers() {
            check!(f.len <= 4, Error::TooWide);
        }
        Ok(())
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_is_valid() {
        MemoryMap::DEFAULT.validate().unwrap();
    }

    #[test]
    fn rejects_bad_layouts() {
        let mut map = MemoryMap::DEFAULT;
        map.bsoh = Field::new(2, 30, 4);
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::OutOfRange);

        let mut map = MemoryMap::DEFAULT;
        map.asoc = Field::new(8, 0, 4);
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::OutOfRange);

        let mut map = MemoryMap::DEFAULT;
        map.asoc = Field::new(page::CERT_S, 0, 4);
        assert_eq!(
            map.validate().unwrap_err().into_inner(),
            Error::ReservedPage
        );

        let mut map = MemoryMap::DEFAULT;
        map.bsoh_raw = Field::new(2, 10, 4);
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::Overlap);

        let mut map = MemoryMap::DEFAULT;
        map.asoc = Field::new(1, 16, 4);
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::SharedPage);

        let mut map = MemoryMap::DEFAULT;
        map.heatmap = [3, 2, 7];
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::SharedPage);

        let mut map = MemoryMap::DEFAULT;
        map.fai_expired = Field::new(2, 20, 6);
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::TooWide);

        let mut map = MemoryMap::DEFAULT;
        map.heatmap = [3, 3, 7];
        assert_eq!(map.validate().unwrap_err().into_inner(), Error::Overlap);
    }

    #[test]
    fn integer_coding() {
        let f = Field::new(2, 0, 4);
        let mut buf = [0; 4];
        f.encode(0x0001_86a0, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x01, 0x86, 0xa0]);
        assert_eq!(f.decode(&buf), 100_000);

        let f = Field::new(2, 20, 2);
        let mut buf = [0; 2];
        assert_eq!(
            f.encode(0x1_0000, &mut buf).unwrap_err().into_inner(),
            Error::TooWide
        );
        f.encode(0xffff, &mut buf).unwrap();
        assert_eq!(buf, [0xff, 0xff]);
    }
}
