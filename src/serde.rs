// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Internal `serde` helpers.

// Some configurations may not use ever helper defined here.
#![allow(unused)]

use core::fmt;
use core::fmt::LowerHex;
use core::fmt::Write as _;
use core::marker::PhantomData;

use serde::de;
use serde::Deserializer;
use serde::Serializer;

/// No-std helper for using as a `write!()` target.
struct ArrayBuf<const N: usize>([u8; N], usize);

impl<const N: usize> ArrayBuf<N> {
    fn as_str(&self) -> &str {
        // Only ever written to through `fmt::Write`, so this is always UTF-8.
        core::str::from_utf8(&self.0[..self.1]).unwrap_or_default()
    }
}

impl<const N: usize> Default for ArrayBuf<N> {
    fn default() -> Self {
        Self([0; N], 0)
    }
}

impl<const N: usize> fmt::Write for ArrayBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let space_left = N - self.1;
        if space_left < bytes.len() {
            return Err(fmt::Error);
        }

        self.0[self.1..self.1 + bytes.len()].copy_from_slice(bytes);
        self.1 += bytes.len();
        Ok(())
    }
}

struct ExpectedByDisplay<T>(T);
impl<T: fmt::Display> de::Expected for ExpectedByDisplay<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Helper for `de_radix`.
pub struct Radix<T>(PhantomData<T>);

macro_rules! impl_radix {
    ($($ty:ident)*) => {$(
        impl<'de> de::Visitor<'de> for Radix<$ty> {
            type Value = $ty;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "integer between 0 and {}", $ty::MAX)
            }

            fn visit_str<E>(self, s: &str) -> Result<$ty, E>
                where E: de::Error,
            {
                let int = if s.starts_with("0x") || s.starts_with("0X") {
                    $ty::from_str_radix(&s[2..], 16)
                } else {
                    $ty::from_str_radix(s, 10)
                };

                int.map_err(E::custom)
            }

            fn visit_u64<E>(self, n: u64) -> Result<$ty, E>
                where E: de::Error,
            {
                if n <= core::$ty::MAX as u64 {
                    Ok(n as $ty)
                } else {
                    let msg = concat!("integer between 0 and ", stringify!($ty), "::MAX");
                    Err(E::invalid_value(de::Unexpected::Unsigned(n), &msg))
                }
            }
        }
    )*}
}
impl_radix! {
    u8 u16 u32 u64
}

/// Deserializes an integer from either a string (which supports hex encoding)
/// or a normal integer.
///
/// Register addresses are far easier to read in hex, which JSON lacks.
pub fn de_radix<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    Radix<T>: de::Visitor<'de, Value = T>,
{
    d.deserialize_any(Radix::<T>(PhantomData))
}

/// Serializes an integer as hex.
pub fn se_hex<S, X>(x: &X, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    X: LowerHex,
{
    let mut buf = ArrayBuf::<18>::default();
    let _ = write!(buf, "0x{:x}", x);
    s.serialize_str(buf.as_str())
}

/// (De)serializes a byte array as a hex string, for key material.
pub mod hex {
    use super::*;
    use core::fmt::Write as _;

    /// Serializes `bytes` as lowercase hex.
    pub fn serialize<S, const N: usize>(
        bytes: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Large enough for a 64-byte key.
        let mut buf = ArrayBuf::<128>::default();
        for b in bytes {
            write!(buf, "{:02x}", b).map_err(serde::ser::Error::custom)?;
        }
        s.serialize_str(buf.as_str())
    }

    /// Deserializes exactly `N` bytes of hex, with an optional `0x` prefix.
    pub fn deserialize<'de, D, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        d.deserialize_str(HexVisitor::<N>)
    }

    struct HexVisitor<const N: usize>;

    impl<'de, const N: usize> de::Visitor<'de> for HexVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{} bytes of hex", N)
        }

        fn visit_str<E>(self, s: &str) -> Result<[u8; N], E>
        where
            E: de::Error,
        {
            let s = s.strip_prefix("0x").unwrap_or(s);
            if s.len() != 2 * N {
                return Err(E::invalid_length(
                    s.len() / 2,
                    &ExpectedByDisplay(N),
                ));
            }

            let mut out = [0; N];
            for (i, b) in out.iter_mut().enumerate() {
                let digits = s.get(2 * i..2 * i + 2).ok_or_else(|| {
                    E::invalid_value(de::Unexpected::Str(s), &self)
                })?;
                *b = u8::from_str_radix(digits, 16).map_err(E::custom)?;
            }
            Ok(out)
        }
    }
}
