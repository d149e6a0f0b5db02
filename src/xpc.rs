// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The extended-command ("XPC") transport.
//!
//! Every device command travels in the same envelope:
//!
//! ```text
//! host:   [0x66] [len] [payload; len]            [0xaa]  ...          ...
//! chip:                               [crc16; 2]          [dummy] [len] [reply; len] [crc16; 2]
//! ```
//!
//! Both CRCs are checked by residue: the host runs [`crc::CRC16`] over the
//! bytes it saw go by *and* the two check bytes, and expects to land on
//! [`crc::FRAME_RESIDUE`]. Between the release byte and the reply, the host
//! holds the line high for a command-specific processing time while the chip
//! runs off of it.
//!
//! The first byte of every reply is a [`ResultCode`].

use arrayvec::ArrayVec;

use crate::crc;
use crate::crc::Crc16Digest;
use crate::onewire;
use crate::onewire::Bus;
use crate::onewire::Link as _;
use crate::onewire::RomId;

/// Introduces an extended command.
pub const XPC_COMMAND: u8 = 0x66;

/// Sent after the command CRC to start processing.
pub const RELEASE: u8 = 0xaa;

/// A reply length the chip sends when it did not understand the frame.
pub const COMM_FAILURE: u8 = 0xff;

/// The longest reply any command produces: a result byte plus a 64-byte
/// signature.
pub const MAX_REPLY: usize = 65;

/// The longest payload the envelope's length byte can describe.
pub const MAX_PAYLOAD: usize = 0xfe;

/// How many times a command is attempted before giving up.
pub const RETRIES: usize = 10;

/// A result code sent as the first byte of every reply.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResultCode {
    /// The command succeeded.
    Success,
    /// The page's protection forbids the operation.
    ProtectionError,
    /// An argument was out of range.
    ParameterError,
    /// The command was issued out of order.
    InvalidSequence,
    /// The chip failed to produce or verify a signature.
    EcdsaFailure,
    /// The chip has been permanently disabled.
    DeviceDisabled,
    /// A write failed its read-back verification.
    VerifyFailure,
    /// A code not in the chip's documented set.
    Unknown(u8),
}

impl ResultCode {
    /// Returns the wire value of this code.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Success => 0xaa,
            Self::ProtectionError => 0x55,
            Self::ParameterError => 0x77,
            Self::InvalidSequence => 0x33,
            Self::EcdsaFailure => 0x22,
            Self::DeviceDisabled => 0x88,
            Self::VerifyFailure => 0x00,
            Self::Unknown(x) => x,
        }
    }

    /// Returns whether this code reports a condition that will not change
    /// on retry.
    pub fn is_deterministic(self) -> bool {
        matches!(
            self,
            Self::ProtectionError
                | Self::ParameterError
                | Self::InvalidSequence
                | Self::EcdsaFailure
                | Self::DeviceDisabled
        )
    }
}

impl From<u8> for ResultCode {
    fn from(x: u8) -> Self {
        match x {
            0xaa => Self::Success,
            0x55 => Self::ProtectionError,
            0x77 => Self::ParameterError,
            0x33 => Self::InvalidSequence,
            0x22 => Self::EcdsaFailure,
            0x88 => Self::DeviceDisabled,
            0x00 => Self::VerifyFailure,
            x => Self::Unknown(x),
        }
    }
}

/// Errors from a command exchange.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The link layer could not select the chip.
    Link(onewire::Error),
    /// A CRC16 check failed.
    Crc,
    /// The chip signaled that it could not parse the frame.
    CommunicationFailure,
    /// The reply was not the expected length.
    LengthMismatch {
        /// The length the command calls for.
        expected: usize,
        /// The length the chip announced.
        actual: usize,
    },
    /// The chip executed the command and reported a failure.
    Device(ResultCode),
    /// The payload does not fit in an envelope.
    Oversized,
}

impl Error {
    /// Returns whether a fresh attempt at the same command could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Device(code) => !code.is_deterministic(),
            Self::Oversized => false,
            _ => true,
        }
    }
}

impl From<onewire::Error> for Error {
    fn from(e: onewire::Error) -> Self {
        Self::Link(e)
    }
}

debug_from!(Error => onewire::Error);

/// A reply frame, starting with its result code.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reply {
    bytes: ArrayVec<u8, MAX_REPLY>,
}

impl Reply {
    /// Returns the result code.
    pub fn result(&self) -> ResultCode {
        ResultCode::from(self.bytes[0])
    }

    /// Returns the bytes following the result code.
    pub fn data(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Returns the whole reply, including the result code.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Checks that the result code is one of `accept`.
    pub fn expect(self, accept: &[ResultCode]) -> crate::Result<Self, Error> {
        let code = self.result();
        check!(accept.contains(&code), Error::Device(code));
        Ok(self)
    }
}

/// Runs one command exchange, without retrying.
///
/// `payload` starts with the command byte. `delay_ms` is how long the chip
/// needs to process the command, and `expected_len` is the reply length,
/// including the result code.
///
/// A reply of length one is accepted in place of a longer one if it carries
/// a failure code; the chip sends those when it rejects a command outright.
/// The command-CRC check is skipped while `rom` is blank.
pub fn standard_cmd_flow<B: Bus + ?Sized>(
    bus: &mut B,
    rom: &RomId,
    payload: &[u8],
    delay_ms: u32,
    expected_len: usize,
) -> crate::Result<Reply, Error> {
    check!(payload.len() <= MAX_PAYLOAD, Error::Oversized);
    check!(
        (1..=MAX_REPLY).contains(&expected_len),
        Error::LengthMismatch {
            expected: expected_len,
            actual: 0,
        }
    );

    bus.skip_rom()?;

    let header = [XPC_COMMAND, payload.len() as u8];
    let mut crc = Crc16Digest::new();
    crc.update(&header);
    crc.update(payload);
    for &b in header.iter().chain(payload) {
        bus.write_byte(b);
    }

    let check = [bus.read_byte(), bus.read_byte()];
    crc.update(&check);
    if !rom.is_blank() {
        check!(crc.is_residue(), Error::Crc);
    }

    bus.write_byte(RELEASE);
    bus.strong_pullup(delay_ms);

    let _ = bus.read_byte();
    let len = bus.read_byte();
    check!(len != COMM_FAILURE, Error::CommunicationFailure);
    let len = len as usize;
    check!(
        len == expected_len || len == 1,
        Error::LengthMismatch {
            expected: expected_len,
            actual: len,
        }
    );

    let mut bytes = ArrayVec::new();
    for _ in 0..len {
        bytes.push(bus.read_byte());
    }
    let check = [bus.read_byte(), bus.read_byte()];

    let mut crc = Crc16Digest::new();
    crc.update(&[len as u8]);
    crc.update(&bytes);
    crc.update(&check);
    check!(crc.is_residue(), Error::Crc);

    let reply = Reply { bytes };
    if len != expected_len {
        let code = reply.result();
        check!(code == ResultCode::Success, Error::Device(code));
        return Err(fail!(Error::LengthMismatch {
            expected: expected_len,
            actual: len,
        }));
    }
    Ok(reply)
}

/// Runs `op` up to `attempts` times, until it succeeds or fails with an
/// error that is not [transient](Error::is_transient).
///
/// Returns the last error if every attempt fails.
pub fn with_retries<T>(
    attempts: usize,
    mut op: impl FnMut() -> crate::Result<T, Error>,
) -> crate::Result<T, Error> {
    let mut last = None;
    for attempt in 0..attempts {
        match op() {
            Ok(x) => return Ok(x),
            Err(e) if !e.as_ref().is_transient() => return Err(e),
            Err(e) => {
                trace!("attempt {} failed: {:?}", attempt, e.as_ref());
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| fail!(Error::CommunicationFailure)))
}

/// Computes the two check bytes the chip sends after `frame`.
pub fn check_bytes(frame: &[u8]) -> [u8; 2] {
    crc::crc16_check_bytes(frame)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::onewire::fake;
    use pretty_assertions::assert_eq;

    const ROM: RomId =
        RomId::from_raw([0xdb, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);

    /// Builds what the chip sends back for `payload` and `reply`: the
    /// command CRC, then the dummy byte, the reply and its CRC.
    fn chip_bytes(payload: &[u8], reply: &[u8]) -> Vec<u8> {
        let mut frame = vec![XPC_COMMAND, payload.len() as u8];
        frame.extend_from_slice(payload);
        let mut out = check_bytes(&frame).to_vec();

        out.push(0xff);
        let mut tail = vec![reply.len() as u8];
        tail.extend_from_slice(reply);
        let crc = check_bytes(&tail);
        out.extend_from_slice(&tail);
        out.extend_from_slice(&crc);
        out
    }

    #[test]
    fn read_memory_exchange() {
        let payload = [0x44, 0x03];
        let mut reply = vec![0xaa];
        reply.extend((0..32).map(|i| i as u8));

        let mut bus = fake::Bus::default();
        bus.replies.push_back(chip_bytes(&payload, &reply));

        let got = standard_cmd_flow(&mut bus, &ROM, &payload, 50, 33).unwrap();
        assert_eq!(got.result(), ResultCode::Success);
        assert_eq!(got.data(), &reply[1..]);
        assert_eq!(bus.written, vec![0xcc, 0x66, 0x02, 0x44, 0x03, 0xaa]);
        assert_eq!(bus.pullups, vec![50]);
    }

    #[test]
    fn command_crc_mismatch() {
        let payload = [0x44, 0x03];
        let mut bytes = chip_bytes(&payload, &[0xaa]);
        bytes[1] ^= 0x80;

        let mut bus = fake::Bus::default();
        bus.replies.push_back(bytes.clone());
        let err = standard_cmd_flow(&mut bus, &ROM, &payload, 50, 1).unwrap_err();
        assert_eq!(err.into_inner(), Error::Crc);
        assert!(bus.pullups.is_empty());

        // Before the ROM is known, the command CRC is not checked.
        let mut bus = fake::Bus::default();
        bus.replies.push_back(bytes);
        standard_cmd_flow(&mut bus, &RomId::BLANK, &payload, 50, 1).unwrap();
    }

    #[test]
    fn reply_crc_mismatch() {
        let payload = [0xc9];
        let mut bytes = chip_bytes(&payload, &[0xaa]);
        let last = bytes.len() - 1;
        bytes[last] ^= 1;

        let mut bus = fake::Bus::default();
        bus.replies.push_back(bytes);
        let err = standard_cmd_flow(&mut bus, &ROM, &payload, 150, 1).unwrap_err();
        assert_eq!(err.into_inner(), Error::Crc);
    }

    #[test]
    fn communication_failure_sentinel() {
        let payload = [0xc9];
        let mut bytes = chip_bytes(&payload, &[]);
        bytes.truncate(3);
        bytes.push(COMM_FAILURE);

        let mut bus = fake::Bus::default();
        bus.replies.push_back(bytes);
        let err = standard_cmd_flow(&mut bus, &ROM, &payload, 150, 1).unwrap_err();
        assert_eq!(err.into_inner(), Error::CommunicationFailure);
    }

    #[test]
    fn short_failure_reply_surfaces_code() {
        let payload = [0x44, 0x6a];
        let mut bus = fake::Bus::default();
        bus.replies.push_back(chip_bytes(&payload, &[0x77]));
        let err = standard_cmd_flow(&mut bus, &ROM, &payload, 50, 33).unwrap_err();
        assert_eq!(
            err.into_inner(),
            Error::Device(ResultCode::ParameterError)
        );
    }

    #[test]
    fn length_mismatch() {
        let payload = [0xaa, 0x00];
        let mut bus = fake::Bus::default();
        bus.replies.push_back(chip_bytes(&payload, &[0xaa, 0x00, 0x01]));
        let err = standard_cmd_flow(&mut bus, &ROM, &payload, 50, 2).unwrap_err();
        assert_eq!(
            err.into_inner(),
            Error::LengthMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn expect_result_code() {
        let payload = [0xaa, 0x00];
        let mut bus = fake::Bus::default();
        bus.replies.push_back(chip_bytes(&payload, &[0x88, 0x02]));
        let reply = standard_cmd_flow(&mut bus, &ROM, &payload, 50, 2).unwrap();

        let ok = reply
            .clone()
            .expect(&[ResultCode::Success, ResultCode::DeviceDisabled])
            .unwrap();
        assert_eq!(ok.data(), &[0x02]);

        let err = reply.expect(&[ResultCode::Success]).unwrap_err();
        assert_eq!(
            err.into_inner(),
            Error::Device(ResultCode::DeviceDisabled)
        );
    }

    #[test]
    fn retries_stop_on_deterministic_failure() {
        let mut calls = 0;
        let err = with_retries(RETRIES, || -> crate::Result<(), Error> {
            calls += 1;
            Err(fail!(Error::Device(ResultCode::ProtectionError)))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(
            err.into_inner(),
            Error::Device(ResultCode::ProtectionError)
        );

        let mut calls = 0;
        let err = with_retries(RETRIES, || -> crate::Result<(), Error> {
            calls += 1;
            Err(fail!(Error::Crc))
        })
        .unwrap_err();
        assert_eq!(calls, RETRIES);
        assert_eq!(err.into_inner(), Error::Crc);

        let mut calls = 0;
        let ok = with_retries(RETRIES, || {
            calls += 1;
            if calls < 3 {
                Err(fail!(Error::Link(onewire::Error::NoPresence)))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(ok, 3);
    }

    #[test]
    fn result_codes() {
        for &x in &[0xaa, 0x55, 0x77, 0x33, 0x22, 0x88, 0x00, 0x42] {
            assert_eq!(ResultCode::from(x).to_wire(), x);
        }
        assert!(!ResultCode::VerifyFailure.is_deterministic());
        assert!(ResultCode::ProtectionError.is_deterministic());
    }
}
