// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The DS28E30 command set.
//!
//! [`Ds28e30`] wraps a [`Bus`] with one method per device command. Each
//! method builds the command payload, runs it through the [`xpc`] transport
//! with the command's processing delay, and checks the result code.
//!
//! Commands are retried up to [`xpc::RETRIES`] times on transient failures,
//! except for the two whose effect cannot be observed from a failed reply:
//! [`Ds28e30::decrement_counter()`] and [`Ds28e30::authenticated_write()`].
//! Callers of those confirm the outcome by reading the chip back.

use enumflags2::bitflags;
use enumflags2::BitFlags;
use zerocopy::AsBytes;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Signature;
use crate::crypto::ecdsa::SCALAR_LEN;
use crate::onewire::Bus;
use crate::onewire::Link as _;
use crate::onewire::RomId;
use crate::xpc;
use crate::xpc::ResultCode;

pub use crate::xpc::Error;

#[cfg(test)]
pub(crate) mod fake;

/// The size of a memory page, in bytes.
pub const PAGE_LEN: usize = 32;

/// A page's worth of bytes.
pub type Page = [u8; PAGE_LEN];

/// The last page an authority-signed write can target.
pub const MAX_AUTHORITY_PAGE: u8 = 3;

/// Pages with a fixed role on the chip.
pub mod page {
    /// The first of the four general-purpose user pages.
    pub const USER_0: u8 = 0;
    /// The `r` half of the device certificate.
    pub const CERT_R: u8 = 4;
    /// The `s` half of the device certificate.
    pub const CERT_S: u8 = 5;
    /// The x-coordinate of the authority public key.
    pub const AUTHORITY_X: u8 = 6;
    /// The y-coordinate of the authority public key.
    pub const AUTHORITY_Y: u8 = 7;
    /// The x-coordinate of the device public key.
    pub const DEVICE_PUB_X: u8 = 28;
    /// The y-coordinate of the device public key.
    pub const DEVICE_PUB_Y: u8 = 29;
    /// The decrement counter.
    pub const DECREMENT_COUNTER: u8 = 106;

    /// Set in a Read Status page argument to read the global status block
    /// instead.
    pub const GLOBAL_STATUS: u8 = 0x80;
}

/// A device command.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Command {
    /// Write a page.
    WriteMemory = 0x96,
    /// Read a page.
    ReadMemory = 0x44,
    /// Read page protection or the global status block.
    ReadStatus = 0xaa,
    /// Set protection bits on a page.
    SetPageProtection = 0xc3,
    /// Sign a page and a challenge.
    ComputeReadPageAuth = 0xa5,
    /// Decrement the counter by one.
    DecrementCounter = 0xc9,
    /// Permanently disable the chip.
    DeviceDisable = 0x33,
    /// Read the device public key.
    ReadDevicePublicKey = 0xcb,
    /// Write a page, authorized by an authority signature.
    AuthenticatedWrite = 0x89,
}

impl Command {
    /// Returns how long the chip needs to process this command, in
    /// milliseconds.
    pub fn delay_ms(self) -> u32 {
        match self {
            Self::ReadMemory | Self::ReadStatus | Self::ReadDevicePublicKey => 50,
            Self::WriteMemory | Self::SetPageProtection | Self::DeviceDisable => {
                100
            }
            Self::DecrementCounter => 150,
            Self::ComputeReadPageAuth => 200,
            Self::AuthenticatedWrite => 350,
        }
    }
}

/// A page protection bit.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Protection {
    /// Reads are refused.
    ReadProtect = 0x01,
    /// Writes are refused. Irreversible.
    WriteProtect = 0x02,
    /// Writes may only clear bits.
    EpromEmulation = 0x04,
    /// The page is a decrement counter.
    DecrementCounter = 0x08,
    /// The page holds an authority public key.
    Authority = 0x20,
    /// Reads and writes are ECDH-encrypted.
    EcdhEncrypted = 0x40,
    /// Writes need an authority signature.
    EcdsaWriteProtect = 0x80,
}

/// A chip's identity, as read from its ROM and global status block.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Identity {
    /// The ROM ID.
    pub rom: RomId,
    /// The manufacturer ID.
    pub manid: [u8; 2],
    /// The hardware version.
    pub hw_version: [u8; 2],
}

/// The message a chip signs for Compute and Read Page Authentication.
#[derive(AsBytes)]
#[repr(C)]
pub struct PageAuthMessage {
    /// The ROM ID, or all ones in anonymous mode.
    pub rom: [u8; 8],
    /// The page contents.
    pub page: Page,
    /// The host's challenge.
    pub challenge: [u8; 32],
    /// The page number.
    pub page_number: u8,
    /// The manufacturer ID.
    pub manid: [u8; 2],
}

impl PageAuthMessage {
    /// Builds the message for `page_number`.
    pub fn new(
        rom: &RomId,
        anonymous: bool,
        page: &Page,
        challenge: &[u8; 32],
        page_number: u8,
        manid: [u8; 2],
    ) -> Self {
        Self {
            rom: if anonymous { [0xff; 8] } else { *rom.as_bytes() },
            page: *page,
            challenge: *challenge,
            page_number,
            manid,
        }
    }
}

/// The message an authority signs to authorize an authenticated write.
#[derive(AsBytes)]
#[repr(C)]
pub struct AuthorityWriteMessage {
    /// The ROM ID.
    pub rom: [u8; 8],
    /// The page's current contents.
    pub old: Page,
    /// The page's new contents.
    pub new: Page,
    /// The page number.
    pub page_number: u8,
    /// The manufacturer ID.
    pub manid: [u8; 2],
}

/// A DS28E30 on a 1-Wire bus.
///
/// The bus is assumed to hold this chip alone; every command addresses it
/// with Skip ROM.
pub struct Ds28e30<B> {
    bus: B,
    rom: RomId,
}

impl<B: Bus> Ds28e30<B> {
    /// Creates a new driver. The ROM ID is unknown until
    /// [`Ds28e30::read_rom()`] succeeds.
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            rom: RomId::BLANK,
        }
    }

    /// Returns the ROM ID read by the last successful
    /// [`Ds28e30::read_rom()`].
    pub fn rom(&self) -> &RomId {
        &self.rom
    }

    /// Returns the underlying bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Tears down this driver, returning the bus.
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Checks for a presence pulse.
    pub fn detect(&mut self) -> bool {
        self.bus.detect()
    }

    /// Reads and caches the ROM ID.
    pub fn read_rom(&mut self) -> crate::Result<RomId, Error> {
        let rom = self.bus.read_rom()?;
        self.rom = rom;
        Ok(rom)
    }

    fn transact(
        &mut self,
        cmd: Command,
        args: &[u8],
        reply_len: usize,
        accept: &[ResultCode],
        attempts: usize,
    ) -> crate::Result<xpc::Reply, Error> {
        let mut payload = [0; xpc::MAX_PAYLOAD];
        payload[0] = cmd as u8;
        payload[1..1 + args.len()].copy_from_slice(args);
        let payload = &payload[..1 + args.len()];

        let rom = self.rom;
        let bus = &mut self.bus;
        xpc::with_retries(attempts, || {
            xpc::standard_cmd_flow(
                &mut *bus,
                &rom,
                payload,
                cmd.delay_ms(),
                reply_len,
            )?
            .expect(accept)
        })
    }

    /// Writes `data` to `page`.
    pub fn write_memory(
        &mut self,
        page: u8,
        data: &Page,
    ) -> crate::Result<(), Error> {
        let mut args = [0; 1 + PAGE_LEN];
        args[0] = page;
        args[1..].copy_from_slice(data);
        self.transact(
            Command::WriteMemory,
            &args,
            1,
            &[ResultCode::Success],
            xpc::RETRIES,
        )?;
        Ok(())
    }

    /// Reads `page`.
    pub fn read_memory(&mut self, page: u8) -> crate::Result<Page, Error> {
        let reply = self.transact(
            Command::ReadMemory,
            &[page],
            1 + PAGE_LEN,
            &[ResultCode::Success],
            xpc::RETRIES,
        )?;
        let mut out = [0; PAGE_LEN];
        out.copy_from_slice(reply.data());
        Ok(out)
    }

    /// Reads the protection bits of `page`.
    pub fn read_page_protection(
        &mut self,
        page: u8,
    ) -> crate::Result<BitFlags<Protection>, Error> {
        let reply = self.transact(
            Command::ReadStatus,
            &[page & !page::GLOBAL_STATUS],
            2,
            &[ResultCode::Success, ResultCode::DeviceDisabled],
            xpc::RETRIES,
        )?;
        Ok(BitFlags::from_bits_truncate(reply.data()[0]))
    }

    /// Reads the global status block: the manufacturer ID and hardware
    /// version.
    pub fn read_global_status(
        &mut self,
    ) -> crate::Result<([u8; 2], [u8; 2]), Error> {
        let reply = self.transact(
            Command::ReadStatus,
            &[page::GLOBAL_STATUS],
            5,
            &[ResultCode::Success, ResultCode::DeviceDisabled],
            xpc::RETRIES,
        )?;
        let data = reply.data();
        Ok(([data[0], data[1]], [data[2], data[3]]))
    }

    /// Reads the ROM ID and global status block.
    pub fn read_identity(&mut self) -> crate::Result<Identity, Error> {
        let rom = self.read_rom()?;
        let (manid, hw_version) = self.read_global_status()?;
        Ok(Identity {
            rom,
            manid,
            hw_version,
        })
    }

    /// Sets protection bits on `page`.
    ///
    /// Protection bits can never be cleared.
    pub fn set_page_protection(
        &mut self,
        page: u8,
        protection: BitFlags<Protection>,
    ) -> crate::Result<(), Error> {
        self.transact(
            Command::SetPageProtection,
            &[page, protection.bits()],
            1,
            &[ResultCode::Success],
            xpc::RETRIES,
        )?;
        Ok(())
    }

    /// Asks the chip to sign `page` and `challenge`.
    ///
    /// The signature covers a [`PageAuthMessage`]; it proves nothing until
    /// checked against the device public key.
    pub fn compute_read_page_auth(
        &mut self,
        page: u8,
        anonymous: bool,
        challenge: &[u8; 32],
    ) -> crate::Result<Signature, Error> {
        let mut args = [0; 2 + 32];
        args[0] = (page & 0x7f) | if anonymous { 0xe0 } else { 0x00 };
        args[1] = 0x03;
        args[2..].copy_from_slice(challenge);

        let reply = self.transact(
            Command::ComputeReadPageAuth,
            &args,
            1 + 2 * SCALAR_LEN,
            &[ResultCode::Success],
            xpc::RETRIES,
        )?;

        // The chip sends `s` first.
        let data = reply.data();
        let mut sig = Signature::default();
        sig.s.copy_from_slice(&data[..SCALAR_LEN]);
        sig.r.copy_from_slice(&data[SCALAR_LEN..]);
        Ok(sig)
    }

    /// Decrements the counter by one. This is attempted once.
    pub fn decrement_counter(&mut self) -> crate::Result<(), Error> {
        self.transact(
            Command::DecrementCounter,
            &[],
            1,
            &[ResultCode::Success],
            1,
        )?;
        Ok(())
    }

    /// Permanently disables the chip.
    pub fn disable(&mut self, release: &[u8; 8]) -> crate::Result<(), Error> {
        self.transact(
            Command::DeviceDisable,
            release,
            1,
            &[ResultCode::Success],
            xpc::RETRIES,
        )?;
        Ok(())
    }

    /// Reads the device public key out of its key pages.
    pub fn read_device_public_key(
        &mut self,
    ) -> crate::Result<PublicKey, Error> {
        Ok(PublicKey {
            x: self.read_memory(page::DEVICE_PUB_X)?,
            y: self.read_memory(page::DEVICE_PUB_Y)?,
        })
    }

    /// Writes `data` to `page`, authorized by `signature` over an
    /// [`AuthorityWriteMessage`]. This is attempted once.
    ///
    /// Pages past [`MAX_AUTHORITY_PAGE`] are rejected without touching the
    /// bus.
    pub fn authenticated_write(
        &mut self,
        page: u8,
        data: &Page,
        signature: &Signature,
    ) -> crate::Result<(), Error> {
        check!(
            page <= MAX_AUTHORITY_PAGE,
            Error::Device(ResultCode::ParameterError)
        );
        let mut args = [0; 1 + PAGE_LEN + 2 * SCALAR_LEN];
        args[0] = page;
        args[1..1 + PAGE_LEN].copy_from_slice(data);
        args[1 + PAGE_LEN..].copy_from_slice(signature.as_bytes());
        self.transact(
            Command::AuthenticatedWrite,
            &args,
            1,
            &[ResultCode::Success],
            1,
        )?;
        Ok(())
    }
}
