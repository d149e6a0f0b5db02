// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! One battery's worth of state.
//!
//! A [`Channel`] owns a chip's bus, the key set selected for it, its
//! authentication cache, the page shadow and the decrement counter. Every
//! operation on a battery goes through its channel; two batteries are two
//! independent channels.
//!
//! Telemetry getters and setters only touch the page shadow. Chip I/O
//! happens when the channel is probed, when [`Channel::flush_all()`] writes
//! dirty pages back, and for the handful of values that are committed
//! immediately: the first-use date and the FAI-expired flag.

use arrayvec::ArrayVec;
use enumflags2::BitFlags;
use zerocopy::AsBytes as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::auth::Outcome;
use crate::counter;
use crate::counter::DecrementCounter;
use crate::crypto::ecdsa;
use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Signature;
use crate::crypto::Ciphers;
use crate::device::page;
use crate::device::AuthorityWriteMessage;
use crate::device::Ds28e30;
use crate::device::Page;
use crate::device::Protection;
use crate::fields;
use crate::fields::Field;
use crate::fields::MemoryMap;
use crate::heatmap;
use crate::keys::KeyMaterial;
use crate::keys::KeySets;
use crate::onewire;
use crate::onewire::Bus;
use crate::pages;
use crate::pages::PageBuffer;
use crate::pages::PAGE_COUNT;
use crate::xpc;

/// How many times [`Channel::authenticate_with_retries()`] tries.
pub const AUTH_RETRIES: usize = 10;

/// The page authenticated during setup and by [`Channel::batt_auth()`].
pub const AUTH_PAGE: u8 = page::USER_0;

/// Which of the two battery slots a channel serves.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceChannel {
    /// The first (or only) battery.
    Device1,
    /// The second battery.
    Device2,
}

impl DeviceChannel {
    /// Both channels, in order.
    pub const ALL: [Self; 2] = [Self::Device1, Self::Device2];

    /// Returns this channel's index: zero or one.
    pub fn index(self) -> usize {
        match self {
            Self::Device1 => 0,
            Self::Device2 => 1,
        }
    }
}

/// Errors from channel operations.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// A chip command failed.
    Device(xpc::Error),
    /// The page shadow refused the access.
    Pages(pages::Error),
    /// The decrement counter could not be updated.
    Counter(counter::Error),
    /// A value did not fit its field.
    Fields(fields::Error),
    /// The chip has not passed authentication.
    NotAuthenticated,
    /// The page is already write-protected.
    AlreadyLocked,
    /// A stored value is not valid text.
    NotText,
    /// An engineering operation was requested on a production channel.
    EngineeringDisabled,
    /// An authority signature could not be produced.
    Signing,
}

impl From<xpc::Error> for Error {
    fn from(e: xpc::Error) -> Self {
        Self::Device(e)
    }
}

impl From<pages::Error> for Error {
    fn from(e: pages::Error) -> Self {
        Self::Pages(e)
    }
}

impl From<counter::Error> for Error {
    fn from(e: counter::Error) -> Self {
        Self::Counter(e)
    }
}

impl From<fields::Error> for Error {
    fn from(e: fields::Error) -> Self {
        Self::Fields(e)
    }
}

debug_from!(Error => xpc::Error, pages::Error, counter::Error, fields::Error);

/// Per-channel settings.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Options {
    /// Both key sets; the one matching the chip is picked during setup.
    pub keys: KeySets,
    /// Where telemetry lives in the page shadow.
    pub map: MemoryMap,
    /// The value a blank decrement counter is programmed with, and the
    /// maximum it is assumed to start from.
    pub counter_default: u32,
    /// Whether engineering operations are allowed.
    pub engineering: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            keys: KeySets::default(),
            map: MemoryMap::DEFAULT,
            counter_default: counter::FACTORY_DEFAULT,
            engineering: false,
        }
    }
}

macro_rules! int_fields {
    ($($name:ident),* $(,)?) => {paste::paste! {$(
        #[doc = "Returns the stored `" $name "` value."]
        pub fn $name(&self) -> crate::Result<u32, Error> {
            self.get_int(self.options.map.$name)
        }

        #[doc = "Stores a new `" $name "` value in the page shadow."]
        pub fn [<set_ $name>](&mut self, value: u32) -> crate::Result<(), Error> {
            self.set_int(self.options.map.$name, value)
        }
    )*}};
}

/// A battery slot: a chip and everything cached about it.
pub struct Channel<B, C> {
    id: DeviceChannel,
    dev: Ds28e30<B>,
    ciphers: C,
    options: Options,
    keys: Option<KeyMaterial>,
    auth: Authenticator,
    buffer: PageBuffer,
    counter: DecrementCounter,
    present: bool,
}

impl<B: Bus, C: Ciphers> Channel<B, C> {
    /// Creates a channel over `bus`. Nothing is read until
    /// [`Channel::probe()`].
    pub fn new(id: DeviceChannel, bus: B, ciphers: C, options: Options) -> Self {
        Self {
            id,
            dev: Ds28e30::new(bus),
            ciphers,
            keys: None,
            auth: Authenticator::new(),
            buffer: PageBuffer::new(),
            counter: DecrementCounter::new(options.counter_default),
            options,
            present: false,
        }
    }

    /// Returns which slot this channel serves.
    pub fn id(&self) -> DeviceChannel {
        self.id
    }

    /// Returns the memory map in use.
    pub fn map(&self) -> &MemoryMap {
        &self.options.map
    }

    /// Runs channel setup.
    ///
    /// Fails only if no chip answers. Every later step is attempted even if
    /// an earlier one failed; the channel stays usable for whatever did
    /// succeed.
    pub fn probe(&mut self) -> crate::Result<(), Error> {
        self.present = self.dev.detect();
        if !self.present {
            info!("{:?}: no chip", self.id);
            return Err(fail!(Error::Device(xpc::Error::Link(
                onewire::Error::NoPresence
            ))));
        }
        info!("{:?}: chip present", self.id);

        if let Err(e) = self.configure_keys() {
            warn!("{:?}: key selection failed: {:?}", self.id, e);
        }
        if let Err(e) = self.init_counter() {
            warn!("{:?}: counter setup failed: {:?}", self.id, e);
        }
        if let Err(e) = self.init_page_buffer() {
            warn!("{:?}: page shadow setup failed: {:?}", self.id, e);
        }
        self.init_lock_status();
        Ok(())
    }

    /// Returns whether the last probe found a chip.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Reads the ROM ID and picks the key set for it.
    pub fn configure_keys(&mut self) -> crate::Result<(), Error> {
        let rom = self.dev.read_rom()?;
        self.keys = self.options.keys.select(&rom).copied();
        if self.keys.is_none() {
            warn!("{:?}: no key set for {:?}", self.id, rom);
        }
        Ok(())
    }

    /// Returns the key set selected for this chip.
    pub fn keys(&self) -> Option<&KeyMaterial> {
        self.keys.as_ref()
    }

    /// Programs the decrement counter if the chip is fresh from the
    /// factory.
    pub fn init_counter(&mut self) -> crate::Result<(), Error> {
        counter::program_if_blank(&mut self.dev, self.options.counter_default)?;
        Ok(())
    }

    /// Authenticates the chip, retrying up to [`AUTH_RETRIES`] times, then
    /// loads the page shadow and the counter shadow from it.
    pub fn init_page_buffer(&mut self) -> crate::Result<(), Error> {
        check!(
            self.authenticate_with_retries(AUTH_PAGE).is_authenticated(),
            Error::NotAuthenticated
        );

        let mut pages = [[0; crate::device::PAGE_LEN]; PAGE_COUNT];
        for (i, p) in pages.iter_mut().enumerate() {
            *p = self.dev.read_memory(i as u8)?;
        }
        self.counter.load(&mut self.dev)?;
        self.buffer.hydrate(&pages);
        info!(
            "{:?}: shadow loaded, counter at {:?}",
            self.id,
            self.counter.value()
        );
        Ok(())
    }

    /// Refreshes the lock flag of every shadowed page from the chip.
    ///
    /// Pages whose status cannot be read keep their current flag.
    pub fn init_lock_status(&mut self) {
        for p in 0..PAGE_COUNT as u8 {
            match self.dev.read_page_protection(p) {
                Ok(bits) => self.buffer.set_locked(p, !bits.is_empty()),
                Err(e) => {
                    warn!("{:?}: status of page {}: {:?}", self.id, p, e);
                }
            }
        }
    }

    /// Authenticates the chip against `page`.
    pub fn authenticate(&mut self, page: u8) -> Outcome {
        self.auth.authenticate(
            &mut self.dev,
            &mut self.ciphers,
            self.keys.as_ref(),
            page,
        )
    }

    /// Authenticates the chip, retrying until it passes.
    ///
    /// A chip that keeps failing is reported with its last outcome.
    pub fn authenticate_with_retries(&mut self, page: u8) -> Outcome {
        let mut outcome = Outcome::NoDevice;
        for _ in 0..AUTH_RETRIES {
            outcome = self.authenticate(page);
            if outcome.is_authenticated() {
                break;
            }
        }
        outcome
    }

    /// Returns the outcome of the most recent authentication, if any.
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.auth.last_outcome()
    }

    /// Returns whether the battery counts as genuine: it passed its most
    /// recent authentication, and its page shadow is loaded.
    pub fn batt_auth(&self) -> bool {
        self.buffer.is_initialized()
            && self.auth.last_outcome() == Some(Outcome::Authenticated)
    }

    fn require_authentic(&self) -> crate::Result<(), Error> {
        check!(
            self.auth.last_outcome() == Some(Outcome::Authenticated),
            Error::NotAuthenticated
        );
        Ok(())
    }

    fn require_engineering(&self) -> crate::Result<(), Error> {
        check!(self.options.engineering, Error::EngineeringDisabled);
        Ok(())
    }

    /// Write-protects `page`. This cannot be undone.
    ///
    /// If the chip's reply is lost, its protection status is read back to
    /// find out whether the command took effect.
    pub fn lock_page(&mut self, page: u8) -> crate::Result<(), Error> {
        check!((page as usize) < PAGE_COUNT, Error::Pages(pages::Error::OutOfRange));
        check!(!self.buffer.is_locked(page), Error::AlreadyLocked);
        self.require_authentic()?;

        let wp = BitFlags::from(Protection::WriteProtect);
        if let Err(e) = self.dev.set_page_protection(page, wp) {
            let status = self.dev.read_page_protection(page)?;
            if !status.contains(Protection::WriteProtect) {
                return Err(e.cast());
            }
            info!("{:?}: page {} was locked despite the error", self.id, page);
        }
        self.buffer.set_locked(page, true);
        info!("{:?}: page {} locked", self.id, page);
        Ok(())
    }

    /// Brings the chip up to date with the page shadow.
    ///
    /// The decrement counter is synchronized with the stored discharge
    /// level first. Then every dirty, unlocked page is written; the first
    /// failure aborts the flush, leaving the rest dirty for next time.
    pub fn flush_all(&mut self) -> crate::Result<(), Error> {
        self.require_authentic()?;
        let level = self.discharge_level()?;
        let armed = self.buffer.is_locked(self.options.map.first_use_date.page);
        match self.counter.sync(&mut self.dev, level, armed) {
            Ok(n) => {
                trace!("{:?}: {} decrements", self.id, n);
            }
            Err(e) => {
                warn!("{:?}: counter sync: {:?}", self.id, e);
            }
        }

        let pending: ArrayVec<u8, PAGE_COUNT> = self.buffer.pending().collect();
        for p in pending {
            self.write_back(p)?;
        }
        Ok(())
    }

    fn write_back(&mut self, page: u8) -> crate::Result<(), Error> {
        let data = *self.buffer.page(page)?;
        self.dev.write_memory(page, &data)?;
        self.buffer.clear_dirty(page);
        self.auth.invalidate_page(page);
        trace!("{:?}: page {} written back", self.id, page);
        Ok(())
    }

    /// Stores `bytes` in `field`, then writes its page to the chip at once.
    pub fn set_and_flush(
        &mut self,
        field: Field,
        bytes: &[u8],
    ) -> crate::Result<(), Error> {
        check!(
            bytes.len() == field.len as usize,
            Error::Pages(pages::Error::OutOfRange)
        );
        self.buffer.set(field.page, field.offset as usize, bytes)?;
        self.write_back(field.page)
    }

    /// Returns the shadowed bytes of `field`.
    pub fn read_field(&self, field: Field) -> crate::Result<&[u8], Error> {
        Ok(self.buffer.get(field.page, field.offset as usize, field.len as usize)?)
    }

    /// Stores `bytes` in the shadowed `field`.
    pub fn write_field(
        &mut self,
        field: Field,
        bytes: &[u8],
    ) -> crate::Result<(), Error> {
        check!(
            bytes.len() == field.len as usize,
            Error::Pages(pages::Error::OutOfRange)
        );
        Ok(self.buffer.set(field.page, field.offset as usize, bytes)?)
    }

    fn get_int(&self, field: Field) -> crate::Result<u32, Error> {
        let bytes = self.read_field(field)?;
        Ok(field.decode(bytes) as u32)
    }

    fn set_int(&mut self, field: Field, value: u32) -> crate::Result<(), Error> {
        let mut buf = [0; 4];
        let bytes = &mut buf[..field.len as usize];
        field.encode(value as u64, bytes)?;
        self.write_field(field, bytes)
    }

    int_fields!(discharge_level, full_status_usage, bsoh, bsoh_raw, asoc);

    /// Returns the stored first-use date.
    pub fn first_use_date(&self) -> crate::Result<&[u8], Error> {
        self.read_field(self.options.map.first_use_date)
    }

    /// Sets the first-use date and commits it immediately.
    ///
    /// Fails once the date's page has been locked.
    pub fn set_first_use_date(&mut self, date: &[u8]) -> crate::Result<(), Error> {
        self.set_and_flush(self.options.map.first_use_date, date)
    }

    /// Permanently freezes the first-use date. This also arms decrement
    /// counter synchronization.
    pub fn lock_first_use_date(&mut self) -> crate::Result<(), Error> {
        self.lock_page(self.options.map.first_use_date.page)
    }

    /// Returns whether the first-use date has been locked.
    pub fn is_first_use_date_locked(&self) -> bool {
        self.buffer.is_locked(self.options.map.first_use_date.page)
    }

    /// Returns the FAI-expired flag.
    pub fn fai_expired(&self) -> crate::Result<u32, Error> {
        self.get_int(self.options.map.fai_expired)
    }

    /// Sets the FAI-expired flag and commits it immediately.
    pub fn set_fai_expired(&mut self, value: u32) -> crate::Result<(), Error> {
        let field = self.options.map.fai_expired;
        let mut buf = [0; 4];
        let bytes = &mut buf[..field.len as usize];
        field.encode(value as u64, bytes)?;
        self.set_and_flush(field, bytes)
    }

    /// Returns the QR code, with trailing padding removed.
    pub fn qr_code(&self) -> crate::Result<&str, Error> {
        let raw = self.read_field(self.options.map.qr_code)?;
        let end = raw
            .iter()
            .rposition(|&b| b != 0 && b != 0xff)
            .map(|i| i + 1)
            .unwrap_or(0);
        core::str::from_utf8(&raw[..end]).map_err(|_| fail!(Error::NotText))
    }

    /// Returns the heatmap buckets.
    pub fn heatmap(&self) -> crate::Result<[u16; heatmap::LEN], Error> {
        let mut packed = [[0; crate::device::PAGE_LEN]; 3];
        for (out, &p) in packed.iter_mut().zip(&self.options.map.heatmap) {
            *out = *self.buffer.page(p)?;
        }
        Ok(heatmap::unpack(&packed))
    }

    /// Stores new heatmap buckets, clamping each to twelve bits.
    pub fn set_heatmap(
        &mut self,
        values: &[u32; heatmap::LEN],
    ) -> crate::Result<(), Error> {
        let targets = self.options.map.heatmap;
        for &p in &targets {
            check!(!self.buffer.is_locked(p), Error::Pages(pages::Error::Locked));
        }
        let packed = heatmap::pack(values);
        for (data, &p) in packed.iter().zip(&targets) {
            self.buffer.set(p, 0, data)?;
        }
        Ok(())
    }

    /// Returns how many decrements have been made.
    pub fn cycles_used(&self) -> Option<u32> {
        self.counter.cycles_used()
    }

    /// Returns the decrement counter shadow.
    pub fn counter(&self) -> &DecrementCounter {
        &self.counter
    }

    /// Returns the chip's name.
    pub fn chip_name(&self) -> &'static str {
        "ds28e30"
    }

    /// Returns the lock flag of every shadowed page.
    pub fn lock_status(&self) -> [bool; PAGE_COUNT] {
        self.buffer.lock_status()
    }

    /// Returns the dirty flag of every shadowed page.
    pub fn dirty_status(&self) -> [bool; PAGE_COUNT] {
        self.buffer.dirty_status()
    }

    /// Returns the whole page shadow.
    pub fn dump_buffer(&self) -> crate::Result<&[Page; PAGE_COUNT], Error> {
        check!(
            self.buffer.is_initialized(),
            Error::Pages(pages::Error::NotInitialized)
        );
        Ok(self.buffer.dump())
    }

    /// Returns the certificate constant of the selected key set.
    pub fn certificate_constant(&self) -> Option<&[u8; crate::cert::CONSTANT_LEN]> {
        self.keys.as_ref().map(|k| &k.certificate_constant)
    }

    /// Returns the system public key of the selected key set.
    pub fn system_public_key(&self) -> Option<&PublicKey> {
        self.keys.as_ref().map(|k| &k.system)
    }

    /// Returns the cached device public key.
    pub fn device_public_key(&self) -> Option<&PublicKey> {
        self.auth.device_public_key()
    }

    /// Returns the cached device certificate.
    pub fn certificate(&self) -> Option<&Signature> {
        self.auth.certificate()
    }

    /// Reads a page straight from the chip. Engineering only.
    pub fn read_page_memory(&mut self, page: u8) -> crate::Result<Page, Error> {
        self.require_engineering()?;
        Ok(self.dev.read_memory(page)?)
    }

    #[cfg(test)]
    pub(crate) fn bus_mut(&mut self) -> &mut B {
        self.dev.bus_mut()
    }

    /// Returns the device driver, for raw line access and timing changes.
    /// Engineering only.
    pub fn device_mut(&mut self) -> crate::Result<&mut Ds28e30<B>, Error> {
        self.require_engineering()?;
        Ok(&mut self.dev)
    }

    /// Authenticates `attempts` times and returns how many passed.
    /// Engineering only.
    pub fn pass_rate(&mut self, attempts: usize) -> crate::Result<usize, Error> {
        self.require_engineering()?;
        let mut passed = 0;
        for _ in 0..attempts {
            if self.authenticate(AUTH_PAGE).is_authenticated() {
                passed += 1;
            }
        }
        info!("{:?}: {}/{} authentications passed", self.id, passed, attempts);
        Ok(passed)
    }

    /// Permanently disables the chip. Engineering only.
    pub fn disable(&mut self, release: &[u8; 8]) -> crate::Result<(), Error> {
        self.require_engineering()?;
        warn!("{:?}: disabling chip", self.id);
        self.dev.disable(release)?;
        Ok(())
    }

    /// Writes `data` to `page` through an authority-signed write.
    /// Engineering only.
    ///
    /// The chip's current contents are read first, since the signature
    /// covers both the old and the new contents. The write is single-shot;
    /// on a failed reply, the page is read back to see whether it landed.
    pub fn authority_write(
        &mut self,
        page: u8,
        data: &Page,
        authority: &mut dyn ecdsa::Sign,
    ) -> crate::Result<(), Error> {
        self.require_engineering()?;
        check!(
            page <= crate::device::MAX_AUTHORITY_PAGE,
            Error::Pages(pages::Error::OutOfRange)
        );
        let identity = match self.auth.identity() {
            Some(id) => *id,
            None => self.dev.read_identity()?,
        };

        let old = self.dev.read_memory(page)?;
        let message = AuthorityWriteMessage {
            rom: *identity.rom.as_bytes(),
            old,
            new: *data,
            page_number: page,
            manid: identity.manid,
        };
        let signature = authority
            .sign(&[message.as_bytes()])
            .map_err(|_| fail!(Error::Signing))?;

        if let Err(e) = self.dev.authenticated_write(page, data, &signature) {
            if self.dev.read_memory(page)? != *data {
                return Err(e.cast());
            }
            info!("{:?}: authenticated write landed despite the error", self.id);
        }

        if self.buffer.is_initialized() {
            self.buffer.refresh(page, data)?;
        }
        self.auth.invalidate_page(page);
        Ok(())
    }
}
