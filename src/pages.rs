// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The write-back page shadow.
//!
//! A [`PageBuffer`] mirrors the chip's first [`PAGE_COUNT`] pages. Reads and
//! writes only ever touch the shadow; writes mark their page dirty, and the
//! owning channel flushes dirty pages to the chip later.
//!
//! A page marked locked is write-protected on the chip and is never written,
//! locally or remotely.

use crate::device::Page;
use crate::device::PAGE_LEN;

/// The number of pages shadowed.
pub const PAGE_COUNT: usize = 8;

/// Errors from the page shadow.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The shadow has not been hydrated from the chip yet.
    NotInitialized,
    /// The page is write-protected.
    Locked,
    /// The page, offset or length falls outside of the shadow.
    OutOfRange,
}

/// A shadow of the chip's first [`PAGE_COUNT`] pages.
#[derive(Clone, Debug)]
pub struct PageBuffer {
    pages: [Page; PAGE_COUNT],
    locked: [bool; PAGE_COUNT],
    dirty: [bool; PAGE_COUNT],
    initialized: bool,
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageBuffer {
    /// Creates an empty shadow.
    ///
    /// Page 0 holds the factory-written QR code and starts out locked.
    pub fn new() -> Self {
        let mut locked = [false; PAGE_COUNT];
        locked[0] = true;
        Self {
            pages: [[0; PAGE_LEN]; PAGE_COUNT],
            locked,
            dirty: [false; PAGE_COUNT],
            initialized: false,
        }
    }

    /// Returns whether the shadow has been hydrated.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Replaces the shadow's contents with pages read from the chip, and
    /// marks it hydrated.
    pub fn hydrate(&mut self, pages: &[Page; PAGE_COUNT]) {
        self.pages = *pages;
        self.dirty = [false; PAGE_COUNT];
        self.initialized = true;
    }

    fn index(page: u8) -> crate::Result<usize, Error> {
        let i = page as usize;
        check!(i < PAGE_COUNT, Error::OutOfRange);
        Ok(i)
    }

    fn end(offset: usize, len: usize) -> crate::Result<usize, Error> {
        match offset.checked_add(len) {
            Some(end) if end <= PAGE_LEN => Ok(end),
            _ => Err(fail!(Error::OutOfRange)),
        }
    }

    /// Returns `len` bytes of `page` starting at `offset`.
    pub fn get(
        &self,
        page: u8,
        offset: usize,
        len: usize,
    ) -> crate::Result<&[u8], Error> {
        check!(self.initialized, Error::NotInitialized);
        let i = Self::index(page)?;
        let end = Self::end(offset, len)?;
        Ok(&self.pages[i][offset..end])
    }

    /// Returns a whole page.
    pub fn page(&self, page: u8) -> crate::Result<&Page, Error> {
        check!(self.initialized, Error::NotInitialized);
        Ok(&self.pages[Self::index(page)?])
    }

    /// Overwrites `bytes.len()` bytes of `page` starting at `offset`, and
    /// marks the page dirty.
    pub fn set(
        &mut self,
        page: u8,
        offset: usize,
        bytes: &[u8],
    ) -> crate::Result<(), Error> {
        check!(self.initialized, Error::NotInitialized);
        let i = Self::index(page)?;
        check!(!self.locked[i], Error::Locked);
        let end = Self::end(offset, bytes.len())?;

        self.pages[i][offset..end].copy_from_slice(bytes);
        self.dirty[i] = true;
        Ok(())
    }

    /// Updates a page from the chip without marking it dirty.
    pub fn refresh(&mut self, page: u8, data: &Page) -> crate::Result<(), Error> {
        let i = Self::index(page)?;
        self.pages[i] = *data;
        self.dirty[i] = false;
        Ok(())
    }

    /// Returns whether `page` is locked. Pages outside the shadow count as
    /// locked.
    pub fn is_locked(&self, page: u8) -> bool {
        self.locked.get(page as usize).copied().unwrap_or(true)
    }

    /// Marks `page` as locked or unlocked.
    pub fn set_locked(&mut self, page: u8, locked: bool) {
        if let Some(l) = self.locked.get_mut(page as usize) {
            *l = locked;
        }
    }

    /// Returns whether `page` has changes not yet written to the chip.
    pub fn is_dirty(&self, page: u8) -> bool {
        self.dirty.get(page as usize).copied().unwrap_or(false)
    }

    /// Marks `page` as written back.
    pub fn clear_dirty(&mut self, page: u8) {
        if let Some(d) = self.dirty.get_mut(page as usize) {
            *d = false;
        }
    }

    /// Returns the pages that need writing back: dirty and not locked.
    pub fn pending(&self) -> impl Iterator<Item = u8> + '_ {
        (0..PAGE_COUNT as u8)
            .filter(move |&p| self.dirty[p as usize] && !self.locked[p as usize])
    }

    /// Returns the lock flags of every page.
    pub fn lock_status(&self) -> [bool; PAGE_COUNT] {
        self.locked
    }

    /// Returns the dirty flags of every page.
    pub fn dirty_status(&self) -> [bool; PAGE_COUNT] {
        self.dirty
    }

    /// Returns the whole shadow.
    pub fn dump(&self) -> &[Page; PAGE_COUNT] {
        &self.pages
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hydrated() -> PageBuffer {
        let mut buf = PageBuffer::new();
        let mut pages = [[0; PAGE_LEN]; PAGE_COUNT];
        for (i, p) in pages.iter_mut().enumerate() {
            *p = [i as u8; PAGE_LEN];
        }
        buf.hydrate(&pages);
        buf
    }

    #[test]
    fn not_initialized() {
        let mut buf = PageBuffer::new();
        assert_eq!(
            buf.get(1, 0, 4).unwrap_err().into_inner(),
            Error::NotInitialized
        );
        assert_eq!(
            buf.set(1, 0, &[1]).unwrap_err().into_inner(),
            Error::NotInitialized
        );
    }

    #[test]
    fn get_and_set() {
        let mut buf = hydrated();
        assert_eq!(buf.get(2, 4, 3).unwrap(), &[2, 2, 2]);
        assert_eq!(buf.pending().count(), 0);

        buf.set(2, 4, &[9, 8, 7]).unwrap();
        assert_eq!(buf.get(2, 3, 5).unwrap(), &[2, 9, 8, 7, 2]);
        assert!(buf.is_dirty(2));
        assert_eq!(buf.pending().collect::<Vec<_>>(), vec![2]);

        buf.clear_dirty(2);
        assert_eq!(buf.pending().count(), 0);
    }

    #[test]
    fn bounds() {
        let mut buf = hydrated();
        assert_eq!(
            buf.get(8, 0, 1).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert_eq!(
            buf.get(1, 30, 4).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert_eq!(
            buf.set(1, 31, &[0, 0]).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert_eq!(
            buf.get(1, usize::MAX, 2).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert_eq!(
            buf.get(1, 2, usize::MAX).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert_eq!(
            buf.set(1, usize::MAX, &[0]).unwrap_err().into_inner(),
            Error::OutOfRange
        );
        assert!(!buf.is_dirty(1));
        assert!(buf.is_locked(200));
    }

    #[test]
    fn locked_pages_reject_writes() {
        let mut buf = hydrated();
        assert!(buf.is_locked(0));
        assert_eq!(
            buf.set(0, 0, &[1]).unwrap_err().into_inner(),
            Error::Locked
        );

        buf.set(3, 0, &[1]).unwrap();
        buf.set_locked(3, true);
        assert_eq!(
            buf.set(3, 0, &[1]).unwrap_err().into_inner(),
            Error::Locked
        );
        // A dirty page that became locked is never flushed.
        assert!(buf.is_dirty(3));
        assert_eq!(buf.pending().count(), 0);
    }
}
