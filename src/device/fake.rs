// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! A simulated DS28E30 for tests.
//!
//! `Chip` sits directly on the bit slots of a [`Bus`](crate::onewire::Bus):
//! it decodes ROM commands and extended-command frames, sends real CRCs, and
//! signs page authentications with a freshly generated key. Faults can be
//! injected at every layer.

use std::collections::VecDeque;

use zerocopy::AsBytes;

use crate::cert;
use crate::crc;
use crate::crypto::ecdsa::PublicKey;
use crate::crypto::ecdsa::Sign as _;
use crate::crypto::ecdsa::Signature;
use crate::crypto::ecdsa::Verify as _;
use crate::crypto::ring;
use crate::device::page;
use crate::device::AuthorityWriteMessage;
use crate::device::Command;
use crate::device::Page;
use crate::device::PageAuthMessage;
use crate::device::Protection;
use crate::device::PAGE_LEN;
use crate::onewire;
use crate::onewire::RomId;
use crate::xpc;
use crate::xpc::ResultCode;

/// A ROM ID whose customer ID selects the vendor key set.
pub const ROM: [u8; 8] = [0xdb, 0x4d, 0xa9, 0x03, 0x00, 0x00, 0x05, 0x55];

/// A ROM ID whose customer ID selects the generic key set.
pub const GENERIC_ROM: [u8; 8] =
    [0xdb, 0x17, 0x22, 0x5e, 0x01, 0x30, 0x00, 0xf3];

pub const MANID: [u8; 2] = [0x00, 0x80];
pub const HW_VERSION: [u8; 2] = [0x01, 0x00];

/// Factory contents of page 0.
pub const QR_PAGE: Page = *b"QR-DS28E30-BAT-0001-A7K2M9X4P5ZQ";

const PAGES: usize = 128;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum State {
    RomCommand,
    XpcStart,
    XpcLen,
    XpcBody(usize),
    Release,
    Idle,
}

pub struct Chip {
    pub rom: [u8; 8],
    pub manid: [u8; 2],
    pub hw_version: [u8; 2],
    pub pages: Vec<Page>,
    pub protection: Vec<u8>,
    pub counter: Option<u32>,
    pub disabled: bool,
    signer: ring::ecdsa::Signer,

    /// Answers no resets at all.
    pub absent: bool,
    /// Ignores this many resets.
    pub missed_presence: usize,
    /// Corrupts the CRC of this many replies.
    pub corrupt_replies: usize,
    /// Decrements, but reports a failure, this many times.
    pub lose_decrement_ack: usize,
    /// Executes the given command, but reports a failure, this many times.
    pub fail_after_apply: Option<(u8, usize)>,

    pub commands: Vec<u8>,
    pub challenges: Vec<[u8; 32]>,
    pub writes: Vec<u8>,
    pub pullups: Vec<u32>,
    pub resets: usize,

    state: State,
    frame: Vec<u8>,
    tx: VecDeque<u8>,
    rx: u8,
    rx_bits: u8,
    tx_bits: u8,
}

impl Chip {
    /// Creates a chip with the vendor ROM ID, a factory-locked QR code page,
    /// and an unprogrammed decrement counter.
    pub fn new() -> Self {
        Self::with_rom(ROM)
    }

    pub fn with_rom(rom: [u8; 8]) -> Self {
        let (signer, _) = ring::ecdsa::Signer::generate().unwrap();
        let key = signer.public_key();

        let mut pages = vec![[0; PAGE_LEN]; PAGES];
        pages[0] = QR_PAGE;
        pages[page::DEVICE_PUB_X as usize] = key.x;
        pages[page::DEVICE_PUB_Y as usize] = key.y;
        let mut protection = vec![0; PAGES];
        protection[0] = Protection::WriteProtect as u8;

        Self {
            rom,
            manid: MANID,
            hw_version: HW_VERSION,
            pages,
            protection,
            counter: None,
            disabled: false,
            signer,

            absent: false,
            missed_presence: 0,
            corrupt_replies: 0,
            lose_decrement_ack: 0,
            fail_after_apply: None,

            commands: Vec::new(),
            challenges: Vec::new(),
            writes: Vec::new(),
            pullups: Vec::new(),
            resets: 0,

            state: State::Idle,
            frame: Vec::new(),
            tx: VecDeque::new(),
            rx: 0,
            rx_bits: 0,
            tx_bits: 0,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Signs this chip's certificate with `authority`, storing it in the
    /// certificate pages.
    pub fn provision(
        &mut self,
        authority: &mut ring::ecdsa::Signer,
        constant: &[u8; cert::CONSTANT_LEN],
    ) {
        let custom = cert::CustomFields::new(
            constant,
            &RomId::from_raw(self.rom),
            self.manid,
        );
        let body = cert::certificate_body(&self.public_key(), &custom);
        let sig = authority.sign(&[&body[..]]).unwrap();
        self.pages[page::CERT_R as usize] = sig.r;
        self.pages[page::CERT_S as usize] = sig.s;
    }

    /// Installs the key authenticated writes are checked against.
    pub fn install_authority(&mut self, key: &PublicKey) {
        self.pages[page::AUTHORITY_X as usize] = key.x;
        self.pages[page::AUTHORITY_Y as usize] = key.y;
    }

    pub fn count(&self, cmd: Command) -> usize {
        self.commands.iter().filter(|&&c| c == cmd as u8).count()
    }

    fn on_byte(&mut self, b: u8) {
        let state = self.state;
        self.state = match state {
            State::RomCommand => match b {
                onewire::SKIP_ROM => State::XpcStart,
                onewire::READ_ROM => {
                    self.tx.extend(self.rom.iter());
                    State::Idle
                }
                _ => State::Idle,
            },
            State::XpcStart if b == xpc::XPC_COMMAND => {
                self.frame = vec![b];
                State::XpcLen
            }
            State::XpcLen => {
                self.frame.push(b);
                if b == 0 {
                    self.send_command_crc();
                    State::Release
                } else {
                    State::XpcBody(b as usize)
                }
            }
            State::XpcBody(len) => {
                self.frame.push(b);
                if self.frame.len() == len + 2 {
                    self.send_command_crc();
                    State::Release
                } else {
                    State::XpcBody(len)
                }
            }
            State::Release if b == xpc::RELEASE => {
                let payload = self.frame[2..].to_vec();
                let reply = self.execute(&payload);
                self.send_reply(&reply);
                State::Idle
            }
            _ => State::Idle,
        };
    }

    fn send_command_crc(&mut self) {
        let check = crc::crc16_check_bytes(&self.frame);
        self.tx.extend(check.iter());
    }

    fn send_reply(&mut self, reply: &[u8]) {
        let mut tail = vec![reply.len() as u8];
        tail.extend_from_slice(reply);
        let mut check = crc::crc16_check_bytes(&tail);
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            check[0] ^= 0x01;
        }
        self.tx.push_back(0xff);
        self.tx.extend(tail);
        self.tx.extend(check.iter());
    }

    fn execute(&mut self, p: &[u8]) -> Vec<u8> {
        use ResultCode::*;
        let code = |c: ResultCode| vec![c.to_wire()];

        let cmd = p[0];
        self.commands.push(cmd);
        if self.disabled && cmd != Command::ReadStatus as u8 {
            return code(DeviceDisabled);
        }

        let reply = match cmd {
            0x96 => {
                let pg = p[1] as usize;
                let mut data = [0; PAGE_LEN];
                data.copy_from_slice(&p[2..2 + PAGE_LEN]);
                if self.protection[pg] & Protection::WriteProtect as u8 != 0 {
                    code(ProtectionError)
                } else if pg == page::DECREMENT_COUNTER as usize {
                    match self.counter {
                        Some(_) => code(ProtectionError),
                        None => {
                            self.counter = Some(
                                data[0] as u32
                                    | (data[1] as u32) << 8
                                    | (data[2] as u32) << 16,
                            );
                            code(Success)
                        }
                    }
                } else {
                    self.pages[pg] = data;
                    self.writes.push(pg as u8);
                    code(Success)
                }
            }
            0x44 => {
                let pg = p[1] as usize;
                if pg == page::DECREMENT_COUNTER as usize {
                    match self.counter {
                        Some(v) => {
                            let mut r = code(Success);
                            r.extend_from_slice(&[
                                v as u8,
                                (v >> 8) as u8,
                                (v >> 16) as u8,
                            ]);
                            r.resize(1 + PAGE_LEN, 0);
                            r
                        }
                        None => code(ParameterError),
                    }
                } else if pg >= PAGES {
                    code(ParameterError)
                } else {
                    let mut r = code(Success);
                    r.extend_from_slice(&self.pages[pg]);
                    r
                }
            }
            0xaa => {
                let status = if self.disabled {
                    DeviceDisabled
                } else {
                    Success
                };
                let mut r = code(status);
                if p[1] & page::GLOBAL_STATUS != 0 {
                    r.extend_from_slice(&self.manid);
                    r.extend_from_slice(&self.hw_version);
                } else {
                    r.push(self.protection[p[1] as usize]);
                }
                r
            }
            0xc3 => {
                self.protection[p[1] as usize] |= p[2];
                code(Success)
            }
            0xa5 => {
                let anonymous = p[1] & 0xe0 == 0xe0;
                let pg = if anonymous { p[1] & 0x1f } else { p[1] & 0x7f };
                let mut challenge = [0; 32];
                challenge.copy_from_slice(&p[3..35]);
                self.challenges.push(challenge);

                let msg = PageAuthMessage::new(
                    &RomId::from_raw(self.rom),
                    anonymous,
                    &self.pages[pg as usize],
                    &challenge,
                    pg,
                    self.manid,
                );
                let sig = self.signer.sign(&[msg.as_bytes()]).unwrap();
                let mut r = code(Success);
                r.extend_from_slice(&sig.s);
                r.extend_from_slice(&sig.r);
                r
            }
            0xc9 => match self.counter {
                Some(v) if v > 0 => {
                    self.counter = Some(v - 1);
                    if self.lose_decrement_ack > 0 {
                        self.lose_decrement_ack -= 1;
                        code(VerifyFailure)
                    } else {
                        code(Success)
                    }
                }
                _ => code(ParameterError),
            },
            0x33 => {
                self.disabled = true;
                code(Success)
            }
            0x89 => {
                let pg = p[1] & 0x03;
                let mut new = [0; PAGE_LEN];
                new.copy_from_slice(&p[2..2 + PAGE_LEN]);
                let mut sig = Signature::default();
                sig.r.copy_from_slice(&p[34..66]);
                sig.s.copy_from_slice(&p[66..98]);

                let authority = PublicKey {
                    x: self.pages[page::AUTHORITY_X as usize],
                    y: self.pages[page::AUTHORITY_Y as usize],
                };
                let msg = AuthorityWriteMessage {
                    rom: self.rom,
                    old: self.pages[pg as usize],
                    new,
                    page_number: pg,
                    manid: self.manid,
                };
                let ok = ring::ecdsa::Verifier::new(&authority)
                    .verify(&[msg.as_bytes()], &sig)
                    .is_ok();
                if ok {
                    self.pages[pg as usize] = new;
                    self.writes.push(pg);
                    code(Success)
                } else {
                    code(EcdsaFailure)
                }
            }
            _ => code(InvalidSequence),
        };

        match self.fail_after_apply {
            Some((c, n)) if c == cmd && n > 0 => {
                self.fail_after_apply = Some((c, n - 1));
                code(VerifyFailure)
            }
            _ => reply,
        }
    }
}

impl onewire::Bus for Chip {
    fn reset(&mut self) -> bool {
        self.resets += 1;
        if self.missed_presence > 0 {
            self.missed_presence -= 1;
            return false;
        }
        if self.absent {
            return false;
        }
        self.state = State::RomCommand;
        self.frame.clear();
        self.tx.clear();
        self.rx = 0;
        self.rx_bits = 0;
        self.tx_bits = 0;
        true
    }

    fn write_bit(&mut self, bit: bool) {
        self.rx |= (bit as u8) << self.rx_bits;
        self.rx_bits += 1;
        if self.rx_bits == 8 {
            let b = self.rx;
            self.rx = 0;
            self.rx_bits = 0;
            self.on_byte(b);
        }
    }

    fn read_bit(&mut self) -> bool {
        let byte = match self.tx.front() {
            Some(b) => *b,
            None => return true,
        };
        let bit = (byte >> self.tx_bits) & 1 == 1;
        self.tx_bits += 1;
        if self.tx_bits == 8 {
            self.tx.pop_front();
            self.tx_bits = 0;
        }
        bit
    }

    fn strong_pullup(&mut self, ms: u32) {
        self.pullups.push(ms);
    }
}
