// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Key and certificate commands.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use zerocopy::AsBytes as _;

use ds28e30::cert;
use ds28e30::config::Config;
use ds28e30::crypto::ecdsa::PublicKey;
use ds28e30::crypto::ecdsa::Sign as _;
use ds28e30::crypto::ecdsa::Signature;
use ds28e30::crypto::ring;
use ds28e30::device::AuthorityWriteMessage;
use ds28e30::device::MAX_AUTHORITY_PAGE;
use ds28e30::onewire::RomId;

use crate::util::parse_hex_array;
use crate::util::read_string;

/// What a provisioning station knows about one chip.
#[derive(Serialize, Deserialize)]
struct ChipRecord {
    /// ROM ID, in hex.
    rom: String,
    /// Manufacturer ID, in hex.
    manid: String,
    /// The chip's own public key.
    device_public_key: PublicKey,
    /// The certificate, once issued.
    #[serde(default)]
    certificate: Option<Signature>,
}

impl ChipRecord {
    fn identity(&self) -> (RomId, [u8; 2]) {
        let rom = check!(parse_hex_array(&self.rom), "bad ROM ID");
        let rom = check!(RomId::new(rom), "bad ROM ID");
        let manid = check!(parse_hex_array(&self.manid), "bad manufacturer ID");
        (rom, manid)
    }
}

/// Commands for certificate keys and chip records.
#[derive(structopt::StructOpt)]
pub enum Cert {
    /// Generate a P-256 keypair, writing the PKCS#8 private key to a file and
    /// printing the public key as JSON.
    GenerateKey {
        /// Where to write the private key.
        #[structopt(long, parse(from_os_str))]
        out: PathBuf,
    },

    /// Issue a certificate for a chip record.
    SignCert {
        /// PKCS#8-encoded P-256 system key to sign with.
        #[structopt(long, parse(from_os_str))]
        key: PathBuf,

        /// The 16-byte certificate constant, in hex.
        #[structopt(long)]
        constant: String,

        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Check a chip record's certificate against a board config's keys.
    VerifyCert {
        /// The board config.
        #[structopt(long, parse(from_os_str))]
        config: PathBuf,

        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,
    },

    /// Sign an authenticated write, printing the signature as JSON.
    SignAuthorityWrite {
        /// PKCS#8-encoded P-256 authority key to sign with.
        #[structopt(long, parse(from_os_str))]
        key: PathBuf,

        /// The page to write, zero through three.
        #[structopt(long)]
        page: u8,

        /// The page's current 32 bytes, in hex.
        #[structopt(long)]
        old: String,

        /// The page's new 32 bytes, in hex.
        #[structopt(long)]
        new: String,

        /// Input file holding the chip record, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,
    },
}

fn load_signer(path: PathBuf) -> ring::ecdsa::Signer {
    let key = check!(fs::read(path), "failed to open key file");
    check!(ring::ecdsa::Signer::from_pkcs8(&key), "failed to parse key")
}

impl Cert {
    pub fn run(self) {
        match self {
            Self::GenerateKey { out } => {
                let (signer, pkcs8) =
                    check!(ring::ecdsa::Signer::generate(), "keygen failed");
                check!(fs::write(&out, pkcs8), "failed to write key");
                check!(
                    serde_json::to_writer_pretty(
                        std::io::stdout(),
                        &signer.public_key()
                    ),
                    "failed to write public key"
                );
                println!();
            }

            Self::SignCert {
                key,
                constant,
                input,
                output,
            } => {
                let (r, w) =
                    crate::util::stdio(input.as_deref(), output.as_deref());
                let mut signer = load_signer(key);
                let constant =
                    check!(parse_hex_array(&constant), "bad certificate constant");
                let mut record: ChipRecord = check!(
                    serde_json::from_str(&read_string(r)),
                    "failed to parse chip record"
                );

                let (rom, manid) = record.identity();
                let custom = cert::CustomFields::new(&constant, &rom, manid);
                let body =
                    cert::certificate_body(&record.device_public_key, &custom);
                record.certificate =
                    Some(check!(signer.sign(&[&body[..]]), "signing failed"));
                check!(
                    serde_json::to_writer_pretty(w, &record),
                    "failed to write chip record"
                );
            }

            Self::VerifyCert { config, input } => {
                let (r, _) =
                    crate::util::stdio(input.as_deref(), None::<PathBuf>);
                let config = check!(fs::read_to_string(config), "failed to read config");
                let config: Config =
                    check!(serde_json::from_str(&config), "failed to parse config");
                let record: ChipRecord = check!(
                    serde_json::from_str(&read_string(r)),
                    "failed to parse chip record"
                );

                let (rom, manid) = record.identity();
                let keys = check!(
                    config.keys.select(&rom).ok_or(rom.customer_id()),
                    "no key set for customer id"
                );
                let certificate =
                    check!(record.certificate.ok_or(()), "record has no certificate");
                let custom =
                    cert::CustomFields::new(&keys.certificate_constant, &rom, manid);

                let ok = cert::verify_certificate(
                    &mut ring::Ciphers::new(),
                    &certificate,
                    &record.device_public_key,
                    &custom,
                    &keys.system,
                );
                if ok {
                    println!("certificate ok");
                } else {
                    eprintln!("certificate did not verify");
                    std::process::exit(1);
                }
            }

            Self::SignAuthorityWrite {
                key,
                page,
                old,
                new,
                input,
            } => {
                let (r, _) =
                    crate::util::stdio(input.as_deref(), None::<PathBuf>);
                let mut signer = load_signer(key);
                let record: ChipRecord = check!(
                    serde_json::from_str(&read_string(r)),
                    "failed to parse chip record"
                );
                let (rom, manid) = record.identity();
                check!(
                    if page <= MAX_AUTHORITY_PAGE { Ok(()) } else { Err(page) },
                    "page must be at most {}",
                    MAX_AUTHORITY_PAGE
                );

                let message = AuthorityWriteMessage {
                    rom: *rom.as_bytes(),
                    old: check!(parse_hex_array(&old), "bad old contents"),
                    new: check!(parse_hex_array(&new), "bad new contents"),
                    page_number: page,
                    manid,
                };
                let sig =
                    check!(signer.sign(&[message.as_bytes()]), "signing failed");
                check!(
                    serde_json::to_writer_pretty(std::io::stdout(), &sig),
                    "failed to write signature"
                );
                println!();
            }
        }
    }
}
