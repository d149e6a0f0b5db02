// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Encoding helpers for page contents and board configs.

use std::io::Write as _;
use std::path::PathBuf;

use ds28e30::config::Config;
use ds28e30::crc;
use ds28e30::heatmap;

use crate::util::parse_hex;
use crate::util::parse_hex_array;
use crate::util::read_string;
use crate::util::to_hex;

/// Commands that transform data without talking to a chip.
#[derive(structopt::StructOpt)]
pub enum Data {
    /// Compute the 1-Wire CRC8 of some hex bytes, as used in ROM IDs.
    Crc8 {
        /// The bytes, in hex.
        hex: String,
    },

    /// Compute the CRC16 check bytes that would follow some hex bytes in a
    /// command frame.
    Crc16 {
        /// The bytes, in hex.
        hex: String,
    },

    /// Pack a JSON array of 64 heatmap buckets into three hex pages.
    PackHeatmap {
        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Unpack three hex pages, one per line, into a JSON array of buckets.
    UnpackHeatmap {
        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Parse and validate a board config, printing the resolved timing of
    /// every slot.
    CheckConfig {
        /// Input file, defaults to stdin.
        #[structopt(short = "i", long, parse(from_os_str))]
        input: Option<PathBuf>,
    },
}

impl Data {
    pub fn run(self) {
        match self {
            Self::Crc8 { hex } => {
                let bytes = check!(parse_hex(&hex), "failed to parse input");
                println!("{:#04x}", crc::crc8(&bytes));
            }

            Self::Crc16 { hex } => {
                let bytes = check!(parse_hex(&hex), "failed to parse input");
                println!("{}", to_hex(&crc::crc16_check_bytes(&bytes)));
            }

            Self::PackHeatmap { input, output } => {
                let (r, mut w) =
                    crate::util::stdio(input.as_deref(), output.as_deref());
                let values: Vec<u32> = check!(
                    serde_json::from_str(&read_string(r)),
                    "failed to parse heatmap"
                );
                let mut buckets = [0; heatmap::LEN];
                check!(
                    if values.len() == heatmap::LEN {
                        Ok(())
                    } else {
                        Err(values.len())
                    },
                    "expected {} buckets",
                    heatmap::LEN
                );
                buckets.copy_from_slice(&values);

                for page in &heatmap::pack(&buckets) {
                    check!(writeln!(w, "{}", to_hex(page)), "failed to write");
                }
            }

            Self::UnpackHeatmap { input, output } => {
                let (r, w) =
                    crate::util::stdio(input.as_deref(), output.as_deref());
                let text = read_string(r);
                let lines: Vec<&str> =
                    text.lines().filter(|l| !l.trim().is_empty()).collect();
                check!(
                    if lines.len() == 3 { Ok(()) } else { Err(lines.len()) },
                    "expected three pages"
                );

                let mut pages: heatmap::Packed = Default::default();
                for (page, line) in pages.iter_mut().zip(&lines) {
                    *page = check!(parse_hex_array(line), "failed to parse page");
                }
                let values = heatmap::unpack(&pages);
                check!(
                    serde_json::to_writer(w, &values[..]),
                    "failed to write heatmap"
                );
            }

            Self::CheckConfig { input } => {
                let (r, _) = crate::util::stdio(input.as_deref(), None::<PathBuf>);
                let config: Config = check!(
                    serde_json::from_str(&read_string(r)),
                    "failed to parse config"
                );
                check!(config.validate(), "invalid config");
                for slot in &config.channels {
                    println!("{:?}: {:?}", slot.id, slot.line);
                    println!("  timing: {:?}", slot.timing());
                    if slot.engineering {
                        println!("  engineering operations enabled");
                    }
                }
                println!(
                    "keys: vendor {}, generic {}",
                    config.keys.vendor.is_some(),
                    config.keys.generic.is_some()
                );
            }
        }
    }
}
