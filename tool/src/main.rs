// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `ds28e30-tool` is a simple command-line tool for provisioning and
//! inspecting DS28E30 battery data offline.

#![deny(missing_docs)]
#![deny(warnings)]
#![deny(unused)]
#![deny(unsafe_code)]

use structopt::StructOpt as _;

#[macro_use]
mod util;

mod cert;
mod data;

/// A command-line tool for working with DS28E30 data.
#[allow(missing_docs)]
#[derive(structopt::StructOpt)]
#[structopt(author)]
enum CliCommand {
    #[structopt(flatten)]
    Cert(cert::Cert),
    #[structopt(flatten)]
    Data(data::Data),
}

fn main() {
    match CliCommand::from_args() {
        CliCommand::Cert(c) => c.run(),
        CliCommand::Data(d) => d.run(),
    }
}
