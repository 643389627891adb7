// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Parses the command line arguments. `--help` and `--version` print
/// and exit successfully here; any other problem is returned, so that
/// it can be reported like other fatal errors.
pub fn parse() -> Result<Args, clap::Error> {
    parse_from(std::env::args_os())
}

fn parse_from<I, T>(args: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(args) {
        Err(e) if !e.use_stderr() => e.exit(),
        result => result,
    }
}

/// Light DNSd: a small DNS server with a remote control plane
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// The configuration file to use (default settings if omitted)
    #[clap(value_name = "CONFIG")]
    pub config: Option<PathBuf>,
}
