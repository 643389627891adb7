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

//! `ldnsctl`, the command-line client for the `ldnsd` control plane.

use std::ffi::OsString;
use std::fmt::Write;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ldnsd::client::Client;
use ldnsd::config::DEFAULT_GRPC_LISTEN;
use ldnsd::tls::TrustMaterial;

/// Manage the records of a running ldnsd
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Args {
    /// Set the host:port of the control plane
    #[clap(short = 't', long, default_value = DEFAULT_GRPC_LISTEN, value_name = "HOST:PORT")]
    host: String,

    /// Set the client certificate for authentication
    #[clap(short, long, default_value = "/etc/ldnsd/client.pem", value_name = "FILE")]
    cert: PathBuf,

    /// Set the client certificate key
    #[clap(short, long, default_value = "/etc/ldnsd/client.key", value_name = "FILE")]
    key: PathBuf,

    /// Set the certificate authority
    #[clap(long, default_value = "/etc/ldnsd/rootCA.pem", value_name = "FILE")]
    ca: PathBuf,

    /// Set the name the server's certificate must be valid for
    #[clap(long, default_value = "localhost", value_name = "NAME")]
    server_name: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the A record table
    List,

    /// Create the A record for a host
    Set {
        host: String,
        #[clap(value_name = "IPV4")]
        address: String,
    },

    /// Delete the A record for a host
    Delete { host: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let result = match parse_args(std::env::args_os()) {
        Ok(args) => try_running(args).await,
        Err(e) => Err(anyhow::Error::new(e).context("invalid command line arguments")),
    };
    if let Err(e) = result {
        let mut message = String::from("Error:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        eprintln!("{}", message);
        process::exit(1);
    }
}

/// Parses the command line. `--help` and `--version` print and exit
/// successfully here; usage errors are returned.
fn parse_args<I, T>(args: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Args::try_parse_from(args) {
        Err(e) if !e.use_stderr() => e.exit(),
        result => result,
    }
}

async fn try_running(args: Args) -> Result<()> {
    let trust = TrustMaterial::load(&args.ca, &args.cert, &args.key)
        .context("while loading the client certificate")?;
    let mut client = Client::connect(&args.host, &trust, &args.server_name)
        .await
        .context("could not create the client")?;

    match args.command {
        Command::List => {
            let records = client
                .list_a()
                .await
                .context("could not query the A record list")?;
            println!("Host\tIP");
            for record in records {
                println!("{}\t{}", record.host, record.address);
            }
        }
        Command::Set { host, address } => client
            .set_a(&host, &address)
            .await
            .with_context(|| format!("could not set the A record for {}", host))?,
        Command::Delete { host } => client
            .delete_a(&host)
            .await
            .with_context(|| format!("could not delete the A record for {}", host))?,
    }
    Ok(())
}
