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

//! A control-plane client.

use std::fmt;

use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::proto::dns_control_client::DnsControlClient;
use crate::proto::{Empty, Record};
use crate::tls::TrustMaterial;

/// A connection to the control plane of a running service.
#[derive(Clone, Debug)]
pub struct Client {
    inner: DnsControlClient<Channel>,
}

impl Client {
    /// Connects to the control plane at `host` (a `host:port` pair or a
    /// URI), authenticating with `trust`. `server_name` is the name the
    /// server's certificate must be valid for.
    pub async fn connect(
        host: &str,
        trust: &TrustMaterial,
        server_name: &str,
    ) -> Result<Self, Error> {
        let uri = if host.contains("://") {
            host.to_owned()
        } else {
            format!("https://{}", host)
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|_| Error::InvalidHost(host.to_owned()))?
            .tls_config(trust.client_config(server_name))
            .map_err(Error::Transport)?;
        let channel = endpoint.connect().await.map_err(Error::Transport)?;
        Ok(Self {
            inner: DnsControlClient::new(channel),
        })
    }

    /// Creates the A record for `host`, which must not already have
    /// one.
    pub async fn set_a(&mut self, host: &str, address: &str) -> Result<(), Error> {
        let record = Record {
            host: host.to_owned(),
            address: address.to_owned(),
        };
        self.inner.set_a(record).await.map_err(Error::Rpc)?;
        Ok(())
    }

    /// Deletes the A record for `host`, if there is one.
    pub async fn delete_a(&mut self, host: &str) -> Result<(), Error> {
        let record = Record {
            host: host.to_owned(),
            address: String::new(),
        };
        self.inner.delete_a(record).await.map_err(Error::Rpc)?;
        Ok(())
    }

    /// Lists the A records, sorted by host.
    pub async fn list_a(&mut self) -> Result<Vec<Record>, Error> {
        let response = self.inner.list_a(Empty {}).await.map_err(Error::Rpc)?;
        Ok(response.into_inner().records)
    }
}

/// Errors that arise while talking to the control plane.
#[derive(Debug)]
pub enum Error {
    InvalidHost(String),
    Transport(tonic::transport::Error),
    Rpc(Status),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidHost(host) => write!(f, "invalid server address {:?}", host),
            Self::Transport(_) => f.write_str("could not connect to the server"),
            Self::Rpc(status) => write!(f, "the server refused: {}", status.message()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidHost(_) => None,
            Self::Transport(e) => Some(e),
            Self::Rpc(_) => None,
        }
    }
}
