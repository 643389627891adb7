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

//! The control-plane handler: the RPC service that lets an operator
//! manage records.
//!
//! [`ControlHandler`] translates wire records into calls on a
//! [`ZoneResolver`], never on the store directly, so that the zone the
//! DNS listener serves and the records the operator manages are one and
//! the same.
//!
//! Any failure of the underlying operation, whether a validation error
//! or a storage error, is reported to the caller with the `ABORTED`
//! status code and the error's message. No call reports success unless
//! the store operation succeeded.

use std::net::IpAddr;
use std::sync::Arc;

use log::{info, warn};
use tonic::{Request, Response, Status};

use crate::db::{self, Store, ValidationError};
use crate::proto::dns_control_server::{DnsControl, DnsControlServer};
use crate::proto::{Empty, Record, Records};
use crate::resolver::ZoneResolver;

/// The control-plane RPC service.
pub struct ControlHandler<S> {
    resolver: Arc<ZoneResolver<S>>,
}

impl<S> ControlHandler<S>
where
    S: Store + 'static,
{
    /// Creates a handler that manages the records of `resolver`.
    pub fn new(resolver: Arc<ZoneResolver<S>>) -> Self {
        Self { resolver }
    }

    /// Wraps the handler in the generated RPC server type.
    pub fn into_service(self) -> DnsControlServer<Self> {
        DnsControlServer::new(self)
    }
}

#[tonic::async_trait]
impl<S> DnsControl for ControlHandler<S>
where
    S: Store + 'static,
{
    async fn set_a(&self, request: Request<Record>) -> Result<Response<Empty>, Status> {
        let record = request.into_inner();
        let address: IpAddr = record
            .address
            .parse()
            .map_err(|_| aborted("SetA", ValidationError::InvalidAddress.into()))?;
        self.resolver
            .set_a(&record.host, address)
            .await
            .map_err(|e| aborted("SetA", e))?;
        info!("Set the A record for {} to {}.", record.host, address);
        Ok(Response::new(Empty {}))
    }

    async fn delete_a(&self, request: Request<Record>) -> Result<Response<Empty>, Status> {
        let record = request.into_inner();
        self.resolver
            .delete_a(&record.host)
            .await
            .map_err(|e| aborted("DeleteA", e))?;
        info!("Deleted the A record for {}.", record.host);
        Ok(Response::new(Empty {}))
    }

    async fn list_a(&self, _: Request<Empty>) -> Result<Response<Records>, Status> {
        let records = self
            .resolver
            .list_a()
            .await
            .map_err(|e| aborted("ListA", e))?;
        let records = records
            .into_iter()
            .map(|(host, address)| Record {
                host,
                address: address.to_string(),
            })
            .collect();
        Ok(Response::new(Records { records }))
    }
}

/// Maps a store error to the `ABORTED` status.
fn aborted(method: &str, error: db::Error) -> Status {
    warn!("{} failed: {}", method, error);
    Status::aborted(error.to_string())
}
