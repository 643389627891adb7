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

//! Facilities for storing and accessing A records.
//!
//! The [`Store`] trait is the capability set that the
//! [`ZoneResolver`](crate::resolver::ZoneResolver) expects of its
//! record database: A record operations, which are the point of this
//! software, and SRV record operations, which are part of the interface
//! but which a store may refuse with [`Error::NotSupported`].
//!
//! [`RecordStore`] is the provided implementation. It keeps records in
//! a single transactional table on disk, keyed by host, and validates
//! records on the way in *and* on the way out: every [`Record`] it
//! persists or returns has passed [`Record::new`]'s checks.
//!
//! ## Concurrency
//!
//! Every store operation runs in its own transaction, and stores must
//! be safe to use from many threads at once ([`Store`] requires
//! [`Send`] and [`Sync`]). There is no API for grouping several
//! operations into one transaction, so callers can never observe a
//! partial write. A successful [`Store::set_a`] is visible to every
//! transaction that begins after it returns.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

mod error;
mod record;
mod redb_store;

pub use error::Error;
pub use record::{parse_ipv4, validate_host, Record, ValidationError};
pub use record::{MAX_HOST_LEN, MAX_LABEL_LEN};
pub use redb_store::RecordStore;

/// A listing of A records by host.
pub type ARecords = BTreeMap<String, Ipv4Addr>;

/// A listing of SRV records by host.
pub type SrvRecords = BTreeMap<String, SrvRecord>;

/// Trait for record databases.
///
/// See the [module documentation](self) for the concurrency
/// requirements.
pub trait Store: Send + Sync {
    /// Validates and creates the A record for `host`. This is a strict
    /// create: if a record for `host` already exists, this fails with
    /// [`Error::AlreadyExists`] and the existing record is untouched.
    fn set_a(&self, host: &str, address: IpAddr) -> Result<(), Error>;

    /// Fetches the A record for `host`.
    fn get_a(&self, host: &str) -> Result<Record, Error>;

    /// Deletes the A record for `host`. Only the host is validated.
    /// Deleting a host that has no record succeeds.
    fn delete_a(&self, host: &str) -> Result<(), Error>;

    /// Lists all A records. Stored rows that fail validation are left
    /// out of the listing rather than failing it.
    fn list_a(&self) -> Result<ARecords, Error>;

    fn set_srv(&self, host: &str, record: &SrvRecord) -> Result<(), Error>;
    fn get_srv(&self, host: &str) -> Result<SrvRecord, Error>;
    fn delete_srv(&self, host: &str) -> Result<(), Error>;
    fn list_srv(&self) -> Result<SrvRecords, Error>;

    /// Releases the store's resources. Later operations fail with
    /// [`Error::Closed`]. Closing an already closed store does nothing.
    fn close(&self) -> Result<(), Error>;
}

/// The data of an SRV record.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SrvRecord {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

/// A stored row that failed validation while listing records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidRow {
    pub host: String,
    pub address: String,
    pub reason: ValidationError,
}
