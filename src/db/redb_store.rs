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

//! Implementation of the [`RecordStore`].

use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;

use log::{debug, warn};
use redb::{Database, ReadableTable, TableDefinition};

use super::{validate_host, ARecords, Error, InvalidRow, Record, SrvRecord, SrvRecords, Store};

/// The table of A records: host to the textual form of its address.
const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");

/// A [`Store`] that keeps A records in an on-disk [`redb`] database.
///
/// SRV records are not supported; the SRV methods always fail with
/// [`Error::NotSupported`].
pub struct RecordStore {
    db: RwLock<Option<Database>>,
}

impl RecordStore {
    /// Opens the store at `path`, creating the database file and the
    /// records table as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("Opening the record store at {}.", path.display());
        let db = Database::create(path)?;

        // Make sure the table exists, so that reads never have to deal
        // with it missing.
        let txn = db.begin_write()?;
        txn.open_table(RECORDS)?;
        txn.commit()?;

        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    /// Lists all A records, passing each stored row that fails
    /// validation to `on_invalid` instead of including it. The listing
    /// as a whole only fails if the storage itself does.
    pub fn list_a_with<F>(&self, mut on_invalid: F) -> Result<ARecords, Error>
    where
        F: FnMut(InvalidRow),
    {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECORDS)?;
            let mut records = ARecords::new();
            for row in table.iter()? {
                let (host, address) = row?;
                match Record::new(host.value(), address.value()) {
                    Ok(record) => {
                        let (host, address) = record.into_parts();
                        records.insert(host, address);
                    }
                    Err(reason) => on_invalid(InvalidRow {
                        host: host.value().to_owned(),
                        address: address.value().to_owned(),
                        reason,
                    }),
                }
            }
            Ok(records)
        })
    }

    /// Runs `f` with the database, or fails if the store is closed.
    fn with_db<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Database) -> Result<T, Error>,
    {
        match *self.db.read().unwrap() {
            Some(ref db) => f(db),
            None => Err(Error::Closed),
        }
    }
}

impl Store for RecordStore {
    fn set_a(&self, host: &str, address: IpAddr) -> Result<(), Error> {
        let record = Record::from_ip(host, address)?;
        self.with_db(|db| {
            let txn = db.begin_write()?;
            let exists = {
                let mut table = txn.open_table(RECORDS)?;
                let exists = table.get(record.host())?.is_some();
                if !exists {
                    table.insert(record.host(), record.address().to_string().as_str())?;
                }
                exists
            };
            if exists {
                txn.abort()?;
                Err(Error::AlreadyExists(record.host().to_owned()))
            } else {
                txn.commit()?;
                Ok(())
            }
        })
    }

    fn get_a(&self, host: &str) -> Result<Record, Error> {
        let address = self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECORDS)?;
            let address = table.get(host)?.map(|address| address.value().to_owned());
            Ok(address)
        })?;

        match address {
            Some(address) => {
                Record::new(host, &address).map_err(|e| Error::Corrupt(host.to_owned(), e))
            }
            None => Err(Error::NotFound(host.to_owned())),
        }
    }

    fn delete_a(&self, host: &str) -> Result<(), Error> {
        validate_host(host)?;
        self.with_db(|db| {
            let txn = db.begin_write()?;
            txn.open_table(RECORDS)?.remove(host)?;
            txn.commit()?;
            Ok(())
        })
    }

    fn list_a(&self) -> Result<ARecords, Error> {
        self.list_a_with(|row| {
            warn!(
                "Skipping the invalid stored record {:?}/{:?} while listing: {}.",
                row.host, row.address, row.reason,
            )
        })
    }

    fn set_srv(&self, _: &str, _: &SrvRecord) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn get_srv(&self, _: &str) -> Result<SrvRecord, Error> {
        Err(Error::NotSupported)
    }

    fn delete_srv(&self, _: &str) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn list_srv(&self) -> Result<SrvRecords, Error> {
        Err(Error::NotSupported)
    }

    fn close(&self) -> Result<(), Error> {
        if self.db.write().unwrap().take().is_some() {
            debug!("Closed the record store.");
        }
        Ok(())
    }
}
