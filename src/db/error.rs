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

//! Implementation of the [`Error`] type for record store errors.

use std::fmt;

use super::record::ValidationError;

/// Errors that arise during operations on a [`Store`](super::Store).
#[derive(Debug)]
pub enum Error {
    /// The host or address failed validation. Nothing was written.
    Validation(ValidationError),

    /// A record fetched from storage failed validation.
    Corrupt(String, ValidationError),

    /// No record exists for the host.
    NotFound(String),

    /// A record already exists for the host. Records must be deleted
    /// before they can be set again.
    AlreadyExists(String),

    /// The underlying storage failed.
    Storage(Box<dyn std::error::Error + Send + Sync>),

    /// The store has been closed.
    Closed,

    /// The operation is intentionally not supported by this store.
    NotSupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "during record validation: {}", e),
            Self::Corrupt(host, e) => {
                write!(f, "during validation of record fetched for {}: {}", host, e)
            }
            Self::NotFound(host) => write!(f, "no record exists for {}", host),
            Self::AlreadyExists(host) => write!(f, "a record already exists for {}", host),
            Self::Storage(e) => write!(f, "storage failure: {}", e),
            Self::Closed => f.write_str("the record store is closed"),
            Self::NotSupported => f.write_str("not supported"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) | Self::Corrupt(_, e) => Some(e),
            Self::Storage(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error)
    }
}

/// Implements `From<E>` for [`Error`] by boxing `E` into
/// [`Error::Storage`].
macro_rules! storage_error_from {
    ($($e:ty),* $(,)?) => {
        $(
            impl From<$e> for Error {
                fn from(error: $e) -> Self {
                    Self::Storage(Box::new(error))
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
