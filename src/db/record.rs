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

//! The [`Record`] type and the validation rules for hosts and
//! addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// The maximum length of a host, in characters.
pub const MAX_HOST_LEN: usize = 255;

/// The maximum length of a single dot-separated label of a host.
pub const MAX_LABEL_LEN: usize = 63;

/// An A record: a host and the IPv4 address it resolves to.
///
/// A `Record` can only be obtained through [`Record::new`] (or
/// [`Record::from_ip`]), both of which validate their inputs. Hence any
/// `Record` in hand is known to be valid, and the store never persists
/// or returns a record that is not.
///
/// Hosts are relative to the zone being served: the record for `test`
/// is published under `test.<zone>.`. Each dot-separated label of the
/// host must start with a lowercase ASCII letter and may otherwise
/// contain only lowercase ASCII letters, digits, and hyphens, up to 63
/// characters. The whole host may be at most 255 characters long.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Record {
    host: String,
    address: Ipv4Addr,
}

impl Record {
    /// Creates a new `Record` from a host and the textual form of an
    /// IPv4 address, validating both.
    pub fn new(host: impl Into<String>, address: &str) -> Result<Self, ValidationError> {
        let address = parse_ipv4(address)?;
        Self::from_ip(host, IpAddr::V4(address))
    }

    /// Creates a new `Record` from a host and an already-parsed IP
    /// address. IPv6 addresses are rejected.
    pub fn from_ip(host: impl Into<String>, address: IpAddr) -> Result<Self, ValidationError> {
        let host = host.into();
        validate_host(&host)?;
        match address {
            IpAddr::V4(address) => Ok(Self { host, address }),
            IpAddr::V6(_) => Err(ValidationError::NotIpv4),
        }
    }

    /// Returns the record's host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the record's IPv4 address.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Consumes the record, returning its host and address.
    pub fn into_parts(self) -> (String, Ipv4Addr) {
        (self.host, self.address)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {}", self.host, self.address)
    }
}

/// Checks that `host` is acceptable as the host of a [`Record`].
///
/// This is the check applied by deletions, which have no address to
/// validate.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::EmptyHost);
    } else if host.len() > MAX_HOST_LEN {
        return Err(ValidationError::HostTooLong);
    }

    for label in host.split('.') {
        validate_label(label)?;
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), ValidationError> {
    let mut octets = label.bytes();
    match octets.next() {
        None => return Err(ValidationError::EmptyLabel),
        Some(first) if !first.is_ascii_lowercase() => {
            return Err(ValidationError::InvalidLabel)
        }
        Some(_) => (),
    }

    if label.len() > MAX_LABEL_LEN {
        Err(ValidationError::LabelTooLong)
    } else if octets.all(|o| o.is_ascii_lowercase() || o.is_ascii_digit() || o == b'-') {
        Ok(())
    } else {
        Err(ValidationError::InvalidLabel)
    }
}

/// Parses `address` as an IP address that must be IPv4.
pub fn parse_ipv4(address: &str) -> Result<Ipv4Addr, ValidationError> {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(address)) => Ok(address),
        Ok(IpAddr::V6(_)) => Err(ValidationError::NotIpv4),
        Err(_) => Err(ValidationError::InvalidAddress),
    }
}

/// The reasons a host or address may fail validation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValidationError {
    /// The host was the empty string.
    EmptyHost,

    /// The host was longer than 255 characters.
    HostTooLong,

    /// The host contained an empty label (e.g., `a..b` or `a.`).
    EmptyLabel,

    /// A label was longer than 63 characters.
    LabelTooLong,

    /// A label did not start with a lowercase letter, or contained
    /// characters other than lowercase letters, digits, and hyphens.
    InvalidLabel,

    /// The address did not parse as an IP address.
    InvalidAddress,

    /// The address parsed, but is not an IPv4 address.
    NotIpv4,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::EmptyHost => f.write_str("name is 0 length"),
            Self::HostTooLong => f.write_str("name is longer than 255 characters"),
            Self::EmptyLabel => f.write_str("name contains an empty label"),
            Self::LabelTooLong => f.write_str("names in DNS must be 63 characters or less, per part"),
            Self::InvalidLabel => f.write_str(
                "each part of a name must start with a lowercase letter and contain only \
                 lowercase letters, digits, and hyphens",
            ),
            Self::InvalidAddress => f.write_str("IP address did not parse"),
            Self::NotIpv4 => f.write_str("IP is not IPv4; IPv6 is not supported"),
        }
    }
}

impl std::error::Error for ValidationError {}
