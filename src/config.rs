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

//! The service configuration and its file format.
//!
//! The configuration file is TOML. Every setting is optional; absent
//! (or empty) settings take the defaults below.
//!
//! ```toml
//! db_file = "ldnsd.db"         # the record database
//! grpc = "localhost:7847"      # control-plane listen address
//! listen = "localhost:53"      # DNS listen address
//! domain = "internal"          # the zone to serve
//! ttl = 60                     # TTL of served records
//!
//! [certificate]
//! ca = "/etc/ldnsd/rootCA.pem"
//! cert = "/etc/ldnsd/server.pem"
//! key = "/etc/ldnsd/server.key"
//! ```
//!
//! Relative paths in a configuration file are interpreted relative to
//! the file's directory.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hickory_proto::error::ProtoError;
use hickory_proto::rr::Name;
use log::Level::Debug;
use log::{debug, log_enabled};
use serde::Deserialize;

use crate::resolver::DEFAULT_TTL;
use crate::tls::{CertificateError, TrustMaterial};

const DEFAULT_DB_FILE: &str = "ldnsd.db";
const DEFAULT_CA_FILE: &str = "/etc/ldnsd/rootCA.pem";
const DEFAULT_CERT_FILE: &str = "/etc/ldnsd/server.pem";
const DEFAULT_KEY_FILE: &str = "/etc/ldnsd/server.key";
const DEFAULT_DOMAIN: &str = "internal";

/// The default host:port on which to listen for control-plane
/// connections.
pub const DEFAULT_GRPC_LISTEN: &str = "localhost:7847";

/// The default host:port on which to listen for DNS queries.
pub const DEFAULT_DNS_LISTEN: &str = "localhost:53";

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration.
///
/// [`Config::default`] gives the configuration with every setting at
/// its default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub db_file: PathBuf,
    #[serde(rename = "grpc")]
    pub grpc_listen: String,
    #[serde(rename = "listen")]
    pub dns_listen: String,
    pub domain: String,
    pub ttl: u32,
    pub certificate: CertificateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_file: PathBuf::from(DEFAULT_DB_FILE),
            grpc_listen: DEFAULT_GRPC_LISTEN.to_owned(),
            dns_listen: DEFAULT_DNS_LISTEN.to_owned(),
            domain: DEFAULT_DOMAIN.to_owned(),
            ttl: DEFAULT_TTL,
            certificate: CertificateConfig::default(),
        }
    }
}

/// The paths to the TLS trust material for the control plane.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CertificateConfig {
    #[serde(rename = "ca")]
    pub ca_file: PathBuf,
    #[serde(rename = "cert")]
    pub cert_file: PathBuf,
    #[serde(rename = "key")]
    pub key_file: PathBuf,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            cert_file: PathBuf::from(DEFAULT_CERT_FILE),
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
        }
    }
}

impl CertificateConfig {
    /// Loads the trust material from the configured paths.
    pub fn load(&self) -> Result<TrustMaterial, CertificateError> {
        TrustMaterial::load(&self.ca_file, &self.cert_file, &self.key_file)
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

impl Config {
    /// Parses a configuration from TOML text. Relative paths are left
    /// as they are.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let mut config: Config = toml::from_str(text).map_err(Error::Parse)?;
        config.validate_and_fix()?;
        Ok(config)
    }

    /// Replaces empty settings with their defaults and checks the
    /// domain.
    fn validate_and_fix(&mut self) -> Result<(), Error> {
        let defaults = Config::default();
        if self.db_file.as_os_str().is_empty() {
            self.db_file = defaults.db_file;
        }
        if self.grpc_listen.is_empty() {
            self.grpc_listen = defaults.grpc_listen;
        }
        if self.dns_listen.is_empty() {
            self.dns_listen = defaults.dns_listen;
        }
        if self.domain.is_empty() {
            self.domain = defaults.domain;
        }
        if self.certificate.ca_file.as_os_str().is_empty() {
            self.certificate.ca_file = defaults.certificate.ca_file;
        }
        if self.certificate.cert_file.as_os_str().is_empty() {
            self.certificate.cert_file = defaults.certificate.cert_file;
        }
        if self.certificate.key_file.as_os_str().is_empty() {
            self.certificate.key_file = defaults.certificate.key_file;
        }

        Name::from_ascii(&self.domain)
            .map_err(|e| Error::InvalidDomain(self.domain.clone(), e))?;
        Ok(())
    }

    /// Interprets relative paths as relative to `dir`.
    fn resolve_paths(&mut self, dir: &Path) {
        for path in [
            &mut self.db_file,
            &mut self.certificate.ca_file,
            &mut self.certificate.cert_file,
            &mut self.certificate.key_file,
        ] {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}

/// Loads the configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, Error> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let text = fs::read_to_string(path).map_err(Error::Read)?;
    let mut config = Config::from_toml(&text)?;
    config.resolve_paths(dir);
    log_config_summary(&config);
    Ok(config)
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    debug!(
        "Configuration loaded:\n\
         Database:         {}\n\
         Control plane:    {}\n\
         DNS:              {}\n\
         Domain:           {}\n\
         TTL:              {}\n\
         CA certificate:   {}\n\
         Certificate:      {}\n\
         Key:              {}",
        config.db_file.display(),
        config.grpc_listen,
        config.dns_listen,
        config.domain,
        config.ttl,
        config.certificate.ca_file.display(),
        config.certificate.cert_file.display(),
        config.certificate.key_file.display(),
    );
}

/// Errors that arise while loading the configuration.
#[derive(Debug)]
pub enum Error {
    Read(io::Error),
    Parse(toml::de::Error),
    InvalidDomain(String, ProtoError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Read(_) => f.write_str("failed to read the configuration file"),
            Self::Parse(_) => f.write_str("failed to parse the configuration file"),
            Self::InvalidDomain(domain, _) => write!(f, "invalid domain {:?}", domain),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::InvalidDomain(_, e) => Some(e),
        }
    }
}
