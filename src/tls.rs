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

//! Loading of the TLS trust material that secures the control plane.
//!
//! Both ends of the control plane authenticate each other: the server
//! presents its certificate and requires a client certificate, and
//! each side checks the other's against the same certificate authority.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// A CA certificate, plus a certificate and private key to present to
/// peers, all in PEM form.
#[derive(Clone)]
pub struct TrustMaterial {
    ca: Vec<u8>,
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl TrustMaterial {
    /// Loads and checks the PEM files at the given paths. The CA and
    /// certificate files must each contain at least one certificate,
    /// and the key file must contain a private key.
    pub fn load(
        ca: impl AsRef<Path>,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Result<Self, CertificateError> {
        let ca = read_certificates(ca.as_ref())?;
        let cert = read_certificates(cert.as_ref())?;
        let key = read_private_key(key.as_ref())?;
        Ok(Self { ca, cert, key })
    }

    /// Builds the server-side configuration: present the certificate
    /// and require clients to present one signed by the CA.
    pub fn server_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(Identity::from_pem(&self.cert, &self.key))
            .client_ca_root(Certificate::from_pem(&self.ca))
    }

    /// Builds the client-side configuration for talking to the server
    /// named `server_name`: present the certificate and require the
    /// server's to be signed by the CA.
    pub fn client_config(&self, server_name: &str) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.ca))
            .identity(Identity::from_pem(&self.cert, &self.key))
            .domain_name(server_name)
    }
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Keep the private key out of logs.
        f.debug_struct("TrustMaterial").finish_non_exhaustive()
    }
}

fn read_certificates(path: &Path) -> Result<Vec<u8>, CertificateError> {
    let pem = read(path)?;
    let mut n_certs = 0;
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        cert.map_err(|e| CertificateError::Parse(path.to_owned(), e))?;
        n_certs += 1;
    }
    if n_certs == 0 {
        Err(CertificateError::NoCertificates(path.to_owned()))
    } else {
        Ok(pem)
    }
}

fn read_private_key(path: &Path) -> Result<Vec<u8>, CertificateError> {
    let pem = read(path)?;
    match rustls_pemfile::private_key(&mut pem.as_slice()) {
        Ok(Some(_)) => Ok(pem),
        Ok(None) => Err(CertificateError::NoPrivateKey(path.to_owned())),
        Err(e) => Err(CertificateError::Parse(path.to_owned(), e)),
    }
}

fn read(path: &Path) -> Result<Vec<u8>, CertificateError> {
    fs::read(path).map_err(|e| CertificateError::Read(path.to_owned(), e))
}

/// Errors that arise while loading [`TrustMaterial`].
#[derive(Debug)]
pub enum CertificateError {
    Read(PathBuf, io::Error),
    Parse(PathBuf, io::Error),
    NoCertificates(PathBuf),
    NoPrivateKey(PathBuf),
}

impl fmt::Display for CertificateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Read(path, _) => write!(f, "failed to read {}", path.display()),
            Self::Parse(path, _) => write!(f, "failed to parse PEM in {}", path.display()),
            Self::NoCertificates(path) => {
                write!(f, "no certificates were found in {}", path.display())
            }
            Self::NoPrivateKey(path) => {
                write!(f, "no private key was found in {}", path.display())
            }
        }
    }
}

impl std::error::Error for CertificateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(_, e) | Self::Parse(_, e) => Some(e),
            _ => None,
        }
    }
}
