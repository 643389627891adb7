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

//! The service: the record store, the zone resolver, and the two
//! listeners (control plane and DNS) that share them.
//!
//! A [`Service`] goes through the states of [`State`] in order:
//!
//! ```text
//! Constructed --run--> Running --shutdown--> ShuttingDown --> Stopped
//!      \_____________________shutdown___________________/
//! ```
//!
//! [`Service::new`] does all of the fallible set-up, failing fast:
//! nothing is left running if any step fails. [`Service::run`] serves
//! both listeners until [`Service::shutdown`] is called, whether from a
//! signal handler or directly. Shutdown is best-effort and proceeds in
//! a fixed order: the RPC server stops gracefully (letting in-flight
//! calls finish), then its listener is closed, and finally the zone
//! resolver is closed, which stops the DNS listener and closes the
//! store.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hickory_proto::error::ProtoError;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;

use crate::config::Config;
use crate::db::{self, RecordStore};
use crate::handler::ControlHandler;
use crate::resolver::{DnsListener, ZoneResolver};
use crate::tls::CertificateError;

/// The lifecycle states of a [`Service`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Constructed,
    Running,
    ShuttingDown,
    Stopped,
}

/// The name-resolution service. See the [module documentation](self).
pub struct Service {
    name: String,
    resolver: Arc<ZoneResolver<RecordStore>>,
    grpc_addr: SocketAddr,
    dns_addr: SocketAddr,
    inner: Mutex<Inner>,
}

/// The parts of a [`Service`] that move as it changes state.
struct Inner {
    state: State,
    router: Option<Router>,
    grpc_listener: Option<TcpListener>,
    dns_listener: Option<DnsListener>,
    rpc_stop: Option<oneshot::Sender<()>>,
    rpc_task: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl Service {
    /// Sets up the service described by `config`: opens the store,
    /// loads the trust material, creates the resolver and control-plane
    /// handler, and binds both listeners. `name` is used in log
    /// messages.
    pub async fn new(name: &str, config: &Config) -> Result<Self, Error> {
        let store = RecordStore::open(&config.db_file).map_err(Error::Store)?;
        let trust = config.certificate.load().map_err(Error::Certificate)?;
        let resolver = ZoneResolver::new(&config.domain, store, config.ttl)
            .map_err(|e| Error::Domain(config.domain.clone(), e))?;
        let resolver = Arc::new(resolver);

        // The handler gets the resolver, not the store.
        let handler = ControlHandler::new(resolver.clone());
        let router = Server::builder()
            .tls_config(trust.server_config())
            .map_err(Error::Tls)?
            .add_service(handler.into_service());

        let grpc_listener = TcpListener::bind(&config.grpc_listen)
            .await
            .map_err(|e| Error::Listen("control-plane", config.grpc_listen.clone(), e))?;
        let grpc_addr = grpc_listener
            .local_addr()
            .map_err(|e| Error::Listen("control-plane", config.grpc_listen.clone(), e))?;
        let dns_listener = DnsListener::bind(&config.dns_listen)
            .await
            .map_err(|e| Error::Listen("DNS", config.dns_listen.clone(), e))?;
        let dns_addr = dns_listener
            .local_addr()
            .map_err(|e| Error::Listen("DNS", config.dns_listen.clone(), e))?;

        Ok(Self {
            name: name.to_owned(),
            resolver,
            grpc_addr,
            dns_addr,
            inner: Mutex::new(Inner {
                state: State::Constructed,
                router: Some(router),
                grpc_listener: Some(grpc_listener),
                dns_listener: Some(dns_listener),
                rpc_stop: None,
                rpc_task: None,
            }),
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    /// Returns the address the control-plane listener is bound to.
    pub fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Returns the address the DNS listener is bound to.
    pub fn dns_addr(&self) -> SocketAddr {
        self.dns_addr
    }

    /// Runs both listeners: the RPC server in a new task, and the DNS
    /// listener in this one. Returns once both have been stopped by
    /// [`Service::shutdown`]. A service can only be run once.
    ///
    /// If the RPC server stops by itself, the service is shut down and
    /// this returns [`Error::RpcStopped`].
    pub async fn run(&self) -> Result<(), Error> {
        let (dns_listener, rpc_ended) = {
            let mut inner = self.inner.lock().unwrap();
            let (router, grpc_listener, dns_listener) = match (
                inner.state,
                inner.router.take(),
                inner.grpc_listener.take(),
                inner.dns_listener.take(),
            ) {
                (State::Constructed, Some(router), Some(grpc_listener), Some(dns_listener)) => {
                    (router, grpc_listener, dns_listener)
                }
                (state, ..) => return Err(Error::NotRunnable(state)),
            };

            let (rpc_stop, stop_requested) = oneshot::channel();
            let (rpc_alive, ended) = oneshot::channel::<()>();
            let serving = router.serve_with_incoming_shutdown(
                TcpListenerStream::new(grpc_listener),
                async {
                    let _ = stop_requested.await;
                },
            );
            inner.rpc_task = Some(tokio::spawn(async move {
                // Dropped however the server stops, even by panic or
                // abort.
                let _rpc_alive = rpc_alive;
                serving.await
            }));
            inner.rpc_stop = Some(rpc_stop);
            inner.state = State::Running;
            (dns_listener, ended)
        };

        info!(
            "{} is running: control plane on {}, DNS for {} on {}.",
            self.name,
            self.grpc_addr,
            self.resolver.zone(),
            self.dns_addr,
        );

        // The RPC server only stops on its own if it fails. That takes
        // the whole service down.
        let listening = self.resolver.listen(dns_listener);
        tokio::pin!(listening);
        let mut rpc_failed = false;
        let listened = tokio::select! {
            listened = &mut listening => listened,
            _ = rpc_ended => {
                if self.state() == State::Running {
                    error!(
                        "The control-plane server stopped unexpectedly; stopping {}.",
                        self.name,
                    );
                    rpc_failed = true;
                    tokio::join!(self.shutdown(), &mut listening).1
                } else {
                    listening.await
                }
            }
        };
        if rpc_failed {
            return Err(Error::RpcStopped);
        }

        match listened {
            Ok(()) => Ok(()),
            // The resolver may have been closed before it got to listen.
            Err(_) if self.state() != State::Running => Ok(()),
            Err(e) => Err(Error::Listen("DNS", self.dns_addr.to_string(), e)),
        }
    }

    /// Shuts the service down. See the [module documentation](self) for
    /// the order of the steps. Failures are logged, and do not stop
    /// later steps from running. Calls after the first return
    /// immediately.
    pub async fn shutdown(&self) {
        let (rpc_stop, rpc_task, grpc_listener, dns_listener) = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.state, State::ShuttingDown | State::Stopped) {
                return;
            }
            inner.state = State::ShuttingDown;
            inner.router = None;
            (
                inner.rpc_stop.take(),
                inner.rpc_task.take(),
                inner.grpc_listener.take(),
                inner.dns_listener.take(),
            )
        };
        info!("Stopping {}...", self.name);

        // Step 1: stop the RPC server, letting in-flight calls finish.
        if let Some(rpc_stop) = rpc_stop {
            let _ = rpc_stop.send(());
        }
        if let Some(rpc_task) = rpc_task {
            match rpc_task.await {
                Ok(Ok(())) => info!("The control-plane server has stopped."),
                Ok(Err(e)) => error!("The control-plane server failed: {}", e),
                Err(e) => error!("The control-plane server task failed: {}", e),
            }
        }

        // Step 2: close the RPC listener. If the server ran, it owned
        // the listener and has already dropped it.
        drop(grpc_listener);
        info!("The control-plane listener is closed.");

        // Step 3: close the resolver, and with it the DNS listener and
        // the store. DNS sockets that were never served close here.
        drop(dns_listener);
        match self.resolver.close().await {
            Ok(()) => info!("The zone resolver is closed."),
            Err(e) => error!("Failed to close the zone resolver: {}", e),
        }

        self.inner.lock().unwrap().state = State::Stopped;
        info!("Done.");
    }
}

/// Errors that arise while setting up or running a [`Service`].
#[derive(Debug)]
pub enum Error {
    /// The record store could not be opened.
    Store(db::Error),

    /// The TLS trust material could not be loaded.
    Certificate(CertificateError),

    /// The TLS trust material was rejected by the RPC transport.
    Tls(tonic::transport::Error),

    /// The configured domain is not a valid domain name.
    Domain(String, ProtoError),

    /// A listener could not be bound or served: which one, and its
    /// address.
    Listen(&'static str, String, io::Error),

    /// The RPC server stopped while the service was running.
    RpcStopped,

    /// [`Service::run`] was called in a state other than
    /// [`State::Constructed`].
    NotRunnable(State),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Store(_) => f.write_str("could not open the database"),
            Self::Certificate(_) => f.write_str("invalid certificate configuration"),
            Self::Tls(_) => f.write_str("the TLS configuration was rejected"),
            Self::Domain(domain, _) => write!(f, "invalid domain {:?}", domain),
            Self::Listen(what, addr, _) => {
                write!(f, "failed to listen for {} connections on {}", what, addr)
            }
            Self::RpcStopped => f.write_str("the control-plane server stopped unexpectedly"),
            Self::NotRunnable(state) => {
                write!(f, "the service cannot be run in the {:?} state", state)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Certificate(e) => Some(e),
            Self::Tls(e) => Some(e),
            Self::Domain(_, e) => Some(e),
            Self::Listen(_, _, e) => Some(e),
            Self::RpcStopped | Self::NotRunnable(_) => None,
        }
    }
}
