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

//! The DNS listener: UDP and TCP I/O for a [`ZoneResolver`].
//!
//! The TCP accept loop and the UDP receive loop each run in their own
//! task under a supervisor ([`supervise`]), which restarts a loop that
//! fails with an I/O error or panics. Each query is handled in a task
//! of its own. Every task holds a [`ShutdownHandle`], so that shutdown
//! completes only once the last of them is gone.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::db::Store;

use super::ZoneResolver;

/// The largest UDP message we accept or send. Responses from this
/// server are always far smaller.
const UDP_PAYLOAD_SIZE: usize = 1232;

/// How long a TCP client has to send each message.
const READ_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// The minimum time between two starts of a supervised loop.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Bound DNS sockets, ready to be served by
/// [`ZoneResolver::listen`].
///
/// A UDP socket and a TCP listener are bound to the same address.
pub struct DnsListener {
    tcp: TcpListener,
    udp: UdpSocket,
}

impl DnsListener {
    /// Binds the UDP socket and TCP listener. The UDP socket is bound
    /// first, to the first address `addr` resolves to that works, and
    /// the TCP listener is then bound to the same address and port, so
    /// that binding port 0 produces a matching pair.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let udp = UdpSocket::bind(addr).await?;
        let tcp = TcpListener::bind(udp.local_addr()?).await?;
        Ok(Self { tcp, udp })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }
}

/// Serves `listener` until shutdown is requested through the
/// [`ShutdownController`] connected to `shutdown`.
pub(super) async fn serve<S>(
    resolver: Arc<ZoneResolver<S>>,
    listener: DnsListener,
    mut shutdown: ShutdownHandle,
) where
    S: Store + 'static,
{
    tokio::spawn(supervise(
        "TCP accept loop",
        accept_tcp,
        shutdown.clone(),
        resolver.clone(),
        Arc::new(listener.tcp),
    ));
    tokio::spawn(supervise(
        "UDP receive loop",
        receive_udp,
        shutdown.clone(),
        resolver,
        Arc::new(listener.udp),
    ));

    shutdown.requested().await;
    debug!("The DNS listener is shutting down.");
}

/// Runs `run` in a task of its own until it returns `Ok(())`, starting
/// it again whenever it fails.
async fn supervise<F, Fut, S, T>(
    what: &'static str,
    run: F,
    mut shutdown: ShutdownHandle,
    resolver: Arc<ZoneResolver<S>>,
    socket: Arc<T>,
) where
    F: Fn(ShutdownHandle, Arc<ZoneResolver<S>>, Arc<T>) -> Fut,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    loop {
        let started = Instant::now();
        let task = tokio::spawn(run(shutdown.clone(), resolver.clone(), socket.clone()));
        match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => log_io_error(e),
            Err(e) => warn!("The DNS {} stopped unexpectedly: {}", what, e),
        }

        let remaining = RESTART_DELAY.saturating_sub(started.elapsed());
        tokio::select! {
            _ = shutdown.requested() => return,
            _ = tokio::time::sleep(remaining) => debug!("Restarting the DNS {}.", what),
        }
    }
}

async fn accept_tcp<S>(
    mut shutdown: ShutdownHandle,
    resolver: Arc<ZoneResolver<S>>,
    listener: Arc<TcpListener>,
) -> io::Result<()>
where
    S: Store + 'static,
{
    loop {
        let stream = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            accepted = listener.accept() => accepted?.0,
        };
        let connection_shutdown = shutdown.clone();
        let resolver = resolver.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_tcp_connection(connection_shutdown, &resolver, stream).await {
                log_io_error(e);
            }
        });
    }
}

/// Answers queries on a TCP connection until the client closes it,
/// goes quiet for [`READ_MESSAGE_TIMEOUT`], sends something that gets
/// no response, or shutdown is requested. Messages in both directions
/// carry a two-octet big-endian length prefix.
async fn serve_tcp_connection<S>(
    mut shutdown: ShutdownHandle,
    resolver: &ZoneResolver<S>,
    mut stream: TcpStream,
) -> io::Result<()>
where
    S: Store + 'static,
{
    loop {
        let query = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            read = timeout(READ_MESSAGE_TIMEOUT, read_tcp_message(&mut stream)) => match read {
                Ok(Ok(Some(query))) => query,
                Ok(Ok(None)) | Err(_) => return Ok(()),
                Ok(Err(e)) => return Err(e),
            },
        };

        let Some(response) = resolver.handle_message(&query).await else {
            return Ok(());
        };
        let Ok(len) = u16::try_from(response.len()) else {
            return Ok(());
        };
        let mut framed = Vec::with_capacity(response.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&response);
        stream.write_all(&framed).await?;
    }
}

/// Reads one length-prefixed message. Returns `Ok(None)` on a clean
/// close between messages.
async fn read_tcp_message(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let len = match stream.read_u16().await {
        Ok(len) => usize::from(len),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut message = vec![0; len];
    stream.read_exact(&mut message).await?;
    Ok(Some(message))
}

async fn receive_udp<S>(
    mut shutdown: ShutdownHandle,
    resolver: Arc<ZoneResolver<S>>,
    socket: Arc<UdpSocket>,
) -> io::Result<()>
where
    S: Store + 'static,
{
    loop {
        let mut buf = vec![0; UDP_PAYLOAD_SIZE];
        let (len, client) = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            received = socket.recv_from(&mut buf) => received?,
        };

        let in_flight = shutdown.clone();
        let resolver = resolver.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            if let Some(response) = resolver.handle_message(&buf[..len]).await {
                if let Err(e) = socket.send_to(&response, client).await {
                    log_io_error(e);
                }
            }
            drop(in_flight);
        });
    }
}

////////////////////////////////////////////////////////////////////////
// SHUTDOWN                                                           //
////////////////////////////////////////////////////////////////////////

/// The controlling half of the listener's shutdown mechanism.
///
/// [`ShutdownController::shut_down`] asks every task to stop and waits
/// until they all have. Dropping the controller asks them to stop
/// without waiting.
#[must_use]
pub(super) struct ShutdownController {
    stop: broadcast::Sender<()>,
    all_stopped: mpsc::Receiver<()>,
}

impl ShutdownController {
    pub(super) async fn shut_down(mut self) {
        drop(self.stop);
        // Resolves once every handle's sender is gone.
        let _ = self.all_stopped.recv().await;
    }
}

/// The half of the shutdown mechanism held by each task. A task learns
/// that it should stop through [`ShutdownHandle::requested`], and the
/// controller knows it has stopped when its handle is dropped.
pub(super) struct ShutdownHandle {
    stop: broadcast::Receiver<()>,
    _alive: mpsc::Sender<()>,
}

impl ShutdownHandle {
    /// Resolves once shutdown has been requested.
    async fn requested(&mut self) {
        // Nothing is ever sent; the request is the sender closing.
        let _ = self.stop.recv().await;
    }
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        Self {
            stop: self.stop.resubscribe(),
            _alive: self._alive.clone(),
        }
    }
}

/// Produces a [`ShutdownController`] and a first [`ShutdownHandle`]
/// for it.
pub(super) fn make_shutdown_channels() -> (ShutdownController, ShutdownHandle) {
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let (alive_tx, alive_rx) = mpsc::channel(1);
    (
        ShutdownController {
            stop: stop_tx,
            all_stopped: alive_rx,
        },
        ShutdownHandle {
            stop: stop_rx,
            _alive: alive_tx,
        },
    )
}

fn log_io_error(e: io::Error) {
    error!("DNS I/O error: {e}");
}
