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

//! The zone resolver: answers DNS queries for one zone from a
//! [`Store`], and is the single path through which the store's records
//! are read and changed.
//!
//! Each record `host` in the store is published as `host.<zone>.`, with
//! an A record for its address. The resolver is authoritative for the
//! zone and nothing else; it does not recurse and it refuses queries
//! for names outside the zone.
//!
//! The control plane never touches the store directly. It goes through
//! the accessors on [`ZoneResolver`] ([`ZoneResolver::set_a`] and
//! friends), so that there is exactly one owner of the current state of
//! the zone.

use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use hickory_proto::error::ProtoError;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record as ResourceRecord, RecordType};
use log::{debug, warn};

use crate::db::{self, ARecords, Record, SrvRecord, SrvRecords, Store};

mod transport;

pub use self::transport::DnsListener;
use self::transport::{make_shutdown_channels, ShutdownController, ShutdownHandle};

/// The default TTL of published records, in seconds.
pub const DEFAULT_TTL: u32 = 60;

/// Answers DNS queries for a zone from a [`Store`] it owns.
///
/// See the [module documentation](self) for details.
pub struct ZoneResolver<S> {
    zone: Name,
    ttl: u32,
    store: Arc<S>,
    shutdown: Mutex<ShutdownState>,
}

/// The two halves of the listener's shutdown mechanism. Both are
/// taken (and the store closed) by the first call to
/// [`ZoneResolver::close`]; `handle` is taken earlier by
/// [`ZoneResolver::listen`].
struct ShutdownState {
    controller: Option<ShutdownController>,
    handle: Option<ShutdownHandle>,
}

impl<S> ZoneResolver<S>
where
    S: Store + 'static,
{
    /// Creates a resolver serving the zone `zone` (e.g., `internal`,
    /// with or without a trailing dot) from `store`, publishing records
    /// with the given TTL.
    pub fn new(zone: &str, store: S, ttl: u32) -> Result<Self, ProtoError> {
        let mut zone = Name::from_ascii(zone)?.to_lowercase();
        zone.set_fqdn(true);
        let (controller, handle) = make_shutdown_channels();
        Ok(Self {
            zone,
            ttl,
            store: Arc::new(store),
            shutdown: Mutex::new(ShutdownState {
                controller: Some(controller),
                handle: Some(handle),
            }),
        })
    }

    /// Returns the zone's apex.
    pub fn zone(&self) -> &Name {
        &self.zone
    }

    /// Returns the fully-qualified name under which `host` is
    /// published.
    pub fn fqdn(&self, host: &str) -> Result<Name, ProtoError> {
        Name::from_ascii(host)?.append_domain(&self.zone)
    }

    ////////////////////////////////////////////////////////////////////
    // RECORD ACCESSORS                                               //
    ////////////////////////////////////////////////////////////////////

    // Store operations block, so they are run on Tokio's blocking
    // thread pool. They run to completion even if the caller goes away.

    /// See [`Store::set_a`].
    pub async fn set_a(&self, host: &str, address: IpAddr) -> Result<(), db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.set_a(&host, address)).await
    }

    /// See [`Store::get_a`].
    pub async fn get_a(&self, host: &str) -> Result<Record, db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.get_a(&host)).await
    }

    /// See [`Store::delete_a`].
    pub async fn delete_a(&self, host: &str) -> Result<(), db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.delete_a(&host)).await
    }

    /// See [`Store::list_a`].
    pub async fn list_a(&self) -> Result<ARecords, db::Error> {
        self.blocking(|store| store.list_a()).await
    }

    /// See [`Store::set_srv`].
    pub async fn set_srv(&self, host: &str, record: SrvRecord) -> Result<(), db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.set_srv(&host, &record)).await
    }

    /// See [`Store::get_srv`].
    pub async fn get_srv(&self, host: &str) -> Result<SrvRecord, db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.get_srv(&host)).await
    }

    /// See [`Store::delete_srv`].
    pub async fn delete_srv(&self, host: &str) -> Result<(), db::Error> {
        let host = host.to_owned();
        self.blocking(move |store| store.delete_srv(&host)).await
    }

    /// See [`Store::list_srv`].
    pub async fn list_srv(&self) -> Result<SrvRecords, db::Error> {
        self.blocking(|store| store.list_srv()).await
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, db::Error>
    where
        F: FnOnce(&S) -> Result<T, db::Error> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&*store))
            .await
            .map_err(|e| db::Error::Storage(e.to_string().into()))?
    }

    ////////////////////////////////////////////////////////////////////
    // LISTENING AND SHUTDOWN                                         //
    ////////////////////////////////////////////////////////////////////

    /// Serves DNS queries on `listener` until [`ZoneResolver::close`] is
    /// called. A resolver can only listen once.
    pub async fn listen(self: &Arc<Self>, listener: DnsListener) -> io::Result<()> {
        let handle = self.shutdown.lock().unwrap().handle.take();
        let handle = handle.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Other,
                "the zone resolver is closed or already listening",
            )
        })?;
        debug!("Serving {} on {}.", self.zone, listener.local_addr()?);
        transport::serve(self.clone(), listener, handle).await;
        Ok(())
    }

    /// Stops the DNS listener (if it is running), waits for in-flight
    /// queries to finish, and then closes the store. Calls after the
    /// first do nothing.
    pub async fn close(&self) -> Result<(), db::Error> {
        let (controller, handle) = {
            let mut state = self.shutdown.lock().unwrap();
            (state.controller.take(), state.handle.take())
        };

        // An unused handle would otherwise hold up the shutdown.
        drop(handle);
        match controller {
            Some(controller) => {
                controller.shut_down().await;
                self.blocking(|store| store.close()).await
            }
            None => Ok(()),
        }
    }

    ////////////////////////////////////////////////////////////////////
    // QUERY ANSWERING                                                //
    ////////////////////////////////////////////////////////////////////

    /// Handles a received DNS message, returning the serialized
    /// response. Returns `None` if the message should be ignored
    /// (because it could not be parsed, or because it is itself a
    /// response).
    pub async fn handle_message(&self, received: &[u8]) -> Option<Vec<u8>> {
        let request = Message::from_vec(received).ok()?;
        if request.message_type() != MessageType::Query {
            return None;
        }
        let response = self.answer(&request).await;
        match response.to_vec() {
            Ok(serialized) => Some(serialized),
            Err(e) => {
                warn!("Failed to serialize a DNS response: {}", e);
                None
            }
        }
    }

    /// Produces the response to a DNS query.
    pub async fn answer(&self, request: &Message) -> Message {
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(request.op_code())
            .set_recursion_desired(request.recursion_desired());
        for query in request.queries() {
            response.add_query(query.clone());
        }

        if request.op_code() != OpCode::Query {
            response.set_response_code(ResponseCode::NotImp);
            return response;
        }
        let query = match request.queries() {
            [query] => query,
            _ => {
                response.set_response_code(ResponseCode::FormErr);
                return response;
            }
        };
        let name = query.name();
        if !matches!(query.query_class(), DNSClass::IN | DNSClass::ANY)
            || !self.zone.zone_of(name)
        {
            response.set_response_code(ResponseCode::Refused);
            return response;
        }
        response.set_authoritative(true);

        // The zone apex has no records of its own.
        let host = match self.host_of(name) {
            Some(host) => host,
            None => return response,
        };

        // A label containing a dot (or anything else that does not
        // survive the round trip) would otherwise alias another host.
        if !self.fqdn(&host).map_or(false, |fqdn| fqdn == name.to_lowercase()) {
            response.set_response_code(ResponseCode::NXDomain);
            return response;
        }

        match self.get_a(&host).await {
            Ok(record) => {
                if matches!(query.query_type(), RecordType::A | RecordType::ANY) {
                    response.add_answer(ResourceRecord::from_rdata(
                        name.clone(),
                        self.ttl,
                        RData::A(A(record.address())),
                    ));
                }
            }
            // A name that cannot be a valid host has no record.
            Err(db::Error::NotFound(_) | db::Error::Validation(_)) => {
                response.set_response_code(ResponseCode::NXDomain);
            }
            Err(e) => {
                warn!("Failed to look up {} for a DNS query: {}", host, e);
                response
                    .set_authoritative(false)
                    .set_response_code(ResponseCode::ServFail);
            }
        }
        response
    }

    /// Returns the host (in lowercase) that `name` refers to, or `None`
    /// if `name` is the zone apex. `name` must be within the zone.
    fn host_of(&self, name: &Name) -> Option<String> {
        let n_host_labels = name.iter().count() - self.zone.iter().count();
        if n_host_labels == 0 {
            return None;
        }
        let labels: Vec<String> = name
            .iter()
            .take(n_host_labels)
            .map(|label| String::from_utf8_lossy(label).to_ascii_lowercase())
            .collect();
        Some(labels.join("."))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hickory_proto::op::Query;
    use tempfile::TempDir;

    use super::*;
    use crate::db::RecordStore;

    fn new_resolver() -> (TempDir, Arc<ZoneResolver<RecordStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("test.db")).unwrap();
        let resolver = ZoneResolver::new("internal", store, DEFAULT_TTL).unwrap();
        (dir, Arc::new(resolver))
    }

    fn query(name: &str, rr_type: RecordType) -> Message {
        let mut message = Message::new();
        message
            .set_id(1234)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(Name::from_ascii(name).unwrap(), rr_type));
        message
    }

    fn answer_addresses(response: &Message) -> Vec<Ipv4Addr> {
        response
            .answers()
            .iter()
            .filter_map(|rr| match rr.data() {
                Some(RData::A(a)) => Some(a.0),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn set_record_is_served() {
        let (_dir, resolver) = new_resolver();
        resolver.set_a("test", "1.2.3.4".parse().unwrap()).await.unwrap();

        let response = resolver.answer(&query("test.internal.", RecordType::A)).await;
        assert_eq!(response.id(), 1234);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.authoritative());
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(response.answers()[0].ttl(), DEFAULT_TTL);

        // Matching is case-insensitive.
        let response = resolver.answer(&query("TeSt.Internal.", RecordType::A)).await;
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);
    }

    #[tokio::test]
    async fn deleted_record_is_not_served() {
        let (_dir, resolver) = new_resolver();
        resolver.set_a("test", "1.2.3.4".parse().unwrap()).await.unwrap();
        resolver.delete_a("test").await.unwrap();

        let response = resolver.answer(&query("test.internal.", RecordType::A)).await;
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn other_types_get_no_data() {
        let (_dir, resolver) = new_resolver();
        resolver.set_a("a.b", "10.0.0.1".parse().unwrap()).await.unwrap();

        let response = resolver.answer(&query("a.b.internal.", RecordType::AAAA)).await;
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());

        let response = resolver.answer(&query("a.b.internal.", RecordType::ANY)).await;
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(10, 0, 0, 1)]);
    }

    #[tokio::test]
    async fn labels_with_dots_do_not_alias_other_hosts() {
        let (_dir, resolver) = new_resolver();
        resolver.set_a("te.st", "1.2.3.4".parse().unwrap()).await.unwrap();

        let mut name = Name::from_labels(vec![&b"te.st"[..], &b"internal"[..]]).unwrap();
        name.set_fqdn(true);
        assert_eq!(name.num_labels(), 2);
        let mut request = Message::new();
        request
            .set_id(1234)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(name, RecordType::A));
        let response = resolver.answer(&request).await;
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert!(response.answers().is_empty());

        // The real three-label name still resolves.
        let response = resolver.answer(&query("te.st.internal.", RecordType::A)).await;
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(
            resolver.fqdn("te.st").unwrap(),
            Name::from_ascii("te.st.internal.").unwrap(),
        );
    }

    #[tokio::test]
    async fn apex_and_foreign_names_are_handled() {
        let (_dir, resolver) = new_resolver();

        let response = resolver.answer(&query("internal.", RecordType::A)).await;
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());

        let response = resolver.answer(&query("test.example.", RecordType::A)).await;
        assert_eq!(response.response_code(), ResponseCode::Refused);
        assert!(!response.authoritative());
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let (_dir, resolver) = new_resolver();

        let mut request = query("test.internal.", RecordType::A);
        request.add_query(Query::query(
            Name::from_ascii("other.internal.").unwrap(),
            RecordType::A,
        ));
        let response = resolver.answer(&request).await;
        assert_eq!(response.response_code(), ResponseCode::FormErr);

        let mut request = query("test.internal.", RecordType::A);
        request.set_op_code(OpCode::Update);
        let response = resolver.answer(&request).await;
        assert_eq!(response.response_code(), ResponseCode::NotImp);

        assert!(resolver.handle_message(&[1, 2, 3]).await.is_none());
    }

    #[tokio::test]
    async fn handle_message_round_trips_the_wire_format() {
        let (_dir, resolver) = new_resolver();
        resolver.set_a("test", "1.2.3.4".parse().unwrap()).await.unwrap();

        let request = query("test.internal.", RecordType::A).to_vec().unwrap();
        let response = resolver.handle_message(&request).await.unwrap();
        let response = Message::from_vec(&response).unwrap();
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);

        // Responses are ignored.
        let mut response_message = query("test.internal.", RecordType::A);
        response_message.set_message_type(MessageType::Response);
        let bytes = response_message.to_vec().unwrap();
        assert!(resolver.handle_message(&bytes).await.is_none());
    }

    #[tokio::test]
    async fn srv_operations_are_not_supported() {
        let (_dir, resolver) = new_resolver();
        assert!(matches!(resolver.list_srv().await, Err(db::Error::NotSupported)));
        assert!(matches!(resolver.get_srv("test").await, Err(db::Error::NotSupported)));
        assert!(matches!(resolver.delete_srv("test").await, Err(db::Error::NotSupported)));
        let srv = SrvRecord {
            target: "x".into(),
            port: 1,
            priority: 1,
            weight: 1,
        };
        assert!(matches!(resolver.set_srv("test", srv).await, Err(db::Error::NotSupported)));
    }

    #[tokio::test]
    async fn listen_serves_udp_and_tcp_until_closed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpStream, UdpSocket};

        let (_dir, resolver) = new_resolver();
        resolver.set_a("test", "1.2.3.4".parse().unwrap()).await.unwrap();
        let listener = DnsListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let listening = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.listen(listener).await }
        });

        let request = query("test.internal.", RecordType::A).to_vec().unwrap();

        // UDP.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&request, addr).await.unwrap();
        let mut buf = vec![0; 512];
        let len = socket.recv(&mut buf).await.unwrap();
        let response = Message::from_vec(&buf[..len]).unwrap();
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);

        // TCP.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_u16(request.len() as u16).await.unwrap();
        stream.write_all(&request).await.unwrap();
        let len = stream.read_u16().await.unwrap() as usize;
        let mut buf = vec![0; len];
        stream.read_exact(&mut buf).await.unwrap();
        let response = Message::from_vec(&buf).unwrap();
        assert_eq!(answer_addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);
        drop(stream);

        resolver.close().await.unwrap();
        listening.await.unwrap().unwrap();
        resolver.close().await.unwrap();

        // The store went with it.
        assert!(matches!(resolver.list_a().await, Err(db::Error::Closed)));
    }

    #[tokio::test]
    async fn close_without_listening_works() {
        let (_dir, resolver) = new_resolver();
        resolver.close().await.unwrap();
        let listener = DnsListener::bind("127.0.0.1:0").await.unwrap();
        assert!(resolver.listen(listener).await.is_err());
    }
}
