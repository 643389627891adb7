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

//! Runs a complete service on loopback and drives it the way an
//! operator and a DNS client would.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use rcgen::{BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use ldnsd::client::{self, Client};
use ldnsd::config::{CertificateConfig, Config};
use ldnsd::db::{RecordStore, Store};
use ldnsd::service::{Service, State};
use ldnsd::tls::TrustMaterial;

////////////////////////////////////////////////////////////////////////
// TRUST MATERIAL                                                     //
////////////////////////////////////////////////////////////////////////

struct Pki {
    ca: PathBuf,
    server: (PathBuf, PathBuf),
    client: (PathBuf, PathBuf),
}

/// Writes a fresh CA, plus a server and a client certificate signed by
/// it, into `dir`.
fn write_pki(dir: &Path) -> Pki {
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let write_leaf = |name: &str, sans: Vec<String>, usage| {
        let mut params = CertificateParams::new(sans).unwrap();
        params.extended_key_usages = vec![usage];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &ca_cert, &ca_key).unwrap();
        let cert_path = dir.join(format!("{}.pem", name));
        let key_path = dir.join(format!("{}.key", name));
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key.serialize_pem()).unwrap();
        (cert_path, key_path)
    };
    let server = write_leaf(
        "server",
        vec!["localhost".to_owned(), "127.0.0.1".to_owned()],
        ExtendedKeyUsagePurpose::ServerAuth,
    );
    let client = write_leaf(
        "client",
        vec!["client".to_owned()],
        ExtendedKeyUsagePurpose::ClientAuth,
    );

    let ca = dir.join("rootCA.pem");
    fs::write(&ca, ca_cert.pem()).unwrap();
    Pki { ca, server, client }
}

/// A configuration on loopback ephemeral ports, using the server half
/// of `pki`.
fn loopback_config(dir: &Path, pki: &Pki) -> Config {
    Config {
        db_file: dir.join("ldnsd.db"),
        grpc_listen: "127.0.0.1:0".to_owned(),
        dns_listen: "127.0.0.1:0".to_owned(),
        certificate: CertificateConfig {
            ca_file: pki.ca.clone(),
            cert_file: pki.server.0.clone(),
            key_file: pki.server.1.clone(),
        },
        ..Config::default()
    }
}

/// Starts `service` running in a new task and waits until it is.
async fn start(service: &Arc<Service>) -> JoinHandle<Result<(), ldnsd::service::Error>> {
    let runner = tokio::spawn({
        let service = service.clone();
        async move { service.run().await }
    });
    while service.state() != State::Running {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    runner
}

async fn connect(service: &Service, pki: &Pki) -> Client {
    let trust = TrustMaterial::load(&pki.ca, &pki.client.0, &pki.client.1).unwrap();
    Client::connect(&service.grpc_addr().to_string(), &trust, "localhost")
        .await
        .unwrap()
}

////////////////////////////////////////////////////////////////////////
// DNS CLIENT                                                         //
////////////////////////////////////////////////////////////////////////

fn a_query(name: &str) -> Message {
    let mut request = Message::new();
    request
        .set_id(4321)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    request
}

async fn query_a(server: SocketAddr, name: &str) -> Message {
    let request = a_query(name);
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&request.to_vec().unwrap(), server)
        .await
        .unwrap();
    let mut buf = [0; 1232];
    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no DNS response")
        .unwrap();
    let response = Message::from_vec(&buf[..len]).unwrap();
    assert_eq!(response.id(), 4321);
    response
}

fn addresses(response: &Message) -> Vec<Ipv4Addr> {
    response
        .answers()
        .iter()
        .filter_map(|rr| match rr.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
        .collect()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn records_set_over_the_control_plane_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let pki = write_pki(dir.path());
    let config = loopback_config(dir.path(), &pki);

    let service = Arc::new(Service::new("ldnsd-test", &config).await.unwrap());
    assert_eq!(service.state(), State::Constructed);
    let runner = start(&service).await;

    let mut client = connect(&service, &pki).await;
    let dns = service.dns_addr();

    // Set and resolve.
    client.set_a("test", "1.2.3.4").await.unwrap();
    let response = query_a(dns, "test.internal.").await;
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(addresses(&response), vec![Ipv4Addr::new(1, 2, 3, 4)]);

    // Invalid and duplicate records are refused with ABORTED.
    let long_label = "a".repeat(64);
    for (host, address) in [
        ("test", "5.6.7.8"),
        ("TEST", "1.2.3.4"),
        ("ipv6", "::1"),
        ("bad", "1.2.3"),
        (long_label.as_str(), "1.2.3.4"),
    ] {
        match client.set_a(host, address).await {
            Err(client::Error::Rpc(status)) => {
                assert_eq!(status.code(), tonic::Code::Aborted, "{} {}", host, address)
            }
            other => panic!("set_a({}, {}) gave {:?}", host, address, other),
        }
    }
    let max_label = "a".repeat(63);
    client.set_a(&max_label, "10.0.0.1").await.unwrap();

    // Listing is sorted by host.
    let listed: Vec<(String, String)> = client
        .list_a()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.host, r.address))
        .collect();
    assert_eq!(
        listed,
        vec![
            (max_label.clone(), "10.0.0.1".to_owned()),
            ("test".to_owned(), "1.2.3.4".to_owned()),
        ],
    );

    // Delete, twice.
    client.delete_a("test").await.unwrap();
    client.delete_a("test").await.unwrap();
    let response = query_a(dns, "test.internal.").await;
    assert_eq!(response.response_code(), ResponseCode::NXDomain);
    assert!(addresses(&response).is_empty());

    // Shut down, twice.
    service.shutdown().await;
    service.shutdown().await;
    assert_eq!(service.state(), State::Stopped);
    runner.await.unwrap().unwrap();
    assert!(client.list_a().await.is_err());
}

#[tokio::test]
async fn set_up_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        db_file: dir.path().join("ldnsd.db"),
        grpc_listen: "127.0.0.1:0".to_owned(),
        dns_listen: "127.0.0.1:0".to_owned(),
        certificate: CertificateConfig {
            ca_file: dir.path().join("missing.pem"),
            cert_file: dir.path().join("missing.pem"),
            key_file: dir.path().join("missing.key"),
        },
        ..Config::default()
    };
    assert!(matches!(
        Service::new("ldnsd-test", &config).await,
        Err(ldnsd::service::Error::Certificate(_)),
    ));
}

#[tokio::test]
async fn shutdown_before_run() {
    let dir = tempfile::tempdir().unwrap();
    let pki = write_pki(dir.path());
    let config = loopback_config(dir.path(), &pki);

    let service = Service::new("ldnsd-test", &config).await.unwrap();
    service.shutdown().await;
    assert_eq!(service.state(), State::Stopped);
    assert!(matches!(
        service.run().await,
        Err(ldnsd::service::Error::NotRunnable(State::Stopped)),
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_lets_in_flight_calls_finish() {
    let dir = tempfile::tempdir().unwrap();
    let pki = write_pki(dir.path());
    let config = loopback_config(dir.path(), &pki);
    let service = Arc::new(Service::new("ldnsd-test", &config).await.unwrap());
    let runner = start(&service).await;
    let mut client = connect(&service, &pki).await;
    client.set_a("first", "10.0.0.1").await.unwrap();

    // Keep setting records until the server stops taking calls.
    let (started, writing) = oneshot::channel();
    let writer = tokio::spawn(async move {
        let mut started = Some(started);
        let mut written = vec!["first".to_owned()];
        for i in 0..=255u8 {
            let host = format!("host{}", i);
            let addr = format!("10.0.1.{}", i);
            let set = client.set_a(&host, &addr);
            if let Some(started) = started.take() {
                let _ = started.send(());
            }
            match set.await {
                Ok(()) => written.push(host),
                Err(_) => break,
            }
        }
        written
    });
    writing.await.unwrap();
    timeout(Duration::from_secs(10), service.shutdown())
        .await
        .expect("shutdown did not finish");
    let mut written = timeout(Duration::from_secs(10), writer)
        .await
        .expect("a call never finished")
        .unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(service.state(), State::Stopped);

    // Exactly the acknowledged writes are on disk: nothing that
    // succeeded was lost, and nothing was written without its caller
    // hearing about it.
    let store = RecordStore::open(&config.db_file).unwrap();
    let mut stored: Vec<String> = store.list_a().unwrap().into_keys().collect();
    stored.sort();
    written.sort();
    assert_eq!(stored, written);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_open_dns_connections() {
    let dir = tempfile::tempdir().unwrap();
    let pki = write_pki(dir.path());
    let config = loopback_config(dir.path(), &pki);
    let service = Arc::new(Service::new("ldnsd-test", &config).await.unwrap());
    let runner = start(&service).await;

    // One exchange, so the connection is known to be served.
    let mut stream = TcpStream::connect(service.dns_addr()).await.unwrap();
    let request = a_query("test.internal.").to_vec().unwrap();
    stream.write_u16(request.len() as u16).await.unwrap();
    stream.write_all(&request).await.unwrap();
    let len = stream.read_u16().await.unwrap();
    let mut response = vec![0; usize::from(len)];
    stream.read_exact(&mut response).await.unwrap();
    let response = Message::from_vec(&response).unwrap();
    assert_eq!(response.response_code(), ResponseCode::NXDomain);

    // The connection stays open while the service shuts down.
    timeout(Duration::from_secs(10), service.shutdown())
        .await
        .expect("shutdown waited on an open DNS connection");
    assert_eq!(service.state(), State::Stopped);
    runner.await.unwrap().unwrap();

    let mut buf = [0; 1];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("the server kept the connection open");
    assert_eq!(read.unwrap_or(0), 0);
}
