mod support;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use support::{MockConnector, Reply};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use vndbpool::backend::Session;
use vndbpool::{Error, SessionState, TlsConnector};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// TLS listener on 127.0.0.1 presenting a certificate signed by the test CA
/// in `tests/fixtures`. It acknowledges one login and then waits for the
/// client to close.
async fn spawn_tls_server() -> (u16, JoinHandle<()>) {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(fixture("server.crt")).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(fixture("server.key")).unwrap()))
        .unwrap()
        .expect("private key in fixture");

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let Ok(mut tls) = acceptor.accept(stream).await else {
            return;
        };

        let mut buf = [0u8; 1024];
        let _ = tls.read(&mut buf).await;
        let _ = tls.write_all(b"ok\x04").await;
        let _ = tls.flush().await;
        while let Ok(n) = tls.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    (port, server)
}

fn reply_echo(line: &str) -> Reply {
    Reply::Text(format!("results {{\"echo\":{:?}}}", line))
}

fn reply_split(_: &str) -> Reply {
    Reply::Split("results {\"items\":[{\"id\":17}],\"more\":false,\"num\":1}".into())
}

fn reply_silent(_: &str) -> Reply {
    Reply::Silent
}

#[tokio::test]
async fn login_sends_protocol_client_and_credentials() {
    let connector = MockConnector::new(reply_echo);
    let factory = support::factory_with_login(connector.clone(), "alice", "hunter2");

    let session = factory.create().await.expect("create session");
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_authenticated());

    let logins = connector.logins();
    assert_eq!(logins.len(), 1);

    let body = logins[0].line.strip_prefix("login ").expect("login prefix");
    let json: serde_json::Value = serde_json::from_str(body).expect("login json");
    assert_eq!(json["protocol"], 1);
    assert_eq!(json["client"], session.id().as_str());
    assert_eq!(json["clientver"], "0.0.1");
    assert_eq!(json["username"], "alice");
    assert_eq!(json["password"], "hunter2");
}

#[tokio::test]
async fn anonymous_login_omits_credential_fields() {
    let connector = MockConnector::new(reply_echo);
    let factory = support::factory(connector.clone());
    factory.create().await.expect("create session");

    let line = &connector.logins()[0].line;
    assert!(!line.contains("username"));
    assert!(!line.contains("password"));
    assert!(!line.contains("null"));
}

#[tokio::test]
async fn rejected_login_surfaces_server_text() {
    let connector = MockConnector::with_login_reply("error bad credentials", reply_echo);
    let mut session = Session::new(connector.clone(), Arc::new(support::settings(None)));

    session.connect().await.expect("connect");
    assert_eq!(session.state(), SessionState::LoggingIn);

    let err = session.login(Some("u"), Some("p")).await.unwrap_err();
    match err {
        Error::LoginFailure(text) => assert_eq!(text, "error bad credentials"),
        other => panic!("expected LoginFailure, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn write_then_read_returns_server_reply_with_terminator() {
    let connector = MockConnector::new(reply_echo);
    let mut session = support::factory(connector.clone()).create().await.unwrap();

    session.write("get vn basic (id = 17)").await.unwrap();
    let frame = session.read().await.unwrap();

    let expected = format!("results {{\"echo\":{:?}}}\x04", "get vn basic (id = 17)");
    assert_eq!(&frame[..], expected.as_bytes());
    assert_eq!(connector.commands()[0].line, "get vn basic (id = 17)");

    // The session stays usable for the next exchange.
    session.write("dbstats").await.unwrap();
    let frame = session.read().await.unwrap();
    assert!(frame.ends_with(b"\"dbstats\"}\x04"));
}

#[tokio::test(start_paused = true)]
async fn read_accumulates_until_terminator() {
    let connector = MockConnector::new(reply_split);
    let mut session = support::factory(connector).create().await.unwrap();

    session.write("get vn basic (id = 17)").await.unwrap();
    let frame = session.read().await.unwrap();
    assert_eq!(
        &frame[..],
        b"results {\"items\":[{\"id\":17}],\"more\":false,\"num\":1}\x04"
    );
}

#[tokio::test(start_paused = true)]
async fn read_timeout_closes_session() {
    let connector = MockConnector::new(reply_silent);
    let factory = vndbpool::SessionFactory::new(
        connector,
        support::settings(Some(Duration::from_millis(250))),
        None,
    );
    let mut session = factory.create().await.unwrap();

    session.write("dbstats").await.unwrap();
    let err = session.read().await.unwrap_err();
    assert!(matches!(err, Error::ReadTimeout(d) if d == Duration::from_millis(250)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.write("dbstats").await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test]
async fn destroy_waits_for_server_to_close() {
    let connector = MockConnector::new(reply_echo);
    let mut session = support::factory(connector.clone()).create().await.unwrap();

    session.destroy().await.expect("destroy");
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn failed_connect_is_connection_error() {
    let connector = MockConnector::new(reply_echo);
    connector.refuse_connections(true);
    let mut session = Session::new(connector, Arc::new(support::settings(None)));

    assert!(matches!(session.connect().await, Err(Error::Connection(_))));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(session.destroy().await, Err(Error::NoConnection)));
}

#[tokio::test]
async fn tls_handshake_against_plaintext_server_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        let _ = stream.write_all(b"this is not tls\x04").await;
    });

    let tls = vndbpool::tls::client_config(None).unwrap();
    let connector = TlsConnector::new("127.0.0.1", port, tls).unwrap();
    let mut session = Session::new(Arc::new(connector), Arc::new(support::settings(None)));

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    assert_eq!(session.state(), SessionState::Closed);

    server.await.unwrap();
}

#[tokio::test]
async fn untrusted_certificate_is_unauthorized() {
    let (port, server) = spawn_tls_server().await;

    let tls = vndbpool::tls::client_config(None).unwrap();
    let connector = TlsConnector::new("127.0.0.1", port, tls).unwrap();
    let mut session = Session::new(Arc::new(connector), Arc::new(support::settings(None)));

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::UnauthorizedConnection(_)), "got {err:?}");
    assert_eq!(session.state(), SessionState::Closed);

    server.await.unwrap();
}

#[tokio::test]
async fn trusted_ca_file_completes_handshake_and_login() {
    let (port, server) = spawn_tls_server().await;

    let tls = vndbpool::tls::client_config(Some(&fixture("ca.crt"))).unwrap();
    let connector = TlsConnector::new("127.0.0.1", port, tls).unwrap();
    let mut session = Session::new(Arc::new(connector), Arc::new(support::settings(None)));

    session.connect().await.expect("tls handshake");
    assert_eq!(session.state(), SessionState::LoggingIn);

    session.login(None, None).await.expect("login");
    assert_eq!(session.state(), SessionState::Ready);

    session.destroy().await.expect("destroy");
    assert_eq!(session.state(), SessionState::Closed);

    server.await.unwrap();
}
