//! §8 S7: a socket timeout leaves the client enabled and reports
//! `TimedOut`; once the caller disconnects, the same call fails fast with
//! `NoService` instead.
use std::net::TcpStream;
use std::time::Duration;

use logger::logger::Logger;
use redis_client::{ClientConfig, ClientErrorKind, Role, ServerInstance};

use tests::{complete_handshake, ScriptedServer};

#[test]
fn timeout_then_disconnect() {
    let scripted = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let _reader = complete_handshake(&mut stream);
        // No reply is ever sent; hold the socket open long enough for the
        // client's read timeout to fire before this thread tears it down.
        std::thread::sleep(Duration::from_millis(300));
    });

    let config = ClientConfig::new().with_socket_timeout_ms(50);
    let server = ServerInstance::new("timeout-test", scripted.host(), scripted.port(), config, Logger::null());
    server.connect(false).unwrap();

    let err = server.read_reply_async(Role::Interactive).unwrap_err();
    assert_eq!(err.kind(), ClientErrorKind::TimedOut);
    assert!(server.is_connected(), "a timed-out read must not disable the client");

    server.disconnect();
    assert!(!server.is_connected());

    let err = server.read_reply_async(Role::Interactive).unwrap_err();
    assert_eq!(err.kind(), ClientErrorKind::NoService);

    scripted.join();
}
