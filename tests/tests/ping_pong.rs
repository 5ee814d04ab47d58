//! §8 S1: a bare `PING` and a `PING` with a message round-trip through the
//! interactive client without a pipeline or subscription attached.
use std::net::TcpStream;

use logger::logger::Logger;
use redis_client::resp::{read_frame, Value};
use redis_client::{ClientConfig, ServerInstance};

use tests::{complete_handshake, write_value, ScriptedServer};

#[test]
fn ping_and_ping_with_message_round_trip() {
    let scripted = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let mut reader = complete_handshake(&mut stream);

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"PING"[..]));
        write_value(&mut stream, &Value::simple_string("PONG")).unwrap();

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"PING"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"hello"[..]));
        write_value(&mut stream, &Value::bulk_string(&b"hello"[..])).unwrap();
    });

    let server = ServerInstance::new("ping-test", scripted.host(), scripted.port(), ClientConfig::new(), Logger::null());
    server.connect(false).unwrap();

    assert_eq!(server.request(&["PING"]).unwrap(), Value::simple_string("PONG"));
    assert_eq!(server.request(&["PING", "hello"]).unwrap(), Value::bulk_string(&b"hello"[..]));

    server.disconnect();
    scripted.join();
}
