//! §8 S2: `SET` followed by `GET` returns the value just written.
use std::net::TcpStream;

use logger::logger::Logger;
use redis_client::resp::{read_frame, Value};
use redis_client::{ClientConfig, ServerInstance};

use tests::{complete_handshake, write_value, ScriptedServer};

#[test]
fn set_then_get_round_trip() {
    let scripted = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let mut reader = complete_handshake(&mut stream);

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"SET"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"greeting"[..]));
        assert_eq!(args[2].as_bytes(), Some(&b"hello world"[..]));
        write_value(&mut stream, &Value::simple_string("OK")).unwrap();

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"GET"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"greeting"[..]));
        write_value(&mut stream, &Value::bulk_string(&b"hello world"[..])).unwrap();
    });

    let server = ServerInstance::new("set-get-test", scripted.host(), scripted.port(), ClientConfig::new(), Logger::null());
    server.connect(false).unwrap();

    let reply = server.request(&["SET", "greeting", "hello world"]).unwrap();
    assert_eq!(reply, Value::simple_string("OK"));

    let reply = server.request(&["GET", "greeting"]).unwrap();
    assert_eq!(reply, Value::bulk_string(&b"hello world"[..]));

    server.disconnect();
    scripted.join();
}

/// §8 S3: `HSCAN` round trip — a cursor plus interleaved field/value pairs,
/// left as a raw array reply (hash-table sugar is out of scope).
#[test]
fn hscan_returns_cursor_and_field_value_pairs() {
    let scripted = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let mut reader = complete_handshake(&mut stream);

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"HSCAN"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"profile"[..]));
        assert_eq!(args[2].as_bytes(), Some(&b"0"[..]));

        let reply = Value::Array(vec![
            Value::bulk_string(&b"0"[..]),
            Value::Array(vec![
                Value::bulk_string(&b"name"[..]),
                Value::bulk_string(&b"ada"[..]),
                Value::bulk_string(&b"age"[..]),
                Value::bulk_string(&b"36"[..]),
            ]),
        ]);
        write_value(&mut stream, &reply).unwrap();
    });

    let server = ServerInstance::new("hscan-test", scripted.host(), scripted.port(), ClientConfig::new(), Logger::null());
    server.connect(false).unwrap();

    let reply = server.request(&["HSCAN", "profile", "0"]).unwrap();
    let top = reply.as_array().unwrap();
    assert_eq!(top[0].as_bytes(), Some(&b"0"[..]));
    let pairs = top[1].as_array().unwrap();
    assert_eq!(pairs.len(), 4);
    assert_eq!(pairs[0].as_bytes(), Some(&b"name"[..]));
    assert_eq!(pairs[1].as_bytes(), Some(&b"ada"[..]));

    server.disconnect();
    scripted.join();
}
