//! §8 S5: an `-ASK` reply redirects the request once, prefixed with
//! `ASKING`, without triggering a shard-table reconfiguration.
use std::net::{TcpListener, TcpStream};

use logger::logger::Logger;
use redis_client::cluster::ClusterRouter;
use redis_client::resp::{read_frame, Value};
use redis_client::ClientConfig;

use tests::{complete_handshake, write_value, ScriptedServer};

#[test]
fn ask_redirect_reaches_the_target_node_once() {
    let target = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let mut reader = complete_handshake(&mut stream);

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"ASKING"[..]));
        write_value(&mut stream, &Value::simple_string("OK")).unwrap();

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"GET"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"foo"[..]));
        write_value(&mut stream, &Value::bulk_string(&b"bar"[..])).unwrap();
    });
    let target_host = target.host();
    let target_port = target.port();

    let origin = ScriptedServer::spawn(move |listener: TcpListener| {
        // Connection 1: the bootstrap seed asking CLUSTER SLOTS. The
        // returned table already lists the target as a second node of the
        // same shard, so the redirect below resolves without a
        // reconfiguration round trip.
        let (mut seed_stream, _) = listener.accept().unwrap();
        let origin_port = seed_stream.local_addr().unwrap().port();
        let mut seed_reader = complete_handshake(&mut seed_stream);

        let frame = read_frame(&mut seed_reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"CLUSTER"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"SLOTS"[..]));

        let slots_reply = Value::Array(vec![Value::Array(vec![
            Value::Integer(0),
            Value::Integer(16383),
            Value::Array(vec![Value::bulk_string(&b"127.0.0.1"[..]), Value::Integer(origin_port as i64)]),
            Value::Array(vec![Value::bulk_string(target_host.into_bytes()), Value::Integer(target_port as i64)]),
        ])]);
        write_value(&mut seed_stream, &slots_reply).unwrap();

        // Connection 2: the shard server the router opens on demand to
        // actually serve `GET foo`.
        let (mut shard_stream, _) = listener.accept().unwrap();
        let mut shard_reader = complete_handshake(&mut shard_stream);
        let frame = read_frame(&mut shard_reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"GET"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"foo"[..]));
        write_value(&mut shard_stream, &Value::error("ASK", &format!("0 {}:{}", "127.0.0.1", target_port))).unwrap();
    });

    let router = ClusterRouter::bootstrap(&[(origin.host(), origin.port())], ClientConfig::new(), Logger::null()).unwrap();

    let reply = router.request(b"foo", &[b"GET".to_vec(), b"foo".to_vec()]).unwrap();
    assert_eq!(reply, Value::bulk_string(&b"bar"[..]));
    assert_eq!(router.shard_count(), 1, "ASK must not trigger a reconfiguration");

    origin.join();
    target.join();
}
