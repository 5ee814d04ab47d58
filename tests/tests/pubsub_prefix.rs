//! §8 S4: a locally registered prefix subscriber only sees channels it
//! matches, even though the wire-level `SUBSCRIBE` only names one channel
//! and the server pushes messages for several.
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use logger::logger::Logger;
use redis_client::pubsub::MessageCallback;
use redis_client::resp::{read_frame, Value};
use redis_client::{ClientConfig, ServerInstance};

use tests::{complete_handshake, write_value, ScriptedServer};

#[test]
fn prefix_subscriber_filters_unrelated_channels() {
    let scripted = ScriptedServer::spawn_one(|mut stream: TcpStream| {
        let mut reader = complete_handshake(&mut stream);

        let frame = read_frame(&mut reader).unwrap();
        let args = frame.as_array().unwrap();
        assert_eq!(args[0].as_bytes(), Some(&b"SUBSCRIBE"[..]));
        assert_eq!(args[1].as_bytes(), Some(&b"any-channel"[..]));

        write_value(
            &mut stream,
            &Value::Array(vec![Value::bulk_string(&b"subscribe"[..]), Value::bulk_string(&b"any-channel"[..]), Value::Integer(1)]),
        )
        .unwrap();
        write_value(
            &mut stream,
            &Value::Array(vec![
                Value::bulk_string(&b"message"[..]),
                Value::bulk_string(&b"alerts.fire"[..]),
                Value::bulk_string(&b"3"[..]),
            ]),
        )
        .unwrap();
        write_value(
            &mut stream,
            &Value::Array(vec![
                Value::bulk_string(&b"message"[..]),
                Value::bulk_string(&b"weather.rain"[..]),
                Value::bulk_string(&b"x"[..]),
            ]),
        )
        .unwrap();
    });

    let server = ServerInstance::new("pubsub-test", scripted.host(), scripted.port(), ClientConfig::new(), Logger::null());

    let received: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_for_cb = received.clone();
    let callback: MessageCallback = Arc::new(move |_pattern, channel, payload| {
        received_for_cb.lock().unwrap().push((channel.to_vec(), payload.to_vec()));
    });
    server.add_subscriber("alerts.", callback);
    server.subscribe("any-channel").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1, "only the alerts.-prefixed channel should have reached the callback");
    assert_eq!(got[0].0, b"alerts.fire");
    assert_eq!(got[0].1, b"3");
    drop(got);

    server.disconnect();
    scripted.join();
}
