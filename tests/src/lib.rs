//! Scripted-server test harness (§4.L): a one-shot in-process TCP listener
//! that a test drives by hand, writing RESP frames back at whatever pace the
//! scenario needs, without a live Redis/Valkey install.
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};

use redis_client::resp::{read_frame, Value};

/// Encodes `value` onto `out` as a RESP2/RESP3 reply frame. Only the shapes
/// the scripted scenarios actually reply with are implemented.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::SimpleString(b) => {
            out.push(b'+');
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Value::Error(b) => {
            out.push(b'-');
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Value::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Value::BulkString(b) => {
            out.push(b'$');
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Value::Null => out.extend_from_slice(b"_\r\n"),
        Value::Array(items) | Value::Set(items) | Value::Push(items) => {
            let tag = match value {
                Value::Array(_) => b'*',
                Value::Set(_) => b'~',
                _ => b'>',
            };
            out.push(tag);
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Map(pairs) => {
            out.push(b'%');
            out.extend_from_slice(pairs.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for (k, v) in pairs {
                encode_value(k, out);
                encode_value(v, out);
            }
        }
        other => unimplemented!("scripted scenarios don't reply with {other:?}"),
    }
}

pub fn write_value(stream: &mut TcpStream, value: &Value) -> std::io::Result<()> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf);
    stream.write_all(&buf)
}

/// A listener bound to an ephemeral port, handed off to a scripted handler
/// as soon as the library under test connects.
pub struct ScriptedServer {
    pub addr: std::net::SocketAddr,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ScriptedServer {
    /// Binds a listener and hands it to `handler` on a background thread.
    /// `handler` calls `accept()` itself, as many times as the scenario
    /// needs (e.g. once for a cluster bootstrap seed, again for the shard
    /// connection the router opens on demand).
    pub fn spawn<F>(handler: F) -> Self
    where
        F: FnOnce(TcpListener) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local_addr");
        let handle = std::thread::spawn(move || handler(listener));
        ScriptedServer { addr, handle: Some(handle) }
    }

    /// Convenience for the common case of a scenario that only ever sees
    /// one connection.
    pub fn spawn_one<F>(handler: F) -> Self
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        Self::spawn(move |listener| {
            if let Ok((stream, _)) = listener.accept() {
                handler(stream);
            }
        })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Blocks until the scripted handler thread returns.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reads the `CLIENT SETNAME` frame every `ClientConnection::connect` sends
/// as the last handshake step and acknowledges it with `+OK`, returning a
/// reader positioned right after it so the scenario can take over.
pub fn complete_handshake(stream: &mut TcpStream) -> BufReader<TcpStream> {
    let mut reader = BufReader::new(stream.try_clone().expect("clone handshake stream"));
    let frame = read_frame(&mut reader).expect("read CLIENT SETNAME");
    let args = frame.as_array().expect("CLIENT SETNAME is an array command");
    assert_eq!(args[0].as_bytes(), Some(&b"CLIENT"[..]));
    assert_eq!(args[1].as_bytes(), Some(&b"SETNAME"[..]));
    write_value(stream, &Value::simple_string("OK")).expect("ack CLIENT SETNAME");
    reader
}
