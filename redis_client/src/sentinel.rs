//! Sentinel master discovery (component H): iterate sentinel peers, ask
//! `SENTINEL get-master-addr-by-name`, and promote the first peer that
//! answers to the front of the list for next time.
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::resp::{read_frame, write_command, Value};

/// One sentinel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelPeer {
    pub host: String,
    pub port: u16,
}

/// Service name plus the ordered list of sentinels that know about it.
pub struct SentinelDescriptor {
    pub service_name: String,
    peers: Mutex<Vec<SentinelPeer>>,
    pub peer_timeout_ms: u64,
}

impl SentinelDescriptor {
    pub fn new(service_name: impl Into<String>, peers: Vec<SentinelPeer>, peer_timeout_ms: u64) -> Self {
        SentinelDescriptor {
            service_name: service_name.into(),
            peers: Mutex::new(peers),
            peer_timeout_ms,
        }
    }

    pub fn peers(&self) -> Vec<SentinelPeer> {
        self.peers.lock().clone()
    }

    /// Moves `peer` to the front of the list, so subsequent discoveries try
    /// it first.
    fn promote(&self, peer: &SentinelPeer) {
        let mut peers = self.peers.lock();
        if let Some(pos) = peers.iter().position(|p| p == peer) {
            let promoted = peers.remove(pos);
            peers.insert(0, promoted);
        }
    }

    /// Tries every peer in turn with [`Self::peer_timeout_ms`], asking for
    /// the current master of [`Self::service_name`]. Returns `NoService` if
    /// none of the peers could answer.
    pub fn discover_master(&self) -> ClientResult<(String, u16)> {
        let peers = self.peers();
        let mut last_err = None;
        for peer in &peers {
            match ask_one_peer(peer, &self.service_name, self.peer_timeout_ms) {
                Ok(addr) => {
                    self.promote(peer);
                    return Ok(addr);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ClientError::new(ClientErrorKind::NoService, "no sentinel peer configured")
        }))
    }
}

fn ask_one_peer(peer: &SentinelPeer, service_name: &str, timeout_ms: u64) -> ClientResult<(String, u16)> {
    let addr = (peer.host.as_str(), peer.port)
        .to_socket_addrs()
        .map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?
        .next()
        .ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "sentinel address resolved to no candidates"))?;

    let timeout = Duration::from_millis(timeout_ms.max(1));
    let mut stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
    stream.set_read_timeout(Some(timeout)).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
    stream.set_write_timeout(Some(timeout)).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;

    write_command(
        &mut stream,
        &["SENTINEL".to_string(), "get-master-addr-by-name".to_string(), service_name.to_string()],
    )?;

    let mut reader = BufReader::new(&mut stream);
    let reply = read_frame(&mut reader)?;
    parse_master_addr(&reply)
}

fn parse_master_addr(reply: &Value) -> ClientResult<(String, u16)> {
    let items = reply.as_array().ok_or_else(|| {
        ClientError::new(ClientErrorKind::UnexpectedResp, "expected a 2-element array reply")
    })?;
    let [host, port] = items else {
        return Err(ClientError::new(ClientErrorKind::UnexpectedArraySize, "expected exactly host and port"));
    };
    let host = host
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "host element is not string-like"))?;
    let port_bytes = port
        .as_bytes()
        .ok_or_else(|| ClientError::new(ClientErrorKind::UnexpectedResp, "port element is not string-like"))?;
    let port: u16 = std::str::from_utf8(port_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "port is not a valid u16"))?;
    Ok((host, port))
}

/// Checks a `ROLE` reply's leading element, falling back to scanning an
/// `INFO replication` bulk string for a `role:master` line. Used after
/// connecting to a discovered address to confirm it is still the master
/// (§4.H: "additionally verify `ROLE` returns `master`").
pub fn reply_indicates_master(role_reply: &Value) -> bool {
    match role_reply {
        Value::Array(items) | Value::Set(items) => {
            matches!(items.first().and_then(|v| v.as_bytes()), Some(b"master"))
        }
        _ => false,
    }
}

pub fn info_indicates_master(info_reply: &Value) -> bool {
    info_reply
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).lines().any(|l| l.trim() == "role:master"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_master_addr_from_two_element_array() {
        let reply = Value::Array(vec![Value::bulk_string(&b"127.0.0.1"[..]), Value::bulk_string(&b"6380"[..])]);
        let (host, port) = parse_master_addr(&reply).unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 6380);
    }

    #[test]
    fn parse_master_addr_rejects_wrong_shape() {
        let reply = Value::Array(vec![Value::bulk_string(&b"127.0.0.1"[..])]);
        let err = parse_master_addr(&reply).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::UnexpectedArraySize);
    }

    #[test]
    fn role_reply_master_detection() {
        let master = Value::Array(vec![Value::bulk_string(&b"master"[..]), Value::Integer(0)]);
        let replica = Value::Array(vec![Value::bulk_string(&b"slave"[..])]);
        assert!(reply_indicates_master(&master));
        assert!(!reply_indicates_master(&replica));
    }

    #[test]
    fn info_reply_master_detection() {
        let info = Value::bulk_string(&b"# Replication\r\nrole:master\r\nconnected_slaves:0\r\n"[..]);
        assert!(info_indicates_master(&info));
        let info = Value::bulk_string(&b"role:slave\r\n"[..]);
        assert!(!info_indicates_master(&info));
    }

    #[test]
    fn promote_moves_responding_peer_to_front() {
        let descriptor = SentinelDescriptor::new(
            "mymaster",
            vec![
                SentinelPeer { host: "a".into(), port: 1 },
                SentinelPeer { host: "b".into(), port: 2 },
            ],
            100,
        );
        descriptor.promote(&SentinelPeer { host: "b".into(), port: 2 });
        assert_eq!(descriptor.peers()[0], SentinelPeer { host: "b".into(), port: 2 });
    }
}
