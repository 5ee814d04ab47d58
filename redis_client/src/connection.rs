//! The per-socket client connection (component C): role tag, state
//! machine, three locks, socket tuning, handshake and the transmit-error
//! callback contract.
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::SockRef;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientErrorKind, ClientResult};
use crate::resp::{read_frame, write_command, Value};
use crate::tls;
use crate::transport::{self, Transport};

/// Which of a server instance's three sockets this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Interactive,
    Pipeline,
    Subscription,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Interactive => "interactive",
            Role::Pipeline => "pipeline",
            Role::Subscription => "subscription",
        }
    }

    /// Roles that benefit from immediate small-packet delivery.
    fn wants_nodelay(&self) -> bool {
        matches!(self, Role::Interactive | Role::Subscription)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Reset,
    Connecting,
    Enabled,
    Disabled,
}

type TransmitErrorHook = Arc<dyn Fn(&str, Role, &str) + Send + Sync>;
type PushConsumer = Arc<dyn Fn(&Value) + Send + Sync>;
type MovedHook = Arc<dyn Fn() + Send + Sync>;

/// One framed byte stream to a Redis/Valkey endpoint, with its own
/// read/write/pending-count locks.
pub struct ClientConnection {
    role: Role,
    server_label: String,
    state: Mutex<ConnState>,
    enabled: AtomicBool,
    writer: Mutex<Option<Box<dyn Transport>>>,
    reader: Mutex<Option<BufReader<Box<dyn Transport>>>>,
    pending: AtomicI64,
    last_attribute: Mutex<Option<Value>>,
    on_transmit_error: Mutex<Option<TransmitErrorHook>>,
    push_consumer: Mutex<Option<PushConsumer>>,
    /// Set when this connection belongs to a cluster shard server; invoked
    /// when a `MOVED` reply is observed so the cluster can schedule a
    /// background reconfiguration per §4.B step 5. The error is still
    /// returned to the caller unchanged.
    on_moved: Mutex<Option<MovedHook>>,
    /// Serializes multi-step sequences (transaction blocks) so another
    /// thread's `request` cannot interleave commands between a block's
    /// `MULTI` and `EXEC`.
    block: Mutex<()>,
}

impl ClientConnection {
    pub fn new(role: Role, server_label: impl Into<String>) -> Self {
        ClientConnection {
            role,
            server_label: server_label.into(),
            state: Mutex::new(ConnState::Reset),
            enabled: AtomicBool::new(false),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            pending: AtomicI64::new(0),
            last_attribute: Mutex::new(None),
            on_transmit_error: Mutex::new(None),
            push_consumer: Mutex::new(None),
            on_moved: Mutex::new(None),
            block: Mutex::new(()),
        }
    }

    pub fn set_moved_hook(&self, hook: MovedHook) {
        *self.on_moved.lock() = Some(hook);
    }

    /// Acquires the block lock, held for the lifetime of the guard. Used to
    /// bracket a `MULTI`..`EXEC` sequence so unrelated requests on this
    /// connection cannot interleave with the queued commands.
    pub fn exclusive(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.block.lock()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_transmit_error_hook(&self, hook: TransmitErrorHook) {
        *self.on_transmit_error.lock() = Some(hook);
    }

    pub fn set_push_consumer(&self, consumer: PushConsumer) {
        *self.push_consumer.lock() = Some(consumer);
    }

    pub fn pending_count(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Opens the socket, applies tuning, optionally negotiates TLS, then
    /// runs the handshake. Fails the whole operation (state returns to
    /// `Reset`) if any step fails.
    pub fn connect(&self, host: &str, port: u16, cfg: &ClientConfig) -> ClientResult<()> {
        if *self.state.lock() != ConnState::Reset {
            return Err(ClientError::new(ClientErrorKind::AlreadyOpen, "connection already open"));
        }
        *self.state.lock() = ConnState::Connecting;

        match self.do_connect(host, port, cfg) {
            Ok(()) => {
                *self.state.lock() = ConnState::Enabled;
                self.enabled.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = ConnState::Reset;
                Err(e)
            }
        }
    }

    fn do_connect(&self, host: &str, port: u16, cfg: &ClientConfig) -> ClientResult<()> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?
            .next()
            .ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "address resolved to no candidates"))?;

        let tcp = TcpStream::connect(addr).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
        self.tune_socket(&tcp, cfg)?;

        let transport: Box<dyn Transport> = if cfg.tls.enabled {
            Box::new(tls::connect(tcp, host, &cfg.tls)?)
        } else {
            Box::new(tcp)
        };

        let raw_fd = transport.raw_fd();
        let mut write_half = transport;
        let mut read_half = write_half.try_clone_for_read()?;

        self.handshake(&mut write_half, &mut read_half, cfg)?;

        *self.writer.lock() = Some(write_half);
        *self.reader.lock() = Some(BufReader::new(read_half));
        let _ = raw_fd;
        Ok(())
    }

    fn tune_socket(&self, tcp: &TcpStream, cfg: &ClientConfig) -> ClientResult<()> {
        let timeout = Duration::from_millis(cfg.socket_timeout_ms.max(1));
        tcp.set_read_timeout(Some(timeout)).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
        tcp.set_write_timeout(Some(timeout)).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;

        let sock = SockRef::from(tcp);
        sock.set_linger(None).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
        sock.set_keepalive(true).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
        if self.role.wants_nodelay() {
            tcp.set_nodelay(true).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?;
        }
        if let Some(size) = cfg.tcp_buffer_size {
            let _ = sock.set_send_buffer_size(size);
            let _ = sock.set_recv_buffer_size(size);
        }
        if let Some(configurator) = &cfg.socket_configurator {
            configurator(tcp);
        }
        Ok(())
    }

    /// RESP handshake: `HELLO`/`AUTH`, `SELECT`, `CLIENT SETNAME`.
    fn handshake(
        &self,
        writer: &mut Box<dyn Transport>,
        reader: &mut Box<dyn Transport>,
        cfg: &ClientConfig,
    ) -> ClientResult<()> {
        let mut reader = BufReader::new(reader);

        if cfg.protocol_version == 3 || cfg.hello {
            let mut args = vec!["HELLO".to_string(), "3".to_string()];
            if let Some(password) = &cfg.password {
                args.push("AUTH".to_string());
                args.push(cfg.username.clone().unwrap_or_else(|| "default".to_string()));
                args.push(password.clone());
            }
            write_command(writer, &args)?;
            expect_ok_like(&read_frame(&mut reader)?)?;
        } else if let Some(password) = &cfg.password {
            let args = match &cfg.username {
                Some(user) => vec!["AUTH".to_string(), user.clone(), password.clone()],
                None => vec!["AUTH".to_string(), password.clone()],
            };
            write_command(writer, &args)?;
            expect_ok_like(&read_frame(&mut reader)?)?;
        }

        if cfg.db != 0 {
            write_command(writer, &["SELECT".to_string(), cfg.db.to_string()])?;
            expect_ok_like(&read_frame(&mut reader)?)?;
        }

        let name = format!(
            "{}:pid-{}:{}",
            local_host_label(),
            std::process::id(),
            self.role.as_str()
        );
        write_command(writer, &["CLIENT".to_string(), "SETNAME".to_string(), name])?;
        expect_ok_like(&read_frame(&mut reader)?)?;

        Ok(())
    }

    pub fn disconnect(&self) {
        *self.writer.lock() = None;
        *self.reader.lock() = None;
        self.enabled.store(false, Ordering::Release);
        *self.state.lock() = ConnState::Reset;
        self.pending.store(0, Ordering::Release);
    }

    /// `lock_if_enabled`: fails fast with `NoService` if the client has
    /// already been disabled.
    fn fail_fast_if_disabled(&self, operation: &str) -> ClientResult<()> {
        if !self.is_enabled() {
            return Err(ClientError::new(
                ClientErrorKind::NoService,
                format!("{operation}: client is disabled"),
            ));
        }
        Ok(())
    }

    /// Sends one command under the write lock. The caller holds no other
    /// connection lock while this runs.
    pub fn send(&self, args: &[impl AsRef<[u8]>]) -> ClientResult<()> {
        self.fail_fast_if_disabled("send")?;
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "not connected"))?;
        match write_command(writer, args) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.on_transmit_failure("send", e)
            }
        }
    }

    /// Reads one application-level reply, transparently handling RESP3
    /// push frames (dispatched to the push consumer) and attribute frames
    /// (cached) per §4.B step 5.
    pub fn read_reply(&self) -> ClientResult<Value> {
        self.fail_fast_if_disabled("read_reply")?;
        let mut guard = self.reader.lock();
        let reader = guard.as_mut().ok_or_else(|| ClientError::new(ClientErrorKind::NoService, "not connected"))?;

        loop {
            match read_frame(reader) {
                Ok(Value::Push(items)) => {
                    let frame = Value::Push(items);
                    if let Some(consumer) = self.push_consumer.lock().clone() {
                        consumer(&frame);
                    }
                    continue;
                }
                Ok(Value::Attribute(pairs)) => {
                    *self.last_attribute.lock() = Some(Value::Attribute(pairs));
                    continue;
                }
                Ok(value) => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    if value.is_error() {
                        if let Some((b"MOVED", _)) = value.split_text() {
                            if let Some(hook) = self.on_moved.lock().clone() {
                                hook();
                            }
                        }
                    }
                    return Ok(value);
                }
                Err(e) => {
                    drop(guard);
                    return self.on_transmit_failure("read_reply", e);
                }
            }
        }
    }

    /// Reads the last RESP3 attribute frame the parser stashed, without
    /// clearing it.
    pub fn attribute(&self) -> Option<Value> {
        self.last_attribute.lock().clone()
    }

    pub fn take_attribute(&self) -> Option<Value> {
        self.last_attribute.lock().take()
    }

    pub fn clear_attribute(&self) {
        *self.last_attribute.lock() = None;
    }

    /// A timed-out read/write leaves the client usable (§8 S7): only other
    /// transmit failures disable it, after giving the hook a chance to
    /// re-enable it first.
    fn on_transmit_failure<T>(&self, operation: &str, err: ClientError) -> ClientResult<T> {
        let hook = self.on_transmit_error.lock().clone();
        if let Some(hook) = hook {
            hook(&self.server_label, self.role, operation);
        }
        if err.kind() != ClientErrorKind::TimedOut && self.is_enabled() {
            self.disconnect();
        }
        Err(err)
    }

    /// Bytes available to read without blocking: whatever the `BufReader`
    /// already pulled in, plus whatever the kernel has queued on the socket
    /// but the reader hasn't consumed yet (`ioctl FIONREAD`), used by
    /// `get_available` (§4.D, §6).
    pub fn available(&self) -> ClientResult<usize> {
        let guard = self.reader.lock();
        let reader = match guard.as_ref() {
            Some(reader) => reader,
            None => return Ok(0),
        };
        let buffered = reader.buffer().len();
        let queued = match reader.get_ref().raw_fd() {
            Some(fd) => transport::fionread(fd).map_err(|e| ClientError::from_io(ClientErrorKind::NoService, e))?,
            None => 0,
        };
        Ok(buffered + queued)
    }
}

fn expect_ok_like(value: &Value) -> ClientResult<()> {
    if value.is_error() {
        let message = value.as_bytes().map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default();
        return Err(ClientError::new(ClientErrorKind::RedisError, message));
    }
    Ok(())
}

fn local_host_label() -> String {
    hostname_first_label()
}

#[cfg(unix)]
fn hostname_first_label() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|out| String::from_utf8(out.stdout).ok())
        })
        .unwrap_or_else(|| "localhost".to_string())
        .split('.')
        .next()
        .unwrap_or("localhost")
        .trim()
        .to_string()
}

#[cfg(not(unix))]
fn hostname_first_label() -> String {
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_starts_disabled() {
        let conn = ClientConnection::new(Role::Interactive, "test");
        assert!(!conn.is_enabled());
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn send_on_unconnected_client_fails_fast() {
        let conn = ClientConnection::new(Role::Interactive, "test");
        let err = conn.send(&["PING"]).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::NoService);
    }

    #[test]
    fn read_on_unconnected_client_fails_fast() {
        let conn = ClientConnection::new(Role::Pipeline, "test");
        let err = conn.read_reply().unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::NoService);
    }
}
