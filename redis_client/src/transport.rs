//! Concrete socket transports behind the connection's read/write handles:
//! plain TCP and TLS (via OpenSSL bindings), each able to report a cork
//! hint and, on TCP, hand back the raw descriptor for `get_available`.
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use openssl::ssl::SslStream;
use socket2::SockRef;

use crate::resp::CorkHint;

/// Bytes the kernel already has queued on `fd`, ready to be read without
/// blocking (`ioctl(fd, FIONREAD, &mut n)`), used by `get_available` (§4.D,
/// §6). Distinct from whatever a `BufReader` has already pulled into its own
/// buffer on top of this.
pub fn fionread(fd: RawFd) -> io::Result<usize> {
    let mut n: libc::c_int = 0;
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Object-safe union of everything a connection half needs from its
/// underlying socket.
pub trait Transport: Read + Write + CorkHint + Send {
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    /// Hands back an independent handle onto the same underlying
    /// connection, used to give the read side and write side their own
    /// lock-protected handle (§4.C's read lock / write lock split). For
    /// plain TCP this duplicates the file descriptor; for TLS it clones
    /// the shared, mutex-guarded session so both sides serialize through
    /// it, matching TLS's no-concurrent-direction-use requirement.
    fn try_clone_for_read(&self) -> io::Result<Box<dyn Transport>>;
}

impl CorkHint for Box<dyn Transport> {
    fn set_cork(&mut self, corked: bool) -> io::Result<()> {
        self.as_mut().set_cork(corked)
    }
}

impl Transport for Box<dyn Transport> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.as_ref().raw_fd()
    }

    fn try_clone_for_read(&self) -> io::Result<Box<dyn Transport>> {
        self.as_ref().try_clone_for_read()
    }
}

impl CorkHint for TcpStream {
    fn set_cork(&mut self, corked: bool) -> io::Result<()> {
        // TCP_CORK/MSG_MORE are a latency hint, not a correctness
        // requirement; best-effort only, and a no-op on platforms socket2
        // doesn't support it on.
        #[cfg(target_os = "linux")]
        {
            let sock = SockRef::from(&*self);
            let _ = sock.set_tcp_cork(corked);
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = corked;
        }
        Ok(())
    }
}

impl Transport for TcpStream {
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }

    fn try_clone_for_read(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// A TLS session shared between the connection's read half and write half.
/// OpenSSL forbids calling `SSL_read` and `SSL_write` from different
/// threads at the same time, so both halves serialize through this single
/// mutex — the write lock effectively held across reads, per §4.C.
#[derive(Clone)]
pub struct TlsHandle(pub Arc<Mutex<SslStream<TcpStream>>>);

impl Read for TlsHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap().read(buf)
    }
}

impl Write for TlsHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl CorkHint for TlsHandle {
    fn set_cork(&mut self, _corked: bool) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TlsHandle {
    fn try_clone_for_read(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}
