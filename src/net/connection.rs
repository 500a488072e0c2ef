use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::RelayError;
use crate::general::cancel::CancelToken;

const READ_CHUNK: usize = 4096;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Ordered, reliable byte stream to exactly one peer.
pub trait Connection {
    /// Write all of `bytes`, or fail with `RelayError::Send`.
    fn send(&mut self, bytes: &[u8]) -> Result<(), RelayError>;

    /// Whatever arrived within the bounded wait, `None` if nothing did.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, RelayError>;

    /// Shut the stream down. Calling it twice is harmless.
    fn close(&mut self);
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Bounded waits applied to every peer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimeouts {
    /// Longest a receive poll waits for data
    pub recv_wait: Duration,
    /// Longest a single write may block on a peer that stopped reading
    pub send_wait: Duration,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            recv_wait: Duration::from_millis(1),
            send_wait: Duration::from_secs(1),
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

#[derive(Debug)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: String,
    read_buf: Box<[u8; READ_CHUNK]>,
}

impl TcpConnection {
    /// Wrap an established stream. Reads and writes block at most as long as `timeouts` allow.
    pub fn from_stream(stream: TcpStream, timeouts: StreamTimeouts) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        // A zero timeout is rejected by the OS layer
        let floor = Duration::from_millis(1);
        stream.set_read_timeout(Some(timeouts.recv_wait.max(floor)))?;
        stream.set_write_timeout(Some(timeouts.send_wait.max(floor)))?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown peer>".to_string());
        Ok(Self {
            stream: Some(stream),
            peer,
            read_buf: Box::new([0u8; READ_CHUNK]),
        })
    }

    /// Resolve `host` and try every candidate address in resolution order.
    pub fn connect(host: &str, port: u16, timeout: Duration, timeouts: StreamTimeouts) -> Result<Self, RelayError> {
        let target = format!("{}:{}", host, port);
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| RelayError::Connect {
                target: target.clone(),
                reason: format!("address resolution failed: {}", e),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(RelayError::Connect {
                target,
                reason: "host resolved to no addresses".to_string(),
            });
        }

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(stream) => {
                    log::info!("Connected to {} ({})", target, addr);
                    return Self::from_stream(stream, timeouts).map_err(|e| RelayError::Connect {
                        target: target.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(err) => {
                    log::debug!("Connecting to {} failed: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }

        Err(RelayError::Connect {
            reason: match last_err {
                Some(err) => format!("no reachable address out of {} ({})", addrs.len(), err),
                None => "no reachable address".to_string(),
            },
            target,
        })
    }

    /// Wait for a single peer on `bind_host:port`. Returns `None` if
    /// cancelled before anyone connected.
    pub fn accept_one(
        bind_host: &str,
        port: u16,
        timeouts: StreamTimeouts,
        cancel: &CancelToken,
    ) -> Result<Option<Self>, RelayError> {
        let target = format!("{}:{}", bind_host, port);
        let to_connect_err = |e: io::Error| RelayError::Connect {
            target: target.clone(),
            reason: e.to_string(),
        };
        let listener = TcpListener::bind((bind_host, port)).map_err(to_connect_err)?;
        listener.set_nonblocking(true).map_err(to_connect_err)?;
        match listener.local_addr() {
            Ok(addr) => log::info!("Waiting for a peer on {}", addr),
            Err(_) => log::info!("Waiting for a peer on {}", target),
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("Peer connected from {}", addr);
                    stream.set_nonblocking(false).map_err(to_connect_err)?;
                    return Self::from_stream(stream, timeouts).map(Some).map_err(to_connect_err);
                }
                Err(ref e) if is_transient(e) => {
                    cancel.sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(to_connect_err(e)),
            }
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Connection for TcpConnection {
    /// A write that stalls past the send wait is retried once from the first
    /// unwritten byte; a second stall fails with `Send`.
    fn send(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        let stream = self.stream.as_mut().ok_or_else(|| RelayError::Send(not_connected()))?;
        let mut written = 0;
        let mut retried = false;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(RelayError::Send(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting data",
                    )))
                }
                Ok(n) => written += n,
                Err(ref e) if is_transient(e) && !retried => {
                    log::warn!("Send to {} stalled ({}), retrying once", self.peer, e);
                    retried = true;
                }
                Err(e) => return Err(RelayError::Send(e)),
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        let stream = self.stream.as_mut().ok_or_else(|| RelayError::Recv(not_connected()))?;
        match stream.read(&mut self.read_buf[..]) {
            Ok(0) => Err(RelayError::Recv(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ))),
            Ok(n) => Ok(Some(self.read_buf[..n].to_vec())),
            Err(ref e) if is_transient(e) => Ok(None),
            Err(e) => Err(RelayError::Recv(e)),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::info!("Connection to {} closed", self.peer);
        }
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
