//! TCP connection
//!
//! The stream is split into halves so a read and a write can be in flight at
//! the same time. Each half sits behind its own async mutex; `close` takes
//! both after waking every waiter, so an outstanding read or write returns
//! `ConnectionClosed` instead of hanging.

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify, OnceCell};
use tracing::{debug, trace};

use crate::common::{Error, Result, TcpEndPoint};
use crate::crypto::{KeyExchange, Negotiator, Secret};
use crate::metrics::{ActiveConnection, BYTES_READ_TOTAL, BYTES_WRITTEN_TOTAL};

use super::state::{ConnectionState, Lifecycle};
use super::Connection;

/// Outcome of the one-time stream release
type Release = Option<(io::ErrorKind, String)>;

/// A TCP connection
pub struct TcpConnection {
    lifecycle: Lifecycle<TcpEndPoint>,
    reader: AsyncMutex<Option<OwnedReadHalf>>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Woken by `close`
    shutdown: Notify,
    released: OnceCell<Release>,
    negotiator: Arc<dyn Negotiator>,
    secret: Mutex<Option<Secret>>,
    active: Mutex<Option<ActiveConnection>>,
}

impl TcpConnection {
    /// Wrap an open stream. The result is CONNECTED, with the near end taken
    /// from the local socket address and the far end from the peer address.
    pub fn from_stream(stream: TcpStream, negotiator: Arc<dyn Negotiator>) -> Result<Self> {
        let near = TcpEndPoint::from(stream.local_addr()?);
        let far = TcpEndPoint::from(stream.peer_addr()?);
        let (reader, writer) = stream.into_split();

        let cnx = Self {
            lifecycle: Lifecycle::new(),
            reader: AsyncMutex::new(Some(reader)),
            writer: AsyncMutex::new(Some(writer)),
            shutdown: Notify::new(),
            released: OnceCell::new(),
            negotiator,
            secret: Mutex::new(None),
            active: Mutex::new(Some(ActiveConnection::open())),
        };
        cnx.bind_near_end(near)?;
        cnx.bind_far_end(far)?;

        trace!("[{}] Connection established to {}", near.addr_string(), far.addr_string());
        Ok(cnx)
    }

    /// Read until `buf` is full
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed before buffer was filled",
                )));
            }
            filled += n;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.lifecycle.state() {
            ConnectionState::Disconnected => Err(Error::ConnectionClosed),
            s if s < ConnectionState::Connected => Err(Error::NotBound),
            _ => Ok(()),
        }
    }

    fn has_stream(&self) -> bool {
        !self.released.initialized()
    }

    async fn release(&self) -> Release {
        self.lifecycle.disconnect();
        self.shutdown.notify_waiters();
        self.secret.lock().take();

        let reader = self.reader.lock().await.take();
        drop(reader);

        let result = match self.writer.lock().await.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        };
        self.active.lock().take();

        let outcome = settle(result);
        match &outcome {
            None => debug!("[{}] Connection closed", self.label()),
            Some((_, msg)) => debug!("[{}] Connection closed with error: {}", self.label(), msg),
        }
        outcome
    }

    fn label(&self) -> String {
        self.lifecycle
            .near_end()
            .map(|e| e.addr_string())
            .unwrap_or_else(|| "unbound".to_string())
    }
}

#[async_trait]
impl Connection for TcpConnection {
    type EndPoint = TcpEndPoint;

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    fn bind_near_end(&self, end: TcpEndPoint) -> Result<()> {
        self.lifecycle.bind_near_end(end)
    }

    fn bind_far_end(&self, end: TcpEndPoint) -> Result<()> {
        self.lifecycle.bind_far_end(end, self.has_stream())
    }

    fn near_end(&self) -> Option<&TcpEndPoint> {
        self.lifecycle.near_end()
    }

    fn far_end(&self) -> Option<&TcpEndPoint> {
        self.lifecycle.far_end()
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn is_encrypted(&self) -> bool {
        self.secret.lock().is_some()
    }

    /// A failed attempt invalidates any earlier secret.
    fn negotiate(&self, local_key: &dyn KeyExchange, peer_public_key: &[u8]) -> Result<Secret> {
        if self.lifecycle.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match self.negotiator.negotiate(local_key, peer_public_key) {
            Ok(secret) => {
                *self.secret.lock() = Some(secret.clone());
                debug!("[{}] Secret negotiated", self.label());
                Ok(secret)
            }
            Err(e) => {
                self.secret.lock().take();
                debug!("[{}] Negotiation failed: {}", self.label(), e);
                Err(match e {
                    Error::NegotiationFailed(_) => e,
                    other => Error::NegotiationFailed(other.to_string()),
                })
            }
        }
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        self.ensure_open()?;

        let mut guard = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = &mut shutdown => return Err(Error::ConnectionClosed),
        };
        let reader = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let n = tokio::select! {
            result = reader.read(buf) => result?,
            _ = &mut shutdown => return Err(Error::ConnectionClosed),
        };
        BYTES_READ_TOTAL.inc_by(n as u64);
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        self.ensure_open()?;

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = &mut shutdown => return Err(Error::ConnectionClosed),
        };
        let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        tokio::select! {
            result = writer.write_all(buf) => result?,
            _ = &mut shutdown => return Err(Error::ConnectionClosed),
        }
        BYTES_WRITTEN_TOTAL.inc_by(buf.len() as u64);
        Ok(buf.len())
    }

    /// Only the first call releases the stream; later calls report the
    /// same outcome.
    async fn close(&self) -> Result<()> {
        report(self.released.get_or_init(|| self.release()).await)
    }
}

/// Turn the write-half shutdown result into a cacheable outcome
fn settle(result: io::Result<()>) -> Release {
    match result {
        Ok(()) => None,
        // peer already gone; nothing left to flush
        Err(e) if e.kind() == io::ErrorKind::NotConnected => None,
        Err(e) => Some((e.kind(), e.to_string())),
    }
}

fn report(outcome: &Release) -> Result<()> {
    match outcome {
        None => Ok(()),
        Some((kind, msg)) => Err(Error::Io(io::Error::new(*kind, msg.clone()))),
    }
}

impl PartialEq for TcpConnection {
    fn eq(&self, other: &Self) -> bool {
        self.near_end() == other.near_end() && self.far_end() == other.far_end()
    }
}

impl fmt::Display for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = |e: Option<&TcpEndPoint>| {
            e.map(|e| e.addr_string())
                .unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "TcpConnection: {} -> {} ({})",
            end(self.near_end()),
            end(self.far_end()),
            self.state()
        )
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
