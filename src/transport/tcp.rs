//! TCP Transport implementation

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::common::{Error, Result, TcpEndPoint};
use crate::config::{AcceptorConfig, Config, ConnectorConfig};
use crate::crypto::{Negotiator, X25519Negotiator};
use crate::metrics::{CONNECTIONS_ACCEPTED_TOTAL, CONNECTIONS_DIALED_TOTAL, DIAL_FAILURES_TOTAL};

use super::connection::TcpConnection;
use super::{Acceptor, Connector};

// ============================================================================
// TcpAcceptor
// ============================================================================

/// Listens on a TCP end point and produces inbound connections
pub struct TcpAcceptor {
    end_point: TcpEndPoint,
    /// Taken on close; in-flight accepts hold their own reference
    listener: Mutex<Option<Arc<TcpListener>>>,
    closed: AtomicBool,
    shutdown: Notify,
    nodelay: bool,
    negotiator: Arc<dyn Negotiator>,
}

impl TcpAcceptor {
    /// Listen on `addr`; port 0 asks the OS for an ephemeral port
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, &AcceptorConfig::default()).await
    }

    pub async fn bind_with_config(addr: &str, config: &AcceptorConfig) -> Result<Self> {
        let requested = TcpEndPoint::resolve_async(addr).await?;
        let listener = TcpListener::bind(requested.listen_addr()).await?;
        let end_point = TcpEndPoint::from(listener.local_addr()?);

        info!("[{}] Listening", end_point.addr_string());

        Ok(Self {
            end_point,
            listener: Mutex::new(Some(Arc::new(listener))),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            nodelay: config.nodelay,
            negotiator: Arc::new(X25519Negotiator::new()),
        })
    }

    /// Listen on the configured address
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::bind_with_config(&config.listen, &config.acceptor).await
    }

    /// Negotiator handed to every accepted connection
    pub fn with_negotiator(mut self, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn end_point(&self) -> &TcpEndPoint {
        &self.end_point
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Connection = TcpConnection;

    async fn accept(&self) -> Result<TcpConnection> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        let listener = self.listener.lock().clone().ok_or(Error::ListenerClosed)?;

        let (stream, peer) = tokio::select! {
            result = listener.accept() => result?,
            _ = &mut shutdown => return Err(Error::ListenerClosed),
        };

        // Disable Nagle's algorithm for lower latency
        stream.set_nodelay(self.nodelay)?;

        let cnx = TcpConnection::from_stream(stream, Arc::clone(&self.negotiator))?;
        CONNECTIONS_ACCEPTED_TOTAL.inc();
        debug!("[{}] Accepted connection from {}", self.end_point.addr_string(), peer);
        Ok(cnx)
    }

    async fn close(&self) -> Result<()> {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            self.closed.store(true, Ordering::SeqCst);
            self.shutdown.notify_waiters();
            drop(listener);
            info!("[{}] Acceptor closed", self.end_point.addr_string());
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn end_point(&self) -> &TcpEndPoint {
        &self.end_point
    }
}

impl fmt::Display for TcpAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpAcceptor: {}", self.end_point)
    }
}

// ============================================================================
// TcpConnector
// ============================================================================

/// Opens outbound TCP connections
pub struct TcpConnector {
    default_target: Option<TcpEndPoint>,
    connect_timeout: Duration,
    nodelay: bool,
    negotiator: Arc<dyn Negotiator>,
}

impl TcpConnector {
    pub fn new(default_target: Option<TcpEndPoint>) -> Result<Self> {
        Self::with_config(default_target, &ConnectorConfig::default())
    }

    pub fn with_config(default_target: Option<TcpEndPoint>, config: &ConnectorConfig) -> Result<Self> {
        if config.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be positive".into()));
        }
        Ok(Self {
            default_target,
            connect_timeout: config.connect_timeout(),
            nodelay: config.nodelay,
            negotiator: Arc::new(X25519Negotiator::new()),
        })
    }

    /// Connector aimed at the configured target, if any
    pub async fn from_config(config: &Config) -> Result<Self> {
        let target = match config.target.as_deref() {
            Some(text) => Some(TcpEndPoint::resolve_async(text).await?),
            None => None,
        };
        Self::with_config(target, &config.connector)
    }

    /// Negotiator handed to every dialed connection
    pub fn with_negotiator(mut self, negotiator: Arc<dyn Negotiator>) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn default_target(&self) -> Option<&TcpEndPoint> {
        self.default_target.as_ref()
    }

    /// Dial the default target
    pub async fn connect_default(&self) -> Result<TcpConnection> {
        let target = self
            .default_target
            .ok_or_else(|| Error::Config("Connector has no default target".into()))?;
        self.connect(&target).await
    }

    async fn open_stream(&self, target: &TcpEndPoint) -> Result<TcpStream> {
        let dial = TcpStream::connect(target.connect_addr());
        dial_within(self.connect_timeout, target, dial).await
    }
}

/// Bound a dial by `deadline` and classify its failure
async fn dial_within<F>(deadline: Duration, target: &TcpEndPoint, dial: F) -> Result<TcpStream>
where
    F: Future<Output = io::Result<TcpStream>>,
{
    match tokio::time::timeout(deadline, dial).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::from_connect(e, &target.addr_string())),
        Err(_) => Err(Error::Timeout),
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, target: &TcpEndPoint) -> Result<TcpConnection> {
        debug!("[{}] Connecting", target.addr_string());

        let stream = match self.open_stream(target).await {
            Ok(stream) => stream,
            Err(e) => {
                DIAL_FAILURES_TOTAL.inc();
                warn!("[{}] Connect failed: {}", target.addr_string(), e);
                return Err(e);
            }
        };
        stream.set_nodelay(self.nodelay)?;

        let cnx = TcpConnection::from_stream(stream, Arc::clone(&self.negotiator))?;
        CONNECTIONS_DIALED_TOTAL.inc();
        Ok(cnx)
    }
}
