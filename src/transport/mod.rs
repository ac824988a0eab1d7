//! Transport Layer
//!
//! Responsibilities:
//! - Accept inbound connection requests (Acceptor)
//! - Originate outbound connections (Connector)
//! - Carry raw bytes between two end points (Connection)
//!
//! Every transport implements these three traits; TCP is the one provided
//! here. NO message framing, NO application protocol.

mod connection;
mod state;
mod tcp;

pub use connection::TcpConnection;
pub use state::{ConnectionState, Lifecycle, StateCell};
pub use tcp::{TcpAcceptor, TcpConnector};

use async_trait::async_trait;

use crate::common::{EndPoint, Result};
use crate::crypto::{KeyExchange, Secret};

/// A byte stream between a near and a far end point
///
/// State only moves forward (see [`ConnectionState`]); compare states with
/// `>=` rather than `==` because another task may already have advanced it.
#[async_trait]
pub trait Connection: Send + Sync {
    type EndPoint: EndPoint;

    /// Current state; the true state is never earlier than this
    fn state(&self) -> ConnectionState;

    /// Set the near end point. UNBOUND → BOUND.
    fn bind_near_end(&self, end: Self::EndPoint) -> Result<()>;

    /// Set the far end point. BOUND → PENDING or CONNECTED.
    fn bind_far_end(&self, end: Self::EndPoint) -> Result<()>;

    fn near_end(&self) -> Option<&Self::EndPoint>;

    fn far_end(&self) -> Option<&Self::EndPoint>;

    /// Whether read and write wait for the peer
    fn is_blocking(&self) -> bool;

    /// True once a secret has been negotiated and not invalidated
    fn is_encrypted(&self) -> bool;

    /// (Re)negotiate the secret used for traffic on this connection
    fn negotiate(&self, local_key: &dyn KeyExchange, peer_public_key: &[u8]) -> Result<Secret>;

    /// Read into `buf`; zero means the peer closed its side
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Move to DISCONNECTED and release the stream
    async fn close(&self) -> Result<()>;
}

/// A listening end point producing inbound connections
#[async_trait]
pub trait Acceptor: Send + Sync {
    type Connection: Connection;

    /// Wait for the next inbound connection
    ///
    /// Fails with `ListenerClosed` once the acceptor is closed; accept loops
    /// should stop on that error.
    async fn accept(&self) -> Result<Self::Connection>;

    /// Release the listener; idempotent
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// The concrete bound end point
    fn end_point(&self) -> &<Self::Connection as Connection>::EndPoint;
}

/// Originates outbound connections
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Open a stream to `target`
    async fn connect(
        &self,
        target: &<Self::Connection as Connection>::EndPoint,
    ) -> Result<Self::Connection>;
}
