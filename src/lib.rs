//! Strandline - a minimal stream-socket transport
//!
//! # Architecture
//!
//! ```text
//! Address / EndPoint      (what to talk to)
//! → Acceptor / Connector  (how a connection comes to exist)
//! → Connection            (bytes between a near and a far end)
//! ```
//!
//! ## Core Principles
//!
//! - Connection state only moves forward: UNBOUND → BOUND → PENDING →
//!   CONNECTED → DISCONNECTED
//! - End points are written once and read without locking
//! - Key negotiation is injected, never built into the transport
//! - NO framing, NO application protocol
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Address, EndPoint
//! ├── transport/       # Connection lifecycle, TCP acceptor/connector
//! ├── crypto/          # Key exchange and negotiators
//! ├── config.rs        # JSON configuration
//! └── metrics.rs       # Prometheus counters
//! ```

// Core types
pub mod common;
pub mod error;

pub mod transport;

// Supporting modules
pub mod config;
pub mod crypto;
pub mod metrics;

// Re-exports for convenience
pub use common::{Address, EndPoint, TcpEndPoint, V4Address};
pub use config::Config;
pub use error::{Error, Result};

pub use crypto::{KeyExchange, Negotiator, Secret, X25519KeyPair, X25519Negotiator};
pub use transport::{
    Acceptor, Connection, ConnectionState, Connector, TcpAcceptor, TcpConnection, TcpConnector,
};
