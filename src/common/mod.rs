//! Common types and abstractions
//!
//! - Address: textual transport addresses and their canonical forms
//! - EndPoint: a transport paired with a resolved address
//! - Error: unified error types

mod address;
mod endpoint;

pub use address::{is_dotted_quad, Address, V4Address, QUAD_PAT, V4_ADDR_PAT};
pub use endpoint::{EndPoint, TcpEndPoint, TCP};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
