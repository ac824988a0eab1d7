//! Address types for transport end points
//!
//! An [`Address`] carries enough information to identify one side of a
//! connection. What that information is depends on the transport;
//! [`V4Address`] is the dotted-quad form used by TCP over IPv4.

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

/// A single octet, 0..=255
pub const QUAD_PAT: &str = r"(?:[0-9]|[0-9][0-9]|(?:[01][0-9][0-9]|2(?:[0-4][0-9]|5[0-5])))";

lazy_static! {
    /// Anchored `A.B.C.D` pattern
    pub static ref V4_ADDR_PAT: String = format!(
        r"^{q}\.{q}\.{q}\.{q}$",
        q = QUAD_PAT
    );

    static ref V4_ADDR_RE: Regex = Regex::new(&V4_ADDR_PAT).expect("dotted quad pattern compiles");
}

/// Prefix accepted as "all interfaces"
const ANY_INTERFACE_PREFIX: &str = "[::]:";

/// Capabilities every transport address provides
pub trait Address: fmt::Display + fmt::Debug + Send + Sync {
    /// Fresh, independent copy built from this address's string form
    fn clone_address(&self) -> Result<Box<dyn Address>>;

    /// Compare against another address of any transport
    fn same_as(&self, other: &dyn Address) -> bool;

    /// For downcasting to the concrete address type
    fn as_any(&self) -> &dyn Any;
}

/// An IPv4 address with an optional port
///
/// The port keeps the digits as written, so `1.2.3.4:080` and `1.2.3.4:80`
/// are different addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct V4Address {
    host: String,
    port: Option<String>,
}

/// Check whether `text` is a dotted quad (no port)
pub fn is_dotted_quad(text: &str) -> bool {
    V4_ADDR_RE.is_match(text)
}

/// Validate port digits against the u16 range, keeping the text
fn parse_port<'a>(text: &'a str, whole: &str) -> Result<&'a str> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidAddress(whole.to_string()));
    }
    text.parse::<u16>()
        .map_err(|_| Error::InvalidAddress(whole.to_string()))?;
    Ok(text)
}

impl V4Address {
    /// Parse `A.B.C.D`, `A.B.C.D:P`, `:P` (loopback) or `[::]:P` (all interfaces)
    pub fn parse(text: &str) -> Result<Self> {
        let val = text.trim();
        if val.is_empty() {
            return Err(Error::EmptyAddress);
        }

        if let Some(port) = val.strip_prefix(':') {
            let port = parse_port(port, val)?;
            return Ok(Self::new("127.0.0.1", Some(port)));
        }

        if let Some(port) = val.strip_prefix(ANY_INTERFACE_PREFIX) {
            let port = parse_port(port, val)?;
            return Ok(Self::new("0.0.0.0", Some(port)));
        }

        let parts: Vec<&str> = val.split(':').collect();
        match parts.as_slice() {
            [host] => {
                if !is_dotted_quad(host) {
                    return Err(Error::InvalidAddress(val.to_string()));
                }
                Ok(Self::new(*host, None))
            }
            [host, port] => {
                let port = parse_port(port, val)?;
                if !is_dotted_quad(host) {
                    return Err(Error::InvalidAddress(val.to_string()));
                }
                Ok(Self::new(*host, Some(port)))
            }
            _ => Err(Error::InvalidAddress(val.to_string())),
        }
    }

    fn new(host: &str, port: Option<&str>) -> Self {
        Self {
            host: host.to_string(),
            port: port.map(str::to_string),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port.as_deref().and_then(|p| p.parse().ok())
    }

    /// Port digits exactly as parsed
    pub fn port_text(&self) -> Option<&str> {
        self.port.as_deref()
    }
}

impl Address for V4Address {
    fn clone_address(&self) -> Result<Box<dyn Address>> {
        Ok(Box::new(V4Address::parse(&self.to_string())?))
    }

    fn same_as(&self, other: &dyn Address) -> bool {
        other
            .as_any()
            .downcast_ref::<V4Address>()
            .map_or(false, |o| self == o)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for V4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

impl FromStr for V4Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        V4Address::parse(s)
    }
}
