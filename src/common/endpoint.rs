//! End points: a transport paired with an address
//!
//! A [`TcpEndPoint`] keeps the resolved IP (if any), the port and the IPv6
//! zone. An end point whose host was left empty (`:8080`) has no IP; it
//! listens on every interface and dials the local host.

use std::any::Any;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};

use super::address::{Address, V4Address};
use crate::error::{Error, Result};

/// Name of the TCP transport
pub const TCP: &str = "tcp";

/// Capabilities every transport end point provides
pub trait EndPoint: fmt::Display + fmt::Debug + Send + Sync {
    /// Independent copy of the address; never the live value
    fn address(&self) -> Result<Box<dyn Address>>;

    /// Constant naming the transport, e.g. "tcp"
    fn transport(&self) -> &'static str;

    /// Fresh end point re-resolved from `address()`
    fn clone_end_point(&self) -> Result<Box<dyn EndPoint>>;

    /// Compare against another end point of any transport
    fn same_as(&self, other: &dyn EndPoint) -> bool;

    /// True when the end point names this host
    fn is_local_host(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A TCP end point (IP, port, zone)
#[derive(Debug, Clone, Copy)]
pub struct TcpEndPoint {
    ip: Option<IpAddr>,
    port: u16,
    zone: u32,
}

impl TcpEndPoint {
    /// The well known "any" end point, `127.0.0.1:0`
    pub fn any() -> Self {
        Self::from(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    /// Resolve `host:port` for plain TCP
    pub fn resolve(text: &str) -> Result<Self> {
        Self::resolve_with(TCP, text)
    }

    /// Resolve `host:port` for `tcp`, `tcp4` or `tcp6`
    ///
    /// The host may be empty (`:80`), an IPv4 literal, a bracketed IPv6
    /// literal with optional numeric zone (`[fe80::1%2]:80`) or a name handed
    /// to the system resolver. IPv4 results are preferred for plain `tcp`.
    ///
    /// Name lookups block the calling thread; async callers should use
    /// [`TcpEndPoint::resolve_with_async`].
    pub fn resolve_with(transport: &str, text: &str) -> Result<Self> {
        let spec = HostPort::parse(transport, text)?;
        let ip = match spec.host() {
            Host::Any => None,
            Host::Ip(ip) => Some(ip),
            Host::Name(name) => {
                let found: Vec<IpAddr> = (name, spec.port)
                    .to_socket_addrs()
                    .map(|addrs| addrs.map(|a| a.ip()).collect())
                    .unwrap_or_default();
                Some(spec.pick(found)?)
            }
        };
        spec.finish(ip)
    }

    /// Resolve `host:port` for plain TCP without blocking the runtime
    pub async fn resolve_async(text: &str) -> Result<Self> {
        Self::resolve_with_async(TCP, text).await
    }

    /// Like [`TcpEndPoint::resolve_with`], with names looked up by tokio
    pub async fn resolve_with_async(transport: &str, text: &str) -> Result<Self> {
        let spec = HostPort::parse(transport, text)?;
        let ip = match spec.host() {
            Host::Any => None,
            Host::Ip(ip) => Some(ip),
            Host::Name(name) => {
                let found: Vec<IpAddr> = tokio::net::lookup_host((name, spec.port))
                    .await
                    .map(|addrs| addrs.map(|a| a.ip()).collect())
                    .unwrap_or_default();
                Some(spec.pick(found)?)
            }
        };
        spec.finish(ip)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// IPv6 scope id; zero when absent
    pub fn zone(&self) -> u32 {
        self.zone
    }

    /// The typed IPv4 address, if this end point has one
    pub fn v4_address(&self) -> Result<V4Address> {
        V4Address::parse(&self.addr_string())
    }

    /// Raw `host:port` form: `:80`, `1.2.3.4:80`, `[::1]:80`, `[fe80::1%2]:80`
    pub fn addr_string(&self) -> String {
        match self.ip {
            None => format!(":{}", self.port),
            Some(IpAddr::V4(ip)) => format!("{}:{}", ip, self.port),
            Some(IpAddr::V6(ip)) if self.zone != 0 => {
                format!("[{}%{}]:{}", ip, self.zone, self.port)
            }
            Some(IpAddr::V6(ip)) => format!("[{}]:{}", ip, self.port),
        }
    }

    /// Socket address to listen on; no host means every interface
    pub fn listen_addr(&self) -> SocketAddr {
        self.socket_addr(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    /// Socket address to dial; no host means the local host
    pub fn connect_addr(&self) -> SocketAddr {
        self.socket_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn socket_addr(&self, fallback: IpAddr) -> SocketAddr {
        match self.ip.unwrap_or(fallback) {
            IpAddr::V6(ip) => SocketAddr::V6(SocketAddrV6::new(ip, self.port, 0, self.zone)),
            ip => SocketAddr::new(ip, self.port),
        }
    }

    /// Host text with "any interface" forms folded onto IPv4
    fn normalized(&self) -> String {
        let s = self.addr_string();
        if let Some(rest) = s.strip_prefix("[::]") {
            format!("0.0.0.0{}", rest)
        } else if s.starts_with(':') {
            format!("127.0.0.1{}", s)
        } else {
            s
        }
    }
}

/// `host:port` text checked for shape, before any name lookup
struct HostPort<'a> {
    text: &'a str,
    want_v4: Option<bool>,
    host: &'a str,
    port: u16,
    zone: u32,
}

enum Host<'a> {
    /// Empty host
    Any,
    Ip(IpAddr),
    Name(&'a str),
}

impl<'a> HostPort<'a> {
    fn parse(transport: &str, text: &'a str) -> Result<Self> {
        let want_v4 = match transport {
            "tcp" => None,
            "tcp4" => Some(true),
            "tcp6" => Some(false),
            other => {
                return Err(Error::Config(format!("Unsupported transport: {}", other)));
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyAddress);
        }

        let (host, port) = split_host_port(text)?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(text.to_string()))?;

        // only numeric zones; interface names are not mapped to indices
        let (host, zone) = match host.split_once('%') {
            Some((h, z)) => {
                let zone = z
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidAddress(text.to_string()))?;
                (h, zone)
            }
            None => (host, 0),
        };

        Ok(Self {
            text,
            want_v4,
            host,
            port,
            zone,
        })
    }

    fn host(&self) -> Host<'a> {
        if self.host.is_empty() {
            Host::Any
        } else if let Ok(ip) = self.host.parse::<IpAddr>() {
            Host::Ip(ip)
        } else {
            Host::Name(self.host)
        }
    }

    /// Choose among looked-up addresses by the wanted family
    fn pick(&self, found: Vec<IpAddr>) -> Result<IpAddr> {
        let chosen = match self.want_v4 {
            Some(true) => found.iter().copied().find(|ip| ip.is_ipv4()),
            Some(false) => found.iter().copied().find(|ip| ip.is_ipv6()),
            None => found
                .iter()
                .copied()
                .find(|ip| ip.is_ipv4())
                .or_else(|| found.first().copied()),
        };
        chosen.ok_or_else(|| Error::AddressUnreachable(self.text.to_string()))
    }

    fn finish(self, ip: Option<IpAddr>) -> Result<TcpEndPoint> {
        let invalid = || Error::InvalidAddress(self.text.to_string());
        let Some(ip) = ip else {
            return Ok(TcpEndPoint {
                ip: None,
                port: self.port,
                zone: 0,
            });
        };

        match (self.want_v4, ip) {
            (Some(true), IpAddr::V6(_)) | (Some(false), IpAddr::V4(_)) => return Err(invalid()),
            _ => {}
        }
        if self.zone != 0 && !ip.is_ipv6() {
            return Err(invalid());
        }

        Ok(TcpEndPoint {
            ip: Some(ip),
            port: self.port,
            zone: self.zone,
        })
    }
}

/// Split `host:port`, honouring a bracketed IPv6 host
fn split_host_port(text: &str) -> Result<(&str, &str)> {
    let invalid = || Error::InvalidAddress(text.to_string());

    if let Some(rest) = text.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = tail.strip_prefix(':').ok_or_else(invalid)?;
        let literal = host.split('%').next().unwrap_or_default();
        if literal.parse::<Ipv6Addr>().is_err() {
            return Err(invalid());
        }
        return Ok((host, port));
    }

    let (host, port) = text.rsplit_once(':').ok_or_else(invalid)?;
    if host.contains(':') {
        // bare IPv6 literals must be bracketed
        return Err(invalid());
    }
    Ok((host, port))
}

impl EndPoint for TcpEndPoint {
    fn address(&self) -> Result<Box<dyn Address>> {
        Ok(Box::new(self.v4_address()?))
    }

    fn transport(&self) -> &'static str {
        TCP
    }

    fn clone_end_point(&self) -> Result<Box<dyn EndPoint>> {
        let addr = self.address()?;
        Ok(Box::new(TcpEndPoint::resolve(&addr.to_string())?))
    }

    fn same_as(&self, other: &dyn EndPoint) -> bool {
        other
            .as_any()
            .downcast_ref::<TcpEndPoint>()
            .map_or(false, |o| self == o)
    }

    fn is_local_host(&self) -> bool {
        match self.ip {
            None => true,
            Some(ip) => ip.is_loopback() || ip.is_unspecified(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for TcpEndPoint {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
            && self.port == other.port
            && self.zone == other.zone
    }
}

impl Eq for TcpEndPoint {}

impl From<SocketAddr> for TcpEndPoint {
    fn from(addr: SocketAddr) -> Self {
        let zone = match addr {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        };
        Self {
            ip: Some(addr.ip()),
            port: addr.port(),
            zone,
        }
    }
}

impl fmt::Display for TcpEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpEndPoint: {}", self.addr_string())
    }
}
