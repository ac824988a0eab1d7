//! Connection lifecycle
//!
//! A connection moves through UNBOUND → BOUND → PENDING → CONNECTED →
//! DISCONNECTED and never back. The state lives in an atomic ordinal that is
//! only ever advanced with compare-and-set, so any value a reader observes
//! is a lower bound on the current state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use crate::common::EndPoint;
use crate::error::{Error, Result};

/// Lifecycle states, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Neither end point is set
    Unbound = 0,
    /// Near end point is set
    Bound = 1,
    /// Connection to the far end point has been requested
    Pending = 2,
    /// Both end points are set and the stream is usable
    Connected = 3,
    /// Closed; terminal
    Disconnected = 4,
}

impl ConnectionState {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    fn from_ordinal(v: u8) -> Self {
        match v {
            0 => ConnectionState::Unbound,
            1 => ConnectionState::Bound,
            2 => ConnectionState::Pending,
            3 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unbound => "UNBOUND",
            ConnectionState::Bound => "BOUND",
            ConnectionState::Pending => "PENDING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}

/// Atomic, monotonically advancing state ordinal
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.ordinal()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_ordinal(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if the current state is still earlier.
    ///
    /// Returns true when this call made the transition.
    pub fn advance(&self, to: ConnectionState) -> bool {
        let target = to.ordinal();
        let mut current = self.0.load(Ordering::Acquire);
        while current < target {
            match self
                .0
                .compare_exchange_weak(current, target, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
        false
    }
}

/// End points plus state for one connection
///
/// Each end point is written at most once.
#[derive(Debug)]
pub struct Lifecycle<E> {
    state: StateCell,
    near: OnceLock<E>,
    far: OnceLock<E>,
}

impl<E: EndPoint> Lifecycle<E> {
    pub fn new() -> Self {
        Self {
            state: StateCell::new(ConnectionState::Unbound),
            near: OnceLock::new(),
            far: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn near_end(&self) -> Option<&E> {
        self.near.get()
    }

    pub fn far_end(&self) -> Option<&E> {
        self.far.get()
    }

    /// UNBOUND → BOUND
    pub fn bind_near_end(&self, end: E) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Err(Error::ConnectionClosed);
        }
        if self.far.get().is_some() {
            return Err(Error::AlreadyBound);
        }
        self.near.set(end).map_err(|_| Error::AlreadyBound)?;
        self.state.advance(ConnectionState::Bound);
        Ok(())
    }

    /// BOUND → PENDING or CONNECTED
    ///
    /// `established` says the underlying stream is already open. Without
    /// it, only a far end on this host goes straight to CONNECTED.
    pub fn bind_far_end(&self, end: E, established: bool) -> Result<()> {
        let state = self.state();
        if state == ConnectionState::Disconnected {
            return Err(Error::ConnectionClosed);
        }
        if self.near.get().is_none() || state < ConnectionState::Bound {
            return Err(Error::NotBound);
        }

        let next = if established || end.is_local_host() {
            ConnectionState::Connected
        } else {
            ConnectionState::Pending
        };
        self.far.set(end).map_err(|_| Error::AlreadyBound)?;
        self.state.advance(next);
        Ok(())
    }

    /// PENDING → CONNECTED, once the far side answers
    pub fn mark_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Disconnected => Err(Error::ConnectionClosed),
            s if s < ConnectionState::Pending => Err(Error::NotBound),
            _ => {
                self.state.advance(ConnectionState::Connected);
                Ok(())
            }
        }
    }

    /// Any state → DISCONNECTED. True for the call that made the move.
    pub fn disconnect(&self) -> bool {
        self.state.advance(ConnectionState::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }
}

impl<E: EndPoint> Default for Lifecycle<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TcpEndPoint;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn ep(s: &str) -> TcpEndPoint {
        TcpEndPoint::resolve(s).unwrap()
    }

    #[test]
    fn test_state_ordering() {
        assert!(ConnectionState::Unbound < ConnectionState::Bound);
        assert!(ConnectionState::Bound < ConnectionState::Pending);
        assert!(ConnectionState::Pending < ConnectionState::Connected);
        assert!(ConnectionState::Connected < ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connected.ordinal(), 3);
        assert_eq!(ConnectionState::Pending.to_string(), "PENDING");
    }

    #[test]
    fn test_advance_never_goes_back() {
        let cell = StateCell::new(ConnectionState::Unbound);
        assert!(cell.advance(ConnectionState::Connected));
        assert!(!cell.advance(ConnectionState::Bound));
        assert!(!cell.advance(ConnectionState::Connected));
        assert_eq!(cell.load(), ConnectionState::Connected);
        assert!(cell.advance(ConnectionState::Disconnected));
        assert!(!cell.advance(ConnectionState::Disconnected));
    }

    #[test]
    fn test_bind_local_far_end_connects() {
        let life = Lifecycle::new();
        assert_eq!(life.state(), ConnectionState::Unbound);

        life.bind_near_end(ep("127.0.0.1:5000")).unwrap();
        assert_eq!(life.state(), ConnectionState::Bound);

        life.bind_far_end(ep("127.0.0.1:6000"), false).unwrap();
        assert_eq!(life.state(), ConnectionState::Connected);
        assert_eq!(life.far_end().unwrap().port(), 6000);
    }

    #[test]
    fn test_bind_remote_far_end_is_pending() {
        let life = Lifecycle::new();
        life.bind_near_end(ep("10.1.1.1:5000")).unwrap();
        life.bind_far_end(ep("10.2.2.2:6000"), false).unwrap();
        assert_eq!(life.state(), ConnectionState::Pending);
        assert!(life.state() >= ConnectionState::Pending);

        life.mark_connected().unwrap();
        assert_eq!(life.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_established_stream_skips_pending() {
        let life = Lifecycle::new();
        life.bind_near_end(ep("10.1.1.1:5000")).unwrap();
        life.bind_far_end(ep("10.2.2.2:6000"), true).unwrap();
        assert_eq!(life.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_bind_preconditions() {
        let life = Lifecycle::new();
        assert!(matches!(
            life.bind_far_end(ep("127.0.0.1:1"), true),
            Err(Error::NotBound)
        ));
        assert!(matches!(life.mark_connected(), Err(Error::NotBound)));

        life.bind_near_end(ep("127.0.0.1:2")).unwrap();
        assert!(matches!(
            life.bind_near_end(ep("127.0.0.1:3")),
            Err(Error::AlreadyBound)
        ));

        life.bind_far_end(ep("127.0.0.1:4"), true).unwrap();
        assert!(matches!(
            life.bind_far_end(ep("127.0.0.1:5"), true),
            Err(Error::AlreadyBound)
        ));
        assert!(matches!(
            life.bind_near_end(ep("127.0.0.1:6")),
            Err(Error::AlreadyBound)
        ));
        // losing binds leave the recorded end points alone
        assert_eq!(life.near_end().unwrap().port(), 2);
        assert_eq!(life.far_end().unwrap().port(), 4);
    }

    #[test]
    fn test_disconnect_is_terminal() {
        let life: Lifecycle<TcpEndPoint> = Lifecycle::new();
        assert!(life.disconnect());
        assert!(!life.disconnect());
        assert!(life.is_closed());
        assert!(matches!(
            life.bind_near_end(ep("127.0.0.1:1")),
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(life.mark_connected(), Err(Error::ConnectionClosed)));
        assert_eq!(life.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_concurrent_near_binds_have_one_winner() {
        let life = Arc::new(Lifecycle::<TcpEndPoint>::new());
        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let life = Arc::clone(&life);
                std::thread::spawn(move || {
                    life.bind_near_end(ep(&format!("127.0.0.1:{}", 7000 + i)))
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(life.state(), ConnectionState::Bound);
    }

    #[test]
    fn test_observed_state_is_monotonic() {
        let life = Arc::new(Lifecycle::<TcpEndPoint>::new());
        let done = Arc::new(AtomicBool::new(false));

        let observers: Vec<_> = (0..4)
            .map(|_| {
                let life = Arc::clone(&life);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut last = ConnectionState::Unbound;
                    while !done.load(Ordering::Acquire) {
                        let seen = life.state();
                        assert!(seen >= last, "state went from {} to {}", last, seen);
                        last = seen;
                    }
                    let seen = life.state();
                    assert!(seen >= last);
                    seen
                })
            })
            .collect();

        life.bind_near_end(ep("10.0.0.1:1000")).unwrap();
        let after_near = life.state();
        life.bind_far_end(ep("10.0.0.2:2000"), false).unwrap();
        assert!(life.state() >= after_near);
        life.mark_connected().unwrap();
        life.disconnect();
        done.store(true, Ordering::Release);

        for o in observers {
            assert_eq!(o.join().unwrap(), ConnectionState::Disconnected);
        }
    }
}
