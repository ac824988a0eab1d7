//! Secret negotiation
//!
//! A [`Negotiator`] turns a local key and a peer's public key into a shared
//! [`Secret`]. Connections hold one behind an `Arc` and cache whatever it
//! returns; they never do the cryptography themselves.

use std::fmt;

use super::key_exchange::{KeyExchange, KEY_SIZE};
use super::derive_key;
use crate::error::{Error, Result};

/// HKDF salt for negotiated connection secrets
const NEGOTIATION_SALT: &[u8] = b"strandline connection secret";

/// A negotiated symmetric secret
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; KEY_SIZE]);

impl Secret {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Agrees a shared secret from asymmetric key material
pub trait Negotiator: Send + Sync {
    fn negotiate(&self, local_key: &dyn KeyExchange, peer_public_key: &[u8]) -> Result<Secret>;
}

/// X25519 agreement followed by HKDF-SHA256
///
/// Both public keys go into the HKDF info in sorted order so that the two
/// peers derive the same secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519Negotiator;

impl X25519Negotiator {
    pub fn new() -> Self {
        Self
    }
}

impl Negotiator for X25519Negotiator {
    fn negotiate(&self, local_key: &dyn KeyExchange, peer_public_key: &[u8]) -> Result<Secret> {
        let shared = local_key.exchange(peer_public_key)?;

        let local_public = local_key.public_key();
        let (first, second) = if local_public <= peer_public_key {
            (local_public, peer_public_key)
        } else {
            (peer_public_key, local_public)
        };
        let mut info = Vec::with_capacity(first.len() + second.len());
        info.extend_from_slice(first);
        info.extend_from_slice(second);

        let okm = derive_key(&shared, NEGOTIATION_SALT, &info, KEY_SIZE)?;
        let bytes: [u8; KEY_SIZE] = okm
            .try_into()
            .map_err(|_| Error::NegotiationFailed("Derived key has wrong length".into()))?;
        Ok(Secret(bytes))
    }
}
