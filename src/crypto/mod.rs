//! Cryptography collaborators for connections
//!
//! - X25519 key exchange
//! - Secret negotiation (X25519 + HKDF-SHA256)
//! - SHA-256 digests

mod key_exchange;
mod negotiator;

pub use key_exchange::{KeyExchange, X25519KeyPair, KEY_SIZE};
pub use negotiator::{Negotiator, Secret, X25519Negotiator};

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of a SHA-256 digest
pub const DIGEST_SIZE: usize = 32;

/// HKDF-SHA256 extract-and-expand to `key_len` bytes
pub fn derive_key(secret: &[u8], salt: &[u8], info: &[u8], key_len: usize) -> Result<Vec<u8>> {
    let mut okm = vec![0u8; key_len];
    Hkdf::<Sha256>::new(Some(salt), secret)
        .expand(info, &mut okm)
        .map_err(|_| Error::NegotiationFailed(format!("Cannot derive {} key bytes", key_len)))?;
    Ok(okm)
}

pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}
