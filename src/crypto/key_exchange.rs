//! Key exchange using X25519

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// Size of an X25519 public key or shared secret
pub const KEY_SIZE: usize = 32;

/// A local asymmetric key able to agree a shared value with a peer
pub trait KeyExchange: Send + Sync {
    fn public_key(&self) -> &[u8];

    /// Agree a shared value with the holder of `peer_public_key`
    fn exchange(&self, peer_public_key: &[u8]) -> Result<[u8; KEY_SIZE]>;
}

/// Long-lived X25519 key; can negotiate any number of times
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            public: PublicKey::from(&secret),
            secret,
        }
    }

    /// Diffie-Hellman; `None` when the peer key is a low-order point
    pub fn diffie_hellman(&self, peer_public: &[u8; KEY_SIZE]) -> Option<[u8; KEY_SIZE]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        shared.was_contributory().then(|| *shared.as_bytes())
    }
}

impl KeyExchange for X25519KeyPair {
    fn public_key(&self) -> &[u8] {
        self.public.as_bytes()
    }

    fn exchange(&self, peer_public_key: &[u8]) -> Result<[u8; KEY_SIZE]> {
        let peer_bytes: [u8; KEY_SIZE] = peer_public_key.try_into().map_err(|_| {
            Error::NegotiationFailed(format!(
                "Invalid public key length: {}",
                peer_public_key.len()
            ))
        })?;

        self.diffie_hellman(&peer_bytes)
            .ok_or_else(|| Error::NegotiationFailed("Non-contributory peer public key".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_bytes(key: &X25519KeyPair) -> [u8; KEY_SIZE] {
        key.public_key().try_into().unwrap()
    }

    #[test]
    fn test_diffie_hellman_agrees() {
        let alice = X25519KeyPair::generate();
        let bob = X25519KeyPair::generate();

        let alice_shared = alice.diffie_hellman(&public_bytes(&bob)).unwrap();
        let bob_shared = bob.diffie_hellman(&public_bytes(&alice)).unwrap();
        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_exchange_through_trait() {
        let alice = X25519KeyPair::generate();
        let bob = X25519KeyPair::generate();
        let local: &dyn KeyExchange = &alice;

        let shared = local.exchange(bob.public_key()).unwrap();
        assert_eq!(shared, bob.exchange(alice.public_key()).unwrap());
        assert_eq!(local.public_key().len(), KEY_SIZE);
    }

    #[test]
    fn test_rejects_bad_peer_keys() {
        let alice = X25519KeyPair::generate();
        assert!(matches!(
            alice.exchange(&[1u8; 16]),
            Err(Error::NegotiationFailed(_))
        ));
        // the identity point yields an all-zero shared value
        assert!(matches!(
            alice.exchange(&[0u8; KEY_SIZE]),
            Err(Error::NegotiationFailed(_))
        ));
    }
}
