//! Ed25519 key material for the operator and the ephemeral accounts.
use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

/// DER prefix of a PKCS#8 encoded ed25519 private key
const PRIVATE_DER_PREFIX: &str = "302e020100300506032b657004220420";
/// DER prefix of a SubjectPublicKeyInfo encoded ed25519 public key
const PUBLIC_DER_PREFIX: &str = "302a300506032b6570032100";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key is not valid hex")]
    Hex,
    #[error("expected 32 raw bytes or a DER encoded ed25519 key, got {0} bytes")]
    Length(usize),
    #[error("bytes are not a valid ed25519 public key")]
    InvalidPublicKey,
}

#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh key from the operating system's RNG.
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.0.sign(message)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Hex encoded DER form, the way key files and `.env` entries carry it.
    pub fn to_der_string(&self) -> String {
        format!("{}{}", PRIVATE_DER_PREFIX, hex::encode(self.0.to_bytes()))
    }
}

impl FromStr for PrivateKey {
    type Err = KeyError;

    /// Accepts raw 32 byte hex or DER encoded hex, with an optional `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let s = s.strip_prefix(PRIVATE_DER_PREFIX).unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| KeyError::Hex)?;
        let raw: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Length(bytes.len()))?;
        Ok(Self::from_bytes(&raw))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.public_key()).finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify(message, signature).is_ok()
    }

    pub fn to_der_string(&self) -> String {
        format!("{}{}", PUBLIC_DER_PREFIX, hex::encode(self.0.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn der_string_round_trips() {
        let key = PrivateKey::generate();
        let der = key.to_der_string();
        assert!(der.starts_with(PRIVATE_DER_PREFIX));

        let parsed: PrivateKey = der.parse().unwrap();
        assert_eq!(parsed.to_bytes(), key.to_bytes());

        let raw: PrivateKey = format!("0x{}", hex::encode(key.to_bytes())).parse().unwrap();
        assert_eq!(raw.public_key(), key.public_key());
    }

    #[test]
    fn rejects_bad_keys() {
        assert_eq!("zz".parse::<PrivateKey>().err(), Some(KeyError::Hex));
        assert_eq!("abcd".parse::<PrivateKey>().err(), Some(KeyError::Length(2)));
    }

    #[test]
    fn signatures_verify_only_for_signer() {
        let alice = PrivateKey::generate();
        let bob = PrivateKey::generate();
        let sig = alice.sign(b"purchase");

        assert!(alice.public_key().verify(b"purchase", &sig));
        assert!(!alice.public_key().verify(b"purchase!", &sig));
        assert!(!bob.public_key().verify(b"purchase", &sig));
    }

    #[test]
    fn debug_hides_secret() {
        let key = PrivateKey::from_bytes(&[7u8; 32]);
        let dbg = format!("{:?}", key);
        assert!(!dbg.contains(&hex::encode([7u8; 32])));
    }
}
