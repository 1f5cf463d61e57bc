//! Envelope token derivation.
//!
//! Tokens are what chat surfaces embed in buttons and links, so they must be unguessable
//! and must not leak storage row ids. A token is the first 16 bytes of a domain-separated
//! SHA-256 over the funder, creation time and 16 bytes of OS entropy, hex-encoded.

use crate::{EnvelopeToken, UserId};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Domain separation tag for token derivation.
pub const TOKEN_DOMAIN_V1: &[u8] = b"HONGBAO_ENVELOPE_TOKEN_V1";

/// Length of a token in hex characters.
pub const TOKEN_HEX_LEN: usize = 32;

pub fn derive_envelope_token_v1(
    funder: UserId,
    created_at_ms: i64,
    entropy: &[u8; 16],
) -> EnvelopeToken {
    let mut hasher = Sha256::new();
    hasher.update(TOKEN_DOMAIN_V1);
    hasher.update(funder.0.to_le_bytes());
    hasher.update(created_at_ms.to_le_bytes());
    hasher.update(entropy);
    let digest = hasher.finalize();
    EnvelopeToken::new(hex::encode(&digest[..16]))
}

impl EnvelopeToken {
    /// Mint a fresh token for an envelope created by `funder` at `created_at_ms`.
    pub fn generate(funder: UserId, created_at_ms: i64) -> Self {
        let mut entropy = [0u8; 16];
        OsRng.fill_bytes(&mut entropy);
        derive_envelope_token_v1(funder, created_at_ms, &entropy)
    }

    /// Cheap shape check for tokens arriving from chat callbacks.
    pub fn is_well_formed(&self) -> bool {
        self.as_str().len() == TOKEN_HEX_LEN && self.as_str().bytes().all(|b| b.is_ascii_hexdigit())
    }
}
