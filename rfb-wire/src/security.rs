//! VNC password authentication (security type 2).
//!
//! RFC 6143 §7.2.2: the server sends a 16-byte random challenge; the client
//! returns it encrypted as two DES-ECB blocks keyed by the password. The key
//! carries the historical VNC quirk of bit-reversing every password byte,
//! with the password truncated or zero-padded to 8 bytes.

use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::Rng;

/// Reverse the bits within a single byte (the VNC key quirk).
pub fn reverse_bits(byte: u8) -> u8 {
    let mut out = 0u8;
    for i in 0..8 {
        if byte & (1 << i) != 0 {
            out |= 1 << (7 - i);
        }
    }
    out
}

/// Encrypt a 16-byte challenge with a VNC password.
///
/// Only the first 8 password bytes are significant; shorter passwords are
/// zero-padded.
pub fn encrypt_challenge(challenge: &[u8; 16], password: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, &byte) in key.iter_mut().zip(password.iter().take(8)) {
        *slot = reverse_bits(byte);
    }

    let cipher = Des::new_from_slice(&key).expect("8-byte key is always valid");

    let mut response = [0u8; 16];
    for (i, chunk) in challenge.chunks_exact(8).enumerate() {
        let mut block = [0u8; 8];
        block.copy_from_slice(chunk);
        let mut block = block.into();
        cipher.encrypt_block(&mut block);
        response[i * 8..(i + 1) * 8].copy_from_slice(&block);
    }
    response
}

/// Server-side state for VNC password authentication.
#[derive(Debug, Clone)]
pub struct VncAuth {
    password: Option<Vec<u8>>,
}

impl VncAuth {
    /// Create an authenticator. With no password configured, every
    /// verification fails.
    pub fn new(password: Option<Vec<u8>>) -> Self {
        Self { password }
    }

    /// Whether a password is configured.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Generate a random 16-byte challenge.
    pub fn generate_challenge(&self) -> [u8; 16] {
        let mut challenge = [0u8; 16];
        rand::thread_rng().fill(&mut challenge);
        challenge
    }

    /// Verify a client response against the challenge it was derived from.
    pub fn verify_response(&self, response: &[u8], challenge: &[u8; 16]) -> bool {
        if response.len() != 16 {
            return false;
        }
        match &self.password {
            Some(password) => response == encrypt_challenge(challenge, password),
            None => false,
        }
    }
}
