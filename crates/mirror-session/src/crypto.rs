//! Payload decryption for the mirror stream.

use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha512};

use crate::error::SessionError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const AES_KEY_LEN: usize = 16;
pub const ECDH_SECRET_LEN: usize = 32;

/// Decrypts record payloads in arrival order.
///
/// Implementations are stateful: the keystream position advances across
/// calls, so payloads must be fed exactly once, in wire order.
pub trait RecordCipher: Send {
    /// Decrypt `ciphertext` into `plaintext`. Both slices have the same
    /// length; the output is always exactly as long as the input.
    fn decrypt(&mut self, ciphertext: &[u8], plaintext: &mut [u8]);
}

/// Session key material established during negotiation. Becomes a
/// [`MirrorCipher`] once the per-stream connection id is known.
#[derive(Clone)]
pub struct MirrorKey {
    digest: [u8; AES_KEY_LEN],
}

impl MirrorKey {
    /// Fold the session AES key and the key-exchange shared secret into the
    /// stream key digest. Fails on wrong key-material lengths.
    pub fn new(aes_key: &[u8], ecdh_secret: &[u8]) -> Result<Self, SessionError> {
        if aes_key.len() != AES_KEY_LEN {
            return Err(SessionError::InvalidKeyMaterial("AES key must be 16 bytes"));
        }
        if ecdh_secret.len() != ECDH_SECRET_LEN {
            return Err(SessionError::InvalidKeyMaterial("key-exchange secret must be 32 bytes"));
        }
        let mut hasher = Sha512::new();
        hasher.update(aes_key);
        hasher.update(ecdh_secret);
        let hash = hasher.finalize();
        let mut digest = [0u8; AES_KEY_LEN];
        digest.copy_from_slice(&hash[..AES_KEY_LEN]);
        Ok(Self { digest })
    }

    /// Derive the per-stream cipher for `connection_id`.
    pub fn stream_cipher(&self, connection_id: u64) -> MirrorCipher {
        let key = self.derive_half(b"AirPlayStreamKey", connection_id);
        let iv = self.derive_half(b"AirPlayStreamIV", connection_id);
        MirrorCipher {
            cipher: Aes128Ctr::new(&key.into(), &iv.into()),
        }
    }

    fn derive_half(&self, label: &[u8], connection_id: u64) -> [u8; AES_KEY_LEN] {
        let mut hasher = Sha512::new();
        hasher.update(label);
        hasher.update(connection_id.to_string().as_bytes());
        hasher.update(self.digest);
        let hash = hasher.finalize();
        let mut out = [0u8; AES_KEY_LEN];
        out.copy_from_slice(&hash[..AES_KEY_LEN]);
        out
    }
}

/// AES-128-CTR stream cipher over the mirror video payloads. The keystream
/// runs continuously across records.
pub struct MirrorCipher {
    cipher: Aes128Ctr,
}

impl RecordCipher for MirrorCipher {
    fn decrypt(&mut self, ciphertext: &[u8], plaintext: &mut [u8]) {
        debug_assert_eq!(ciphertext.len(), plaintext.len());
        plaintext.copy_from_slice(ciphertext);
        self.cipher.apply_keystream(plaintext);
    }
}
