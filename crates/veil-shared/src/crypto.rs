use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::{KDF_ITERATIONS, KDF_SALT, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

/// Derive a symmetric key from a shared secret phrase.
///
/// Deterministic: two peers who typed the same passphrase compute identical
/// keys without ever exchanging them. PBKDF2 with a high iteration count
/// keeps offline guessing expensive.
pub fn derive_key(secret: &str) -> Result<SymmetricKey, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation);
    }
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.as_bytes(),
        KDF_SALT.as_bytes(),
        KDF_ITERATIONS,
        &mut key,
    );
    Ok(key)
}

/// Nonce + ciphertext as carried inside a `message` frame.
///
/// Serialized as JSON byte arrays (`{"iv": [...12 bytes], "data": [...]}`),
/// the one envelope shape every implementation must agree on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CryptoError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        if envelope.iv.len() != NONCE_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "iv must be {NONCE_SIZE} bytes, got {}",
                envelope.iv.len()
            )));
        }
        Ok(envelope)
    }
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a payload under a fresh random 96-bit nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(Envelope {
        iv: nonce_bytes.to_vec(),
        data: ciphertext,
    })
}

/// Decrypt an envelope. Fails closed on authentication failure; the caller
/// substitutes a placeholder rather than surfacing the ciphertext.
pub fn decrypt(key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    if envelope.iv.len() != NONCE_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "iv must be {NONCE_SIZE} bytes, got {}",
            envelope.iv.len()
        )));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&envelope.iv);

    cipher
        .decrypt(nonce, envelope.data.as_slice())
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a text payload, returning the serialized envelope for the wire.
pub fn encrypt_text(key: &SymmetricKey, text: &str) -> Result<String, CryptoError> {
    encrypt(key, text.as_bytes())?.to_json()
}

/// Parse and decrypt a serialized envelope back into text.
pub fn decrypt_text(key: &SymmetricKey, raw: &str) -> Result<String, CryptoError> {
    let envelope = Envelope::from_json(raw)?;
    let plaintext = decrypt(key, &envelope)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::NotUtf8)
}
