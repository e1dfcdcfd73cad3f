use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Decrypted payload is not valid UTF-8")]
    NotUtf8,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed or unknown wire payload: {0}")]
    Decode(#[from] serde_json::Error),
}
