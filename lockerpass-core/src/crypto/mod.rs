//! Cryptographic primitives for the password locker.
//!
//! This module provides:
//! - AES-256-GCM encryption/decryption of stored secrets
//! - Key material handling for the deployment-wide cipher key

pub mod cipher;

pub use cipher::Cipher;

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption key must not be empty")]
    EmptyKey,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - ciphertext does not match the configured key")]
    AuthenticationFailed,
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
