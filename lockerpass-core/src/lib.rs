//! LockerPass Core Library
//!
//! This library provides the core functionality for the password locker
//! client: symmetric encryption of stored secrets, the PIN gate that wraps
//! sensitive actions, and the live locker synchronization contract over a
//! hosted authentication + document-store backend.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod pin;
pub mod session;
pub mod store;

pub use auth::{
    validate_password, AuthError, HttpIdentityProvider, IdentityProvider, MemoryIdentityProvider,
    SessionUser,
};
pub use config::Config;
pub use crypto::cipher::Cipher;
pub use crypto::CryptoError;
pub use pin::{ForgotPinFlow, ForgotPinStep, PinError, PinGate, PinService, PinState};
pub use session::{
    decrypt_for_display, LockerService, SessionController, SessionEvent, SessionHandle,
};
pub use store::{
    Locker, LockerPatch, LockerStore, LockerSubscription, MemoryStore, NewLocker,
    PersistenceError, PinStore, RemoteStore, SubscriptionEvent,
};

use thiserror::Error;

/// Result type for locker operations
pub type Result<T> = std::result::Result<T, LockerPassError>;

/// General error type for locker operations
#[derive(Error, Debug)]
pub enum LockerPassError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Auth error: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] store::PersistenceError),

    #[error("PIN error: {0}")]
    Pin(#[from] pin::PinError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
