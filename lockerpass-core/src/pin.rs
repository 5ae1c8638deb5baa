//! PIN confidentiality workflow: setup, verification gate, change, recovery.
//!
//! The PIN is a short secondary secret gating sensitive actions once set.
//! It is stored as a single encrypted record per user; verification is
//! decrypt-and-compare against the entered value. Every failure here is a
//! recoverable, user-facing message, never fatal.

use crate::auth::{IdentityProvider, SessionUser};
use crate::crypto::Cipher;
use crate::store::PinStore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Minimum accepted PIN length.
pub const MIN_PIN_LEN: usize = 4;

#[derive(Error, Debug, Clone)]
pub enum PinError {
    #[error("Incorrect PIN.")]
    Incorrect,

    #[error("PIN must be at least 4 digits.")]
    TooShort,

    #[error("PINs do not match.")]
    Mismatch,

    #[error("Incorrect password.")]
    IncorrectPassword,

    #[error("No PIN has been set up yet")]
    NotSet,

    #[error("Verify the account password first")]
    PasswordNotVerified,

    #[error("Failed to save new PIN.")]
    SaveFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// No record exists yet; setup is mandatory before sensitive actions.
    NoPin,
    /// A record exists; its value is known only in encrypted form at rest.
    PinSet,
}

/// Wraps an action so it only executes once the user re-enters the PIN.
pub struct PinGate {
    cipher: Arc<Cipher>,
    stored: Option<String>,
}

impl PinGate {
    /// `stored` is the ciphertext loaded from the PIN record, if any.
    pub fn new(cipher: Arc<Cipher>, stored: Option<String>) -> Self {
        Self { cipher, stored }
    }

    pub fn state(&self) -> PinState {
        if self.stored.is_some() {
            PinState::PinSet
        } else {
            PinState::NoPin
        }
    }

    /// Replace the cached ciphertext after setup/change/recovery.
    pub fn set_stored(&mut self, ciphertext: String) {
        self.stored = Some(ciphertext);
    }

    /// Check an entered value against the stored PIN.
    ///
    /// A decryption failure on the stored record is indistinguishable from
    /// a mismatch to the caller.
    pub fn verify(&self, entered: &str) -> Result<(), PinError> {
        let stored = self.stored.as_deref().ok_or(PinError::NotSet)?;

        match self.cipher.decrypt(stored) {
            Ok(pin) if pin == entered => Ok(()),
            Ok(_) => Err(PinError::Incorrect),
            Err(e) => {
                debug!("stored PIN failed to decrypt, treating as mismatch: {}", e);
                Err(PinError::Incorrect)
            }
        }
    }

    /// Run `action` behind the gate.
    ///
    /// With a PIN set, `prompt` is invoked once for the entered value and
    /// `action` runs exactly once on a match, zero times otherwise. With no
    /// PIN set, `action` runs immediately and `prompt` is never invoked.
    pub fn require<T>(
        &self,
        prompt: impl FnOnce() -> String,
        action: impl FnOnce() -> T,
    ) -> Result<T, PinError> {
        if self.stored.is_none() {
            return Ok(action());
        }

        let entered = prompt();
        self.verify(&entered)?;
        Ok(action())
    }
}

fn validate_new_pin(pin: &str, confirm: &str) -> Result<(), PinError> {
    if pin.len() < MIN_PIN_LEN {
        return Err(PinError::TooShort);
    }
    if pin != confirm {
        return Err(PinError::Mismatch);
    }
    Ok(())
}

/// Persistence side of the PIN workflow: encrypts values and writes the
/// per-user record.
pub struct PinService<P> {
    store: P,
    cipher: Arc<Cipher>,
}

impl<P: PinStore> PinService<P> {
    pub fn new(store: P, cipher: Arc<Cipher>) -> Self {
        Self { store, cipher }
    }

    /// Load the stored ciphertext, if a record exists.
    pub async fn load(&self, uid: &str) -> Result<Option<String>, PinError> {
        self.store
            .load_pin(uid)
            .await
            .map_err(|e| PinError::SaveFailed(e.to_string()))
    }

    /// First-time setup (also the final step of change and recovery).
    /// Returns the new ciphertext so callers can refresh their gate.
    pub async fn setup(&self, uid: &str, pin: &str, confirm: &str) -> Result<String, PinError> {
        validate_new_pin(pin, confirm)?;

        let ciphertext = self
            .cipher
            .encrypt(pin)
            .map_err(|e| PinError::SaveFailed(e.to_string()))?;
        self.store
            .save_pin(uid, &ciphertext)
            .await
            .map_err(|e| PinError::SaveFailed(e.to_string()))?;

        info!(uid = %uid, "PIN record saved");
        Ok(ciphertext)
    }

    /// Change the PIN. Knowledge of the current PIN is proved before the
    /// new value is accepted.
    pub async fn change(
        &self,
        uid: &str,
        gate: &PinGate,
        current: &str,
        new_pin: &str,
        confirm: &str,
    ) -> Result<String, PinError> {
        gate.verify(current)?;
        self.setup(uid, new_pin, confirm).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgotPinStep {
    /// Re-prove the account credential with the identity boundary.
    VerifyPassword,
    /// Credential proved; a new PIN may be saved.
    SetNewPin,
}

/// Recovery flow for a forgotten PIN: the account password stands in for
/// knowledge of the current PIN. The stored PIN is untouched until the new
/// one is saved.
pub struct ForgotPinFlow {
    step: ForgotPinStep,
}

impl ForgotPinFlow {
    pub fn new() -> Self {
        Self {
            step: ForgotPinStep::VerifyPassword,
        }
    }

    pub fn step(&self) -> ForgotPinStep {
        self.step
    }

    /// Step one. Any re-authentication failure surfaces as
    /// "Incorrect password." and the flow stays where it is.
    pub async fn verify_password<I>(
        &mut self,
        identity: &I,
        user: &SessionUser,
        password: &str,
    ) -> Result<(), PinError>
    where
        I: IdentityProvider + ?Sized,
    {
        if self.step == ForgotPinStep::SetNewPin {
            return Ok(());
        }

        identity
            .reauthenticate(user, password)
            .await
            .map_err(|_| PinError::IncorrectPassword)?;

        self.step = ForgotPinStep::SetNewPin;
        Ok(())
    }

    /// Step two; only reachable after the password has been verified.
    /// Resets to step one after a successful save.
    pub async fn save_new_pin<P: PinStore>(
        &mut self,
        pins: &PinService<P>,
        uid: &str,
        new_pin: &str,
        confirm: &str,
    ) -> Result<String, PinError> {
        if self.step != ForgotPinStep::SetNewPin {
            return Err(PinError::PasswordNotVerified);
        }

        let ciphertext = pins.setup(uid, new_pin, confirm).await?;
        self.step = ForgotPinStep::VerifyPassword;
        Ok(ciphertext)
    }
}

impl Default for ForgotPinFlow {
    fn default() -> Self {
        Self::new()
    }
}
