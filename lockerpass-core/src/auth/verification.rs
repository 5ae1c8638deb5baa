//! Email verification wait loop.
//!
//! After sign-up the account is unusable until its email is verified. The
//! client polls `reload` until the flag flips, inside an expiry window;
//! an expired window deletes the abandoned account. The returned future
//! owns its timers, so dropping it on teardown clears them.

use crate::auth::{AuthError, IdentityProvider, SessionUser};
use std::time::Duration;
use tracing::{debug, info};

/// How often the verification flag is re-checked.
pub const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long a fresh signup may remain unverified before cleanup.
pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// The email was verified; carries the refreshed user.
    Verified(SessionUser),
    /// The window elapsed; the unverified account has been deleted.
    Expired,
}

/// Wait until `user`'s email is verified or the window expires.
///
/// Resending the verification email restarts the window by calling this
/// again with a fresh `window`.
pub async fn await_verification<I>(
    identity: &I,
    user: &SessionUser,
    poll: Duration,
    window: Duration,
) -> Result<VerificationOutcome, AuthError>
where
    I: IdentityProvider + ?Sized,
{
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let refreshed = identity.reload(user).await?;
        if refreshed.email_verified {
            info!(uid = %refreshed.uid, "email verified");
            return Ok(VerificationOutcome::Verified(refreshed));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            info!(uid = %user.uid, "verification window expired, deleting unverified account");
            identity.delete_account(user).await?;
            return Ok(VerificationOutcome::Expired);
        }

        debug!(uid = %user.uid, "email not verified yet");
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
