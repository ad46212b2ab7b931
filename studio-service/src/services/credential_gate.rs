//! Single-account credential gate in front of the studio.

use secrecy::{ExposeSecret, Secret};
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::error::GateError;
use crate::services::metrics;

pub const DEFAULT_USERNAME: &str = "kalky";
pub const DEFAULT_PASSWORD: &str = "Sivam@111";
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

pub struct CredentialGate {
    username: String,
    password: Secret<String>,
    delay: Duration,
}

impl CredentialGate {
    pub fn new(username: impl Into<String>, password: Secret<String>, delay: Duration) -> Self {
        Self {
            username: username.into(),
            password,
            delay,
        }
    }

    /// Check a username/password pair.
    ///
    /// Every attempt waits the configured delay before answering, whatever
    /// the outcome. Both fields are compared exactly: no trimming, no case
    /// folding.
    pub async fn verify(&self, username: &str, password: &str) -> Result<(), GateError> {
        tokio::time::sleep(self.delay).await;

        let user_ok = username.as_bytes().ct_eq(self.username.as_bytes());
        let pass_ok = password
            .as_bytes()
            .ct_eq(self.password.expose_secret().as_bytes());

        if bool::from(user_ok & pass_ok) {
            tracing::info!("Credential gate opened");
            metrics::record_login("success");
            Ok(())
        } else {
            tracing::warn!("Credential gate rejected an attempt");
            metrics::record_login("rejected");
            Err(GateError::InvalidCredentials)
        }
    }
}

impl Default for CredentialGate {
    fn default() -> Self {
        Self::new(
            DEFAULT_USERNAME,
            Secret::new(DEFAULT_PASSWORD.to_string()),
            DEFAULT_DELAY,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn quick_gate() -> CredentialGate {
        CredentialGate::new(
            DEFAULT_USERNAME,
            Secret::new(DEFAULT_PASSWORD.to_string()),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn correct_pair_opens_after_default_delay() {
        let gate = CredentialGate::default();
        let start = Instant::now();

        assert_eq!(gate.verify("kalky", "Sivam@111").await, Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn wrong_pairs_get_the_same_error() {
        let gate = quick_gate();

        for (user, pass) in [
            ("kalky", "wrong"),
            ("someone", "Sivam@111"),
            ("Kalky", "Sivam@111"),
            ("kalky ", "Sivam@111"),
            ("kalky", "sivam@111"),
            ("", ""),
        ] {
            let start = Instant::now();
            assert_eq!(
                gate.verify(user, pass).await,
                Err(GateError::InvalidCredentials)
            );
            assert!(start.elapsed() >= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn configured_credentials_replace_defaults() {
        let gate = CredentialGate::new(
            "studio",
            Secret::new("letmein".to_string()),
            Duration::ZERO,
        );
        assert!(gate.verify("studio", "letmein").await.is_ok());
        assert!(gate.verify("kalky", "Sivam@111").await.is_err());
    }
}
