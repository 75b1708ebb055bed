//! Environment-only secrets.
//!
//! The trading process and the supervisor authenticate to the broker with
//! DISTINCT credential pairs; the supervisor's kill authority must survive
//! the trading process losing (or leaking) its own credentials.
//!
//! Variables:
//!   PDK_TRADING_BROKER_KEY_ID / PDK_TRADING_BROKER_SECRET
//!   PDK_SUPERVISOR_BROKER_KEY_ID / PDK_SUPERVISOR_BROKER_SECRET
//!   PDK_ANALYTICS_DATABASE_URL

use anyhow::{bail, Context, Result};

#[derive(Clone)]
pub struct BrokerCredentials {
    pub key_id: String,
    pub secret: String,
}

// Never derive Debug with the secret in it.
impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl BrokerCredentials {
    /// Read the credential pair for the given role prefix
    /// (`"PDK_TRADING"` or `"PDK_SUPERVISOR"`).
    pub fn from_env(prefix: &str) -> Result<Self> {
        let key_var = format!("{prefix}_BROKER_KEY_ID");
        let secret_var = format!("{prefix}_BROKER_SECRET");
        let key_id =
            std::env::var(&key_var).with_context(|| format!("missing env var {key_var}"))?;
        let secret =
            std::env::var(&secret_var).with_context(|| format!("missing env var {secret_var}"))?;
        if key_id.is_empty() || secret.is_empty() {
            bail!("broker credentials for {prefix} are empty");
        }
        Ok(Self { key_id, secret })
    }

    /// Placeholder pair for paper mode, where no upstream broker exists.
    pub fn paper() -> Self {
        Self {
            key_id: "paper".to_string(),
            secret: "paper".to_string(),
        }
    }
}

/// Analytical-store connection string, if configured in the environment.
pub fn analytics_database_url() -> Option<String> {
    std::env::var("PDK_ANALYTICS_DATABASE_URL")
        .ok()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let c = BrokerCredentials {
            key_id: "k".into(),
            secret: "very-secret".into(),
        };
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
