//! Server configuration
//!
//! TOML file, then `QUOTAGATE_*` environment overrides, then command-line
//! flags applied by the binary.

use anyhow::{bail, Context};
use quotagate_core::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub listen_addr: String,
    /// Seconds between housekeeping sweeps, 0 disables them
    pub housekeeping_interval_secs: u64,
    /// Core settings
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            housekeeping_interval_secs: 300,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&content).with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document, missing keys take their defaults
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay values from `lookup`, normally the process environment
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("QUOTAGATE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(secret) = lookup("QUOTAGATE_JWT_SECRET") {
            self.gateway.auth.jwt_secret = secret;
        }
        if let Some(issuer) = lookup("QUOTAGATE_JWT_ISSUER") {
            self.gateway.auth.jwt_issuer = issuer;
        }
        if let Some(audience) = lookup("QUOTAGATE_JWT_AUDIENCE") {
            self.gateway.auth.jwt_audience = audience;
        }
        if let Some(offset) = lookup("QUOTAGATE_DAY_OFFSET_MINUTES") {
            self.gateway.reconciler.day_offset_minutes = offset
                .parse()
                .with_context(|| format!("QUOTAGATE_DAY_OFFSET_MINUTES={}", offset))?;
        }
        if let Some(timeout) = lookup("QUOTAGATE_STORE_TIMEOUT_MS") {
            self.gateway.store.timeout_ms = timeout
                .parse()
                .with_context(|| format!("QUOTAGATE_STORE_TIMEOUT_MS={}", timeout))?;
        }
        Ok(())
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.auth.jwt_secret.trim().is_empty() {
            bail!("jwt secret is empty; set gateway.auth.jwt_secret or QUOTAGATE_JWT_SECRET");
        }
        let offset = self.gateway.reconciler.day_offset_minutes;
        if offset.abs() >= 24 * 60 {
            bail!("day_offset_minutes must be within one day, got {}", offset);
        }
        if self.gateway.store.timeout_ms == 0 {
            bail!("store timeout must be positive");
        }
        self.gateway.rate_limits.validate()?;
        Ok(())
    }
}
