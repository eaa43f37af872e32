use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use beacon_types::CustomGroupRegistry;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Surface presentation errors (bad sort keys) as 500s.
    pub debug: bool,
    pub custom_groups: CustomGroupRegistry,
    /// Staff account created or promoted at startup.
    pub admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("BEACON_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BEACON_JWT_SECRET is unset or still a placeholder");
        }

        let port = match var("BEACON_PORT") {
            Some(port) => port.parse().context("BEACON_PORT must be a port number")?,
            None => 3000,
        };
        let debug = var("BEACON_DEBUG")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let custom_groups = CustomGroupRegistry::from_config(&var("BEACON_CUSTOM_GROUPS").unwrap_or_default())
            .context("invalid BEACON_CUSTOM_GROUPS")?;
        let admin = match (var("BEACON_ADMIN_USERNAME"), var("BEACON_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            (Some(_), _) => bail!("BEACON_ADMIN_USERNAME is set but BEACON_ADMIN_PASSWORD is not"),
            _ => None,
        };

        Ok(Self {
            jwt_secret,
            db_path: var("BEACON_DB_PATH").unwrap_or_else(|| "beacon.db".into()).into(),
            host: var("BEACON_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            debug,
            custom_groups,
            admin,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
