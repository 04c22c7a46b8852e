//! Server configuration read from the environment.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    /// Without a database url the server keeps its data in memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Shown to users with overdue payments.
    pub finance_email: String,
    pub payment_account: String,
    pub review_ttl: Duration,
    pub session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_url: None,
            db_max_connections: 5,
            finance_email: "finance@tanzquotient.org".to_string(),
            payment_account: String::new(),
            review_ttl: Duration::minutes(60),
            session_ttl: Duration::days(2),
        }
    }
}

impl Config {
    /// Reads the configuration.
    ///
    /// # Environment Variables
    /// - `TQ_BIND` (default `127.0.0.1:3000`)
    /// - `DATABASE_URL` (optional)
    /// - `TQ_DB_MAX_CONNECTIONS` (default 5)
    /// - `TQ_FINANCE_EMAIL`, `TQ_PAYMENT_ACCOUNT`
    /// - `TQ_REVIEW_TTL_MINUTES` (default 60)
    /// - `TQ_SESSION_DAYS` (default 2)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind: parsed("TQ_BIND")?.unwrap_or(defaults.bind),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            db_max_connections: parsed("TQ_DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
            finance_email: env::var("TQ_FINANCE_EMAIL")
                .unwrap_or(defaults.finance_email),
            payment_account: env::var("TQ_PAYMENT_ACCOUNT")
                .unwrap_or(defaults.payment_account),
            review_ttl: parsed("TQ_REVIEW_TTL_MINUTES")?
                .map(Duration::minutes)
                .unwrap_or(defaults.review_ttl),
            session_ttl: parsed("TQ_SESSION_DAYS")?
                .map(Duration::days)
                .unwrap_or(defaults.session_ttl),
        })
    }
}

fn parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value `{}`", name, value)),
        Err(_) => Ok(None),
    }
}
