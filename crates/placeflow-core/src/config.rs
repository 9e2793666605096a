// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use chrono::Duration;

/// Placeflow engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL or file path
    pub database_url: String,
    /// Engine tuning derived from the environment
    pub settings: EngineSettings,
}

/// Tunable engine settings with deployment defaults.
///
/// TTLs follow the production defaults: 30 days for third-party quote
/// links, 72 hours for signature links, 7 days for upload links.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Base URL external capability links are minted under.
    pub link_base_url: String,
    /// TTL for third-party quote links.
    pub quote_ttl: Duration,
    /// TTL for signature links (contract, COHF, work order).
    pub signature_ttl: Duration,
    /// TTL for upload links (documents, third-party contract).
    pub upload_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            link_base_url: "https://portal.placeflow.io".to_string(),
            quote_ttl: Duration::days(30),
            signature_ttl: Duration::hours(72),
            upload_ttl: Duration::days(7),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PLACEFLOW_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `PLACEFLOW_LINK_BASE_URL`: base URL for external links
    ///   (default: `https://portal.placeflow.io`)
    /// - `PLACEFLOW_QUOTE_TTL_DAYS`: quote link TTL in days (default: 30)
    /// - `PLACEFLOW_SIGNATURE_TTL_HOURS`: signature link TTL in hours
    ///   (default: 72)
    /// - `PLACEFLOW_UPLOAD_TTL_DAYS`: upload link TTL in days (default: 7)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("PLACEFLOW_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("PLACEFLOW_DATABASE_URL"))?;

        let link_base_url = std::env::var("PLACEFLOW_LINK_BASE_URL")
            .unwrap_or_else(|_| "https://portal.placeflow.io".to_string());

        let quote_ttl_days: i64 = std::env::var("PLACEFLOW_QUOTE_TTL_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PLACEFLOW_QUOTE_TTL_DAYS", "must be a positive integer")
            })?;

        let signature_ttl_hours: i64 = std::env::var("PLACEFLOW_SIGNATURE_TTL_HOURS")
            .unwrap_or_else(|_| "72".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PLACEFLOW_SIGNATURE_TTL_HOURS", "must be a positive integer")
            })?;

        let upload_ttl_days: i64 = std::env::var("PLACEFLOW_UPLOAD_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PLACEFLOW_UPLOAD_TTL_DAYS", "must be a positive integer")
            })?;

        if quote_ttl_days <= 0 || signature_ttl_hours <= 0 || upload_ttl_days <= 0 {
            return Err(ConfigError::Invalid(
                "PLACEFLOW_*_TTL",
                "TTLs must be positive",
            ));
        }

        Ok(Self {
            database_url,
            settings: EngineSettings {
                link_base_url,
                quote_ttl: Duration::days(quote_ttl_days),
                signature_ttl: Duration::hours(signature_ttl_hours),
                upload_ttl: Duration::days(upload_ttl_days),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
