use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{debug, info};

use crate::{probe::ProbeSettings, submit::SubmitStrategy};

pub const URL_VAR: &str = "BALLOT_URL";
pub const PUBLIC_KEY_VAR: &str = "BALLOT_PUBLIC_KEY";
pub const ADMIN_PASSWORD_VAR: &str = "BALLOT_ADMIN_PASSWORD";
pub const VOTE_STRATEGY_VAR: &str = "BALLOT_VOTE_STRATEGY";
pub const PROBE_ATTEMPTS_VAR: &str = "BALLOT_PROBE_ATTEMPTS";
pub const PROBE_INTERVAL_VAR: &str = "BALLOT_PROBE_INTERVAL_MS";
pub const POLL_INTERVAL_VAR: &str = "BALLOT_POLL_INTERVAL_MS";
pub const VOTER_ID_FILE_VAR: &str = "BALLOT_VOTER_ID_FILE";

const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Settings of a ballot client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base endpoint of the hosted backend.
    pub url: String,
    /// Public access key of the hosted backend.
    pub public_key: String,
    /// The string that unlocks the admin operations. Admin operations are
    /// unavailable when unset.
    pub admin_password: Option<String>,
    pub vote_strategy: SubmitStrategy,
    pub probe: ProbeSettings,
    /// How often the realtime feed re-reads the tables.
    pub poll_interval: Duration,
    /// Overrides where the voter identifier is kept.
    pub voter_id_file: Option<PathBuf>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{variable} is not set")]
    Missing { variable: &'static str },
    #[error("invalid value {value:?} for {variable}: {reason}")]
    Invalid {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    /// Loads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |variable: &'static str| {
            lookup(variable)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing { variable })
        };
        let url = required(URL_VAR)?;
        let public_key = required(PUBLIC_KEY_VAR)?;

        let defaults = ProbeSettings::default();
        let probe = ProbeSettings {
            max_attempts: try_load(&lookup, PROBE_ATTEMPTS_VAR, defaults.max_attempts)?,
            retry_interval: Duration::from_millis(try_load(
                &lookup,
                PROBE_INTERVAL_VAR,
                defaults.retry_interval.as_millis() as u64,
            )?),
        };

        let poll_interval_ms = try_load(&lookup, POLL_INTERVAL_VAR, DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                variable: POLL_INTERVAL_VAR,
                value: poll_interval_ms.to_string(),
                reason: "must be greater than zero".to_owned(),
            });
        }

        let admin_password = lookup(ADMIN_PASSWORD_VAR).filter(|p| !p.is_empty());
        Ok(Self {
            url,
            public_key,
            admin_password,
            vote_strategy: try_load(&lookup, VOTE_STRATEGY_VAR, SubmitStrategy::default())?,
            probe,
            poll_interval: Duration::from_millis(poll_interval_ms),
            voter_id_file: lookup(VOTER_ID_FILE_VAR).map(PathBuf::from),
        })
    }
}

impl ConfigError {
    /// Setup instructions for the operator.
    pub fn remediation(&self) -> String {
        match self {
            ConfigError::Missing { .. } => format!(
                "set {URL_VAR} to the backend endpoint (e.g. https://<project>.supabase.co) and \
                 {PUBLIC_KEY_VAR} to its public access key, then restart"
            ),
            ConfigError::Invalid { variable, .. } => {
                format!("fix or unset {variable}, then restart")
            }
        }
    }
}

fn try_load<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    variable: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(value) = lookup(variable) else {
        debug!("{variable} not set, using default: {default}");
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            info!("{variable} set to {parsed}");
            Ok(parsed)
        }
        Err(e) => Err(ConfigError::Invalid {
            variable,
            value,
            reason: e.to_string(),
        }),
    }
}
