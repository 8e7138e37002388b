//! Classifies whether the backend can be used at all.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::ConfigError,
    gateway::{Gateway, GatewayError},
};

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Bounds on how long the probe keeps retrying an unreachable backend.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct ProbeSettings {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProbeState {
    /// No check has been started yet.
    Uninitialized,
    /// A check is in progress. `attempt` counts from 1.
    Connecting { attempt: u32 },
    Ready,
    Error(ProbeFailure),
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ProbeFailure {
    #[error("{variable} is not configured")]
    MissingConfiguration { variable: &'static str },
    #[error("{variable} has an invalid value")]
    InvalidConfiguration { variable: &'static str },
    #[error("the backend rejected the access key")]
    InvalidCredentials,
    #[error("could not reach the backend: {message}")]
    Network { message: String },
    #[error("the backend check failed: {message}")]
    Unclassified { message: String },
}

impl ProbeState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeState::Ready)
    }

    /// The text of the status banner, or `None` if no banner is shown.
    pub fn banner(&self) -> Option<String> {
        match self {
            ProbeState::Uninitialized | ProbeState::Ready => None,
            ProbeState::Connecting { attempt: 1 } => {
                Some("Connecting to the backend...".to_owned())
            }
            ProbeState::Connecting { attempt } => {
                Some(format!("Connecting to the backend (attempt {attempt})..."))
            }
            ProbeState::Error(ProbeFailure::MissingConfiguration { variable }) => {
                Some(format!("The backend is not configured. Set {variable} and restart."))
            }
            ProbeState::Error(ProbeFailure::InvalidConfiguration { variable }) => {
                Some(format!("The backend configuration is invalid. Fix {variable} and restart."))
            }
            ProbeState::Error(failure) => Some(format!("Could not connect: {failure}.")),
        }
    }
}

/// What a single ping says about the backend.
enum Outcome {
    Ready,
    Retry(String),
    Fail(ProbeFailure),
}

/// Missing tables and denied reads still prove that the network path and the
/// access key work.
fn classify(result: Result<(), GatewayError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Ready,
        Err(GatewayError::RelationNotFound { message }) => {
            warn!("backend reachable but the schema is incomplete: {message}");
            Outcome::Ready
        }
        Err(GatewayError::PermissionDenied { message }) => {
            warn!("backend reachable but reads are denied: {message}");
            Outcome::Ready
        }
        Err(GatewayError::InvalidCredentials { .. }) => {
            Outcome::Fail(ProbeFailure::InvalidCredentials)
        }
        Err(GatewayError::Network { message }) => Outcome::Retry(message),
        Err(e @ GatewayError::Backend { .. }) => Outcome::Fail(ProbeFailure::Unclassified {
            message: e.to_string(),
        }),
    }
}

/// Checks the backend with a bounded number of pings and keeps the resulting
/// state for the status banner.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    settings: ProbeSettings,
    state: ProbeState,
}

impl ConnectivityProbe {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            settings,
            state: ProbeState::Uninitialized,
        }
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    pub fn banner(&self) -> Option<String> {
        self.state.banner()
    }

    /// Records that the backend cannot even be addressed because a setting is
    /// missing or unusable. No request is made.
    pub fn fail_configuration(&mut self, error: &ConfigError) -> &ProbeState {
        let failure = match *error {
            ConfigError::Missing { variable } => ProbeFailure::MissingConfiguration { variable },
            ConfigError::Invalid { variable, .. } => {
                ProbeFailure::InvalidConfiguration { variable }
            }
        };
        self.state = ProbeState::Error(failure);
        &self.state
    }

    /// Pings once, without retrying.
    pub async fn check<G: Gateway>(&mut self, gateway: &G) -> &ProbeState {
        self.state = match classify(gateway.ping().await) {
            Outcome::Ready => ProbeState::Ready,
            Outcome::Retry(message) => ProbeState::Error(ProbeFailure::Network { message }),
            Outcome::Fail(failure) => ProbeState::Error(failure),
        };
        &self.state
    }

    /// Pings until the backend is classified. Network failures are retried
    /// after the retry interval until the attempts run out; any other failure
    /// ends the probe at once.
    pub async fn run<G: Gateway>(&mut self, gateway: &G) -> &ProbeState {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.state = ProbeState::Connecting { attempt };
            debug!(attempt, "probing backend");
            match classify(gateway.ping().await) {
                Outcome::Ready => {
                    info!(attempt, "backend ready");
                    self.state = ProbeState::Ready;
                    break;
                }
                Outcome::Fail(failure) => {
                    warn!(%failure, "backend check failed");
                    self.state = ProbeState::Error(failure);
                    break;
                }
                Outcome::Retry(message) if attempt >= max_attempts => {
                    warn!(attempt, "giving up on the backend: {message}");
                    self.state = ProbeState::Error(ProbeFailure::Network { message });
                    break;
                }
                Outcome::Retry(message) => {
                    debug!(attempt, "backend unreachable, retrying: {message}");
                    sleep(self.settings.retry_interval).await;
                    attempt += 1;
                }
            }
        }
        &self.state
    }
}

#[cfg(test)]
mod test {
    use tokio::time::Instant;

    use super::*;
    use crate::{
        data::Table,
        gateway::memory::{MemoryGateway, Operation},
    };

    fn network(message: &str) -> GatewayError {
        GatewayError::Network {
            message: message.to_owned(),
        }
    }

    #[tokio::test]
    async fn missing_tables_and_denied_reads_count_as_ready() {
        let gateway = MemoryGateway::new();
        let mut probe = ConnectivityProbe::new(ProbeSettings::default());
        assert_eq!(probe.state(), &ProbeState::Uninitialized);
        assert_eq!(probe.check(&gateway).await, &ProbeState::Ready);

        let missing = GatewayError::RelationNotFound {
            message: "relation \"categories\" does not exist".to_owned(),
        };
        gateway.script_ping_failures([missing]);
        assert_eq!(probe.check(&gateway).await, &ProbeState::Ready);

        gateway.deny(Table::Categories, Operation::Select);
        assert_eq!(probe.check(&gateway).await, &ProbeState::Ready);
        assert_eq!(probe.banner(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failures_are_retried_until_ready() {
        let gateway = MemoryGateway::new();
        gateway.script_ping_failures([network("down"), network("down"), network("down")]);
        let mut probe = ConnectivityProbe::new(ProbeSettings::default());

        let start = Instant::now();
        assert_eq!(probe.run(&gateway).await, &ProbeState::Ready);
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_gives_up_after_the_last_attempt() {
        let gateway = MemoryGateway::new();
        gateway.script_ping_failures((0..5).map(|i| network(&format!("down {i}"))));
        let settings = ProbeSettings {
            max_attempts: 3,
            retry_interval: Duration::from_millis(500),
        };
        let mut probe = ConnectivityProbe::new(settings);

        let start = Instant::now();
        let last_failure = ProbeFailure::Network {
            message: "down 2".to_owned(),
        };
        assert_eq!(probe.run(&gateway).await, &ProbeState::Error(last_failure));
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1500));
        assert!(probe.banner().unwrap().starts_with("Could not connect"));

        // the remaining scripted failures were not consumed
        assert!(gateway.ping().await.is_err());
        assert!(gateway.ping().await.is_err());
        assert!(gateway.ping().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credentials_end_the_probe_at_once() {
        let gateway = MemoryGateway::new();
        let rejected = GatewayError::InvalidCredentials {
            message: "Invalid API key".to_owned(),
        };
        gateway.script_ping_failures([rejected]);
        let mut probe = ConnectivityProbe::new(ProbeSettings::default());

        let start = Instant::now();
        let state = probe.run(&gateway).await;
        assert_eq!(state, &ProbeState::Error(ProbeFailure::InvalidCredentials));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn unclassified_failures_are_terminal() {
        let gateway = MemoryGateway::new();
        let internal = GatewayError::Backend {
            code: Some("XX000".to_owned()),
            message: "internal error".to_owned(),
            details: None,
            hint: None,
        };
        gateway.script_ping_failures([internal]);
        let mut probe = ConnectivityProbe::new(ProbeSettings::default());
        assert!(matches!(
            probe.run(&gateway).await,
            ProbeState::Error(ProbeFailure::Unclassified { .. })
        ));
    }

    #[test]
    fn banners_describe_each_state() {
        assert_eq!(ProbeState::Uninitialized.banner(), None);
        assert_eq!(
            ProbeState::Connecting { attempt: 1 }.banner().as_deref(),
            Some("Connecting to the backend...")
        );
        let retrying = ProbeState::Connecting { attempt: 4 }.banner().unwrap();
        assert!(retrying.contains("attempt 4"));

        let mut probe = ConnectivityProbe::new(ProbeSettings::default());
        probe.fail_configuration(&ConfigError::Missing {
            variable: "BALLOT_URL",
        });
        assert_eq!(
            probe.banner().as_deref(),
            Some("The backend is not configured. Set BALLOT_URL and restart.")
        );
    }

    #[test]
    fn invalid_settings_are_not_reported_as_missing() {
        let mut probe = ConnectivityProbe::new(ProbeSettings::default());
        let state = probe.fail_configuration(&ConfigError::Invalid {
            variable: "BALLOT_PROBE_ATTEMPTS",
            value: "many".to_owned(),
            reason: "invalid digit found in string".to_owned(),
        });
        assert_eq!(
            state,
            &ProbeState::Error(ProbeFailure::InvalidConfiguration {
                variable: "BALLOT_PROBE_ATTEMPTS",
            })
        );
        let banner = probe.banner().unwrap();
        assert!(banner.starts_with("The backend configuration is invalid."));
        assert!(banner.contains("Fix BALLOT_PROBE_ATTEMPTS"));
    }
}
