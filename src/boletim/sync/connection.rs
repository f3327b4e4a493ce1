//! Connection establishment with bounded retries.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::boletim::sync::config::RetryPolicy;
use crate::boletim::sync::error::{Result, SyncError};
use crate::boletim::sync::model::CredentialBundle;

/// Builds an authenticated client and checks that it can reach a resource.
pub trait Connector {
    type Client;

    fn authorize(&self, credentials: &CredentialBundle) -> Result<Self::Client>;

    /// Opens the target resource with the freshly built client.
    fn probe(&self, client: &mut Self::Client, resource_id: &str) -> Result<()>;
}

/// How a failed attempt is treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Signature timing / clock skew rejected by the token service.
    ClockSkew,
    /// The identity authenticated but lacks access to the resource.
    Forbidden,
    Other,
}

pub fn classify(error: &SyncError) -> FailureClass {
    if let SyncError::Api { status: 403, .. } = error {
        return FailureClass::Forbidden;
    }
    let text = error.to_string().to_lowercase();
    if text.contains("invalid_grant") || text.contains("jwt") {
        FailureClass::ClockSkew
    } else if text.contains("forbidden") || text.contains("permission") {
        FailureClass::Forbidden
    } else {
        FailureClass::Other
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionManager {
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Connects with `std::thread::sleep` between attempts.
    pub fn connect<C: Connector>(
        &self,
        connector: &C,
        credentials: &CredentialBundle,
        resource_id: &str,
    ) -> Result<C::Client> {
        self.connect_with(connector, credentials, resource_id, std::thread::sleep)
    }

    /// Connects, calling `sleep` for every backoff so callers control time.
    #[instrument(level = "info", skip_all, fields(resource = resource_id))]
    pub fn connect_with<C, S>(
        &self,
        connector: &C,
        credentials: &CredentialBundle,
        resource_id: &str,
        mut sleep: S,
    ) -> Result<C::Client>
    where
        C: Connector,
        S: FnMut(Duration),
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            info!(
                attempt,
                max_attempts,
                credentials = %credentials.path.display(),
                "connecting to spreadsheet service"
            );
            let error = match self.attempt(connector, credentials, resource_id) {
                Ok(client) => return Ok(client),
                Err(error) => error,
            };
            warn!(attempt, %error, "connection attempt failed");

            if attempt >= max_attempts {
                return Err(SyncError::ConnectionExhausted {
                    resource: resource_id.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = match classify(&error) {
                FailureClass::ClockSkew => {
                    warn!("token rejected, check the system clock");
                    self.policy.clock_skew_delay(attempt)
                }
                _ => self.policy.base_delay(attempt),
            };
            info!(delay_secs = delay.as_secs(), "waiting before retry");
            sleep(delay);
            attempt += 1;
        }
    }

    fn attempt<C: Connector>(
        &self,
        connector: &C,
        credentials: &CredentialBundle,
        resource_id: &str,
    ) -> Result<C::Client> {
        let mut client = connector.authorize(credentials)?;
        match connector.probe(&mut client, resource_id) {
            Ok(()) => {
                info!("connection established");
                Ok(client)
            }
            Err(error) if classify(&error) == FailureClass::Forbidden => {
                warn!(%error, "connected, but the identity has no access to the resource");
                Ok(client)
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    struct Scripted {
        outcomes: RefCell<VecDeque<Result<()>>>,
        calls: RefCell<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<()>>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl Connector for Scripted {
        type Client = ();

        fn authorize(&self, _credentials: &CredentialBundle) -> Result<()> {
            *self.calls.borrow_mut() += 1;
            self.outcomes.borrow_mut().pop_front().unwrap_or(Ok(()))
        }

        fn probe(&self, _client: &mut (), _resource_id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct ForbiddenProbe;

    impl Connector for ForbiddenProbe {
        type Client = u8;

        fn authorize(&self, _credentials: &CredentialBundle) -> Result<u8> {
            Ok(7)
        }

        fn probe(&self, _client: &mut u8, _resource_id: &str) -> Result<()> {
            Err(SyncError::Api {
                status: 403,
                message: "The caller does not have permission".into(),
            })
        }
    }

    fn bundle() -> CredentialBundle {
        CredentialBundle {
            path: PathBuf::from("credentials.json"),
            valid: true,
            client_email: Some("bot@example.iam".into()),
            checklist: Vec::new(),
        }
    }

    fn skew() -> SyncError {
        SyncError::Api {
            status: 400,
            message: r#"{"error":"invalid_grant","error_description":"Invalid JWT Signature."}"#
                .into(),
        }
    }

    #[test]
    fn succeeds_on_third_attempt_after_clock_skew() {
        let connector = Scripted::new(vec![Err(skew()), Err(skew()), Ok(())]);
        let mut delays = Vec::new();
        let manager = ConnectionManager::new(RetryPolicy::default());

        manager
            .connect_with(&connector, &bundle(), "sheet", |delay| delays.push(delay))
            .expect("third attempt succeeds");

        assert_eq!(*connector.calls.borrow(), 3);
        assert_eq!(
            delays,
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[test]
    fn exhausting_attempts_reports_count_and_cause() {
        let connector = Scripted::new(vec![Err(skew()), Err(skew()), Err(skew()), Err(skew())]);
        let manager = ConnectionManager::new(RetryPolicy::default());

        let error = manager
            .connect_with(&connector, &bundle(), "sheet", |_| {})
            .expect_err("attempts exhausted");

        match error {
            SyncError::ConnectionExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(classify(&source), FailureClass::ClockSkew);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*connector.calls.borrow(), 3);
    }

    #[test]
    fn other_failures_use_short_backoff() {
        let timeout = || SyncError::Api {
            status: 503,
            message: "backend unavailable".into(),
        };
        let connector = Scripted::new(vec![Err(timeout()), Ok(())]);
        let mut delays = Vec::new();
        ConnectionManager::default()
            .connect_with(&connector, &bundle(), "sheet", |delay| delays.push(delay))
            .expect("second attempt succeeds");
        assert_eq!(delays, vec![Duration::from_secs(2)]);
    }

    #[test]
    fn forbidden_probe_counts_as_connected() {
        let client = ConnectionManager::default()
            .connect_with(&ForbiddenProbe, &bundle(), "sheet", |_| {
                panic!("no retry expected")
            })
            .expect("forbidden is reachable");
        assert_eq!(client, 7);
    }
}
