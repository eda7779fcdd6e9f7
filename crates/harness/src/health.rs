//! Readiness polling for compose-managed service stacks

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use hubtest_common::Result;

/// Default number of polling attempts before giving up
pub const DEFAULT_ATTEMPTS: u32 = 30;
/// Default pause between polling attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// One service row as reported by the container runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub health: String,
}

impl ServiceStatus {
    /// Services without a healthcheck report an empty health string and
    /// count as ready
    pub fn is_ready(&self) -> bool {
        self.health == "healthy" || self.health.is_empty()
    }

    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.health)
    }
}

/// Source of service status samples, one sample per polling attempt
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn sample(&self) -> Result<Vec<ServiceStatus>>;
}

/// Outcome of a polling round; exhaustion is reported, not raised
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub attempts_used: u32,
    pub unhealthy: Vec<String>,
}

/// Polls a [`StatusProbe`] until every service is ready or the attempts
/// run out
#[derive(Debug, Clone)]
pub struct HealthPoller {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for HealthPoller {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl HealthPoller {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Sample until ready. Probe failures count as a failed attempt;
    /// cancellation aborts immediately.
    pub async fn wait_until_ready(&self, probe: &dyn StatusProbe) -> Result<HealthReport> {
        let mut last_unhealthy = Vec::new();

        for attempt in 1..=self.attempts {
            match probe.sample().await {
                Ok(services) => {
                    let unhealthy: Vec<String> = services
                        .iter()
                        .filter(|s| !s.is_ready())
                        .map(ServiceStatus::describe)
                        .collect();

                    if unhealthy.is_empty() {
                        debug!("All services healthy after {} attempt(s)", attempt);
                        return Ok(HealthReport {
                            healthy: true,
                            attempts_used: attempt,
                            unhealthy: Vec::new(),
                        });
                    }

                    debug!(
                        "Attempt {}/{}: waiting on {}",
                        attempt,
                        self.attempts,
                        unhealthy.join(", ")
                    );
                    last_unhealthy = unhealthy;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!(
                        "Attempt {}/{}: status probe failed: {}",
                        attempt, self.attempts, e
                    );
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        warn!(
            "Services not healthy after {} attempts: {}",
            self.attempts,
            if last_unhealthy.is_empty() {
                "no status reported".to_string()
            } else {
                last_unhealthy.join(", ")
            }
        );

        Ok(HealthReport {
            healthy: false,
            attempts_used: self.attempts,
            unhealthy: last_unhealthy,
        })
    }
}
