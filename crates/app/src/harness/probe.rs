use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};
use ureq::Agent;

use super::{CommandLine, CommandRunner, LifecycleError, pods::PodList};

/// Path appended to the API base URL to decide whether the compose stack is up.
pub const HEALTH_PATH: &str = "api/v1/analyses/";

const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_SETTLE: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(1);

/// One readiness observation of the system under test.
pub trait ReadinessCheck {
    /// `Ok(false)` means "not ready yet"; errors abort the wait.
    fn poll(&self) -> Result<bool, LifecycleError>;

    /// Like [`poll`](Self::poll), but should not block much longer than `budget`.
    fn poll_within(&self, _budget: Duration) -> Result<bool, LifecycleError> {
        self.poll()
    }

    fn describe(&self) -> String;
}

/// GET against a health URL; HTTP 200 means ready.
///
/// Any other status, and any transport failure (refused, reset, timed out, garbled response),
/// means "not ready yet". Only errors in the request itself, such as an unparsable URL, abort.
pub struct HttpHealthCheck {
    url: String,
    agent: Agent,
}

impl HttpHealthCheck {
    pub fn new(url: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            url: url.into(),
            agent,
        }
    }

    /// Health check for the analyses API rooted at `base_url` (which ends with `/`).
    pub fn for_api(base_url: &str) -> Self {
        Self::new(format!("{base_url}{HEALTH_PATH}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReadinessCheck for HttpHealthCheck {
    fn poll(&self) -> Result<bool, LifecycleError> {
        self.poll_within(REQUEST_TIMEOUT)
    }

    fn poll_within(&self, budget: Duration) -> Result<bool, LifecycleError> {
        let timeout = budget.clamp(MIN_REQUEST_TIMEOUT, REQUEST_TIMEOUT);
        let request = self
            .agent
            .get(&self.url)
            .config()
            .timeout_global(Some(timeout))
            .build();
        match request.call() {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %self.url, status, "health probe answered");
                Ok(status == 200)
            }
            Err(
                err @ (ureq::Error::Io(_)
                | ureq::Error::ConnectionFailed
                | ureq::Error::HostNotFound
                | ureq::Error::Timeout(_)
                | ureq::Error::Protocol(_)
                | ureq::Error::ConnectProxyFailed(_)
                | ureq::Error::Tls(_)),
            ) => {
                debug!(url = %self.url, %err, "health endpoint not reachable yet");
                Ok(false)
            }
            Err(err) => Err(LifecycleError::Probe {
                url: self.url.clone(),
                message: err.to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }
}

/// Cluster pod listing; ready once every pod is running with all `Ready` conditions true.
pub struct PodStatusCheck {
    runner: Arc<dyn CommandRunner>,
    command: CommandLine,
}

impl PodStatusCheck {
    pub fn new(runner: Arc<dyn CommandRunner>, command: CommandLine) -> Self {
        Self { runner, command }
    }
}

impl ReadinessCheck for PodStatusCheck {
    fn poll(&self) -> Result<bool, LifecycleError> {
        let output = self.runner.run(&self.command)?;
        let pods = PodList::parse(&output.stdout).map_err(|source| LifecycleError::PodStatus {
            command: self.command.to_string(),
            source,
        })?;
        if pods.all_ready() {
            return Ok(true);
        }
        debug!(
            total = pods.items.len(),
            pending = ?pods.pending(),
            "cluster pods not ready yet"
        );
        Ok(false)
    }

    fn describe(&self) -> String {
        self.command.to_string()
    }
}

/// Sleep-poll loop with a wall-clock deadline and a post-ready settle delay.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProber {
    tick: Duration,
    settle: Duration,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl ReadinessProber {
    pub fn new(tick: Duration, settle: Duration) -> Self {
        Self { tick, settle }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Poll `check` once per tick until it succeeds or `deadline` has elapsed.
    ///
    /// The settle delay runs after the first successful poll and is not checked against the
    /// deadline. Returns the time spent before settling.
    pub fn wait_until_ready(
        &self,
        deadline: Duration,
        check: &dyn ReadinessCheck,
    ) -> Result<Duration, LifecycleError> {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return Err(LifecycleError::ReadinessTimeout { elapsed, deadline });
            }
            thread::sleep(self.tick);
            polls += 1;
            if check.poll_within(deadline.saturating_sub(start.elapsed()))? {
                let elapsed = start.elapsed();
                info!(
                    probe = %check.describe(),
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    settle_ms = self.settle.as_millis() as u64,
                    "system ready; settling"
                );
                thread::sleep(self.settle);
                return Ok(elapsed);
            }
        }
    }
}
