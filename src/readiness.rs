//! # Readiness Polling
//!
//! Blocks test startup until the server under test reports that it has
//! finished loading, by polling `GET {base_url}/api/loader/status`.
//!
//! ## Classification
//!
//! Each attempt spends one unit of the retry budget, whatever its outcome.
//! Not-yet-loaded answers and transport errors draw from the same countdown.
//!
//! | Outcome | Budget left | Result |
//! |---|---|---|
//! | `loaded: false` | yes | sleep `interval`, retry |
//! | `loaded && success` | - | [`Ready`] |
//! | `loaded && !success` | - | [`ReadinessError::Failed`] |
//! | transport error / unreadable body | yes | sleep `interval`, retry |
//! | not loaded or transport error | no | [`ReadinessError::Exhausted`] |
//!
//! With `retries = n` at most `n + 1` requests are made. Requests never
//! overlap and the interval is fixed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::config::{ReadinessConfig, ServerConfig};
use crate::error::{ReadinessError, Result, TestEnvError};

pub const STATUS_PATH: &str = "/api/loader/status";
pub const DEFAULT_RETRIES: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Body of the loader status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoaderStatus {
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub success: bool,
}

/// A status request that did not produce a usable answer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("status request failed: {0}")]
    Transport(String),

    #[error("status body is not valid JSON: {0}")]
    InvalidBody(String),
}

/// One status request against the server under test
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn fetch_status(&self) -> std::result::Result<LoaderStatus, ProbeError>;

    /// What is being polled, for log output
    fn target(&self) -> &str;
}

/// Probes the status endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusProbe {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, None)
    }

    /// `timeout` bounds each request; `None` keeps the client default
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            TestEnvError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            url: format!("{}{STATUS_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn fetch_status(&self) -> std::result::Result<LoaderStatus, ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| ProbeError::InvalidBody(e.to_string()))
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// The server reported itself loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Requests made, including the successful one
    pub attempts: u32,
}

/// Bounded, sequential status polling
#[derive(Debug, Clone)]
pub struct ReadinessPoller<P = HttpStatusProbe> {
    probe: P,
    retries: u32,
    interval: Duration,
}

impl ReadinessPoller<HttpStatusProbe> {
    /// HTTP poller for `base_url`, or for the configured server when `None`
    pub fn http(
        base_url: Option<&str>,
        server: &ServerConfig,
        readiness: &ReadinessConfig,
    ) -> Result<Self> {
        let base_url = base_url
            .map(str::to_string)
            .unwrap_or_else(|| server.base_url());
        let probe = HttpStatusProbe::with_timeout(&base_url, readiness.request_timeout())?;

        Ok(Self::new(probe)
            .with_retries(readiness.retries)
            .with_interval(readiness.interval()))
    }
}

impl<P: StatusProbe> ReadinessPoller<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            retries: DEFAULT_RETRIES,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Budget of retries after the first attempt, shared by not-loaded answers
    /// and failed requests.
    ///
    /// `0` means a single attempt with no retries. It is not replaced by
    /// [`DEFAULT_RETRIES`]; leave the budget unset to get the default.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Poll until Ready, Failed or Exhausted
    pub async fn wait_until_ready(&self) -> std::result::Result<Ready, ReadinessError> {
        self.poll(None).await
    }

    /// Like [`Self::wait_until_ready`], but a message on `cancel` aborts the
    /// poll with [`ReadinessError::Cancelled`]. A closed channel never cancels.
    pub async fn wait_until_ready_with_cancel(
        &self,
        cancel: broadcast::Receiver<()>,
    ) -> std::result::Result<Ready, ReadinessError> {
        self.poll(Some(cancel)).await
    }

    async fn poll(
        &self,
        mut cancel: Option<broadcast::Receiver<()>>,
    ) -> std::result::Result<Ready, ReadinessError> {
        let target = self.probe.target();
        let mut remaining_retries = i64::from(self.retries);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(ReadinessError::Cancelled),
                outcome = self.probe.fetch_status() => outcome,
            };
            remaining_retries -= 1;
            let can_retry = remaining_retries >= 0;

            match outcome {
                Ok(status) if !status.loaded => {
                    if !can_retry {
                        warn!(url = %target, attempts, "Server still not loaded, retries exhausted");
                        return Err(ReadinessError::Exhausted);
                    }
                    debug!(url = %target, attempt = attempts, remaining_retries, "Server not loaded yet");
                }
                Ok(status) if status.success => {
                    info!(url = %target, attempts, "Server is ready");
                    return Ok(Ready { attempts });
                }
                Ok(_) => {
                    warn!(url = %target, attempts, "Server reported a failed load");
                    return Err(ReadinessError::Failed);
                }
                Err(e) => {
                    if !can_retry {
                        warn!(url = %target, attempts, error = %e, "Server is not responding");
                        return Err(ReadinessError::Exhausted);
                    }
                    debug!(url = %target, attempt = attempts, remaining_retries, error = %e, "Status request failed");
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(ReadinessError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// Resolves when a cancellation arrives; pends forever without a live sender
async fn cancelled(cancel: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = cancel {
        if !matches!(rx.recv().await, Err(RecvError::Closed)) {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NOT_LOADED: LoaderStatus = LoaderStatus {
        loaded: false,
        success: false,
    };
    const READY: LoaderStatus = LoaderStatus {
        loaded: true,
        success: true,
    };

    type Answer = std::result::Result<LoaderStatus, ProbeError>;

    /// Replays a script, then repeats its last answer forever
    struct ScriptedProbe {
        script: Mutex<VecDeque<Answer>>,
        last: Mutex<Option<Answer>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Answer>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }

        fn always(answer: Answer) -> Self {
            Self::new(vec![answer])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn fetch_status(&self) -> Answer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(answer) => {
                    *self.last.lock() = Some(answer.clone());
                    answer
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .expect("scripted probe needs at least one answer"),
            }
        }

        fn target(&self) -> &str {
            "scripted"
        }
    }

    fn transport_error() -> Answer {
        Err(ProbeError::Transport("connection refused".to_string()))
    }

    fn poller(probe: ScriptedProbe, retries: u32) -> ReadinessPoller<ScriptedProbe> {
        ReadinessPoller::new(probe)
            .with_retries(retries)
            .with_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_ready_after_two_not_loaded_answers() {
        let poller = poller(
            ScriptedProbe::new(vec![Ok(NOT_LOADED), Ok(NOT_LOADED), Ok(READY)]),
            3,
        );

        let ready = poller.wait_until_ready().await.unwrap();

        assert_eq!(ready, Ready { attempts: 3 });
        assert_eq!(poller.probe().calls(), 3);
    }

    #[tokio::test]
    async fn test_not_loaded_forever_exhausts_after_retries_plus_one() {
        let poller = poller(ScriptedProbe::always(Ok(NOT_LOADED)), 2);

        let err = poller.wait_until_ready().await.unwrap_err();

        assert_eq!(err, ReadinessError::Exhausted);
        assert_eq!(err.to_string(), "Server is not responding");
        assert_eq!(poller.probe().calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_budget() {
        let poller = poller(ScriptedProbe::always(transport_error()), 1);

        let err = poller.wait_until_ready().await.unwrap_err();

        assert_eq!(err.to_string(), "Server is not responding");
        assert_eq!(poller.probe().calls(), 2);
    }

    #[tokio::test]
    async fn test_explicit_failure_stops_immediately() {
        let failed = LoaderStatus {
            loaded: true,
            success: false,
        };
        let poller = poller(ScriptedProbe::always(Ok(failed)), 5);

        let err = poller.wait_until_ready().await.unwrap_err();

        assert_eq!(err, ReadinessError::Failed);
        assert_eq!(err.to_string(), "Failed to load blockchain");
        assert_eq!(poller.probe().calls(), 1);
    }

    #[tokio::test]
    async fn test_not_loaded_and_errors_share_one_countdown() {
        let poller = poller(
            ScriptedProbe::new(vec![transport_error(), Ok(NOT_LOADED), transport_error()]),
            2,
        );

        assert_eq!(
            poller.wait_until_ready().await.unwrap_err(),
            ReadinessError::Exhausted
        );
        assert_eq!(poller.probe().calls(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_body_counts_as_failed_attempt() {
        let poller = poller(
            ScriptedProbe::new(vec![
                Err(ProbeError::InvalidBody("expected value".to_string())),
                Ok(READY),
            ]),
            1,
        );

        assert_eq!(
            poller.wait_until_ready().await.unwrap(),
            Ready { attempts: 2 }
        );
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let poller = poller(ScriptedProbe::always(transport_error()), 0);

        assert!(poller.wait_until_ready().await.is_err());
        assert_eq!(poller.probe().calls(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_spaced_by_interval() {
        let poller = ReadinessPoller::new(ScriptedProbe::new(vec![
            Ok(NOT_LOADED),
            Ok(NOT_LOADED),
            Ok(READY),
        ]))
        .with_retries(5)
        .with_interval(Duration::from_millis(25));

        let started = tokio::time::Instant::now();
        poller.wait_until_ready().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_cancel_aborts_poll() {
        let poller = ReadinessPoller::new(ScriptedProbe::always(Ok(NOT_LOADED)))
            .with_retries(1_000)
            .with_interval(Duration::from_millis(20));
        let (tx, rx) = broadcast::channel(1);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(()).ok();
        });

        let err = poller.wait_until_ready_with_cancel(rx).await.unwrap_err();
        canceller.await.unwrap();

        assert_eq!(err, ReadinessError::Cancelled);
        assert!(poller.probe().calls() < 1_000);
    }

    #[tokio::test]
    async fn test_closed_cancel_channel_never_cancels() {
        let poller = poller(
            ScriptedProbe::new(vec![Ok(NOT_LOADED), Ok(READY)]),
            3,
        );
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);

        assert_eq!(
            poller.wait_until_ready_with_cancel(rx).await.unwrap(),
            Ready { attempts: 2 }
        );
    }

    #[test]
    fn test_loader_status_defaults_missing_fields() {
        let status: LoaderStatus = serde_json::from_str(r#"{"loaded":true}"#).unwrap();
        assert_eq!(
            status,
            LoaderStatus {
                loaded: true,
                success: false
            }
        );

        let status: LoaderStatus =
            serde_json::from_str(r#"{"success":true,"loaded":true,"now":12,"blocksCount":3}"#)
                .unwrap();
        assert_eq!(status, READY);
    }

    #[test]
    fn test_http_probe_url() {
        let probe = HttpStatusProbe::new("http://127.0.0.1:4000/").unwrap();
        assert_eq!(probe.url(), "http://127.0.0.1:4000/api/loader/status");
    }

    #[test]
    fn test_http_poller_defaults_to_configured_server() {
        let server = ServerConfig {
            address: "10.0.0.5".to_string(),
            http_port: 4000,
        };
        let poller = ReadinessPoller::http(None, &server, &ReadinessConfig::default()).unwrap();
        assert_eq!(poller.probe().url(), "http://10.0.0.5:4000/api/loader/status");
        assert_eq!(poller.retries, DEFAULT_RETRIES);
        assert_eq!(poller.interval, DEFAULT_INTERVAL);
    }
}
