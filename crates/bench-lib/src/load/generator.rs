//! Open-loop HTTP load generator
//!
//! For every issue time produced by a [`RateController`] one request is
//! drawn from the selector and spawned. In-flight requests are bounded by
//! a semaphore; when it is exhausted requests queue for a permit, and
//! the wait shows up in their latency because durations are measured
//! from the scheduled issue time. Outcomes flow through an mpsc channel
//! to a single aggregator task.

use super::schedule::RateController;
use super::stats::round_report;
use crate::error::ConfigError;
use crate::models::{FailureKind, RequestOutcome, RoundReport, STATUS_NO_RESPONSE};
use crate::observability::HarnessMetrics;
use crate::workload::{EndpointTemplate, RequestContext, WeightedEndpointSelector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Configuration for one load generator
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Base URL of the target service, without trailing path
    pub base_url: String,
    /// Per-request timeout covering connect, send and body read
    pub request_timeout: Duration,
    /// Latency assumed when sizing the concurrency bound
    pub worst_case_latency: Duration,
    pub min_concurrency: usize,
    /// Per-service ceiling on outstanding requests
    pub max_concurrency: usize,
    /// Time after the last scheduled issue before in-flight requests
    /// are abandoned
    pub drain_grace: Duration,
    /// Seed for endpoint draws; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            worst_case_latency: Duration::from_secs(2),
            min_concurrency: 16,
            max_concurrency: 2_000,
            drain_grace: Duration::from_secs(5),
            seed: None,
        }
    }
}

impl LoadConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("request timeout"));
        }
        if self.worst_case_latency.is_zero() {
            return Err(ConfigError::InvalidDuration("worst-case latency"));
        }
        if self.max_concurrency == 0 || self.min_concurrency > self.max_concurrency {
            return Err(ConfigError::InvalidProbe(format!(
                "concurrency bounds {}..={} are empty",
                self.min_concurrency, self.max_concurrency
            )));
        }
        Ok(())
    }
}

/// Everything one round produced
#[derive(Debug, Clone)]
pub struct RoundResult {
    /// Rate at the end of the schedule (the plateau / round rate)
    pub target_rate: f64,
    /// Number of issue times the schedule produced
    pub planned: u64,
    /// Scheduled length of the round
    pub scheduled: Duration,
    /// Wall time from first issue slot until the last outcome was recorded
    pub elapsed: Duration,
    pub capacity: usize,
    /// Outcomes ordered by scheduled issue time
    pub outcomes: Vec<RequestOutcome>,
}

impl RoundResult {
    pub fn report(&self) -> RoundReport {
        round_report(&self.outcomes, self.target_rate, self.scheduled)
    }

    /// Outcomes issued at or after `offset` into the round
    pub fn outcomes_after(&self, offset: Duration) -> impl Iterator<Item = &RequestOutcome> {
        let from_ms = offset.as_secs_f64() * 1000.0;
        self.outcomes.iter().filter(move |o| o.offset_ms >= from_ms)
    }
}

/// Anything that can drive one scheduled round against a target
#[async_trait]
pub trait LoadDriver: Send + Sync {
    async fn drive(&self, controller: RateController) -> RoundResult;
}

/// HTTP load generator bound to one target and one endpoint table
pub struct LoadGenerator {
    config: LoadConfig,
    selector: Arc<WeightedEndpointSelector>,
    client: reqwest::Client,
    base_url: String,
    metrics: Option<HarnessMetrics>,
}

impl LoadGenerator {
    /// Validate the configuration and build the HTTP client
    pub fn new(config: LoadConfig, selector: WeightedEndpointSelector) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_concurrency)
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            config,
            selector: Arc::new(selector),
            client,
            base_url,
            metrics: None,
        })
    }

    /// Export per-request metrics to the global registry
    pub fn with_metrics(mut self, metrics: HarnessMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn selector(&self) -> &WeightedEndpointSelector {
        &self.selector
    }

    /// Run one round with a fresh per-run context
    pub async fn run(&self, controller: RateController) -> RoundResult {
        let run_id = chrono::Utc::now().timestamp_millis().to_string();
        self.run_with_context(controller, Arc::new(RequestContext::new(run_id)))
            .await
    }

    /// Run one round, handing `ctx` to every template builder
    pub async fn run_with_context(
        &self,
        controller: RateController,
        ctx: Arc<RequestContext>,
    ) -> RoundResult {
        let target_rate = controller.final_rate();
        let scheduled = controller.total_duration();
        let capacity = RateController::capacity_for(
            controller.peak_rate(),
            self.config.worst_case_latency,
            self.config.min_concurrency,
            self.config.max_concurrency,
        );

        if let Some(metrics) = &self.metrics {
            metrics.set_target_rate(target_rate);
        }

        let semaphore = Arc::new(Semaphore::new(capacity));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let aggregator = tokio::spawn(aggregate(outcome_rx, self.metrics.clone()));

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let round_start = Instant::now();
        let wall_start_ms = chrono::Utc::now().timestamp_millis();
        let deadline = round_start + scheduled + self.config.drain_grace;

        debug!(
            target_rate = target_rate,
            duration_secs = scheduled.as_secs_f64(),
            capacity = capacity,
            "Starting load round"
        );

        let mut in_flight = JoinSet::new();
        let mut planned = 0u64;

        for offset in controller.schedule() {
            let issue_at = round_start + offset;
            sleep_until(issue_at).await;

            let template = self.selector.pick(&mut rng).clone();
            let request = self.build_request(&template, &ctx);
            let offset_ms = offset.as_secs_f64() * 1000.0;

            in_flight.spawn(issue(
                request,
                template,
                Arc::clone(&semaphore),
                IssueSlot {
                    scheduled: issue_at,
                    issued_at_ms: wall_start_ms + offset_ms as i64,
                    offset_ms,
                    deadline,
                },
                outcome_tx.clone(),
            ));
            planned += 1;

            // reap finished requests so the set does not grow with the round
            while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
                if let Err(e) = joined {
                    warn!(error = %e, "Request task failed");
                }
            }
        }
        drop(outcome_tx);

        // every task is bounded by the round deadline
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Request task failed");
            }
        }

        let mut outcomes = match aggregator.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "Outcome aggregator failed");
                Vec::new()
            }
        };
        outcomes.sort_by(|a, b| a.offset_ms.total_cmp(&b.offset_ms));

        let elapsed = round_start.elapsed();
        if outcomes.len() as u64 != planned {
            warn!(
                planned = planned,
                recorded = outcomes.len(),
                "Recorded outcome count differs from issued requests"
            );
        }

        info!(
            target_rate = target_rate,
            planned = planned,
            elapsed_ms = elapsed.as_millis() as u64,
            "Load round complete"
        );

        RoundResult {
            target_rate,
            planned,
            scheduled,
            elapsed,
            capacity,
            outcomes,
        }
    }

    fn build_request(
        &self,
        template: &EndpointTemplate,
        ctx: &RequestContext,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, template.build_path(ctx));
        let request = self.client.request(template.method.as_reqwest(), url);
        match template.build_body(ctx) {
            Some(body) => request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
            None => request,
        }
    }
}

#[async_trait]
impl LoadDriver for LoadGenerator {
    async fn drive(&self, controller: RateController) -> RoundResult {
        self.run(controller).await
    }
}

/// Timing of one scheduled request
struct IssueSlot {
    scheduled: Instant,
    issued_at_ms: i64,
    offset_ms: f64,
    deadline: Instant,
}

enum Exchange {
    Completed(u16),
    BodyFailed(u16, FailureKind),
    Failed(FailureKind),
}

async fn issue(
    request: reqwest::RequestBuilder,
    template: EndpointTemplate,
    semaphore: Arc<Semaphore>,
    slot: IssueSlot,
    outcomes: mpsc::UnboundedSender<RequestOutcome>,
) {
    let (status_code, success, failure) =
        match timeout_at(slot.deadline, exchange(request, semaphore)).await {
            Ok(Exchange::Completed(status)) => (status, template.is_success(status), None),
            Ok(Exchange::BodyFailed(status, kind)) => (status, false, Some(kind)),
            Ok(Exchange::Failed(kind)) => (STATUS_NO_RESPONSE, false, Some(kind)),
            Err(_) => (STATUS_NO_RESPONSE, false, Some(FailureKind::Deadline)),
        };

    let outcome = RequestOutcome {
        label: template.label,
        issued_at_ms: slot.issued_at_ms,
        offset_ms: slot.offset_ms,
        duration_ms: slot.scheduled.elapsed().as_secs_f64() * 1000.0,
        status_code,
        success,
        failure,
    };

    // receiver lives until every sender is dropped
    let _ = outcomes.send(outcome);
}

async fn exchange(request: reqwest::RequestBuilder, semaphore: Arc<Semaphore>) -> Exchange {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Exchange::Failed(FailureKind::Transport),
    };

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.bytes().await {
                Ok(_) => Exchange::Completed(status),
                Err(e) => Exchange::BodyFailed(status, classify(&e)),
            }
        }
        Err(e) => Exchange::Failed(classify(&e)),
    }
}

fn classify(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Connect
    } else {
        FailureKind::Transport
    }
}

/// Single writer for the round's outcomes
async fn aggregate(
    mut rx: mpsc::UnboundedReceiver<RequestOutcome>,
    metrics: Option<HarnessMetrics>,
) -> Vec<RequestOutcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        if let Some(metrics) = &metrics {
            metrics.observe_outcome(&outcome.label, outcome.duration_ms / 1000.0, outcome.success);
        }
        outcomes.push(outcome);
    }
    outcomes
}
