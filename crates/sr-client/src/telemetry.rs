//! Traffic telemetry
//!
//! A background task samples the engine's cumulative counters on a fixed
//! cadence, derives transfer rates from consecutive samples and keeps a
//! bounded history for the traffic chart.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sr_core::traits::{TagCounters, TrafficCounters};
use sr_core::{ConnectionStatus, ProxyEngine};

use crate::state::ClientState;
use crate::supervisor::TaskSupervisor;

/// Cumulative counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSample {
    pub timestamp: Instant,
    pub upload: u64,
    pub download: u64,
}

/// Transfer rate derived from two samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateEstimate {
    pub upload_bytes_per_sec: f64,
    pub download_bytes_per_sec: f64,
}

impl RateEstimate {
    /// Rate from `prev` to `next`.
    ///
    /// Counter regressions (engine restart) clamp to zero and a zero or
    /// negative interval yields a zero rate.
    pub fn between(prev: &TrafficSample, next: &TrafficSample) -> Self {
        let elapsed = next
            .timestamp
            .saturating_duration_since(prev.timestamp)
            .as_secs_f64();
        if elapsed <= 0.0 {
            return Self::default();
        }
        Self {
            upload_bytes_per_sec: next.upload.saturating_sub(prev.upload) as f64 / elapsed,
            download_bytes_per_sec: next.download.saturating_sub(prev.download) as f64 / elapsed,
        }
    }
}

/// Bounded FIFO of samples; the oldest is evicted on overflow
#[derive(Debug, Clone)]
pub struct TrafficHistory {
    samples: VecDeque<TrafficSample>,
    capacity: usize,
}

impl TrafficHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: TrafficSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&TrafficSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = &TrafficSample> {
        self.samples.iter()
    }

    /// Download rate between each pair of consecutive samples, for charting
    pub fn download_rates(&self) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(prev, next)| RateEstimate::between(prev, next).download_bytes_per_sec)
            .collect()
    }
}

/// Telemetry fields published to the display
#[derive(Debug, Clone)]
pub struct TelemetryState {
    pub history: TrafficHistory,
    pub rate: RateEstimate,
    pub totals: TrafficCounters,
    /// Per inbound/outbound counters from the latest sample
    pub connections: Vec<TagCounters>,
}

impl TelemetryState {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: TrafficHistory::new(capacity),
            rate: RateEstimate::default(),
            totals: TrafficCounters::default(),
            connections: Vec::new(),
        }
    }

    /// Append a sample and publish the rate against the previous one
    pub fn record(&mut self, sample: TrafficSample) -> RateEstimate {
        let rate = self
            .history
            .latest()
            .map(|prev| RateEstimate::between(prev, &sample))
            .unwrap_or_default();
        self.history.push(sample);
        self.rate = rate;
        self.totals = TrafficCounters {
            upload: sample.upload,
            download: sample.download,
        };
        rate
    }

    /// Forget everything; used when a new session begins
    pub fn reset(&mut self) {
        self.history.clear();
        self.rate = RateEstimate::default();
        self.totals = TrafficCounters::default();
        self.connections.clear();
    }
}

/// Periodic counter sampler
pub struct TelemetryPoller {
    state: Arc<ClientState>,
    engine: Arc<dyn ProxyEngine>,
    supervisor: Arc<TaskSupervisor>,
}

impl TelemetryPoller {
    pub fn new(
        state: Arc<ClientState>,
        engine: Arc<dyn ProxyEngine>,
        supervisor: Arc<TaskSupervisor>,
    ) -> Self {
        Self {
            state,
            engine,
            supervisor,
        }
    }

    /// Sample once.
    ///
    /// Skips unless connected. The lock is released while the engine is
    /// queried; the sample is dropped if the session changed meanwhile.
    pub async fn tick(&self) {
        let (handle, attempt) = {
            let shared = self.state.read();
            let session = &shared.session;
            match (&session.status, &session.session_handle) {
                (ConnectionStatus::Connected, Some(handle)) => (handle.clone(), session.attempt),
                _ => return,
            }
        };

        let report = match self.engine.query_counters(&handle).await {
            Ok(report) => report,
            Err(e) => {
                tracing::debug!(session = %handle, "Counter query failed: {}", e);
                return;
            }
        };

        let sample = TrafficSample {
            timestamp: tokio::time::Instant::now().into_std(),
            upload: report.totals.upload,
            download: report.totals.download,
        };
        let connections = report.sorted_tags();

        let mut shared = self.state.write();
        if shared.session.attempt != attempt
            || shared.session.status != ConnectionStatus::Connected
        {
            tracing::debug!("Session changed during counter query, discarding sample");
            return;
        }
        shared.telemetry.record(sample);
        shared.telemetry.connections = connections;
    }

    /// Run until cancelled. Each tick runs inside the supervisor's failure
    /// boundary, so a failing tick never stops the next one.
    pub async fn run(self, cancel: CancellationToken) {
        let period = self.state.config.telemetry_interval;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Starting telemetry poller (interval: {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = self.supervisor.run("telemetry tick", self.tick()).await;
                    self.state.request_redraw();
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Telemetry poller shutting down");
                    break;
                }
            }
        }
    }
}
