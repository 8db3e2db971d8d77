//! Tunnel supervisor
//!
//! Owns the single tunnel process slot and runs the monitor loop:
//! liveness checks restart the process whenever it is missing or has exited,
//! periodic health checks kill it after too many consecutive failures, and
//! cancellation terminates its process group.

use crate::command::TunnelCommand;
use crate::health::HealthProbe;
use crate::process::TunnelProcess;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive failed health checks before the tunnel is killed
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

pub const DEFAULT_PROBE_PERIOD: Duration = Duration::from_secs(60);

/// Longest probe period honoured; larger values are clamped
pub const MAX_PROBE_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Liveness cadence while no process is running
pub const DEFAULT_IDLE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Liveness cadence while the process is running
pub const DEFAULT_RUNNING_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to the tunnel to exit after SIGTERM before it is SIGKILLed
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: TunnelCommand,
    pub probe_period: Duration,
    pub idle_retry_interval: Duration,
    pub running_poll_interval: Duration,
    pub failure_threshold: u32,
    pub shutdown_grace: Duration,
    /// Attach the tunnel's standard streams to the null device
    pub silent: bool,
    pub debug: bool,
}

impl SupervisorConfig {
    pub fn new(command: TunnelCommand) -> Self {
        Self {
            command,
            probe_period: DEFAULT_PROBE_PERIOD,
            idle_retry_interval: DEFAULT_IDLE_RETRY_INTERVAL,
            running_poll_interval: DEFAULT_RUNNING_POLL_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            silent: false,
            debug: false,
        }
    }

    pub fn with_probe_period(mut self, probe_period: Duration) -> Self {
        self.probe_period = probe_period;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Consecutive health check failures, with the threshold that triggers a kill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count a failure. Returns true once the threshold is reached.
    pub fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count >= self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    /// Pid (and process group id) of the current process, if any
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// The current process has exited and not been replaced yet
    pub exited: bool,
    pub failed_checks: u32,
    /// Number of successful spawns so far
    pub starts: u64,
}

impl SupervisorStatus {
    pub fn is_running(&self) -> bool {
        self.pid.is_some() && !self.exited
    }
}

/// Everything guarded by the supervisor lock
struct SupervisorState {
    process: Option<TunnelProcess>,
    failures: FailureCounter,
    starts: u64,
}

pub struct TunnelSupervisor {
    config: SupervisorConfig,
    prober: Arc<dyn HealthProbe>,
    state: Mutex<SupervisorState>,
}

impl TunnelSupervisor {
    pub fn new(config: SupervisorConfig, prober: Arc<dyn HealthProbe>) -> Self {
        let failures = FailureCounter::new(config.failure_threshold);
        Self {
            config,
            prober,
            state: Mutex::new(SupervisorState {
                process: None,
                failures,
                starts: 0,
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub async fn status(&self) -> SupervisorStatus {
        let state = self.state.lock().await;
        SupervisorStatus {
            pid: state.process.as_ref().map(TunnelProcess::pid),
            started_at: state.process.as_ref().map(TunnelProcess::started_at),
            exited: state
                .process
                .as_ref()
                .map_or(false, TunnelProcess::has_exited),
            failed_checks: state.failures.count(),
            starts: state.starts,
        }
    }

    /// Keep the tunnel process alive until `cancel` fires.
    ///
    /// Never returns early on subprocess errors: spawn failures are logged and
    /// retried on the next cycle. On cancellation the process group receives
    /// SIGTERM (then SIGKILL after the grace period) and this returns.
    pub async fn monitor(&self, cancel: CancellationToken) {
        info!("Supervising tunnel command: {}", self.config.command);

        // Zero or unbounded periods would make the interval panic
        let probe_period = self
            .config
            .probe_period
            .clamp(Duration::from_millis(1), MAX_PROBE_PERIOD);
        let now = Instant::now();
        let first_tick = now.checked_add(probe_period).unwrap_or(now);
        let mut health_ticker = tokio::time::interval_at(first_tick, probe_period);
        health_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let running = self.ensure_running().await;
            let pause = if running {
                self.config.running_poll_interval
            } else {
                self.config.idle_retry_interval
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = health_ticker.tick() => {
                    if !self.run_health_check(&cancel).await {
                        break;
                    }
                }

                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.shutdown().await;
        info!("Tunnel supervisor stopped");
    }

    /// Start the process if the slot is empty or its process has exited.
    /// Returns whether a process is running afterwards.
    async fn ensure_running(&self) -> bool {
        let mut state = self.state.lock().await;

        let needs_start = match &state.process {
            None => true,
            Some(process) => match process.exit() {
                Some(exit) => {
                    warn!("Tunnel process {} is gone ({})", process.pid(), exit);
                    true
                }
                None => false,
            },
        };

        if needs_start {
            info!("Tunnel command not running, attempting to start");
            state.process = None;

            match TunnelProcess::spawn(&self.config.command, self.config.silent) {
                Ok(process) => {
                    info!(
                        "Started tunnel command: {} (pid {})",
                        self.config.command,
                        process.pid()
                    );
                    state.process = Some(process);
                    state.failures.reset();
                    state.starts += 1;
                }
                Err(e) => {
                    error!("Failed to start tunnel command: {}", e);
                }
            }
        }

        if self.config.debug {
            match &state.process {
                Some(process) => match process.exit() {
                    Some(exit) => debug!("Tunnel monitor: {} - {}", self.config.command, exit),
                    None => debug!(
                        "Tunnel monitor: {} - running (pid {})",
                        self.config.command,
                        process.pid()
                    ),
                },
                None => debug!("Tunnel monitor: {} - not running", self.config.command),
            }
        }

        state
            .process
            .as_ref()
            .map_or(false, |process| !process.has_exited())
    }

    /// Probe once and apply the result. Returns false if cancelled mid-probe.
    async fn run_health_check(&self, cancel: &CancellationToken) -> bool {
        // The lock is not held across the probe's round trip
        let healthy = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            healthy = self.prober.check() => healthy,
        };

        self.record_health(healthy).await;
        true
    }

    async fn record_health(&self, healthy: bool) {
        let mut state = self.state.lock().await;

        if healthy {
            if state.failures.count() > 0 {
                info!(
                    "Health check passed after {} failure(s)",
                    state.failures.count()
                );
            }
            state.failures.reset();
            return;
        }

        let threshold_reached = state.failures.record_failure();
        warn!(
            "Health check failed ({}/{})",
            state.failures.count(),
            state.failures.threshold()
        );

        if threshold_reached {
            warn!(
                "{} failed health checks, restarting tunnel",
                state.failures.count()
            );
            if let Some(process) = state.process.take() {
                if let Err(e) = process.signal(Signal::SIGKILL) {
                    warn!("Failed to kill tunnel process {}: {}", process.pid(), e);
                }
            }
            state.failures.reset();
        }
    }

    async fn shutdown(&self) {
        let process = {
            let mut state = self.state.lock().await;
            let process = state.process.take();

            if let Some(process) = &process {
                if !process.has_exited() {
                    info!("Shutting down tunnel command (pid {})...", process.pid());
                    if let Err(e) = process.signal(Signal::SIGTERM) {
                        warn!("Failed to terminate tunnel process group: {}", e);
                    }
                }
            }

            process
        };

        let Some(process) = process else {
            return;
        };

        if !process.wait_for_exit(self.config.shutdown_grace).await {
            warn!(
                "Tunnel process {} did not exit within {:?}, killing process group",
                process.pid(),
                self.config.shutdown_grace
            );
            if let Err(e) = process.signal(Signal::SIGKILL) {
                debug!("Failed to kill tunnel process group: {}", e);
            }
        }
    }
}
