//! Tunnel process supervision
//!
//! Keeps one external tunneling process (normally `ssh -N -D`) alive:
//! - Spawns it in its own process group so signals reach its children too
//! - Restarts it whenever it exits or cannot be spawned
//! - Probes through its SOCKS endpoint and kills it after repeated failures
//! - Terminates the whole group on shutdown

mod command;
mod health;
mod process;
mod supervisor;

pub use command::TunnelCommand;
pub use health::{
    HealthCheckResult, HealthProbe, ProbeError, SocksHealthProber, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_PROBE_URL,
};
pub use process::{ProcessError, ProcessExit, TunnelProcess};
pub use supervisor::{
    FailureCounter, SupervisorConfig, SupervisorStatus, TunnelSupervisor,
    DEFAULT_FAILURE_THRESHOLD, MAX_PROBE_PERIOD,
};
