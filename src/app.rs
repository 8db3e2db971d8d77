//! Composition of proxy and supervisor

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tunnelwarden_config::Config;
use tunnelwarden_proxy::{TcpProxyServer, TcpProxyServerConfig};
use tunnelwarden_supervisor::{
    SocksHealthProber, SupervisorConfig, TunnelCommand, TunnelSupervisor,
};

/// Run the proxy and the tunnel supervisor until `cancel` fires.
///
/// The listen address is bound before anything is spawned, so a bind failure
/// returns immediately. Afterwards both components run on child tokens of
/// `cancel` and this returns once both have finished. A failing accept loop
/// cancels `cancel` so the tunnel is shut down as well.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let prober = SocksHealthProber::new(
        &config.local_ssh_bind_to,
        &config.probe_url,
        config.debug,
    )
    .context("Failed to build health prober")?;

    let command = TunnelCommand::ssh(&config.local_ssh_bind_to, &config.ssh_host);
    let supervisor_config = SupervisorConfig::new(command)
        .with_probe_period(config.probe_period())
        .with_silent(config.silent_ssh_process)
        .with_debug(config.debug);
    let supervisor = Arc::new(TunnelSupervisor::new(supervisor_config, Arc::new(prober)));

    let proxy_config = TcpProxyServerConfig::new(config.listen_addr(), &config.local_ssh_bind_to)
        .with_debug(config.debug);
    let proxy = TcpProxyServer::new(proxy_config)
        .bind()
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_at))?;

    info!(
        "Forwarding {} -> {} (tunnel via {}, probing {} every {}s)",
        proxy.local_addr(),
        config.local_ssh_bind_to,
        config.ssh_host,
        config.probe_url,
        config.ssh_probe_period
    );

    let supervisor_task = {
        let supervisor = supervisor.clone();
        let token = cancel.child_token();
        tokio::spawn(async move { supervisor.monitor(token).await })
    };

    let proxy_task = {
        let token = cancel.child_token();
        let parent = cancel.clone();
        tokio::spawn(async move {
            let result = proxy.serve(token).await;
            if let Err(e) = &result {
                error!("Proxy server failed: {}", e);
                parent.cancel();
            }
            result
        })
    };

    let (supervisor_result, proxy_result) = tokio::join!(supervisor_task, proxy_task);
    supervisor_result.context("Supervisor task panicked")?;
    proxy_result
        .context("Proxy task panicked")?
        .context("Proxy server failed")?;

    info!("All components stopped");
    Ok(())
}
