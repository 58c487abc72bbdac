use crate::{config::Config, server, subsystem::Subsystem};
use anyhow::{bail, Result};
use clap::Parser;
use glimpse_refresh_orchestrator::OrchestratorMetrics;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "refresh", about = "The dashboard's cluster refresh controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "glimpse=info,warn",
        env = "GLIMPSE_REFRESH_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address the refresh API and streaming endpoints bind to.
    #[clap(long, default_value = "0.0.0.0:8083")]
    api_addr: SocketAddr,

    /// Stable cluster id embedded in every snapshot.
    #[clap(long, default_value = "default", env = "GLIMPSE_CLUSTER_ID")]
    cluster_id: String,

    /// Display name; defaults to the cluster id.
    #[clap(long, default_value = "", env = "GLIMPSE_CLUSTER_NAME")]
    cluster_name: String,

    /// Watch re-establishment cadence, in seconds.
    #[clap(long, default_value = "300")]
    resync_interval_secs: u64,

    /// Usage poller interval, in seconds.
    #[clap(long, default_value = "30")]
    metrics_interval_secs: u64,

    /// Startup permission preflight deadline, in seconds.
    #[clap(long, default_value = "15")]
    permission_preflight_timeout_secs: u64,

    /// Permission cache TTL and revalidation period, in seconds.
    #[clap(long, default_value = "300")]
    permission_cache_ttl_secs: u64,

    /// Shutdown deadline on credential revocation, in seconds.
    #[clap(long, default_value = "10")]
    permission_check_timeout_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            api_addr,
            cluster_id,
            cluster_name,
            resync_interval_secs,
            metrics_interval_secs,
            permission_preflight_timeout_secs,
            permission_cache_ttl_secs,
            permission_check_timeout_secs,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = OrchestratorMetrics::register(prom.sub_registry_with_prefix("refresh"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let mut config = Config::new(cluster_id, cluster_name);
        config.resync_interval = Duration::from_secs(resync_interval_secs);
        config.metrics_interval = Duration::from_secs(metrics_interval_secs);
        config.permission_preflight_timeout =
            Duration::from_secs(permission_preflight_timeout_secs);
        config.permission_cache_ttl = Duration::from_secs(permission_cache_ttl_secs);
        config.permission_check_timeout = Duration::from_secs(permission_check_timeout_secs);
        // The dynamic client shares the connection pool; custom-resource
        // domains only need a separate handle.
        config.dynamic_client = Some(runtime.client());

        let subsystem = Subsystem::new(runtime.client(), config, metrics).await?;

        tokio::spawn(
            server::serve(api_addr, subsystem.api(), subsystem.shutdown_watch())
                .instrument(info_span!("api")),
        );

        // Block on the shutdown signal, then drain the subsystem.
        let failed = runtime.run().await.is_err();
        subsystem.shutdown().await;
        if failed {
            bail!("Aborted");
        }
        Ok(())
    }
}
