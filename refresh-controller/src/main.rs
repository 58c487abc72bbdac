#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use glimpse_refresh_runtime::Args;

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client expects a process-wide TLS provider before any
    // connection is attempted.
    #[cfg(feature = "rustls-tls")]
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("a crypto provider was already installed");
    }

    Args::parse_and_run().await
}
