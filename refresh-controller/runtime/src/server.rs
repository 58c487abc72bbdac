//! Serves the refresh API mux.

use anyhow::Result;
use glimpse_refresh_http::RefreshApi;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, instrument};

#[instrument(skip_all, fields(port = %addr.port()))]
pub(crate) async fn serve(
    addr: SocketAddr,
    api: RefreshApi,
    shutdown: drain::Watch,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "refresh API listening");

    let release = shutdown.signaled();
    tokio::pin!(release);

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut release => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        debug!(%peer, "Accepted connection");

        let io = TokioIo::new(stream);
        let api = api.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req| {
                let mut api = api.clone();
                async move { tower::Service::call(&mut api, req).await }
            });
            let served = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await;
            if let Err(error) = served {
                debug!(%error, "Connection closed with error");
            }
        });
    }
}
