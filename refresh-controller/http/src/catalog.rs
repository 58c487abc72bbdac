//! Catalog streaming: forwards the configured catalog service's change feed
//! to client sessions. Only wired when a catalog service is configured.

use futures::prelude::*;
use glimpse_refresh_core::{
    plugins::ObjectCatalogService, stream::StreamFrame, Scope, StreamingDomain,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const FANOUT_CAPACITY: usize = 256;

pub struct CatalogStreams {
    service: Arc<dyn ObjectCatalogService>,
    tx: broadcast::Sender<StreamFrame>,
}

impl CatalogStreams {
    pub fn new(service: Arc<dyn ObjectCatalogService>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Arc::new(Self { service, tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamFrame> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl StreamingDomain for CatalogStreams {
    async fn run(&self, scope: Scope, shutdown: drain::Watch) -> anyhow::Result<()> {
        trace!(%scope, "Catalog stream starting");
        let mut watch = self.service.watch();
        let release = shutdown.signaled();
        tokio::pin!(release);

        loop {
            tokio::select! {
                _ = &mut release => return Ok(()),
                event = watch.next() => match event {
                    Some(event) => {
                        let _ = self.tx.send(StreamFrame::Catalog { event });
                    }
                    None => anyhow::bail!("catalog service stream ended"),
                },
            }
        }
    }
}
