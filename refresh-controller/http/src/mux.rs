//! The refresh API mux: one tower service routing the readiness gate, the
//! JSON snapshot API, and the streaming endpoints.

use crate::{
    api::{error_json, json, not_found, query_params, text},
    catalog::CatalogStreams,
    events::EventStreams,
    health,
    logs::LogStreams,
    resources::{ResourceQuery, ResourceStreams},
    session::{self, StreamingBody},
};
use futures::{future, prelude::*};
use glimpse_refresh_core::{
    stream::StreamFrame, BuildOptions, DomainName, PermissionIssue, Scope,
};
use glimpse_refresh_orchestrator::{FetchError, RefreshOrchestrator};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

struct ApiInner {
    orchestrator: RefreshOrchestrator,
    issues: Vec<PermissionIssue>,
    ready: watch::Receiver<bool>,
    logs: Arc<LogStreams>,
    events: Arc<EventStreams>,
    resources: Arc<ResourceStreams>,
    catalog: Option<Arc<CatalogStreams>>,
    shutdown: drain::Watch,
}

#[derive(Clone)]
pub struct RefreshApi {
    inner: Arc<ApiInner>,
}

impl RefreshApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: RefreshOrchestrator,
        issues: Vec<PermissionIssue>,
        ready: watch::Receiver<bool>,
        logs: Arc<LogStreams>,
        events: Arc<EventStreams>,
        resources: Arc<ResourceStreams>,
        catalog: Option<Arc<CatalogStreams>>,
        shutdown: drain::Watch,
    ) -> Self {
        Self {
            inner: Arc::new(ApiInner {
                orchestrator,
                issues,
                ready,
                logs,
                events,
                resources,
                catalog,
                shutdown,
            }),
        }
    }
}

impl tower::Service<Request<Incoming>> for RefreshApi {
    type Response = Response<StreamingBody>;
    type Error = std::convert::Infallible;
    type Future = future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(route(inner, req).await) })
    }
}

async fn route(inner: Arc<ApiInner>, req: Request<Incoming>) -> Response<StreamingBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::GET {
        if path == "/healthz/refresh" {
            return health::response(*inner.ready.borrow());
        }
        if let Some(domain) = path.strip_prefix("/api/v2/domains/") {
            return fetch_domain(&inner, domain.into(), &req).await;
        }
        return match path.as_str() {
            "/api/v2/diagnostics/permissions" => json(StatusCode::OK, &inner.issues),
            "/api/v2/stream/logs" => stream_logs(&inner, &req).await,
            "/api/v2/stream/events" => stream_events(&inner, &req).await,
            "/api/v2/stream/resources" => stream_resources(&inner, &req).await,
            "/api/v2/stream/catalog" => stream_catalog(&inner).await,
            _ => not_found(),
        };
    }

    if method == Method::POST {
        return match path.as_str() {
            "/api/v2/refresh" => enqueue_refresh(&inner, req).await,
            "/api/v2/context" => update_context(&inner, req).await,
            "/api/v2/subscriptions" => update_subscription(&inner, req).await,
            _ => not_found(),
        };
    }

    not_found()
}

fn scope_param(params: &std::collections::HashMap<String, String>) -> Scope {
    params
        .get("scope")
        .map(|s| Scope::from(s.as_str()))
        .unwrap_or_else(Scope::cluster)
}

async fn fetch_domain(
    inner: &ApiInner,
    domain: DomainName,
    req: &Request<Incoming>,
) -> Response<StreamingBody> {
    let params = query_params(req.uri());
    let scope = scope_param(&params);
    let opts = BuildOptions {
        is_manual: params.get("manual").map(String::as_str) == Some("true"),
        reset: params.get("reset").map(String::as_str) == Some("true"),
    };
    match inner.orchestrator.fetch_scoped_domain(&domain, &scope, opts).await {
        Ok(state) => json(StatusCode::OK, &state),
        Err(error) => fetch_error(error),
    }
}

fn fetch_error(error: FetchError) -> Response<StreamingBody> {
    let status = match error {
        FetchError::UnknownDomain(_) | FetchError::NotStreaming(_) => StatusCode::NOT_FOUND,
        FetchError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_json(status, error.to_string())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, Response<StreamingBody>> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|error| error_json(StatusCode::BAD_REQUEST, error.to_string()))?
        .to_bytes();
    serde_json::from_slice(&bytes)
        .map_err(|error| error_json(StatusCode::BAD_REQUEST, error.to_string()))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    domain: DomainName,
    #[serde(default)]
    scope: Option<Scope>,
}

async fn enqueue_refresh(inner: &ApiInner, req: Request<Incoming>) -> Response<StreamingBody> {
    let body: RefreshRequest = match read_json(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let scope = body.scope.unwrap_or_else(Scope::cluster);
    let orchestrator = inner.orchestrator.clone();
    let domain = body.domain.clone();
    tokio::spawn(async move {
        let opts = BuildOptions {
            is_manual: true,
            reset: false,
        };
        if let Err(error) = orchestrator.fetch_scoped_domain(&domain, &scope, opts).await {
            debug!(%domain, %error, "Enqueued refresh failed");
        }
    });
    json(StatusCode::ACCEPTED, &serde_json::json!({"enqueued": true}))
}

async fn update_context(inner: &ApiInner, req: Request<Incoming>) -> Response<StreamingBody> {
    let patch = match read_json(req).await {
        Ok(patch) => patch,
        Err(response) => return response,
    };
    let scheduled: Vec<_> = inner
        .orchestrator
        .update_context(patch)
        .into_iter()
        .map(|(domain, scope)| serde_json::json!({"domain": domain, "scope": scope}))
        .collect();
    json(StatusCode::OK, &serde_json::json!({"scheduled": scheduled}))
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    domain: DomainName,
    scope: Scope,
    enabled: bool,
}

async fn update_subscription(
    inner: &ApiInner,
    req: Request<Incoming>,
) -> Response<StreamingBody> {
    let body: SubscriptionRequest = match read_json(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    match inner
        .orchestrator
        .set_scoped_domain_enabled(&body.domain, &body.scope, body.enabled)
        .await
    {
        Ok(()) => text(StatusCode::NO_CONTENT, ""),
        Err(error) => fetch_error(error),
    }
}

/// Streams a frame source to a new client session.
fn stream_response(
    inner: &ApiInner,
    source: impl Stream<Item = StreamFrame> + Send + Unpin + 'static,
) -> Response<StreamingBody> {
    let (session, body) = session::channel();
    tokio::spawn(session::pump(source, session, inner.shutdown.clone()));
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .expect("stream response must build")
}

async fn stream_logs(inner: &ApiInner, req: &Request<Incoming>) -> Response<StreamingBody> {
    let params = query_params(req.uri());
    let scope = scope_param(&params);

    // Crashed-container logs are a one-shot fetch, not a stream.
    if params.get("previous").map(String::as_str) == Some("true") {
        return match inner.logs.fetch_previous(&scope).await {
            Ok(lines) => json(StatusCode::OK, &serde_json::json!({"lines": lines})),
            Err(error) => error_json(StatusCode::BAD_GATEWAY, error.to_string()),
        };
    }

    // Make sure the scope's pump is running; subscriptions normally start it
    // but a direct stream attach must not depend on that ordering.
    if let Err(error) = inner
        .orchestrator
        .start_streaming_domain(&"object-logs".into(), &scope)
        .await
    {
        debug!(%error, "object-logs domain unavailable");
    }

    let replay_limit = params
        .get("tailLines")
        .and_then(|raw| raw.parse::<usize>().ok());
    let (mut lines, fallback, rx) = inner.logs.attach(&scope);
    if let Some(limit) = replay_limit {
        if lines.len() > limit {
            lines.drain(..lines.len() - limit);
        }
    }

    let scope_name = scope.to_string();
    let replay = futures::stream::iter(lines.into_iter().map(move |line| {
        StreamFrame::Log(glimpse_refresh_core::stream::LogFrame {
            scope: scope_name.clone(),
            line,
            fallback_active: fallback,
        })
    }));
    let live = BroadcastStream::new(rx).filter_map(|frame| async move {
        frame.ok().map(StreamFrame::Log)
    });
    stream_response(inner, Box::pin(replay.chain(live)))
}

async fn stream_events(inner: &ApiInner, req: &Request<Incoming>) -> Response<StreamingBody> {
    let params = query_params(req.uri());
    let scope = scope_param(&params);

    if let Err(error) = inner
        .orchestrator
        .start_streaming_domain(&"events".into(), &scope)
        .await
    {
        return fetch_error(error);
    }

    let rx = inner.events.subscribe(&scope);
    let live = BroadcastStream::new(rx).filter_map(|frame| async move { frame.ok() });
    stream_response(inner, Box::pin(live))
}

async fn stream_resources(inner: &ApiInner, req: &Request<Incoming>) -> Response<StreamingBody> {
    let params = query_params(req.uri());
    let query = ResourceQuery {
        group: params.get("group").cloned().unwrap_or_default(),
        version: params
            .get("version")
            .cloned()
            .unwrap_or_else(|| "v1".to_string()),
        kind: match params.get("kind") {
            Some(kind) => kind.clone(),
            None => return error_json(StatusCode::BAD_REQUEST, "kind is required".to_string()),
        },
        namespace: params.get("namespace").cloned(),
        label_selector: params.get("labelSelector").cloned(),
        field_selector: params.get("fieldSelector").cloned(),
    };

    if let Err(error) = inner.resources.authorize(&query).await {
        return error_json(StatusCode::FORBIDDEN, error.to_string());
    }

    let watch = inner.resources.watch(&query);
    stream_response(inner, watch)
}

async fn stream_catalog(inner: &ApiInner) -> Response<StreamingBody> {
    let Some(catalog) = &inner.catalog else {
        return error_json(
            StatusCode::NOT_FOUND,
            "catalog service not configured".to_string(),
        );
    };

    if let Err(error) = inner
        .orchestrator
        .start_streaming_domain(&"catalog".into(), &Scope::cluster())
        .await
    {
        debug!(%error, "catalog domain unavailable");
    }

    let rx = catalog.subscribe();
    let live = BroadcastStream::new(rx).filter_map(|frame| async move { frame.ok() });
    stream_response(inner, Box::pin(live))
}

#[cfg(test)]
pub(crate) mod tests {
    pub(crate) fn mock_client() -> kube::Client {
        let (svc, _handle) = tower_test::mock::pair::<
            http::Request<kube::client::Body>,
            http::Response<kube::client::Body>,
        >();
        kube::Client::new(svc, "default")
    }
}
