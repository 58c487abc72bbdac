use crate::session::StreamingBody;
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full};

/// Readiness gate: the refresh subsystem is ready once its informer caches
/// are warm, and not before. Per-domain health is deliberately not
/// reflected here.
pub(crate) fn response(synced: bool) -> Response<StreamingBody> {
    let (status, body) = if synced {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "informers not yet synced")
    };
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())).boxed())
        .expect("static health response must build")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response<StreamingBody>) -> (StatusCode, String) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn gates_on_informer_sync() {
        let (status, body) = body_text(response(false)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "informers not yet synced");

        let (status, body) = body_text(response(true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
