//! JSON endpoints and small request plumbing shared by the mux.

use crate::session::StreamingBody;
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

pub(crate) fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<StreamingBody> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)).boxed())
            .expect("json response must build"),
        Err(error) => {
            warn!(%error, "Failed to encode response body");
            text(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
        }
    }
}

pub(crate) fn text(status: StatusCode, body: &'static str) -> Response<StreamingBody> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())).boxed())
        .expect("text response must build")
}

pub(crate) fn error_json(status: StatusCode, message: String) -> Response<StreamingBody> {
    json(status, &serde_json::json!({ "error": message }))
}

pub(crate) fn not_found() -> Response<StreamingBody> {
    text(StatusCode::NOT_FOUND, "not found")
}

/// Minimal query-string parsing: `a=b&c=d` with percent and `+` decoding.
pub(crate) fn query_params(uri: &http::Uri) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let Some(query) = uri.query() else {
        return params;
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex(bytes.get(i + 1)), hex(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(byte: Option<&u8>) -> Option<u8> {
    let byte = *byte?;
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_decodes_queries() {
        let uri: http::Uri = "/api/v2/stream/logs?scope=workload%3Ateam-a%3ADeployment%3Aapi&previous=true"
            .parse()
            .unwrap();
        let params = query_params(&uri);
        assert_eq!(
            params.get("scope").map(String::as_str),
            Some("workload:team-a:Deployment:api")
        );
        assert_eq!(params.get("previous").map(String::as_str), Some("true"));

        let uri: http::Uri = "/x?label=app%3Dapi+web&empty".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params.get("label").map(String::as_str), Some("app=api web"));
        assert_eq!(params.get("empty").map(String::as_str), Some(""));
    }
}
