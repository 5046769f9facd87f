//! Fallback handler forwarding requests to plugins

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;

use super::{ApiState, error::error_response};
use crate::routing::{PluginRequest, PluginResponse};

/// Forward any request no fixed route claimed
pub async fn forward(State(state): State<Arc<ApiState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);
    let mut plugin_request = PluginRequest::new(parts.method.as_str(), &uri);
    for (name, value) in &parts.headers {
        plugin_request.append_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes) {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body is too large");
    }

    plugin_request.body = match read_body(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(BodyError::TooLarge) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body is too large");
        }
        Err(BodyError::Read(e)) => {
            tracing::debug!(error = %e, "failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "Request body could not be read");
        }
    };

    match state.dispatcher.dispatch(plugin_request).await {
        Ok(response) => into_response(response),
        Err(e) => e.into_response(),
    }
}

enum BodyError {
    TooLarge,
    Read(axum::Error),
}

/// Collect the body, stopping as soon as it exceeds `limit`
async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

fn into_response(response: PluginResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in response.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "dropped invalid response header"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[tokio::test]
    async fn plugin_response_is_converted() {
        let response = into_response(PluginResponse {
            status: 201,
            headers: vec![
                ("content-type".to_string(), "text/plain; charset=utf-8".to_string()),
                ("bad header".to_string(), "x".to_string()),
                ("x-multi".to_string(), "a".to_string()),
                ("x-multi".to_string(), "b".to_string()),
            ],
            body: Bytes::from_static(b"created"),
        });

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get_all("x-multi").iter().count(), 2);
        assert_eq!(response.headers().len(), 3);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn body_over_limit_is_refused() {
        let body = Body::from("0123456789");
        assert!(matches!(read_body(body, 4).await, Err(BodyError::TooLarge)));

        let bytes = read_body(Body::from("0123"), 4).await.ok().unwrap();
        assert_eq!(&bytes[..], b"0123");
    }
}
