//! Reply object handed to plugin handlers

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use rhai::{Blob, Dynamic, EvalAltResult, ImmutableString};

use crate::{Error, Result};

const TEXT: &str = "text/plain; charset=utf-8";
const JSON: &str = "application/json; charset=utf-8";
const BINARY: &str = "application/octet-stream";

/// Response produced by a plugin handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: Vec<(String, String)>,
    /// Encoded body
    pub body: Bytes,
}

impl PluginResponse {
    /// Value of a header, if set
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
enum Outcome {
    Pending,
    Sent(Dynamic),
    NotFound,
}

#[derive(Debug)]
struct ReplyState {
    status: u16,
    headers: Vec<(String, String)>,
    outcome: Outcome,
}

/// Mutable reply shared between the host and one handler invocation
///
/// Clones share state, so the script can chain `reply.status(201).send(..)`
/// while the host keeps its own handle to read the outcome.
#[derive(Debug, Clone)]
pub struct Reply {
    state: Arc<Mutex<ReplyState>>,
}

impl Default for Reply {
    fn default() -> Self {
        Self::new()
    }
}

impl Reply {
    /// Create a pending `200` reply
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplyState {
                status: 200,
                headers: Vec::new(),
                outcome: Outcome::Pending,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReplyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the status code
    ///
    /// # Errors
    ///
    /// Returns error if `code` is outside `100..=599`
    pub fn status(&mut self, code: i64) -> std::result::Result<Self, Box<EvalAltResult>> {
        let code = u16::try_from(code)
            .ok()
            .filter(|c| (100..=599).contains(c))
            .ok_or_else(|| format!("invalid status code {code}"))?;
        self.lock().status = code;
        Ok(self.clone())
    }

    /// Set a response header, replacing an earlier value of the same name
    pub fn header(&mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let mut state = self.lock();
        state.headers.retain(|(n, _)| *n != name);
        state.headers.push((name, value.to_string()));
        drop(state);
        self.clone()
    }

    /// Send `body`; later sends are ignored
    pub fn send(&mut self, body: Dynamic) {
        let mut state = self.lock();
        if matches!(state.outcome, Outcome::Pending) {
            state.outcome = Outcome::Sent(body);
        } else {
            tracing::warn!("reply already sent");
        }
    }

    /// Signal that the requested resource does not exist
    pub fn not_found(&mut self) {
        let mut state = self.lock();
        if matches!(state.outcome, Outcome::Pending) {
            state.outcome = Outcome::NotFound;
        } else {
            tracing::warn!("reply already sent");
        }
    }

    /// Turn the reply into a response once the handler returned `returned`
    ///
    /// A handler that never sent but returned a value has that value sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RouteNotFound`] if the handler signalled not-found,
    /// or [`Error::Handler`] if the body cannot be encoded
    pub fn finish(&self, method: &str, path: &str, returned: Dynamic) -> Result<PluginResponse> {
        let mut state = self.lock();
        let body = match std::mem::replace(&mut state.outcome, Outcome::Pending) {
            Outcome::NotFound => return Err(Error::not_found(method, path)),
            Outcome::Sent(body) => body,
            Outcome::Pending => returned,
        };

        let mut headers = std::mem::take(&mut state.headers);
        let (body, content_type) = encode_body(body)?;
        if let Some(content_type) = content_type
            && !headers.iter().any(|(n, _)| n == "content-type")
        {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }

        Ok(PluginResponse {
            status: state.status,
            headers,
            body,
        })
    }
}

fn encode_body(body: Dynamic) -> Result<(Bytes, Option<&'static str>)> {
    if body.is_unit() {
        return Ok((Bytes::new(), None));
    }
    if body.is_string() {
        let text = body.try_cast::<ImmutableString>().unwrap_or_default();
        return Ok((Bytes::from(text.to_string()), Some(TEXT)));
    }
    if body.is_blob() {
        let blob = body.try_cast::<Blob>().unwrap_or_default();
        return Ok((Bytes::from(blob), Some(BINARY)));
    }

    let json = serde_json::to_vec(&body)
        .map_err(|e| Error::Handler(format!("cannot encode reply body: {e}")))?;
    Ok((Bytes::from(json), Some(JSON)))
}

#[cfg(test)]
mod tests {
    use rhai::Map;

    use super::*;

    #[test]
    fn text_body_defaults_to_plain() {
        let mut reply = Reply::new();
        reply.send(Dynamic::from("5"));

        let response = reply.finish("GET", "/", Dynamic::UNIT).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("5"));
        assert_eq!(response.header("Content-Type"), Some(TEXT));
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut reply = Reply::new();
        reply.header("Content-Type", "text/html");
        reply.send(Dynamic::from("<h1>Hi</h1>"));

        let response = reply.finish("GET", "/", Dynamic::UNIT).unwrap();
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.headers.len(), 1);
    }

    #[test]
    fn map_body_is_json() {
        let mut map = Map::new();
        map.insert("id".into(), Dynamic::from("abc"));

        let mut reply = Reply::new();
        reply.status(201).unwrap().send(Dynamic::from_map(map));

        let response = reply.finish("POST", "/", Dynamic::UNIT).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("content-type"), Some(JSON));
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value, serde_json::json!({"id": "abc"}));
    }

    #[test]
    fn returned_value_is_sent() {
        let reply = Reply::new();
        let response = reply.finish("GET", "/", Dynamic::from(42_i64)).unwrap();
        assert_eq!(response.body, Bytes::from("42"));
    }

    #[test]
    fn unit_sends_empty_body() {
        let mut reply = Reply::new();
        reply.status(204).unwrap().send(Dynamic::UNIT);

        let response = reply.finish("DELETE", "/x", Dynamic::UNIT).unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
        assert!(response.headers.is_empty());
    }

    #[test]
    fn not_found_signal() {
        let mut reply = Reply::new();
        reply.not_found();

        let err = reply.finish("GET", "/api/notes/x", Dynamic::UNIT).unwrap_err();
        assert!(matches!(err, Error::RouteNotFound { .. }));
    }

    #[test]
    fn first_send_wins() {
        let mut reply = Reply::new();
        reply.send(Dynamic::from("first"));
        reply.send(Dynamic::from("second"));

        let response = reply.finish("GET", "/", Dynamic::UNIT).unwrap();
        assert_eq!(response.body, Bytes::from("first"));
    }

    #[test]
    fn reject_invalid_status() {
        assert!(Reply::new().status(42).is_err());
        assert!(Reply::new().status(700).is_err());
    }
}
