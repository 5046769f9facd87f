//! Request view handed to plugin handlers

use std::collections::BTreeMap;

use axum::body::Bytes;
use rhai::{Dynamic, Map};

use crate::{Error, Result};

/// Inbound request, detached from the HTTP server types
#[derive(Debug, Clone, Default)]
pub struct PluginRequest {
    /// Upper-case method
    pub method: String,
    /// Request path, without query
    pub path: String,
    /// Raw query string, without `?`
    pub query: Option<String>,
    /// Headers with lower-cased names, repeated values joined with `", "`
    pub headers: BTreeMap<String, String>,
    /// Raw body
    pub body: Bytes,
}

impl PluginRequest {
    /// Create a request without headers or body
    pub fn new(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method: method.into().to_ascii_uppercase(),
            path,
            query,
            ..Self::default()
        }
    }

    /// Add a header, joining with an earlier value of the same name
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.append_header(name, value);
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header, joining with an earlier value of the same name
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Value of a header by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Path plus query, as received
    #[must_use]
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// Query parameters, last value wins on repeats
    #[must_use]
    pub fn query_params(&self) -> BTreeMap<String, String> {
        let Some(query) = &self.query else {
            return BTreeMap::new();
        };

        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn is_json(&self) -> bool {
        self.header("content-type").is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("application/json")
                || mime.to_ascii_lowercase().ends_with("+json")
        })
    }

    /// Decode the body for a handler
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if a JSON body does not parse
    pub fn body_value(&self) -> Result<Dynamic> {
        if self.body.is_empty() {
            return Ok(Dynamic::UNIT);
        }

        if self.is_json() {
            let value: serde_json::Value = serde_json::from_slice(&self.body)
                .map_err(|e| Error::BadRequest(format!("body is not valid JSON: {e}")))?;
            return rhai::serde::to_dynamic(value)
                .map_err(|e| Error::BadRequest(format!("unsupported JSON body: {e}")));
        }

        Ok(Dynamic::from(String::from_utf8_lossy(&self.body).into_owned()))
    }

    /// Script-facing view of this request with matched path parameters
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if the body cannot be decoded
    pub fn to_view(&self, params: &BTreeMap<String, String>) -> Result<Dynamic> {
        let mut view = Map::new();
        view.insert("method".into(), self.method.clone().into());
        view.insert("url".into(), self.url().into());
        view.insert("path".into(), self.path.clone().into());
        view.insert("headers".into(), string_map(&self.headers));
        view.insert("params".into(), string_map(params));
        view.insert("query".into(), string_map(&self.query_params()));
        view.insert("body".into(), self.body_value()?);
        Ok(Dynamic::from_map(view))
    }
}

fn string_map(values: &BTreeMap<String, String>) -> Dynamic {
    let map: Map = values
        .iter()
        .map(|(k, v)| (k.as_str().into(), v.clone().into()))
        .collect();
    Dynamic::from_map(map)
}
