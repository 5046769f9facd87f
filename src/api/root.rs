//! Fixed root endpoint

use axum::{Json, Router, routing::get};
use serde::Serialize;

/// Static greeting served at `/`
#[derive(Debug, Serialize)]
pub struct Greeting {
    pub hello: &'static str,
}

async fn greeting() -> Json<Greeting> {
    Json(Greeting { hello: "world" })
}

/// Create the root router
#[must_use]
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/", get(greeting))
}
