//! Shared test utilities

#![allow(dead_code)]

use std::time::Duration;

use pilet_gateway::{Config, Host};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CALC: &str = include_str!("../fixtures/calc.rhai");
pub const MATH: &str = include_str!("../fixtures/math.rhai");
pub const NOTES: &str = include_str!("../fixtures/notes.rhai");

/// Serve a script at `route`
pub async fn mount_script(server: &MockServer, route: &str, source: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(source))
        .mount(server)
        .await;
}

/// Serve the demo plugins' sources
pub async fn mount_demo_plugins(server: &MockServer) {
    mount_script(server, "/calc.rhai", CALC).await;
    mount_script(server, "/math.rhai", MATH).await;
    mount_script(server, "/notes.rhai", NOTES).await;
}

/// Feed entry for a plugin served by `server`
pub fn descriptor(server: &MockServer, name: &str, version: &str, script: &str) -> Value {
    json!({
        "name": name,
        "version": version,
        "link": format!("{}/{script}", server.uri()),
    })
}

/// Serve a feed snapshot after clearing every earlier mock
pub async fn mount_feed(server: &MockServer, items: Vec<Value>) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
        .mount(server)
        .await;
}

/// Configuration reading the feed from `server`, without watching
pub fn config_for(server: &MockServer) -> Config {
    let feed_url = Url::parse(&format!("{}/feed", server.uri())).expect("valid feed url");
    let mut config = Config::new(feed_url);
    config.watch = false;
    config.feed_timeout = Duration::from_secs(5);
    config.load_timeout = Duration::from_secs(10);
    config.handler_timeout = Duration::from_secs(2);
    config
}

/// Host with the calc and notes plugins installed
pub async fn demo_host(server: &MockServer) -> Host {
    mount_feed(
        server,
        vec![
            descriptor(server, "calc", "1.0.0", "calc.rhai"),
            descriptor(server, "notes", "1.0.0", "notes.rhai"),
        ],
    )
    .await;
    mount_demo_plugins(server).await;

    let host = Host::new(config_for(server)).expect("host builds");
    host.load_plugins().await.expect("feed reachable");
    host
}
