//! Test utilities for handler and router tests.

use crate::AppState;
use crate::config::{Config, DiskConfig};
use axum_test::TestServer;
use std::collections::BTreeMap;

/// Config with a single in-memory `public` disk at `http://localhost/storage/`
pub fn create_test_config() -> Config {
    let mut disks = BTreeMap::new();
    disks.insert(
        "public".to_string(),
        DiskConfig::Memory {
            url: "http://localhost/storage/".parse().unwrap(),
        },
    );

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        disks,
        ..Default::default()
    }
}

pub async fn create_test_app(config: Config) -> (TestServer, AppState) {
    config.validate().expect("test config should be valid");

    let app = crate::Application::new(config).await.expect("Failed to create application");

    app.into_test_server()
}
