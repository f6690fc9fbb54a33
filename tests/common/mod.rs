//! Common test utilities and fixtures
//!
//! Shared by the CLI, config, and end-to-end tests.

#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Environment variables read by the node, cleared so the host shell can't leak in
pub const NODE_ENV_VARS: &[&str] = &[
    "PROBE_NODE_SID",
    "PROBE_NODE_CONFIG",
    "PROBE_NODE_ROLE",
    "PROBE_NODE_COORDINATOR_URL",
    "PROBE_NODE_RECONNECT_INTERVAL_MS",
    "PROBE_NODE_CONNECT_TIMEOUT_MS",
    "PROBE_NODE_HEARTBEAT_INTERVAL_MS",
    "PROBE_NODE_PROBE_COUNT",
    "PROBE_NODE_PROBE_TIMEOUT_MS",
    "PROBE_NODE_STATUS_URL",
    "PROBE_NODE_STATUS_USERNAME",
    "PROBE_NODE_STATUS_PASSWORD",
    "PROBE_NODE_STATUS_TIMEOUT_MS",
    "PROBE_NODE_LOG_LEVEL",
    "PROBE_NODE_LOG_FILE",
    "PROBE_NODE_LOG_JSON",
];

/// A `probe-node` command with a clean environment
pub fn node_cmd() -> Command {
    let mut cmd = Command::cargo_bin("probe-node").unwrap();
    for var in NODE_ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_exist() {
        assert!(valid_config_fixture().exists(), "Valid config fixture should exist");
        assert!(invalid_config_fixture().exists(), "Invalid config fixture should exist");
    }
}
