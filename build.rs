//! Exposes build metadata to `src/version.rs` as `PROBE_NODE_*` env vars

use std::env;
use std::process::Command;

const UNKNOWN: &str = "unknown";

fn main() {
    for watched in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={}", watched);
    }

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
    let dirty = match run("git", &["status", "--porcelain"]) {
        Some(changes) => (!changes.is_empty()).to_string(),
        None => UNKNOWN.to_string(),
    };

    let vars = [
        ("GIT_HASH", run("git", &["rev-parse", "--short=8", "HEAD"])),
        ("GIT_BRANCH", run("git", &["rev-parse", "--abbrev-ref", "HEAD"])),
        ("GIT_DIRTY", Some(dirty)),
        ("BUILD_TIMESTAMP", Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())),
        ("TARGET", env::var("TARGET").ok()),
        ("HOST", env::var("HOST").ok()),
        ("PROFILE", env::var("PROFILE").ok()),
        ("RUSTC_VERSION", run(&rustc, &["--version"])),
    ];

    for (name, value) in vars {
        let value = value.filter(|v| !v.is_empty()).unwrap_or_else(|| UNKNOWN.into());
        println!("cargo:rustc-env=PROBE_NODE_{}={}", name, value);
    }
}

/// Trimmed stdout of a successful command
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}
