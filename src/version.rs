//! Build information embedded by `build.rs`

use std::fmt;

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, or "unknown" outside a git checkout
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    git_dirty: &'static str,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("PROBE_NODE_GIT_HASH"),
            git_branch: env!("PROBE_NODE_GIT_BRANCH"),
            git_dirty: env!("PROBE_NODE_GIT_DIRTY"),
            build_timestamp: env!("PROBE_NODE_BUILD_TIMESTAMP"),
            target: env!("PROBE_NODE_TARGET"),
            host: env!("PROBE_NODE_HOST"),
            profile: env!("PROBE_NODE_PROFILE"),
            rustc_version: env!("PROBE_NODE_RUSTC_VERSION"),
        }
    }

    pub fn git_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// Version plus commit, e.g. "0.1.0-abc1234" or "0.1.0-abc1234-dirty"
    pub fn full_version(&self) -> String {
        let suffix = if self.git_dirty() { "-dirty" } else { "" };
        format!("{}-{}{}", self.version, self.git_hash, suffix)
    }

    /// `User-Agent` value for outbound HTTP requests
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "  Commit:   {} ({})", self.git_hash, self.git_branch)?;
        writeln!(f, "  Built:    {} [{}]", self.build_timestamp, self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Host:     {}", self.host)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

pub fn print_version() {
    print!("{}", build_info());
}
