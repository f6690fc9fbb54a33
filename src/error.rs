//! Error types for the probe node
//!
//! Every error carries a stable `E<nnn>` code. The hundreds digit is the
//! category, and the category decides the exit status when an error reaches
//! `main`. Command errors (5xx) never reach `main`: their display text is
//! what the coordinator receives inside `{"error": ...}`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

// ─────────────────────────────────────────────────────────────────
// Codes
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Config,
    File,
    Connection,
    Protocol,
    Command,
    Internal,
}

impl Category {
    /// Process exit status for errors of this category
    pub fn exit_code(self) -> i32 {
        match self {
            Category::Config => 10,
            Category::File => 20,
            Category::Connection => 30,
            Category::Protocol => 40,
            Category::Command => 50,
            Category::Internal => 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    ConfigNotFound = 100,
    ConfigParse = 101,
    ConfigInvalid = 102,

    FileRead = 200,
    FileWrite = 201,

    ConnectFailed = 300,
    ConnectTimeout = 301,
    ConnectionLost = 303,

    Malformed = 401,
    Encode = 404,

    ProbeSetup = 510,
    ProbeFailed = 511,
    StatusFetch = 520,
    StatusTimeout = 521,
    StatusBody = 522,

    Internal = 900,
}

impl ErrorCode {
    pub fn category(self) -> Category {
        match self as u16 / 100 {
            1 => Category::Config,
            2 => Category::File,
            3 => Category::Connection,
            4 => Category::Protocol,
            5 => Category::Command,
            _ => Category::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", *self as u16)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// `field` is the dotted TOML key, e.g. `coordinator.url`
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render configuration: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    #[error("Lost connection to coordinator: {message}")]
    ConnectionLost { message: String },

    #[error("Malformed protocol message: {message}")]
    ProtocolMalformed { message: String },

    #[error("Failed to encode message: {0}")]
    ProtocolEncode(#[source] serde_json::Error),

    // Command errors display the bare message
    /// The probe could not start: bad target or no ICMP socket
    #[error("{message}")]
    ProbeSetup { message: String },

    /// Every echo went unanswered
    #[error("{message}")]
    ProbeFailed { message: String },

    #[error("{message}")]
    StatusFetch { message: String },

    #[error("status request to {url} timed out after {timeout_ms}ms")]
    StatusTimeout { url: String, timeout_ms: u64 },

    /// The body arrived but cannot be embedded as JSON
    #[error("{message}")]
    StatusBody { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } | Error::Toml(_) => ErrorCode::ConfigParse,
            Error::ConfigValidation { .. } => ErrorCode::ConfigInvalid,
            Error::IoRead { .. } => ErrorCode::FileRead,
            Error::IoWrite { .. } => ErrorCode::FileWrite,
            Error::ConnectionFailed { .. } => ErrorCode::ConnectFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::ProtocolMalformed { .. } => ErrorCode::Malformed,
            Error::ProtocolEncode(_) => ErrorCode::Encode,
            Error::ProbeSetup { .. } => ErrorCode::ProbeSetup,
            Error::ProbeFailed { .. } => ErrorCode::ProbeFailed,
            Error::StatusFetch { .. } => ErrorCode::StatusFetch,
            Error::StatusTimeout { .. } => ErrorCode::StatusTimeout,
            Error::StatusBody { .. } => ErrorCode::StatusBody,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Transport failures the supervisor recovers from by redialing
    pub fn is_retryable(&self) -> bool {
        self.code().category() == Category::Connection
    }

    /// Errors that stop the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self.code().category(), Category::Config | Category::Internal)
    }

    pub fn exit_code(&self) -> i32 {
        self.code().category().exit_code()
    }

    /// Operator hint printed under the error on the terminal
    pub fn suggestion(&self) -> Option<&'static str> {
        let hint = match self {
            Error::ConfigValidation { field: Some(field), .. } if field == "node.sid" => {
                "A session id must be specified, for example: probe-node run --sid=7"
            }
            Error::ConfigNotFound { .. } => "Run 'probe-node config init' to write a default configuration file.",
            Error::ConfigParse { .. } => "Fix the TOML syntax, then check it with 'probe-node config validate'.",
            Error::ConfigValidation { .. } => "Correct the value named above in the configuration file or environment.",
            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => {
                "Check that the coordinator is running and that coordinator.url points at it."
            }
            Error::ProbeSetup { .. } => {
                "ICMP sockets may need extra privileges. On Linux check net.ipv4.ping_group_range."
            }
            _ => return None,
        };
        Some(hint)
    }

    /// Colored multi-line form for stderr
    pub fn format_for_terminal(&self) -> String {
        let mut out = format!("\x1b[31mError [{}]\x1b[0m: {}\n", self.code(), self);
        if let Some(hint) = self.suggestion() {
            out.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }
        out
    }

    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::ProtocolMalformed {
            message: message.into(),
        }
    }

    pub fn probe_setup(message: impl Into<String>) -> Self {
        Error::ProbeSetup {
            message: message.into(),
        }
    }

    pub fn probe_failed(message: impl Into<String>) -> Self {
        Error::ProbeFailed {
            message: message.into(),
        }
    }
}
