//! Error types for nodeadm.
//!
//! Messages render as `operation: context: cause` chains so the CLI can print
//! the top-level error alone.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Filesystem error with the operation that triggered it
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Downloaded bytes do not match the published digest. Never retried.
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    Checksum {
        name: String,
        expected: String,
        actual: String,
    },

    /// No install has ever run on this host
    #[error("tracker file {} does not exist", .0.display())]
    TrackerNotFound(PathBuf),

    #[error("unknown component {0:?}")]
    UnknownComponent(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(
        "credential provider mismatch: {installed} is installed but {requested} was requested. \
         Run `nodeadm uninstall` and then `nodeadm install` with the new credential provider"
    )]
    CredentialProviderMismatch { installed: String, requested: String },

    #[error("archive entry {entry:?} resolves outside of {}", .dest.display())]
    PathTraversal { entry: String, dest: PathBuf },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Deadline reached inside a retry loop; carries the last failure.
    #[error("{operation}: gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("daemon {name}: {message}")]
    Daemon { name: String, message: String },

    #[error("{operation} {component}: {source}")]
    Component {
        operation: &'static str,
        component: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("artifact {0} not found in release manifest")]
    ArtifactNotFound(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn daemon(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Daemon {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap an error with the component it came from, e.g. `install kubelet: ...`
    pub fn component(operation: &'static str, component: &'static str, source: Error) -> Self {
        Self::Component {
            operation,
            component,
            source: Box::new(source),
        }
    }

    /// True when the tracker file is absent, looking through component wrapping.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::TrackerNotFound(_) => true,
            Self::Component { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_checksum(&self) -> bool {
        match self {
            Self::Checksum { .. } => true,
            Self::Component { source, .. } | Self::RetriesExhausted { source, .. } => {
                source.is_checksum()
            }
            _ => false,
        }
    }
}

/// Attach context to `std::io::Result` values
pub(crate) trait IoContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| Error::io(context(), e))
    }
}
