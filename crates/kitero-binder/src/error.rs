use kitero_core::{AllocError, ConfigError};
use kitero_exec::CommandError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinuxBinderError {
    #[error("LinuxBinder has not been set up for a router yet")]
    NotSetUp,
    #[error("LinuxBinder was set up for a different router configuration")]
    RouterMismatch,
    #[error("interface {0:?} has no assigned mark index")]
    UnknownInterfaceIndex(String),
    #[error("no tracked binding for client {0}")]
    MissingBinding(String),
    #[error("mark sizing failed: {0}")]
    Mark(#[from] ConfigError),
    #[error("slot/ticket allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("command execution failed: {0}")]
    Command(#[from] CommandError),
    #[error("client {0} is an IPv6 address, which this binder does not support")]
    Ipv6Unsupported(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read state file {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path:?}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode state file {path:?}: {source}")]
    Decode {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
