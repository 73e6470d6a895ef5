use std::io;
use thiserror::Error;

/// Unified error type for the node controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The panel declared a node type the engine cannot serve
    #[error("Unsupported node type: {0}")]
    UnsupportedNodeType(String),

    /// A startup step failed; the controller did not start
    #[error("Bootstrap failed while {stage}: {message}")]
    Bootstrap {
        stage: &'static str,
        message: String,
    },

    /// Invalid lifecycle transition (e.g. starting a controller twice)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Wrap a collaborator error raised during a bootstrap stage
    pub fn bootstrap(stage: &'static str, err: anyhow::Error) -> Self {
        ControllerError::Bootstrap {
            stage,
            message: format!("{:#}", err),
        }
    }
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        ControllerError::Other(format!("{:#}", err))
    }
}

impl From<serde_yaml::Error> for ControllerError {
    fn from(err: serde_yaml::Error) -> Self {
        ControllerError::Config(format!("YAML parse error: {}", err))
    }
}
