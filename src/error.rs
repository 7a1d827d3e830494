use std::path::PathBuf;

use thiserror::Error;

use crate::convert::ConversionStage;

#[derive(Error, Debug)]
pub enum ConversionError {
    /// Required bones/behaviors are absent or an expression binding is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Temporary storage could not be allocated or written.
    #[error("Resource error at {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected failure surfacing from a collaborator during `stage`.
    #[error("Conversion failed while {stage}: {source:#}")]
    Failure {
        stage: ConversionStage,
        #[source]
        source: anyhow::Error,
    },
}

impl ConversionError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ConversionError::Configuration(message.into())
    }

    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConversionError::Resource {
            path: path.into(),
            source,
        }
    }

    pub fn failure(stage: ConversionStage, source: impl Into<anyhow::Error>) -> Self {
        ConversionError::Failure {
            stage,
            source: source.into(),
        }
    }

    /// Short machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::Configuration(_) => "CONFIGURATION_ERROR",
            ConversionError::Resource { .. } => "RESOURCE_ERROR",
            ConversionError::Failure { .. } => "CONVERSION_FAILURE",
        }
    }
}
