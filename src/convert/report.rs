use serde::Serialize;

use crate::error::ConversionError;
use crate::logging::log_conversion_error;

use super::types::ConversionStage;

/// Context handed to an [`ErrorReporter`] when a conversion fails.
#[derive(Debug, Serialize)]
pub struct FailureContext<'a> {
    /// Name of the avatar being converted.
    pub model_name: &'a str,
    pub version: &'a str,
    pub stage: ConversionStage,
    pub code: &'static str,
    pub message: String,
}

/// User-facing sink for conversion failures. Invoked once per failed run,
/// before the error is returned to the caller.
pub trait ErrorReporter {
    fn report(&self, context: &FailureContext<'_>, error: &ConversionError);
}

/// Reports failures through the crate log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, context: &FailureContext<'_>, error: &ConversionError) {
        let operation = format!(
            "Converting '{}' failed while {} (version {})",
            context.model_name, context.stage, context.version
        );
        log_conversion_error(error, Some(&operation));
    }
}

impl<'a> FailureContext<'a> {
    pub(super) fn new(
        model_name: &'a str,
        version: &'a str,
        stage: ConversionStage,
        error: &ConversionError,
    ) -> Self {
        Self {
            model_name,
            version,
            stage,
            code: error.code(),
            message: error.to_string(),
        }
    }
}
