use std::time::Duration;

/// Failure taxonomy shared by every worker pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Oversized, corrupt or undecodable input. Retrying cannot help.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Temp-file cleanup failure. Logged, never fails a job on its own.
    #[error("Resource error: {0}")]
    Resource(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Validation(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Source(_) => "source",
            PipelineError::Processing(_) => "processing",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Resource(_) => "resource",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Source(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Source(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Validation(format!("Image could not be decoded: {err}"))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Processing(format!("Blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_is_permanent() {
        assert!(!PipelineError::Validation("too big".into()).is_retryable());
        assert!(PipelineError::Source("404".into()).is_retryable());
        assert!(PipelineError::Processing("boom".into()).is_retryable());
        assert!(PipelineError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = PipelineError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1.5s");
        assert_eq!(err.kind(), "timeout");
    }
}
