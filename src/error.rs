use thiserror::Error;

/// Failures that abort processing of a single job.
///
/// The `Display` output of each variant is the exact string published to the
/// response channel for that branch. None of them acknowledge the inbound
/// message, so the job source redelivers it later.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("JSON Processing Error: {0}")]
    Decode(String),

    #[error("Retrieval Error: {0}")]
    Retrieval(String),

    #[error("Container Execution Error: {0}")]
    Launch(#[from] LaunchError),
}

/// The sandbox could not be started, so no execution outcome exists.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to start container: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for container: {0}")]
    Wait(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_messages() {
        let err = WorkerError::from(LaunchError::UnsupportedLanguage("cobol".to_string()));
        assert_eq!(
            err.to_string(),
            "Container Execution Error: Unsupported language: cobol"
        );

        let err = WorkerError::Decode("expected value at line 1 column 1".to_string());
        assert!(err.to_string().starts_with("JSON Processing Error: "));
    }
}
