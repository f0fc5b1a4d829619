use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsrError {
    #[error("Fragment not found: {fragment} (looked in {path})")]
    FragmentNotFound { fragment: String, path: String },

    #[error("Invalid fragment name: {0}")]
    InvalidFragmentName(String),

    #[error("Script execution failed in {fragment}: {message}")]
    ScriptExecution { fragment: String, message: String },

    #[error("Failed to inject global '{global}' for {fragment}: {message}")]
    ContextInjection {
        fragment: String,
        global: String,
        message: String,
    },

    #[error("Render() failed in {fragment}: {message}")]
    RenderInvocation { fragment: String, message: String },

    #[error("Render of {fragment} timed out after {timeout_ms}ms")]
    RenderTimeout { fragment: String, timeout_ms: u64 },

    #[error("Engine creation failed: {0}")]
    EngineCreation(String),

    #[error("Engine pool closed")]
    PoolClosed,

    #[error("Render cache error: {0}")]
    Cache(String),

    #[error("Change detection failed for {path}: {message}")]
    ChangeDetection { path: String, message: String },

    #[error("Build failed: {0}")]
    Build(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SsrError {
    /// Fragment the error relates to, when there is one.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            SsrError::FragmentNotFound { fragment, .. }
            | SsrError::ScriptExecution { fragment, .. }
            | SsrError::ContextInjection { fragment, .. }
            | SsrError::RenderInvocation { fragment, .. }
            | SsrError::RenderTimeout { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    /// Whether the error came out of running a fragment rather than
    /// from infrastructure (pool, disk, config).
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            SsrError::ScriptExecution { .. }
                | SsrError::ContextInjection { .. }
                | SsrError::RenderInvocation { .. }
                | SsrError::RenderTimeout { .. }
        )
    }
}

impl From<std::net::AddrParseError> for SsrError {
    fn from(err: std::net::AddrParseError) -> Self {
        SsrError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SsrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_fragment() {
        let err = SsrError::ScriptExecution {
            fragment: "Home.js".to_string(),
            message: "ReferenceError: x is not defined".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("Home.js"));
        assert!(text.contains("ReferenceError"));
    }

    #[test]
    fn test_fragment_accessor() {
        let err = SsrError::RenderTimeout {
            fragment: "Slow.js".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(err.fragment(), Some("Slow.js"));
        assert!(err.is_render_failure());

        let err = SsrError::PoolClosed;
        assert_eq!(err.fragment(), None);
        assert!(!err.is_render_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SsrError = io.into();
        assert!(matches!(err, SsrError::Io(_)));
    }
}
