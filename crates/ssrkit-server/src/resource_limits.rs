//! Resource limits for fragment execution.
//!
//! Bounds how long a render may take and how much work a script may do
//! inside an engine before it is aborted.

use std::time::Duration;

/// Limits applied to every render.
///
/// # Fields
///
/// - `render_timeout` - wall-clock bound on one render (default: 10 seconds)
/// - `loop_iteration_limit` - loop iterations a script may run before the
///   engine throws (default: 10 million)
/// - `recursion_limit` - maximum call depth (default: 512)
///
/// The timeout is enforced by the caller: a render that exceeds it is
/// reported as timed out while the engine finishes on its own thread and is
/// returned to the pool. The loop and recursion limits are what actually
/// stop a runaway script.
///
/// # Example
///
/// ```
/// use ssrkit_server::ResourceLimits;
/// use std::time::Duration;
///
/// let limits = ResourceLimits::new()
///     .with_render_timeout(Duration::from_millis(500))
///     .with_loop_iteration_limit(1_000_000);
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub render_timeout: Duration,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(10),
            loop_iteration_limit: 10_000_000,
            recursion_limit: 512,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Validates the limits.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the render timeout is zero or longer than 10 minutes
    /// - the loop iteration or recursion limit is zero
    pub fn validate(&self) -> Result<(), String> {
        if self.render_timeout.is_zero() {
            return Err("render timeout must be greater than zero".to_string());
        }
        if self.render_timeout > Duration::from_secs(600) {
            return Err(format!(
                "render timeout must be <= 10 minutes (got {} seconds)",
                self.render_timeout.as_secs()
            ));
        }
        if self.loop_iteration_limit == 0 {
            return Err("loop iteration limit must be greater than zero".to_string());
        }
        if self.recursion_limit == 0 {
            return Err("recursion limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl From<&ssrkit_common::SsrConfig> for ResourceLimits {
    fn from(config: &ssrkit_common::SsrConfig) -> Self {
        Self::new()
            .with_render_timeout(config.render_timeout())
            .with_loop_iteration_limit(config.loop_iteration_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.render_timeout, Duration::from_secs(10));
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let limits = ResourceLimits::new().with_render_timeout(Duration::ZERO);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_excessive_timeout_rejected() {
        let limits = ResourceLimits::new().with_render_timeout(Duration::from_secs(601));
        assert!(limits.validate().unwrap_err().contains("10 minutes"));
    }

    #[test]
    fn test_zero_loop_limit_rejected() {
        let limits = ResourceLimits::new().with_loop_iteration_limit(0);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_from_config() {
        let config = ssrkit_common::SsrConfig {
            render_timeout_ms: 250,
            loop_iteration_limit: 42,
            ..Default::default()
        };
        let limits = ResourceLimits::from(&config);
        assert_eq!(limits.render_timeout, Duration::from_millis(250));
        assert_eq!(limits.loop_iteration_limit, 42);
    }
}
