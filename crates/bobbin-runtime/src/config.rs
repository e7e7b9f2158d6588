//! Executor configuration.

use bobbin_core::DependencyCheck;

/// Setup-time options for an executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Value of the uniform constant bound at binding 0 of every dispatch.
    /// Generated kernels read it as their infinity sentinel.
    pub constant: f32,

    /// Whether to verify tape read-after-write order at setup.
    pub dependency_check: DependencyCheck,

    /// Label prefix for device objects. Defaults to the program name.
    pub label: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            constant: f32::INFINITY,
            dependency_check: DependencyCheck::Off,
            label: None,
        }
    }
}

impl ExecutorConfig {
    /// Enable strict dependency checking.
    pub fn strict(mut self) -> Self {
        self.dependency_check = DependencyCheck::Strict;
        self
    }

    /// Override the uniform constant.
    pub fn with_constant(mut self, constant: f32) -> Self {
        self.constant = constant;
        self
    }

    /// Set the label prefix for device objects.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert!(config.constant.is_infinite() && config.constant > 0.0);
        assert_eq!(config.dependency_check, DependencyCheck::Off);
        assert!(config.label.is_none());
    }

    #[test]
    fn test_builders() {
        let config = ExecutorConfig::default()
            .strict()
            .with_constant(-1.0)
            .with_label("text_model");
        assert_eq!(config.dependency_check, DependencyCheck::Strict);
        assert_eq!(config.constant, -1.0);
        assert_eq!(config.label.as_deref(), Some("text_model"));
    }
}
