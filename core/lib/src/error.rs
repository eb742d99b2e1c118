use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::policy::PolicyError;
use crate::stack::SynthesisError;
use crate::validation::ValidationError;
use std::fmt;

/// Error context for providing additional information about errors
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
    pub additional_info: Vec<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            resource_name: None,
            resource_type: None,
            additional_info: Vec::new(),
        }
    }

    pub fn with_resource(
        mut self,
        name: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.resource_name = Some(name.into());
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info.push(info.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation: {}", self.operation)?;
        if let Some(ref name) = self.resource_name {
            write!(f, ", Resource: {}", name)?;
        }
        if let Some(ref resource_type) = self.resource_type {
            write!(f, " ({})", resource_type)?;
        }
        if !self.additional_info.is_empty() {
            write!(f, ", Info: {}", self.additional_info.join(", "))?;
        }
        Ok(())
    }
}

/// Top-level error for configuration, synthesis and provisioning
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Configuration error: {message}")]
    Config {
        #[source]
        source: Option<ConfigError>,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Synthesis error: {message}")]
    Synthesis {
        #[source]
        source: Option<SynthesisError>,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Validation error: {message}")]
    Validation {
        #[source]
        source: Option<ValidationError>,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Provisioning error: {message}")]
    Engine {
        #[source]
        source: Option<EngineError>,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Policy error: {message}")]
    Policy {
        #[source]
        source: Option<PolicyError>,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("IO error: {message}")]
    Io {
        #[source]
        source: std::io::Error,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Timeout error: {message}")]
    Timeout {
        message: String,
        context: Option<ErrorContext>,
    },
}

impl InfraError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            source: None,
            message: message.into(),
            context: None,
        }
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::Synthesis {
            source: None,
            message: message.into(),
            context: None,
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            source: None,
            message: message.into(),
            context: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            context: None,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        match &mut self {
            InfraError::Config { context: ctx, .. }
            | InfraError::Synthesis { context: ctx, .. }
            | InfraError::Validation { context: ctx, .. }
            | InfraError::Engine { context: ctx, .. }
            | InfraError::Policy { context: ctx, .. }
            | InfraError::Io { context: ctx, .. }
            | InfraError::Serialization { context: ctx, .. }
            | InfraError::Timeout { context: ctx, .. } => *ctx = Some(context),
        }
        self
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            InfraError::Engine {
                source: Some(engine_error),
                ..
            } => engine_error.is_retryable(),
            InfraError::Timeout { .. } => true,
            InfraError::Io { .. } => true,
            _ => false,
        }
    }

    /// Get the severity level of the error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            InfraError::Config { .. } => ErrorSeverity::High,
            InfraError::Synthesis { .. } => ErrorSeverity::High,
            InfraError::Validation { .. } => ErrorSeverity::High,
            InfraError::Engine {
                source: Some(EngineError::Credentials(_)),
                ..
            } => ErrorSeverity::Critical,
            InfraError::Engine {
                source: Some(EngineError::StackFailed { .. }),
                ..
            } => ErrorSeverity::Critical,
            InfraError::Engine { .. } => ErrorSeverity::High,
            InfraError::Policy { .. } => ErrorSeverity::High,
            InfraError::Io { .. } => ErrorSeverity::Medium,
            InfraError::Serialization { .. } => ErrorSeverity::Medium,
            InfraError::Timeout { .. } => ErrorSeverity::Medium,
        }
    }

    /// Get suggested remediation steps for the error
    pub fn remediation_steps(&self) -> Vec<String> {
        match self {
            InfraError::Config { .. } => vec![
                "Check your infra.toml configuration file".to_string(),
                "Ensure image URIs for the API handler and the app are set".to_string(),
                "Run 'fraud-infra validate' to check the configuration".to_string(),
            ],
            InfraError::Synthesis {
                source: Some(SynthesisError::UndeclaredRole(_)),
                ..
            } => vec![
                "Declare the role before granting it access".to_string(),
                "Check the assembly order of components".to_string(),
            ],
            InfraError::Synthesis { .. } => vec![
                "Check for duplicate construct ids within a component".to_string(),
                "Review the network settings in infra.toml".to_string(),
            ],
            InfraError::Validation { .. } => vec![
                "Run 'fraud-infra validate' to list every issue".to_string(),
                "Ensure referenced resources are declared in the same stack".to_string(),
                "Remove duplicate fixed names such as bucket or collection names".to_string(),
            ],
            InfraError::Engine {
                source: Some(engine_error),
                ..
            } => engine_error.remediation_steps(),
            InfraError::Engine { .. } => vec![
                "Check your AWS credentials and permissions".to_string(),
                "Verify the deployment region in infra.toml".to_string(),
                "Inspect stack events in the CloudFormation console".to_string(),
            ],
            InfraError::Policy { .. } => vec![
                "Check the policy document for missing actions or resources".to_string(),
                "Ensure every statement has an effect".to_string(),
            ],
            InfraError::Io { .. } => vec![
                "Check file and directory permissions".to_string(),
                "Ensure sufficient disk space".to_string(),
                "Verify file paths are correct".to_string(),
            ],
            InfraError::Serialization { .. } => vec![
                "Check the template or manifest for manual edits".to_string(),
                "Re-run 'fraud-infra synth' to regenerate output".to_string(),
            ],
            InfraError::Timeout { .. } => vec![
                "Check stack progress in the CloudFormation console".to_string(),
                "Re-run the command once the stack settles".to_string(),
            ],
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            InfraError::Config { .. } => "configuration",
            InfraError::Synthesis { .. } => "synthesis",
            InfraError::Validation { .. } => "validation",
            InfraError::Engine { .. } => "engine",
            InfraError::Policy { .. } => "policy",
            InfraError::Io { .. } => "io",
            InfraError::Serialization { .. } => "serialization",
            InfraError::Timeout { .. } => "timeout",
        }
    }

    /// Get the error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            InfraError::Config { context, .. }
            | InfraError::Synthesis { context, .. }
            | InfraError::Validation { context, .. }
            | InfraError::Engine { context, .. }
            | InfraError::Policy { context, .. }
            | InfraError::Io { context, .. }
            | InfraError::Serialization { context, .. }
            | InfraError::Timeout { context, .. } => context.as_ref(),
        }
    }

    /// Create a formatted error report with context and remediation steps
    pub fn error_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);

        if let Some(source) = std::error::Error::source(self) {
            report.push_str(&format!("Cause: {}\n", source));
        }

        if let Some(context) = self.context() {
            report.push_str(&format!("Context: {}\n", context));
        }

        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Severity: {}\n", self.severity()));
        report.push_str(&format!("Retryable: {}\n", self.is_retryable()));

        let steps = self.remediation_steps();
        if !steps.is_empty() {
            report.push_str("\nRemediation Steps:\n");
            for (i, step) in steps.iter().enumerate() {
                report.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        report
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "Low"),
            ErrorSeverity::Medium => write!(f, "Medium"),
            ErrorSeverity::High => write!(f, "High"),
            ErrorSeverity::Critical => write!(f, "Critical"),
        }
    }
}

impl From<ConfigError> for InfraError {
    fn from(err: ConfigError) -> Self {
        InfraError::Config {
            message: err.to_string(),
            source: Some(err),
            context: None,
        }
    }
}

impl From<SynthesisError> for InfraError {
    fn from(err: SynthesisError) -> Self {
        InfraError::Synthesis {
            message: err.to_string(),
            source: Some(err),
            context: None,
        }
    }
}

impl From<ValidationError> for InfraError {
    fn from(err: ValidationError) -> Self {
        InfraError::Validation {
            message: err.to_string(),
            source: Some(err),
            context: None,
        }
    }
}

impl From<EngineError> for InfraError {
    fn from(err: EngineError) -> Self {
        InfraError::Engine {
            message: err.to_string(),
            source: Some(err),
            context: None,
        }
    }
}

impl From<PolicyError> for InfraError {
    fn from(err: PolicyError) -> Self {
        InfraError::Policy {
            message: err.to_string(),
            source: Some(err),
            context: None,
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        InfraError::Io {
            message: err.to_string(),
            source: err,
            context: None,
        }
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(err: serde_json::Error) -> Self {
        InfraError::serialization(err.to_string())
    }
}

/// Result type alias for infrastructure operations
pub type InfraResult<T> = Result<T, InfraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_conversion() {
        let err: InfraError =
            ConfigError::Validation("stack_name cannot be empty".to_string()).into();
        assert_eq!(err.category(), "configuration");
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("stack_name cannot be empty"));
    }

    #[test]
    fn test_engine_errors_delegate_retryability() {
        let throttled: InfraError = EngineError::Throttled("Rate exceeded".to_string()).into();
        assert!(throttled.is_retryable());

        let failed: InfraError = EngineError::StackFailed {
            stack_name: "FraudDetection".to_string(),
            status: "ROLLBACK_COMPLETE".to_string(),
            reason: None,
        }
        .into();
        assert!(!failed.is_retryable());
        assert_eq!(failed.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_undeclared_role_remediation() {
        let err: InfraError =
            SynthesisError::UndeclaredRole("AuthEcsRole1A2B3C4D".to_string()).into();
        let steps = err.remediation_steps();
        assert!(steps[0].contains("Declare the role"));
    }

    #[test]
    fn test_error_report_includes_context() {
        let err = InfraError::synthesis("duplicate id").with_context(
            ErrorContext::new("assemble")
                .with_resource("StorageBucket", "AWS::S3::Bucket")
                .with_info("component=storage"),
        );

        let report = err.error_report();
        assert!(report.contains("Error: Synthesis error: duplicate id"));
        assert!(report.contains("Resource: StorageBucket (AWS::S3::Bucket)"));
        assert!(report.contains("component=storage"));
        assert!(report.contains("Remediation Steps:"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::High);
        assert!(ErrorSeverity::Medium > ErrorSeverity::Low);
    }
}
