//! Infrastructure declarations for the fraud-detection application.
//!
//! Components declare resources into a [`Stack`]; the stack finalizes into a
//! CloudFormation [`Template`](fraud_infra_template::Template) that is
//! validated, written by the [`Synthesizer`] and handed to a
//! [`ProvisioningEngine`] for deployment.

pub use fraud_infra_template as template;
pub use serde_json;

pub mod assembly;
pub mod cidr;
pub mod components;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod handles;
pub mod iam;
pub mod logging;
pub mod policy;
pub mod retry;
pub mod stack;
pub mod synth;
pub mod validation;

// Re-export commonly used types
pub use assembly::{stack_environment, stack_tags, FraudDetectionStack, COMPONENT_IDS};
pub use cidr::{CidrError, Ipv4Cidr};
pub use config::{
    ApiConfig, AppConfig, AuthConfig, ConfigChanges, ConfigError, DeploymentConfig, InfraConfig,
    LocationConfig, NetworkConfig, ParametersConfig, SearchConfig, StorageConfig,
    CONFIG_FILE_NAME,
};
pub use diff::{ChangeKind, EntryChange, ResourceChange, TemplateDiff};
pub use engine::{
    classify_status, load_sdk_config, resolve_account, stack_parameters, CloudFormationEngine,
    DeployOptions, DeployOutcome, Deployer, EngineError, MockProvisioningEngine,
    ProvisioningEngine, StackDescription, StackPhase, StackRequest, UpdateOutcome,
};
pub use error::{ErrorContext, ErrorSeverity, InfraError, InfraResult};
pub use handles::*;
pub use iam::{Effect, InlinePolicy, PolicyDocument, PolicyStatement, Principal, Role};
pub use logging::{
    AuditAction, AuditEntry, ComponentSummary, OperationStatus, SynthesisLogEntry,
    SynthesisLogger, SynthesisStatus, SynthesisSummaryReport, TimedOperation,
};
pub use policy::{PolicyError, PolicyManager, PolicyTemplate};
pub use retry::{retry_engine_call, RetryConfig, RetryExecutor};
pub use stack::{Environment, Scope, Stack, SynthesisError};
pub use synth::{load_template, Manifest, SynthesisOutput, Synthesizer, DEFAULT_OUT_DIR};
pub use validation::{
    creation_order, validate_template, Check, Severity, TemplateValidator, ValidationError,
    ValidationIssue, ValidationReport,
};
