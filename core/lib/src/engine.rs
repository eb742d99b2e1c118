//! Provisioning: handing a synthesized template to CloudFormation and
//! following the stack to a terminal status.

mod cloudformation;
mod mock;

pub use cloudformation::{load_sdk_config, resolve_account, CloudFormationEngine};
pub use mock::MockProvisioningEngine;

use crate::components::app::CLOUDFRONT_PREFIX_LIST_PARAMETER;
use crate::components::parameters::SERP_API_KEY_PARAMETER;
use crate::config::InfraConfig;
use crate::error::{ErrorContext, InfraError};
use crate::retry::{RetryConfig, RetryExecutor};
use async_trait::async_trait;
use fraud_infra_template::Template;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Capability needed for roles with fixed names
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

/// Provisioning engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Template rejected: {0}")]
    InvalidTemplate(String),

    #[error("Template upload failed: {0}")]
    Upload(String),

    #[error("Stack {stack_name} is busy with status {status}")]
    StackBusy { stack_name: String, status: String },

    #[error("Stack {stack_name} ended in {status}{}", reason_suffix(.reason.as_deref()))]
    StackFailed {
        stack_name: String,
        status: String,
        reason: Option<String>,
    },

    #[error("Provisioning engine error: {0}")]
    Unknown(String),
}

fn reason_suffix(reason: Option<&str>) -> String {
    reason.map(|r| format!(": {}", r)).unwrap_or_default()
}

impl EngineError {
    /// Classify an error message returned by the provisioning service
    pub fn from_service_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if lowered.contains("throttl") || lowered.contains("rate exceeded") {
            EngineError::Throttled(message)
        } else if lowered.contains("expiredtoken")
            || lowered.contains("invalidclienttokenid")
            || lowered.contains("no credentials")
            || lowered.contains("credentials provider")
        {
            EngineError::Credentials(message)
        } else if lowered.contains("accessdenied") || lowered.contains("not authorized") {
            EngineError::AccessDenied(message)
        } else if lowered.contains("does not exist") {
            EngineError::StackNotFound(message)
        } else if lowered.contains("dispatch failure")
            || lowered.contains("timed out")
            || lowered.contains("connection")
        {
            EngineError::Network(message)
        } else if lowered.contains("validationerror") || lowered.contains("template format error") {
            EngineError::InvalidTemplate(message)
        } else {
            EngineError::Unknown(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Throttled(_) | EngineError::Network(_))
    }

    /// Get suggested remediation steps for the error
    pub fn remediation_steps(&self) -> Vec<String> {
        match self {
            EngineError::Credentials(_) => vec![
                "Check your AWS credentials".to_string(),
                "Ensure your session token is not expired".to_string(),
                "Set AWS_PROFILE or run 'aws configure'".to_string(),
            ],
            EngineError::AccessDenied(_) => vec![
                "Ensure the caller may manage CloudFormation stacks and IAM roles".to_string(),
                "Check service control policies for the target account".to_string(),
            ],
            EngineError::StackNotFound(_) => vec![
                "Run 'fraud-infra deploy' to create the stack".to_string(),
                "Check the stack name and region in infra.toml".to_string(),
            ],
            EngineError::Throttled(_) | EngineError::Network(_) => vec![
                "Retry the command in a few moments".to_string(),
                "Check network connectivity to AWS".to_string(),
            ],
            EngineError::InvalidTemplate(_) => vec![
                "Run 'fraud-infra validate' to check the template".to_string(),
                "Inspect the synthesized template in the out directory".to_string(),
            ],
            EngineError::Upload(_) => vec![
                "Check deployment.template_bucket in infra.toml".to_string(),
                "Ensure the caller may write to the template bucket".to_string(),
            ],
            EngineError::StackBusy { .. } => vec![
                "Wait for the running stack operation to finish".to_string(),
            ],
            EngineError::StackFailed { .. } => vec![
                "Inspect stack events in the CloudFormation console".to_string(),
                "Delete a stack left in ROLLBACK_COMPLETE before redeploying".to_string(),
            ],
            EngineError::Unknown(_) => vec![
                "Inspect stack events in the CloudFormation console".to_string(),
            ],
        }
    }
}

/// Where a stack status sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    InProgress,
    Succeeded,
    Failed,
}

pub fn classify_status(status: &str) -> StackPhase {
    if status.ends_with("_IN_PROGRESS") {
        StackPhase::InProgress
    } else if status.ends_with("_FAILED")
        || status == "ROLLBACK_COMPLETE"
        || status == "UPDATE_ROLLBACK_COMPLETE"
        || status == "IMPORT_ROLLBACK_COMPLETE"
    {
        StackPhase::Failed
    } else {
        StackPhase::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: BTreeMap<String, String>,
}

impl StackDescription {
    pub fn phase(&self) -> StackPhase {
        classify_status(&self.status)
    }
}

/// Everything needed to create or update a stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Started { stack_id: Option<String> },
    NoChanges,
}

/// Seam between the deployer and the service that provisions stacks
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// `None` when the stack does not exist
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, EngineError>;

    /// Returns the new stack id
    async fn create_stack(&self, request: &StackRequest) -> Result<String, EngineError>;

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateOutcome, EngineError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), EngineError>;

    async fn stack_outputs(
        &self,
        stack_name: &str,
    ) -> Result<BTreeMap<String, String>, EngineError>;
}

/// Template parameter values supplied at deploy time
pub fn stack_parameters(config: &InfraConfig) -> Result<BTreeMap<String, String>, InfraError> {
    let env_name = &config.parameters.serp_api_key_env;
    let serp_api_key = std::env::var(env_name).map_err(|_| {
        InfraError::config(format!(
            "Environment variable {} must hold the SERP API key",
            env_name
        ))
        .with_context(
            ErrorContext::new("deploy")
                .with_info(format!("parameter={}", SERP_API_KEY_PARAMETER)),
        )
    })?;

    let mut parameters = BTreeMap::from([(SERP_API_KEY_PARAMETER.to_string(), serp_api_key)]);
    if let Some(prefix_list) = &config.app.cloudfront_prefix_list_id {
        parameters.insert(
            CLOUDFRONT_PREFIX_LIST_PARAMETER.to_string(),
            prefix_list.clone(),
        );
    }
    Ok(parameters)
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub poll_interval: Duration,
    /// Upper bound on waiting for a terminal status
    pub timeout: Duration,
    /// Upper bound on one engine call, retries included
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60 * 60),
            call_timeout: Duration::from_secs(5 * 60),
            retry: RetryConfig::for_engine_calls(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployOutcome {
    pub stack_name: String,
    pub status: String,
    /// False when the template matched the deployed stack
    pub changed: bool,
    pub outputs: BTreeMap<String, String>,
}

/// Drives a stack to the desired template through a provisioning engine
pub struct Deployer {
    engine: Box<dyn ProvisioningEngine>,
    options: DeployOptions,
}

impl Deployer {
    pub fn new(engine: Box<dyn ProvisioningEngine>, options: DeployOptions) -> Self {
        Self { engine, options }
    }

    /// Run one engine call with retries, bounded by `call_timeout`
    async fn call<F, Fut, T>(&self, operation: F) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let operation = &operation;
        RetryExecutor::new(self.options.retry.clone())
            .execute_with_timeout(
                move || async move { operation().await.map_err(InfraError::from) },
                self.options.call_timeout,
            )
            .await
    }

    pub async fn describe(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, InfraError> {
        let engine = self.engine.as_ref();
        self.call(move || engine.describe_stack(stack_name)).await
    }

    /// Create the stack, or update it when it already exists
    pub async fn deploy(
        &self,
        stack_name: &str,
        template: &Template,
        parameters: BTreeMap<String, String>,
    ) -> Result<DeployOutcome, InfraError> {
        let request = StackRequest {
            stack_name: stack_name.to_string(),
            template_body: template
                .to_json()
                .map_err(|e| InfraError::serialization(e.to_string()))?,
            parameters,
            capabilities: vec![CAPABILITY_NAMED_IAM.to_string()],
        };
        let engine = self.engine.as_ref();
        let request_ref = &request;

        let existing = match self.describe(stack_name).await? {
            Some(stack) if stack.status == "ROLLBACK_COMPLETE" => {
                warn!(
                    stack = stack_name,
                    "Stack is in ROLLBACK_COMPLETE, deleting before create"
                );
                self.destroy(stack_name).await?;
                None
            }
            Some(stack) if stack.phase() == StackPhase::InProgress => {
                return Err(EngineError::StackBusy {
                    stack_name: stack_name.to_string(),
                    status: stack.status,
                }
                .into());
            }
            other => other,
        };

        match existing {
            None => {
                info!(stack = stack_name, "Creating stack");
                let stack_id = self.call(move || engine.create_stack(request_ref)).await?;
                debug!(stack = stack_name, stack_id = %stack_id, "Stack creation started");
            }
            Some(current) => {
                info!(stack = stack_name, status = %current.status, "Updating stack");
                let outcome = self.call(move || engine.update_stack(request_ref)).await?;
                if outcome == UpdateOutcome::NoChanges {
                    info!(stack = stack_name, "No updates are to be performed");
                    return Ok(DeployOutcome {
                        stack_name: stack_name.to_string(),
                        status: current.status,
                        changed: false,
                        outputs: current.outputs,
                    });
                }
            }
        }

        let settled = self.wait_for_terminal(stack_name).await?;
        Ok(DeployOutcome {
            stack_name: stack_name.to_string(),
            status: settled.status,
            changed: true,
            outputs: settled.outputs,
        })
    }

    /// Poll until the stack leaves every `*_IN_PROGRESS` status
    pub async fn wait_for_terminal(
        &self,
        stack_name: &str,
    ) -> Result<StackDescription, InfraError> {
        tokio::time::timeout(self.options.timeout, self.poll_until_settled(stack_name))
            .await
            .map_err(|_| {
                InfraError::timeout(format!(
                    "Stack {} did not settle within {:?}",
                    stack_name, self.options.timeout
                ))
            })?
    }

    async fn poll_until_settled(&self, stack_name: &str) -> Result<StackDescription, InfraError> {
        loop {
            let Some(stack) = self.describe(stack_name).await? else {
                return Err(EngineError::StackNotFound(stack_name.to_string()).into());
            };
            match stack.phase() {
                StackPhase::InProgress => {
                    debug!(stack = stack_name, status = %stack.status, "Waiting for stack");
                    sleep(self.options.poll_interval).await;
                }
                StackPhase::Succeeded => {
                    info!(stack = stack_name, status = %stack.status, "Stack settled");
                    return Ok(stack);
                }
                StackPhase::Failed => {
                    return Err(EngineError::StackFailed {
                        stack_name: stack_name.to_string(),
                        status: stack.status,
                        reason: stack.status_reason,
                    }
                    .into());
                }
            }
        }
    }

    /// Delete the stack and wait until it is gone
    pub async fn destroy(&self, stack_name: &str) -> Result<(), InfraError> {
        if self.describe(stack_name).await?.is_none() {
            info!(stack = stack_name, "Stack does not exist, nothing to delete");
            return Ok(());
        }

        let engine = self.engine.as_ref();
        self.call(move || engine.delete_stack(stack_name)).await?;
        info!(stack = stack_name, "Stack deletion started");

        tokio::time::timeout(self.options.timeout, self.poll_until_deleted(stack_name))
            .await
            .map_err(|_| {
                InfraError::timeout(format!(
                    "Stack {} was not deleted within {:?}",
                    stack_name, self.options.timeout
                ))
            })?
    }

    async fn poll_until_deleted(&self, stack_name: &str) -> Result<(), InfraError> {
        loop {
            match self.describe(stack_name).await? {
                None => return Ok(()),
                Some(stack) if stack.status == "DELETE_COMPLETE" => return Ok(()),
                Some(stack) if stack.phase() == StackPhase::Failed => {
                    return Err(EngineError::StackFailed {
                        stack_name: stack_name.to_string(),
                        status: stack.status,
                        reason: stack.status_reason,
                    }
                    .into())
                }
                Some(_) => sleep(self.options.poll_interval).await,
            }
        }
    }

    pub async fn outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>, InfraError> {
        let engine = self.engine.as_ref();
        self.call(move || engine.stack_outputs(stack_name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::stack::tests::test_stack;

    fn options() -> DeployOptions {
        DeployOptions {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            call_timeout: Duration::from_secs(60),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(10),
                jitter_factor: 0.0,
                ..RetryConfig::for_engine_calls()
            },
        }
    }

    fn template() -> Template {
        test_stack().finalize().unwrap()
    }

    fn params() -> BTreeMap<String, String> {
        BTreeMap::from([(SERP_API_KEY_PARAMETER.to_string(), "secret".to_string())])
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status("CREATE_COMPLETE"), StackPhase::Succeeded);
        assert_eq!(classify_status("UPDATE_COMPLETE"), StackPhase::Succeeded);
        assert_eq!(
            classify_status("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"),
            StackPhase::InProgress
        );
        assert_eq!(classify_status("CREATE_FAILED"), StackPhase::Failed);
        assert_eq!(classify_status("ROLLBACK_COMPLETE"), StackPhase::Failed);
        assert_eq!(
            classify_status("UPDATE_ROLLBACK_COMPLETE"),
            StackPhase::Failed
        );
    }

    #[test]
    fn test_service_messages_are_classified() {
        let throttled = EngineError::from_service_message("Throttling: Rate exceeded");
        assert!(throttled.is_retryable());
        assert!(matches!(
            EngineError::from_service_message("ValidationError: Stack with id X does not exist"),
            EngineError::StackNotFound(_)
        ));
        assert!(matches!(
            EngineError::from_service_message("ExpiredToken: The security token has expired"),
            EngineError::Credentials(_)
        ));
        assert!(matches!(
            EngineError::from_service_message("ValidationError: Template format error"),
            EngineError::InvalidTemplate(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_creates_missing_stack() {
        let engine = MockProvisioningEngine::new()
            .with_statuses([
                "CREATE_IN_PROGRESS",
                "CREATE_IN_PROGRESS",
                "CREATE_COMPLETE",
            ])
            .with_outputs([("FraudDetectionApiUrl", "https://api.example.com/prod/")]);
        let recorder = engine.clone();

        let outcome = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap();

        assert_eq!(outcome.status, "CREATE_COMPLETE");
        assert!(outcome.changed);
        assert_eq!(
            outcome.outputs["FraudDetectionApiUrl"],
            "https://api.example.com/prod/"
        );

        let calls = recorder.calls();
        let creates = calls.iter().filter(|call| call.as_str() == "create");
        assert_eq!(creates.count(), 1);
        let request = recorder.last_request().unwrap();
        assert_eq!(request.capabilities, vec![CAPABILITY_NAMED_IAM]);
        assert_eq!(request.parameters[SERP_API_KEY_PARAMETER], "secret");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_updates_existing_stack() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "CREATE_COMPLETE")
            .with_statuses(["UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"]);
        let recorder = engine.clone();

        let outcome = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap();

        assert_eq!(outcome.status, "UPDATE_COMPLETE");
        assert!(recorder.calls().contains(&"update".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_reports_no_updates() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "UPDATE_COMPLETE")
            .without_changes();

        let outcome = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.status, "UPDATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_fails_deploy() {
        let engine = MockProvisioningEngine::new()
            .with_statuses([
                "CREATE_IN_PROGRESS",
                "ROLLBACK_IN_PROGRESS",
                "ROLLBACK_COMPLETE",
            ])
            .with_status_reason("The following resource(s) failed to create: [appEcsCluster]");

        let err = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap_err();

        match err {
            InfraError::Engine {
                source: Some(EngineError::StackFailed { status, reason, .. }),
                ..
            } => {
                assert_eq!(status, "ROLLBACK_COMPLETE");
                assert!(reason.unwrap().contains("appEcsCluster"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_calls_are_retried() {
        let engine = MockProvisioningEngine::new()
            .with_statuses(["CREATE_COMPLETE"])
            .with_failures([EngineError::Throttled("Rate exceeded".to_string())]);

        let outcome = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap();

        assert_eq!(outcome.status, "CREATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_stack_is_rejected() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "UPDATE_IN_PROGRESS");

        let err = Deployer::new(Box::new(engine), options())
            .deploy("FraudDetection", &template(), params())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_waits_for_deletion() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "CREATE_COMPLETE")
            .with_statuses(["DELETE_IN_PROGRESS", "DELETE_COMPLETE"]);
        let recorder = engine.clone();

        Deployer::new(Box::new(engine), options())
            .destroy("FraudDetection")
            .await
            .unwrap();

        assert!(recorder.calls().contains(&"delete".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_missing_stack_is_noop() {
        let engine = MockProvisioningEngine::new();
        let recorder = engine.clone();

        Deployer::new(Box::new(engine), options())
            .destroy("FraudDetection")
            .await
            .unwrap();

        assert!(!recorder.calls().contains(&"delete".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_times_out() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "CREATE_IN_PROGRESS");
        let deployer = Deployer::new(
            Box::new(engine),
            DeployOptions {
                timeout: Duration::from_secs(30),
                ..options()
            },
        );

        let err = deployer
            .wait_for_terminal("FraudDetection")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_call_times_out() {
        let engine = MockProvisioningEngine::existing("FraudDetection", "CREATE_COMPLETE")
            .with_outputs([("FraudDetectionApiUrl", "https://api.example.com/prod/")])
            .with_latency(Duration::from_secs(120));
        let deployer = Deployer::new(Box::new(engine), options());

        let err = deployer.outputs("FraudDetection").await.unwrap_err();
        assert_eq!(err.category(), "timeout");
    }

    #[test]
    fn test_stack_parameters_read_the_environment() {
        let mut config = test_config();
        config.parameters.serp_api_key_env = "FRAUD_INFRA_TEST_SERP_KEY".to_string();
        config.app.cloudfront_prefix_list_id = Some("pl-3b927c52".to_string());

        assert!(stack_parameters(&config).is_err());

        std::env::set_var("FRAUD_INFRA_TEST_SERP_KEY", "key");
        let parameters = stack_parameters(&config).unwrap();
        std::env::remove_var("FRAUD_INFRA_TEST_SERP_KEY");

        assert_eq!(parameters[SERP_API_KEY_PARAMETER], "key");
        assert_eq!(parameters[CLOUDFRONT_PREFIX_LIST_PARAMETER], "pl-3b927c52");
    }
}
