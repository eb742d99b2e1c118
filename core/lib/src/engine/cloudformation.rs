use super::{EngineError, ProvisioningEngine, StackDescription, StackRequest, UpdateOutcome};
use crate::config::DeploymentConfig;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_cloudformation::Client as CfnClient;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sts::Client as StsClient;
use fraud_infra_template::MAX_INLINE_TEMPLATE_BYTES;
use std::collections::BTreeMap;
use tracing::{debug, info};

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// Shared AWS configuration, preferring the configured region
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(Region::new(region.to_string()))
        .or_default_provider();
    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await
}

/// The configured account, or the caller's account from STS
pub async fn resolve_account(
    sdk_config: &SdkConfig,
    configured: Option<&str>,
) -> Result<String, EngineError> {
    if let Some(account) = configured {
        return Ok(account.to_string());
    }

    let identity = StsClient::new(sdk_config)
        .get_caller_identity()
        .send()
        .await
        .map_err(service_error)?;
    let account = identity
        .account()
        .ok_or_else(|| EngineError::Credentials("Caller identity has no account".to_string()))?;
    debug!(account, "Resolved account through STS");
    Ok(account.to_string())
}

fn service_error<E: std::error::Error>(err: E) -> EngineError {
    EngineError::from_service_message(DisplayErrorContext(err).to_string())
}

enum TemplateSource {
    Body(String),
    Url(String),
}

/// Provisioning through the CloudFormation API
pub struct CloudFormationEngine {
    cfn: CfnClient,
    s3: S3Client,
    region: String,
    template_bucket: Option<String>,
}

impl CloudFormationEngine {
    pub fn new(sdk_config: &SdkConfig, template_bucket: Option<String>) -> Self {
        Self {
            cfn: CfnClient::new(sdk_config),
            s3: S3Client::new(sdk_config),
            region: sdk_config
                .region()
                .map(ToString::to_string)
                .unwrap_or_default(),
            template_bucket,
        }
    }

    pub async fn from_config(deployment: &DeploymentConfig) -> Self {
        let sdk_config = load_sdk_config(&deployment.region).await;
        Self::new(&sdk_config, deployment.template_bucket.clone())
    }

    /// Inline body, or an S3 URL once the body exceeds the inline limit
    async fn template_source(&self, request: &StackRequest) -> Result<TemplateSource, EngineError> {
        let size = request.template_body.len();
        if size <= MAX_INLINE_TEMPLATE_BYTES {
            return Ok(TemplateSource::Body(request.template_body.clone()));
        }

        let bucket = self.template_bucket.as_deref().ok_or_else(|| {
            EngineError::Upload(format!(
                "template of {} bytes exceeds the {} byte inline limit \
                 and no template bucket is configured",
                size, MAX_INLINE_TEMPLATE_BYTES
            ))
        })?;
        let key = format!(
            "{}/{}.template.json",
            request.stack_name,
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
        );

        self.s3
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(request.template_body.clone().into_bytes()))
            .send()
            .await
            .map_err(|err| EngineError::Upload(DisplayErrorContext(err).to_string()))?;

        info!(bucket, key = %key, bytes = size, "Uploaded template");
        Ok(TemplateSource::Url(format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            bucket, self.region, key
        )))
    }
}

fn parameters(request: &StackRequest) -> Vec<Parameter> {
    request
        .parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn capabilities(request: &StackRequest) -> Vec<Capability> {
    request
        .capabilities
        .iter()
        .map(|capability| Capability::from(capability.as_str()))
        .collect()
}

#[async_trait]
impl ProvisioningEngine for CloudFormationEngine {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, EngineError> {
        let request = self.cfn.describe_stacks().stack_name(stack_name);
        let output = match request.send().await {
            Ok(output) => output,
            Err(err) => {
                return match service_error(err) {
                    EngineError::StackNotFound(_) => Ok(None),
                    other => Err(other),
                }
            }
        };

        Ok(output.stacks().first().map(|stack| {
            let outputs = stack
                .outputs()
                .iter()
                .filter_map(|output| {
                    Some((
                        output.output_key()?.to_string(),
                        output.output_value()?.to_string(),
                    ))
                })
                .collect();
            StackDescription {
                stack_name: stack.stack_name().unwrap_or(stack_name).to_string(),
                stack_id: stack.stack_id().map(str::to_string),
                status: stack
                    .stack_status()
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_default(),
                status_reason: stack.stack_status_reason().map(str::to_string),
                outputs,
            }
        }))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String, EngineError> {
        let builder = self
            .cfn
            .create_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(request)))
            .set_capabilities(Some(capabilities(request)));
        let builder = match self.template_source(request).await? {
            TemplateSource::Body(body) => builder.template_body(body),
            TemplateSource::Url(url) => builder.template_url(url),
        };

        let output = builder.send().await.map_err(service_error)?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateOutcome, EngineError> {
        let builder = self
            .cfn
            .update_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(request)))
            .set_capabilities(Some(capabilities(request)));
        let builder = match self.template_source(request).await? {
            TemplateSource::Body(body) => builder.template_body(body),
            TemplateSource::Url(url) => builder.template_url(url),
        };

        match builder.send().await {
            Ok(output) => Ok(UpdateOutcome::Started {
                stack_id: output.stack_id().map(str::to_string),
            }),
            Err(err) => {
                let message = DisplayErrorContext(err).to_string();
                if message.contains(NO_UPDATES_MESSAGE) {
                    Ok(UpdateOutcome::NoChanges)
                } else {
                    Err(EngineError::from_service_message(message))
                }
            }
        }
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), EngineError> {
        self.cfn
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn stack_outputs(
        &self,
        stack_name: &str,
    ) -> Result<BTreeMap<String, String>, EngineError> {
        self.describe_stack(stack_name)
            .await?
            .map(|stack| stack.outputs)
            .ok_or_else(|| EngineError::StackNotFound(stack_name.to_string()))
    }
}
