//! Synthesis: assemble, finalize, validate and write the template.

use crate::assembly::FraudDetectionStack;
use crate::config::InfraConfig;
use crate::error::{ErrorContext, InfraError};
use crate::logging::{OperationStatus, SynthesisLogger, SynthesisStatus, SynthesisSummaryReport};
use crate::policy::PolicyManager;
use crate::stack::SynthesisError;
use crate::validation::{TemplateValidator, ValidationReport};
use chrono::{DateTime, Utc};
use fraud_infra_template::Template;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_OUT_DIR: &str = "infra.out";

pub fn template_file_name(stack_name: &str) -> String {
    format!("{}.template.json", stack_name)
}

/// Describes the last synthesized template in an out directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub stack_name: String,
    pub region: String,
    pub account: Option<String>,
    pub template_file: String,
    pub template_sha256: String,
    pub resource_count: usize,
    pub config_hash: String,
    /// Configuration the template was synthesized from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<InfraConfig>,
    pub generated_at: DateTime<Utc>,
    pub generator_version: String,
}

impl Manifest {
    pub fn read(out_dir: &Path) -> Result<Option<Self>, InfraError> {
        let path = out_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[derive(Debug)]
pub struct SynthesisOutput {
    pub template: Template,
    pub report: ValidationReport,
    pub manifest: Manifest,
    pub template_path: PathBuf,
    pub manifest_path: PathBuf,
    pub summary: Option<SynthesisSummaryReport>,
}

fn sha256_hex(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

pub struct Synthesizer {
    out_dir: PathBuf,
    policies: PolicyManager,
}

impl Synthesizer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            policies: PolicyManager::new(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn template_path(&self, stack_name: &str) -> PathBuf {
        self.out_dir.join(template_file_name(stack_name))
    }

    /// Build the template without writing anything
    pub fn build(
        &self,
        config: &InfraConfig,
    ) -> Result<(Template, ValidationReport), InfraError> {
        let template = FraudDetectionStack::synthesize(config)?;
        let report = self.validate(&template);
        Ok((template, report))
    }

    pub fn validate(&self, template: &Template) -> ValidationReport {
        TemplateValidator::new(&self.policies).validate(template)
    }

    /// Assemble, finalize, validate and write template and manifest
    pub fn synthesize(&self, config: &InfraConfig) -> Result<SynthesisOutput, InfraError> {
        let mut logger = SynthesisLogger::in_out_dir(&self.out_dir)?;
        logger.start(&config.stack_name)?;

        let result = self.run(config, &mut logger);
        match &result {
            Ok(_) => logger.end(SynthesisStatus::Completed)?,
            Err(err) => {
                logger.add_error(err.to_string());
                logger.end(SynthesisStatus::Failed)?;
            }
        }
        result.map(|output| SynthesisOutput {
            summary: logger.summary().cloned(),
            ..output
        })
    }

    fn run(
        &self,
        config: &InfraConfig,
        logger: &mut SynthesisLogger,
    ) -> Result<SynthesisOutput, InfraError> {
        let previous = self.previous_template(&config.stack_name)?;
        let assembled = FraudDetectionStack::assemble_logged(config, logger)?;
        let template = assembled.finalize()?;
        logger.audit_template(&template, previous.as_ref())?;

        let report = self.validate(&template);
        for warning in report.warnings() {
            logger.add_warning(warning.to_string());
        }
        let mut details = HashMap::new();
        details.insert("issues".to_string(), report.issues.len().to_string());
        let status = if report.is_valid() {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        logger.log_operation(
            "validate",
            "stack",
            &config.stack_name,
            status,
            None,
            details,
            None,
        )?;
        let report = report.into_result().map_err(|err| {
            InfraError::from(err).with_context(
                ErrorContext::new("synthesize")
                    .with_info(format!("stack={}", config.stack_name)),
            )
        })?;

        let (template_path, manifest) = self.write(config, &template)?;
        let manifest_path = self.out_dir.join(MANIFEST_FILE);
        Ok(SynthesisOutput {
            template,
            report,
            manifest,
            template_path,
            manifest_path,
            summary: None,
        })
    }

    /// Write the template and its manifest into the out directory
    pub fn write(
        &self,
        config: &InfraConfig,
        template: &Template,
    ) -> Result<(PathBuf, Manifest), InfraError> {
        std::fs::create_dir_all(&self.out_dir)?;

        let body = template.to_json_pretty().map_err(SynthesisError::from)?;
        let template_file = template_file_name(&config.stack_name);
        let template_path = self.out_dir.join(&template_file);
        std::fs::write(&template_path, &body)?;

        let manifest = Manifest {
            stack_name: config.stack_name.clone(),
            region: config.deployment.region.clone(),
            account: config.deployment.account.clone(),
            template_file,
            template_sha256: sha256_hex(&body),
            resource_count: template.resources.len(),
            config_hash: config.generate_config_hash(),
            config: Some(config.clone()),
            generated_at: Utc::now(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        std::fs::write(
            self.out_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!(
            path = %template_path.display(),
            resources = manifest.resource_count,
            "Wrote template"
        );
        Ok((template_path, manifest))
    }

    /// Template previously written for `stack_name`, if any
    pub fn previous_template(&self, stack_name: &str) -> Result<Option<Template>, InfraError> {
        let path = self.template_path(stack_name);
        if !path.exists() {
            return Ok(None);
        }
        load_template(&path).map(Some)
    }

    /// Configuration recorded by the last synthesis into the out directory
    pub fn previous_config(&self) -> Result<Option<InfraConfig>, InfraError> {
        let manifest = Manifest::read(&self.out_dir)?;
        Ok(manifest.and_then(|manifest| manifest.config))
    }
}

pub fn load_template(path: &Path) -> Result<Template, InfraError> {
    let content = std::fs::read_to_string(path)?;
    Template::from_json(&content).map_err(|err| {
        InfraError::serialization(err.to_string()).with_context(
            ErrorContext::new("load template")
                .with_info(path.display().to_string()),
        )
    })
}
