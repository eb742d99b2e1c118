//! Structural checks on a synthesized template.
//!
//! Validation never stops at the first problem: every issue found is
//! collected into a [`ValidationReport`], and callers decide whether the
//! errors in it are fatal.

use crate::policy::PolicyManager;
use fraud_infra_template::intrinsic::references;
use fraud_infra_template::{Resource, Template, MAX_INLINE_TEMPLATE_BYTES};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

pub const MAX_RESOURCES: usize = 500;
pub const MAX_PARAMETERS: usize = 200;
pub const MAX_OUTPUTS: usize = 200;
pub const MAX_LOGICAL_ID_LEN: usize = 255;
/// Largest template body CloudFormation accepts from S3
pub const MAX_TEMPLATE_BYTES: usize = 1_000_000;

/// Share of a quota past which a warning is raised
const QUOTA_WARNING_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Check {
    UnresolvedReference,
    NameConflict,
    LogicalIdFormat,
    DependencyCycle,
    Quota,
    PolicyDocument,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::UnresolvedReference => "unresolved-reference",
            Check::NameConflict => "name-conflict",
            Check::LogicalIdFormat => "logical-id-format",
            Check::DependencyCycle => "dependency-cycle",
            Check::Quota => "quota",
            Check::PolicyDocument => "policy-document",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub check: Check,
    /// Resource, parameter or output the issue was found on
    pub subject: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "[{}] {}: {}", self.check, subject, self.message),
            None => write!(f, "[{}] {}", self.check, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// Resource creation order; empty when the graph has a cycle
    pub creation_order: Vec<String>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, check: Check, subject: Option<&str>, message: String) {
        self.issues.push(ValidationIssue {
            severity,
            check,
            subject: subject.map(str::to_string),
            message,
        });
    }

    fn error(&mut self, check: Check, subject: Option<&str>, message: String) {
        self.push(Severity::Error, check, subject, message);
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Issues of one kind, e.g. every name conflict
    pub fn of_check(&self, check: Check) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |issue| issue.check == check)
    }

    /// Fail when the report holds any error
    pub fn into_result(self) -> Result<Self, ValidationError> {
        let errors: Vec<String> = self.errors().map(ToString::to_string).collect();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ValidationError::Failed {
                count: errors.len(),
                issues: errors,
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Template failed validation with {count} error(s): {}", .issues.join("; "))]
    Failed { count: usize, issues: Vec<String> },
}

/// Validates templates against a policy catalogue
pub struct TemplateValidator<'a> {
    policies: &'a PolicyManager,
}

impl<'a> TemplateValidator<'a> {
    pub fn new(policies: &'a PolicyManager) -> Self {
        Self { policies }
    }

    pub fn validate(&self, template: &Template) -> ValidationReport {
        let mut report = ValidationReport::default();

        check_references(template, &mut report);
        check_fixed_names(template, &mut report);
        check_logical_ids(template, &mut report);
        check_quotas(template, &mut report);
        self.check_policies(template, &mut report);

        match creation_order(template) {
            Ok(order) => report.creation_order = order,
            Err(cycle) => report.error(
                Check::DependencyCycle,
                None,
                format!("Dependency cycle between {}", cycle.join(", ")),
            ),
        }

        for issue in report.warnings() {
            warn!(check = %issue.check, subject = ?issue.subject, "{}", issue.message);
        }
        debug!(
            issues = report.issues.len(),
            resources = template.resources.len(),
            "Validated template"
        );
        report
    }

    fn check_policies(&self, template: &Template, report: &mut ValidationReport) {
        for (logical_id, resource) in &template.resources {
            for (name, document) in policy_documents(logical_id, resource) {
                if let Err(err) = self.policies.validate_policy_document(&name, document) {
                    report.error(Check::PolicyDocument, Some(logical_id), err.to_string());
                }
            }
        }
    }
}

/// Validate with the default policy catalogue
pub fn validate_template(template: &Template) -> ValidationReport {
    let policies = PolicyManager::new();
    TemplateValidator::new(&policies).validate(template)
}

fn check_references(template: &Template, report: &mut ValidationReport) {
    for (logical_id, resource) in &template.resources {
        for reference in references(&resource.properties) {
            if reference.attribute.is_some()
                && !template.resources.contains_key(&reference.target)
            {
                report.error(
                    Check::UnresolvedReference,
                    Some(logical_id),
                    format!(
                        "attribute {}.{} of an undeclared resource",
                        reference.target,
                        reference.attribute.as_deref().unwrap_or_default()
                    ),
                );
            } else if !template.is_declared(&reference.target) {
                report.error(
                    Check::UnresolvedReference,
                    Some(logical_id),
                    format!("reference to undeclared {}", reference.target),
                );
            }
        }
        for dependency in &resource.depends_on {
            if !template.resources.contains_key(dependency) {
                report.error(
                    Check::UnresolvedReference,
                    Some(logical_id),
                    format!("depends on undeclared {}", dependency),
                );
            }
        }
    }

    for (name, output) in &template.outputs {
        for reference in references(&output.value) {
            if !template.is_declared(&reference.target) {
                report.error(
                    Check::UnresolvedReference,
                    Some(name),
                    format!("output refers to undeclared {}", reference.target),
                );
            }
        }
    }
}

/// Physical name a resource fixes for itself, if any
fn fixed_name(resource: &Resource) -> Option<String> {
    let properties = &resource.properties;
    let name = match resource.resource_type.as_str() {
        "AWS::S3::Bucket" => properties.get("BucketName"),
        "AWS::DynamoDB::Table" => properties.get("TableName"),
        "AWS::IAM::Role" => properties.get("RoleName"),
        "AWS::SecretsManager::Secret" | "AWS::SSM::Parameter" => properties.get("Name"),
        "AWS::OpenSearchServerless::Collection" | "AWS::OpenSearchServerless::AccessPolicy" => {
            properties.get("Name")
        }
        "AWS::OpenSearchServerless::SecurityPolicy" => {
            // Network and encryption policies have separate namespaces
            let name = properties.get("Name")?;
            let policy_type = properties.get("Type").map(render).unwrap_or_default();
            return Some(format!("{}:{}", policy_type, render(name)));
        }
        "AWS::EC2::SecurityGroup" => properties.get("GroupName"),
        "AWS::Location::PlaceIndex" => properties.get("IndexName"),
        "AWS::Cognito::UserPoolDomain" => properties.get("Domain"),
        "AWS::CloudFront::OriginRequestPolicy" => {
            properties.pointer("/OriginRequestPolicyConfig/Name")
        }
        "AWS::EFS::FileSystem" => properties
            .get("FileSystemTags")
            .and_then(Value::as_array)
            .and_then(|tags| tags.iter().find(|tag| tag["Key"] == "Name"))
            .and_then(|tag| tag.get("Value")),
        _ => None,
    };
    name.map(render)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn check_fixed_names(template: &Template, report: &mut ValidationReport) {
    let mut claimed: BTreeMap<(String, String), &String> = BTreeMap::new();
    for (logical_id, resource) in &template.resources {
        let Some(name) = fixed_name(resource) else {
            continue;
        };
        let key = (resource.resource_type.clone(), name);
        if let Some(first) = claimed.get(&key) {
            report.error(
                Check::NameConflict,
                Some(logical_id),
                format!("{} name '{}' is already used by {}", key.0, key.1, first),
            );
        } else {
            claimed.insert(key, logical_id);
        }
    }

    let mut exports: BTreeMap<String, &String> = BTreeMap::new();
    for (name, output) in &template.outputs {
        let Some(export) = &output.export else {
            continue;
        };
        let export_name = export.name.clone();
        if let Some(first) = exports.get(&export_name) {
            report.error(
                Check::NameConflict,
                Some(name),
                format!(
                    "export name '{}' is already used by output {}",
                    export_name, first
                ),
            );
        } else {
            exports.insert(export_name, name);
        }
    }
}

fn valid_logical_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_LOGICAL_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric())
}

fn check_logical_ids(template: &Template, report: &mut ValidationReport) {
    let ids = template
        .resources
        .keys()
        .chain(template.parameters.keys())
        .chain(template.outputs.keys());
    for id in ids {
        if !valid_logical_id(id) {
            report.error(
                Check::LogicalIdFormat,
                Some(id),
                format!(
                    "logical ids must be 1 to {} alphanumeric characters",
                    MAX_LOGICAL_ID_LEN
                ),
            );
        }
    }
}

fn check_quotas(template: &Template, report: &mut ValidationReport) {
    let counts = [
        ("resources", template.resources.len(), MAX_RESOURCES),
        ("parameters", template.parameters.len(), MAX_PARAMETERS),
        ("outputs", template.outputs.len(), MAX_OUTPUTS),
    ];
    for (kind, count, limit) in counts {
        if count > limit {
            report.error(
                Check::Quota,
                None,
                format!("{} {} exceed the limit of {}", count, kind, limit),
            );
        } else if count as f64 > limit as f64 * QUOTA_WARNING_RATIO {
            report.push(
                Severity::Warning,
                Check::Quota,
                None,
                format!("{} {} is close to the limit of {}", count, kind, limit),
            );
        }
    }

    match template.to_json() {
        Ok(body) if body.len() > MAX_TEMPLATE_BYTES => report.error(
            Check::Quota,
            None,
            format!(
                "template body of {} bytes exceeds {} bytes",
                body.len(), MAX_TEMPLATE_BYTES
            ),
        ),
        Ok(body) if body.len() > MAX_INLINE_TEMPLATE_BYTES => report.push(
            Severity::Warning,
            Check::Quota,
            None,
            format!(
                "template body of {} bytes must be uploaded to S3 before deployment",
                body.len()
            ),
        ),
        Ok(_) => {}
        Err(err) => report.error(Check::Quota, None, err.to_string()),
    }
}

/// Named policy documents embedded in a resource
fn policy_documents<'r>(logical_id: &str, resource: &'r Resource) -> Vec<(String, &'r Value)> {
    let properties = &resource.properties;
    let named = |key: &str| -> String {
        properties
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(logical_id)
            .to_string()
    };

    let mut documents = Vec::new();
    match resource.resource_type.as_str() {
        "AWS::IAM::Policy" => {
            if let Some(document) = properties.get("PolicyDocument") {
                documents.push((named("PolicyName"), document));
            }
        }
        "AWS::IAM::Role" => {
            if let Some(document) = properties.get("AssumeRolePolicyDocument") {
                documents.push((format!("{}AssumeRolePolicy", logical_id), document));
            }
            if let Some(Value::Array(policies)) = properties.get("Policies") {
                for policy in policies {
                    if let Some(document) = policy.get("PolicyDocument") {
                        let name = policy
                            .get("PolicyName")
                            .and_then(Value::as_str)
                            .unwrap_or(logical_id);
                        documents.push((name.to_string(), document));
                    }
                }
            }
        }
        "AWS::S3::BucketPolicy" => {
            if let Some(document) = properties.get("PolicyDocument") {
                documents.push((logical_id.to_string(), document));
            }
        }
        "AWS::ApiGateway::RestApi" => {
            if let Some(document) = properties.get("Policy") {
                documents.push((named("Name"), document));
            }
        }
        _ => {}
    }
    documents
}

/// Edges from each resource to the resources it needs first
fn dependencies(template: &Template) -> BTreeMap<&str, BTreeSet<&str>> {
    template
        .resources
        .iter()
        .map(|(logical_id, resource)| {
            let mut needs: BTreeSet<&str> = resource
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|id| template.resources.contains_key(*id))
                .collect();
            for reference in references(&resource.properties) {
                if let Some((id, _)) = template.resources.get_key_value(&reference.target) {
                    needs.insert(id.as_str());
                }
            }
            (logical_id.as_str(), needs)
        })
        .collect()
}

/// Order in which resources can be created, lexicographic among ready ones.
///
/// Returns the resources left on a cycle when the graph is not acyclic.
pub fn creation_order(template: &Template) -> Result<Vec<String>, Vec<String>> {
    let needs = dependencies(template);
    let mut pending: BTreeMap<&str, usize> = needs
        .iter()
        .map(|(id, deps)| (*id, deps.len()))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in &needs {
        for dependency in deps {
            dependents.entry(*dependency).or_default().push(*id);
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(needs.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        pending.remove(id);
        for &dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        Err(pending.keys().map(|id| id.to_string()).collect())
    }
}
