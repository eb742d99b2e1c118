//! The stack under construction: construct scopes, logical ids and the
//! per-role default policies that grants accumulate into.

use crate::cidr::CidrError;
use crate::handles::RoleRef;
use crate::iam::{PolicyDocument, PolicyStatement};
use crate::policy::{PolicyError, PolicyManager};
use fraud_infra_template::{intrinsic, Output, Parameter, Resource, Template, TemplateError};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

const MAX_LOGICAL_ID_LEN: usize = 255;
const HASH_LEN: usize = 8;

/// Resource types that carry a `Tags` list of `Key`/`Value` pairs
const TAGGABLE_TYPES: &[&str] = &[
    "AWS::ApiGateway::RestApi",
    "AWS::ApiGateway::Stage",
    "AWS::CloudFront::Distribution",
    "AWS::DynamoDB::Table",
    "AWS::EC2::EIP",
    "AWS::EC2::InternetGateway",
    "AWS::EC2::NatGateway",
    "AWS::EC2::RouteTable",
    "AWS::EC2::SecurityGroup",
    "AWS::EC2::Subnet",
    "AWS::EC2::VPC",
    "AWS::ECS::Cluster",
    "AWS::ECS::Service",
    "AWS::ECS::TaskDefinition",
    "AWS::ElasticLoadBalancingV2::LoadBalancer",
    "AWS::ElasticLoadBalancingV2::TargetGroup",
    "AWS::IAM::Role",
    "AWS::Lambda::Function",
    "AWS::Logs::LogGroup",
    "AWS::S3::Bucket",
    "AWS::SNS::Topic",
    "AWS::SecretsManager::Secret",
];

/// Position of a construct in the tree, e.g. `storage/Bucket`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, id: &str) -> Self {
        let mut path = self.path.clone();
        path.push(id.to_string());
        Self { path }
    }

    pub fn path(&self) -> String {
        self.path.join("/")
    }

    /// Id of the innermost construct, empty at the root
    pub fn id(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Logical id of the construct `id` inside this scope
    pub fn logical_id(&self, id: &str) -> String {
        let mut components: Vec<&str> = self.path.iter().map(String::as_str).collect();
        components.push(id);
        logical_id_for(&components)
    }
}

/// Alphanumeric rendering of the path followed by a hash of the full path.
///
/// Two paths that sanitize to the same text still get distinct ids.
pub fn logical_id_for(components: &[&str]) -> String {
    let mut human: String = components
        .iter()
        .flat_map(|component| component.chars())
        .filter(char::is_ascii_alphanumeric)
        .collect();
    human.truncate(MAX_LOGICAL_ID_LEN - HASH_LEN);

    let digest = Sha256::digest(components.join("/").as_bytes());
    let hash: String = digest[..HASH_LEN / 2]
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect();

    format!("{}{}", human, hash)
}

/// Target account and region
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: String,
}

impl Environment {
    /// Literal account id when known, `AWS::AccountId` otherwise
    pub fn account_value(&self) -> Value {
        match &self.account {
            Some(account) => json!(account),
            None => intrinsic::account_id(),
        }
    }
}

pub struct Stack {
    name: String,
    env: Environment,
    template: Template,
    policies: PolicyManager,
    role_policies: BTreeMap<String, PolicyDocument>,
    policy_dependents: Vec<(String, String)>,
    tags: BTreeMap<String, String>,
}

impl Stack {
    pub fn new(name: impl Into<String>, env: Environment, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            env,
            template: Template::new(description),
            policies: PolicyManager::new(),
            role_policies: BTreeMap::new(),
            policy_dependents: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn policy_manager(&self) -> &PolicyManager {
        &self.policies
    }

    pub fn set_tags(&mut self, tags: BTreeMap<String, String>) {
        self.tags = tags;
    }

    /// Declare a resource and return its logical id
    pub fn add_resource(
        &mut self,
        scope: &Scope,
        id: &str,
        resource: Resource,
    ) -> Result<String, SynthesisError> {
        let logical_id = scope.logical_id(id);
        debug!(
            logical_id = %logical_id,
            resource_type = %resource.resource_type,
            path = %scope.child(id).path(),
            "Declared resource"
        );
        self.template.add_resource(logical_id.clone(), resource)?;
        Ok(logical_id)
    }

    /// Declare a template parameter and return a `Ref` to it
    pub fn add_parameter(
        &mut self,
        name: &str,
        parameter: Parameter,
    ) -> Result<Value, SynthesisError> {
        self.template.add_parameter(name, parameter)?;
        Ok(intrinsic::ref_(name))
    }

    pub fn add_output(&mut self, name: &str, output: Output) -> Result<(), SynthesisError> {
        self.template.add_output(name, output)?;
        Ok(())
    }

    /// Make `dependent` wait for `dependency` to be created
    pub fn add_dependency(
        &mut self,
        dependent: &str,
        dependency: &str,
    ) -> Result<(), SynthesisError> {
        if !self.template.is_declared(dependency) {
            return Err(SynthesisError::UndeclaredResource(dependency.to_string()));
        }
        let resource = self
            .template
            .resource_mut(dependent)
            .ok_or_else(|| SynthesisError::UndeclaredResource(dependent.to_string()))?;
        if !resource.depends_on.iter().any(|id| id == dependency) {
            resource.depends_on.push(dependency.to_string());
        }
        Ok(())
    }

    /// Fail unless the role is declared in this stack
    pub fn require_role(&self, role: &RoleRef) -> Result<(), SynthesisError> {
        match self.template.resource(role.logical_id()) {
            Some(resource) if resource.resource_type == RoleRef::RESOURCE_TYPE => Ok(()),
            _ => Err(SynthesisError::UndeclaredRole(role.logical_id().to_string())),
        }
    }

    /// Add a statement to the role's default policy
    pub fn add_to_role_policy(
        &mut self,
        role: &RoleRef,
        statement: PolicyStatement,
    ) -> Result<(), SynthesisError> {
        self.require_role(role)?;
        self.role_policies
            .entry(role.logical_id().to_string())
            .or_default()
            .add_statement(statement);
        Ok(())
    }

    /// Grant the actions of a catalogue template on `resources`
    pub fn grant(
        &mut self,
        role: &RoleRef,
        template: &str,
        resources: Vec<Value>,
    ) -> Result<(), SynthesisError> {
        let actions = self.policies.template(template)?.actions.clone();
        debug!(role = %role.logical_id(), template, "Granting access");
        self.add_to_role_policy(
            role,
            PolicyStatement::allow()
                .actions(actions)
                .resources(resources),
        )
    }

    /// Create `resource` only once the role's default policy is in place
    pub fn depend_on_role_policy(&mut self, resource: &str, role: &RoleRef) {
        self.policy_dependents
            .push((resource.to_string(), role.logical_id().to_string()));
    }

    pub fn default_policy_id(role: &RoleRef) -> String {
        format!("{}DefaultPolicy", role.logical_id())
    }

    /// Emit the accumulated default policies and stack tags
    pub fn finalize(mut self) -> Result<Template, SynthesisError> {
        let role_policies = std::mem::take(&mut self.role_policies);
        for (role_id, document) in role_policies {
            let role = RoleRef::new(role_id);
            let policy_id = Self::default_policy_id(&role);
            self.template.add_resource(
                policy_id.clone(),
                Resource::new(
                    "AWS::IAM::Policy",
                    json!({
                        "PolicyDocument": document.to_json(),
                        "PolicyName": policy_id,
                        "Roles": [role.reference()],
                    }),
                ),
            )?;
        }

        for (resource, role_id) in std::mem::take(&mut self.policy_dependents) {
            let policy_id = Self::default_policy_id(&RoleRef::new(role_id));
            if self.template.is_declared(&policy_id) {
                self.add_dependency(&resource, &policy_id)?;
            }
        }

        if !self.tags.is_empty() {
            self.apply_tags();
        }

        Ok(self.template)
    }

    fn apply_tags(&mut self) {
        for resource in self.template.resources.values_mut() {
            if !TAGGABLE_TYPES.contains(&resource.resource_type.as_str()) {
                continue;
            }
            let Value::Object(properties) = &mut resource.properties else {
                continue;
            };

            let mut merged: BTreeMap<String, Value> = BTreeMap::new();
            if let Some(Value::Array(existing)) = properties.get("Tags") {
                for tag in existing {
                    if let Some(key) = tag.get("Key").and_then(Value::as_str) {
                        merged.insert(key.to_string(), tag.clone());
                    }
                }
            }
            for (key, value) in &self.tags {
                merged
                    .entry(key.clone())
                    .or_insert_with(|| json!({ "Key": key, "Value": value }));
            }

            properties.insert(
                "Tags".to_string(),
                Value::Array(merged.into_values().collect()),
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Role {0} is not declared in this stack")]
    UndeclaredRole(String),

    #[error("Resource {0} is not declared in this stack")]
    UndeclaredResource(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Invalid network layout: {0}")]
    Network(#[from] CidrError),
}
