//! IAM statements, principals, roles and inline policies.

use crate::handles::RoleRef;
use crate::policy::POLICY_VERSION;
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::{intrinsic, Resource};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// Who a statement applies to
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// `lambda.amazonaws.com` and friends
    Service(String),
    /// A web identity provider, assumed with `sts:AssumeRoleWithWebIdentity`
    Federated {
        provider: String,
        conditions: Value,
    },
    /// Root of the account the value evaluates to
    Account(Value),
    Arn(Value),
    Any,
}

impl Principal {
    pub fn service(name: impl Into<String>) -> Self {
        Principal::Service(name.into())
    }

    pub fn this_account() -> Self {
        Principal::Account(intrinsic::account_id())
    }

    fn to_json(&self) -> Value {
        match self {
            Principal::Service(service) => json!({ "Service": service }),
            Principal::Federated { provider, .. } => json!({ "Federated": provider }),
            Principal::Account(account) => json!({
                "AWS": intrinsic::join(
                    "",
                    [
                        json!("arn:"),
                        intrinsic::partition(),
                        json!(":iam::"),
                        account.clone(),
                        json!(":root"),
                    ],
                )
            }),
            Principal::Arn(arn) => json!({ "AWS": arn }),
            Principal::Any => json!({ "AWS": "*" }),
        }
    }

    fn assume_action(&self) -> &'static str {
        match self {
            Principal::Federated { .. } => "sts:AssumeRoleWithWebIdentity",
            _ => "sts:AssumeRole",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    effect: Effect,
    actions: Vec<String>,
    resources: Vec<Value>,
    principal: Option<Principal>,
    conditions: Map<String, Value>,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self::with_effect(Effect::Allow)
    }

    pub fn deny() -> Self {
        Self::with_effect(Effect::Deny)
    }

    fn with_effect(effect: Effect) -> Self {
        Self {
            effect,
            actions: Vec::new(),
            resources: Vec::new(),
            principal: None,
            conditions: Map::new(),
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn resource(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn resources<I>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.resources.extend(resources);
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Add `operator: { key: value }`, merging keys under the same operator
    pub fn condition(mut self, operator: &str, key: &str, value: Value) -> Self {
        let entry = self
            .conditions
            .entry(operator.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(keys) = entry {
            keys.insert(key.to_string(), value);
        }
        self
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn action_names(&self) -> &[String] {
        &self.actions
    }

    pub fn to_json(&self) -> Value {
        let mut statement = Map::new();
        if !self.actions.is_empty() {
            let actions = self.actions.iter().map(|a| json!(a));
            statement.insert("Action".to_string(), collapse(actions));
        }
        if !self.conditions.is_empty() {
            statement.insert(
                "Condition".to_string(),
                Value::Object(self.conditions.clone()),
            );
        }
        statement.insert("Effect".to_string(), json!(self.effect.as_str()));
        if let Some(principal) = &self.principal {
            statement.insert("Principal".to_string(), principal.to_json());
        }
        if !self.resources.is_empty() {
            let resources = self.resources.iter().cloned();
            statement.insert("Resource".to_string(), collapse(resources));
        }
        Value::Object(statement)
    }
}

/// A single element is written bare, several as a list
fn collapse<I: Iterator<Item = Value>>(values: I) -> Value {
    let mut values: Vec<Value> = values.collect();
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement unless an identical one is already present
    pub fn add_statement(&mut self, statement: PolicyStatement) {
        if !self.statements.contains(&statement) {
            self.statements.push(statement);
        }
    }

    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.add_statement(statement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn to_json(&self) -> Value {
        let statements: Vec<Value> = self
            .statements
            .iter()
            .map(PolicyStatement::to_json)
            .collect();
        json!({
            "Statement": statements,
            "Version": POLICY_VERSION,
        })
    }
}

/// Builder for an `AWS::IAM::Role`
#[derive(Debug, Clone)]
pub struct Role {
    assumed_by: Principal,
    role_name: Option<String>,
    description: Option<String>,
    managed_policies: Vec<Value>,
    inline_policies: Vec<(String, PolicyDocument)>,
}

impl Role {
    pub fn new(assumed_by: Principal) -> Self {
        Self {
            assumed_by,
            role_name: None,
            description: None,
            managed_policies: Vec::new(),
            inline_policies: Vec::new(),
        }
    }

    pub fn role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an AWS managed policy by its name, e.g. `service-role/AWSLambdaVPCAccessExecutionRole`
    pub fn aws_managed_policy(mut self, name: &str) -> Self {
        self.managed_policies.push(intrinsic::join(
            "",
            [
                json!("arn:"),
                intrinsic::partition(),
                json!(format!(":iam::aws:policy/{}", name)),
            ],
        ));
        self
    }

    /// Embed a policy in the role itself
    pub fn inline_policy(mut self, name: impl Into<String>, document: PolicyDocument) -> Self {
        self.inline_policies.push((name.into(), document));
        self
    }

    fn trust_policy(&self) -> PolicyDocument {
        let mut statement = PolicyStatement::allow()
            .action(self.assumed_by.assume_action())
            .principal(self.assumed_by.clone());
        if let Principal::Federated {
            conditions: Value::Object(conditions),
            ..
        } = &self.assumed_by
        {
            statement.conditions = conditions.clone();
        }
        PolicyDocument::new().with_statement(statement)
    }

    pub fn declare(
        self,
        stack: &mut Stack,
        scope: &Scope,
        id: &str,
    ) -> Result<RoleRef, SynthesisError> {
        let mut properties = Map::new();
        properties.insert(
            "AssumeRolePolicyDocument".to_string(),
            self.trust_policy().to_json(),
        );
        if let Some(description) = &self.description {
            properties.insert("Description".to_string(), json!(description));
        }
        if !self.managed_policies.is_empty() {
            properties.insert(
                "ManagedPolicyArns".to_string(),
                Value::Array(self.managed_policies.clone()),
            );
        }
        if !self.inline_policies.is_empty() {
            let policies: Vec<Value> = self
                .inline_policies
                .iter()
                .map(|(name, document)| {
                    json!({ "PolicyDocument": document.to_json(), "PolicyName": name })
                })
                .collect();
            properties.insert("Policies".to_string(), Value::Array(policies));
        }
        if let Some(name) = &self.role_name {
            properties.insert("RoleName".to_string(), json!(name));
        }

        let logical_id = stack.add_resource(
            scope,
            id,
            Resource::new("AWS::IAM::Role", Value::Object(properties)),
        )?;
        Ok(RoleRef::new(logical_id))
    }
}

/// A standalone `AWS::IAM::Policy` with a fixed name, attached to roles
#[derive(Debug, Clone)]
pub struct InlinePolicy {
    name: Value,
    document: PolicyDocument,
}

impl InlinePolicy {
    pub fn new(name: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            document: PolicyDocument::new(),
        }
    }

    pub fn statement(mut self, statement: PolicyStatement) -> Self {
        self.document.add_statement(statement);
        self
    }

    pub fn attach(
        self,
        stack: &mut Stack,
        scope: &Scope,
        id: &str,
        roles: &[&RoleRef],
    ) -> Result<String, SynthesisError> {
        for role in roles {
            stack.require_role(role)?;
        }
        let roles: Vec<Value> = roles.iter().map(|role| role.reference()).collect();
        stack.add_resource(
            scope,
            id,
            Resource::new(
                "AWS::IAM::Policy",
                json!({
                    "PolicyDocument": self.document.to_json(),
                    "PolicyName": self.name,
                    "Roles": roles,
                }),
            ),
        )
    }
}
