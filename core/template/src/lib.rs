//! CloudFormation template document model.
//!
//! The types here serialize to the JSON dialect accepted by CloudFormation.
//! Maps are ordered so that synthesizing the same resource graph twice yields
//! byte-identical output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub mod intrinsic;

pub use intrinsic::{Reference, references};

/// Template format version accepted by CloudFormation
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Largest template body CloudFormation accepts inline (bytes)
pub const MAX_INLINE_TEMPLATE_BYTES: usize = 51_200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "Parameters",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(
        rename = "Outputs",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub outputs: BTreeMap<String, Output>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Default", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "NoEcho", skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
}

impl Parameter {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            parameter_type: "String".to_string(),
            description: Some(description.into()),
            default: None,
            no_echo: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Hide the value from console and API output
    pub fn no_echo(mut self) -> Self {
        self.no_echo = Some(true);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(
        rename = "Properties",
        default = "empty_object",
        skip_serializing_if = "is_empty_object"
    )]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
    #[serde(rename = "Metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn is_empty_object(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
            metadata: None,
        }
    }

    /// Add an explicit ordering dependency; duplicates are ignored
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if !self.depends_on.contains(&logical_id) {
            self.depends_on.push(logical_id);
        }
        self
    }

    /// Set both the deletion and the update-replace policy
    pub fn removal_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Export", skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
            export: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_export(mut self, name: impl Into<String>) -> Self {
        self.export = Some(Export { name: name.into() });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: String,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Declare a resource under a logical id that must not be in use yet
    pub fn add_resource(
        &mut self,
        logical_id: impl Into<String>,
        resource: Resource,
    ) -> Result<(), TemplateError> {
        let logical_id = logical_id.into();
        if self.is_declared(&logical_id) {
            return Err(TemplateError::DuplicateLogicalId(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(TemplateError::DuplicateLogicalId(name));
        }
        self.parameters.insert(name, parameter);
        Ok(())
    }

    pub fn add_output(
        &mut self,
        name: impl Into<String>,
        output: Output,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(TemplateError::DuplicateOutput(name));
        }
        self.outputs.insert(name, output);
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    /// True when the id names a resource or a template parameter
    pub fn is_declared(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id) || self.parameters.contains_key(logical_id)
    }

    /// Logical ids of every resource of the given type, in template order
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    /// Types of the resources left behind when the stack is deleted
    pub fn retained_resource_types(&self) -> BTreeSet<&str> {
        self.resources
            .values()
            .filter(|resource| resource.deletion_policy == Some(DeletionPolicy::Retain))
            .map(|resource| resource.resource_type.as_str())
            .collect()
    }

    pub fn to_json_pretty(&self) -> Result<String, TemplateError> {
        serde_json::to_string_pretty(self).map_err(TemplateError::Serialization)
    }

    /// Compact body, as submitted to the provisioning engine
    pub fn to_json(&self) -> Result<String, TemplateError> {
        serde_json::to_string(self).map_err(TemplateError::Serialization)
    }

    pub fn from_json(content: &str) -> Result<Self, TemplateError> {
        serde_json::from_str(content).map_err(TemplateError::Serialization)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Logical id already declared: {0}")]
    DuplicateLogicalId(String),

    #[error("Output already declared: {0}")]
    DuplicateOutput(String),

    #[error("Template serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}
