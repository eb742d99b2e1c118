//! Intrinsic function constructors and the reference walker.

use serde_json::{Value, json};
use std::collections::BTreeSet;

pub const ACCOUNT_ID: &str = "AWS::AccountId";
pub const REGION: &str = "AWS::Region";
pub const PARTITION: &str = "AWS::Partition";
pub const URL_SUFFIX: &str = "AWS::URLSuffix";
pub const STACK_NAME: &str = "AWS::StackName";

const PSEUDO_PARAMETERS: &[&str] = &[
    ACCOUNT_ID,
    REGION,
    PARTITION,
    URL_SUFFIX,
    STACK_NAME,
    "AWS::StackId",
    "AWS::NotificationARNs",
    "AWS::NoValue",
];

pub fn is_pseudo_parameter(name: &str) -> bool {
    PSEUDO_PARAMETERS.contains(&name)
}

pub fn ref_(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn join<I>(delimiter: &str, parts: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    json!({ "Fn::Join": [delimiter, parts.into_iter().collect::<Vec<_>>()] })
}

pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

pub fn sub_with(template: impl Into<String>, variables: serde_json::Map<String, Value>) -> Value {
    json!({ "Fn::Sub": [template.into(), Value::Object(variables)] })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

/// Availability zones of the deployment region
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn account_id() -> Value {
    ref_(ACCOUNT_ID)
}

pub fn region() -> Value {
    ref_(REGION)
}

pub fn partition() -> Value {
    ref_(PARTITION)
}

pub fn url_suffix() -> Value {
    ref_(URL_SUFFIX)
}

/// A logical id referenced from inside a value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    pub target: String,
    pub attribute: Option<String>,
}

/// Collect every resource or parameter a value refers to.
///
/// Pseudo parameters are skipped. `Fn::Sub` placeholders are parsed, except
/// those bound by the substitution's own variable map and `${!Literal}`
/// escapes.
pub fn references(value: &Value) -> BTreeSet<Reference> {
    let mut found = BTreeSet::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut BTreeSet<Reference>) {
    match value {
        Value::Object(map) if map.len() == 1 => {
            if let Some(Value::String(target)) = map.get("Ref") {
                push(found, target, None);
                return;
            }
            if let Some(att) = map.get("Fn::GetAtt") {
                collect_get_att(att, found);
                return;
            }
            if let Some(sub) = map.get("Fn::Sub") {
                collect_sub(sub, found);
                return;
            }
            for nested in map.values() {
                collect(nested, found);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, found);
            }
        }
        _ => {}
    }
}

fn collect_get_att(att: &Value, found: &mut BTreeSet<Reference>) {
    match att {
        Value::Array(parts) => {
            if let Some(Value::String(target)) = parts.first() {
                let attribute = parts.get(1).and_then(Value::as_str);
                push(found, target, attribute);
            }
        }
        Value::String(dotted) => {
            let (target, attribute) = split_attribute(dotted);
            push(found, target, attribute);
        }
        _ => {}
    }
}

fn collect_sub(sub: &Value, found: &mut BTreeSet<Reference>) {
    match sub {
        Value::String(text) => {
            for placeholder in placeholders(text) {
                let (target, attribute) = split_attribute(&placeholder);
                push(found, target, attribute);
            }
        }
        Value::Array(parts) => {
            let text = parts.first().and_then(Value::as_str).unwrap_or_default();
            let bound = parts.get(1).and_then(Value::as_object);
            for placeholder in placeholders(text) {
                let (target, attribute) = split_attribute(&placeholder);
                if bound.is_some_and(|vars| vars.contains_key(target)) {
                    continue;
                }
                push(found, target, attribute);
            }
            if let Some(vars) = bound {
                for nested in vars.values() {
                    collect(nested, found);
                }
            }
        }
        _ => {}
    }
}

fn push(found: &mut BTreeSet<Reference>, target: &str, attribute: Option<&str>) {
    if is_pseudo_parameter(target) {
        return;
    }
    found.insert(Reference {
        target: target.to_string(),
        attribute: attribute.map(str::to_string),
    });
}

fn split_attribute(dotted: &str) -> (&str, Option<&str>) {
    match dotted.split_once('.') {
        Some((target, attribute)) => (target, Some(attribute)),
        None => (dotted, None),
    }
}

/// Placeholder names inside an `Fn::Sub` string
fn placeholders(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if !name.starts_with('!') && !name.is_empty() {
            names.push(name.trim().to_string());
        }
        rest = &after[end + 1..];
    }
    names
}
