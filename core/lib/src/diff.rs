//! Differences between two synthesized templates.

use fraud_infra_template::{Resource, Template};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    fn symbol(&self) -> &'static str {
        match self {
            ChangeKind::Added => "[+]",
            ChangeKind::Removed => "[-]",
            ChangeKind::Modified => "[~]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceChange {
    pub logical_id: String,
    pub kind: ChangeKind,
    /// Type in the newer template, or the removed resource's type
    pub resource_type: String,
    /// Previous type when the type changed
    pub previous_type: Option<String>,
    /// Top-level property keys whose values differ
    pub changed_properties: Vec<String>,
    /// Resource attributes such as `DependsOn` whose values differ
    pub changed_attributes: Vec<String>,
}

impl ResourceChange {
    pub fn type_changed(&self) -> bool {
        self.previous_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryChange {
    pub name: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateDiff {
    pub resources: Vec<ResourceChange>,
    pub parameters: Vec<EntryChange>,
    pub outputs: Vec<EntryChange>,
}

fn changed_keys(old: &Value, new: &Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let old = old.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);
    old.keys()
        .chain(new.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect()
}

fn changed_attributes(old: &Resource, new: &Resource) -> Vec<String> {
    let mut changed = Vec::new();
    let old_depends_on: BTreeSet<_> = old.depends_on.iter().collect();
    let new_depends_on: BTreeSet<_> = new.depends_on.iter().collect();
    if old_depends_on != new_depends_on {
        changed.push("DependsOn".to_string());
    }
    if old.deletion_policy != new.deletion_policy {
        changed.push("DeletionPolicy".to_string());
    }
    if old.update_replace_policy != new.update_replace_policy {
        changed.push("UpdateReplacePolicy".to_string());
    }
    if old.metadata != new.metadata {
        changed.push("Metadata".to_string());
    }
    changed
}

fn entry_changes<T: PartialEq>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> Vec<EntryChange> {
    old.keys()
        .chain(new.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter_map(|name| {
            let kind = match (old.get(name), new.get(name)) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => return None,
            };
            Some(EntryChange {
                name: name.clone(),
                kind,
            })
        })
        .collect()
}

impl TemplateDiff {
    /// Changes that turn `old` into `new`
    pub fn between(old: &Template, new: &Template) -> Self {
        let ids: BTreeSet<&String> = old
            .resources
            .keys()
            .chain(new.resources.keys())
            .collect();
        let resources = ids
            .into_iter()
            .filter_map(|id| match (old.resources.get(id), new.resources.get(id)) {
                (None, Some(added)) => Some(ResourceChange {
                    logical_id: id.clone(),
                    kind: ChangeKind::Added,
                    resource_type: added.resource_type.clone(),
                    previous_type: None,
                    changed_properties: Vec::new(),
                    changed_attributes: Vec::new(),
                }),
                (Some(removed), None) => Some(ResourceChange {
                    logical_id: id.clone(),
                    kind: ChangeKind::Removed,
                    resource_type: removed.resource_type.clone(),
                    previous_type: None,
                    changed_properties: Vec::new(),
                    changed_attributes: Vec::new(),
                }),
                (Some(before), Some(after)) => {
                    let previous_type = (before.resource_type != after.resource_type)
                        .then(|| before.resource_type.clone());
                    let changed_properties = changed_keys(&before.properties, &after.properties);
                    let changed_attributes = changed_attributes(before, after);
                    if previous_type.is_none()
                        && changed_properties.is_empty()
                        && changed_attributes.is_empty()
                    {
                        return None;
                    }
                    Some(ResourceChange {
                        logical_id: id.clone(),
                        kind: ChangeKind::Modified,
                        resource_type: after.resource_type.clone(),
                        previous_type,
                        changed_properties,
                        changed_attributes,
                    })
                }
                (None, None) => None,
            })
            .collect();

        Self {
            resources,
            parameters: entry_changes(&old.parameters, &new.parameters),
            outputs: entry_changes(&old.outputs, &new.outputs),
        }
    }

    /// Everything in `template` counts as added
    pub fn from_empty(template: &Template) -> Self {
        Self::between(&Template::new(None), template)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.parameters.is_empty() && self.outputs.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.resources
            .iter()
            .filter(|change| change.kind == kind)
            .count()
    }
}

impl fmt::Display for TemplateDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "There were no differences");
        }

        if !self.parameters.is_empty() {
            writeln!(f, "Parameters")?;
            for change in &self.parameters {
                writeln!(f, "{} {}", change.kind.symbol(), change.name)?;
            }
            writeln!(f)?;
        }

        if !self.resources.is_empty() {
            writeln!(f, "Resources")?;
            for change in &self.resources {
                write!(
                    f,
                    "{} {} {}",
                    change.kind.symbol(),
                    change.resource_type,
                    change.logical_id
                )?;
                if let Some(previous) = &change.previous_type {
                    write!(f, " (type changed from {}, replacement)", previous)?;
                }
                let keys: Vec<&str> = change
                    .changed_properties
                    .iter()
                    .chain(&change.changed_attributes)
                    .map(String::as_str)
                    .collect();
                if !keys.is_empty() {
                    write!(f, " [{}]", keys.join(", "))?;
                }
                writeln!(f)?;
            }
            writeln!(f)?;
        }

        if !self.outputs.is_empty() {
            writeln!(f, "Outputs")?;
            for change in &self.outputs {
                writeln!(f, "{} {}", change.kind.symbol(), change.name)?;
            }
            writeln!(f)?;
        }

        write!(
            f,
            "{} to add, {} to change, {} to remove",
            self.count(ChangeKind::Added),
            self.count(ChangeKind::Modified),
            self.count(ChangeKind::Removed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_infra_template::intrinsic::ref_;
    use fraud_infra_template::{DeletionPolicy, Output, Parameter};
    use serde_json::json;

    fn base() -> Template {
        let mut template = Template::new(None);
        template
            .add_resource(
                "Bucket",
                Resource::new(
                    "AWS::S3::Bucket",
                    json!({"VersioningConfiguration": {"Status": "Enabled"}}),
                ),
            )
            .unwrap();
        template
            .add_resource(
                "Table",
                Resource::new(
                    "AWS::DynamoDB::Table",
                    json!({"BillingMode": "PAY_PER_REQUEST"}),
                ),
            )
            .unwrap();
        template
            .add_output("BucketName", Output::new(ref_("Bucket")))
            .unwrap();
        template
    }

    #[test]
    fn test_identical_templates_have_no_differences() {
        let diff = TemplateDiff::between(&base(), &base());
        assert!(diff.is_empty());
        assert_eq!(diff.to_string().trim(), "There were no differences");
    }

    #[test]
    fn test_added_removed_and_modified_resources() {
        let old = base();
        let mut new = base();
        new.resources.remove("Table");
        new.add_resource("Topic", Resource::new("AWS::SNS::Topic", json!({})))
            .unwrap();
        let bucket = new.resource_mut("Bucket").unwrap();
        bucket.properties["BucketName"] = json!("fd-bucket");
        bucket.deletion_policy = Some(DeletionPolicy::Retain);

        let diff = TemplateDiff::between(&old, &new);
        assert_eq!(diff.count(ChangeKind::Added), 1);
        assert_eq!(diff.count(ChangeKind::Removed), 1);

        let modified = diff
            .resources
            .iter()
            .find(|change| change.kind == ChangeKind::Modified)
            .unwrap();
        assert_eq!(modified.logical_id, "Bucket");
        assert_eq!(modified.changed_properties, vec!["BucketName"]);
        assert_eq!(modified.changed_attributes, vec!["DeletionPolicy"]);
        assert!(!modified.type_changed());

        let rendered = diff.to_string();
        assert!(rendered.contains("[+] AWS::SNS::Topic Topic"));
        assert!(rendered.contains("[-] AWS::DynamoDB::Table Table"));
        assert!(rendered.contains("1 to add, 1 to change, 1 to remove"));
    }

    #[test]
    fn test_type_change_is_flagged() {
        let old = base();
        let mut new = base();
        let table = new.resource_mut("Table").unwrap();
        table.resource_type = "AWS::DynamoDB::GlobalTable".to_string();

        let diff = TemplateDiff::between(&old, &new);
        assert_eq!(diff.resources.len(), 1);
        assert!(diff.resources[0].type_changed());
        let rendered = diff.to_string();
        assert!(rendered.contains("type changed from AWS::DynamoDB::Table"));
    }

    #[test]
    fn test_parameter_and_output_changes() {
        let old = base();
        let mut new = base();
        new.add_parameter("SerpApiKey", Parameter::string("key").no_echo())
            .unwrap();
        let output = new.outputs.get_mut("BucketName").unwrap();
        output.description = Some("Bucket".to_string());

        let diff = TemplateDiff::between(&old, &new);
        assert_eq!(
            diff.parameters,
            vec![EntryChange {
                name: "SerpApiKey".to_string(),
                kind: ChangeKind::Added
            }]
        );
        assert_eq!(diff.outputs[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_depends_on_order_is_ignored() {
        let mut old = base();
        let mut new = base();
        old.resource_mut("Table").unwrap().depends_on = vec!["A".into(), "B".into()];
        new.resource_mut("Table").unwrap().depends_on = vec!["B".into(), "A".into()];
        assert!(TemplateDiff::between(&old, &new).is_empty());
    }

    #[test]
    fn test_from_empty_adds_everything() {
        let diff = TemplateDiff::from_empty(&base());
        assert_eq!(diff.count(ChangeKind::Added), 2);
        assert_eq!(diff.outputs.len(), 1);
    }
}
