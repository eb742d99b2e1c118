use serde_json::Value;
use std::collections::BTreeMap;

/// IAM policy language version written into every document
pub const POLICY_VERSION: &str = "2012-10-17";

pub const S3_READ_WRITE: &str = "s3-read-write";
pub const DYNAMODB_READ_WRITE: &str = "dynamodb-read-write";
pub const SECRET_READ: &str = "secret-read";
pub const SNS_PUBLISH: &str = "sns-publish";
pub const LOGS_WRITE: &str = "logs-write";
pub const SSM_PARAMETER_READ: &str = "ssm-parameter-read";

/// Catalogue of reusable grant templates and policy document checks
#[derive(Debug, Clone)]
pub struct PolicyManager {
    templates: BTreeMap<String, PolicyTemplate>,
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyManager {
    pub fn new() -> Self {
        Self {
            templates: Self::generate_policy_templates(),
        }
    }

    pub fn template(&self, key: &str) -> Result<&PolicyTemplate, PolicyError> {
        self.templates
            .get(key)
            .ok_or_else(|| PolicyError::UnknownTemplate(key.to_string()))
    }

    pub fn templates(&self) -> impl Iterator<Item = (&String, &PolicyTemplate)> {
        self.templates.iter()
    }

    /// Generate policy templates for the grants components hand out
    pub fn generate_policy_templates() -> BTreeMap<String, PolicyTemplate> {
        let mut templates = BTreeMap::new();

        // Object read/write on a bucket and its keys
        templates.insert(
            S3_READ_WRITE.to_string(),
            PolicyTemplate::new(
                "S3 Read Write Policy",
                "Allows reading and writing objects in a bucket",
                "s3:bucket",
                &[
                    "s3:GetObject*",
                    "s3:GetBucket*",
                    "s3:List*",
                    "s3:DeleteObject*",
                    "s3:PutObject",
                    "s3:PutObjectLegalHold",
                    "s3:PutObjectRetention",
                    "s3:PutObjectTagging",
                    "s3:PutObjectVersionTagging",
                    "s3:Abort*",
                ],
            ),
        );

        templates.insert(
            DYNAMODB_READ_WRITE.to_string(),
            PolicyTemplate::new(
                "DynamoDB Read Write Data Policy",
                "Allows reading and writing items in a table",
                "dynamodb:table",
                &[
                    "dynamodb:BatchGetItem",
                    "dynamodb:GetRecords",
                    "dynamodb:GetShardIterator",
                    "dynamodb:Query",
                    "dynamodb:GetItem",
                    "dynamodb:Scan",
                    "dynamodb:ConditionCheckItem",
                    "dynamodb:BatchWriteItem",
                    "dynamodb:PutItem",
                    "dynamodb:UpdateItem",
                    "dynamodb:DeleteItem",
                    "dynamodb:DescribeTable",
                ],
            ),
        );

        templates.insert(
            SECRET_READ.to_string(),
            PolicyTemplate::new(
                "Secret Read Policy",
                "Allows reading a Secrets Manager secret value",
                "secretsmanager:secret",
                &[
                    "secretsmanager:GetSecretValue",
                    "secretsmanager:DescribeSecret",
                ],
            ),
        );

        templates.insert(
            SNS_PUBLISH.to_string(),
            PolicyTemplate::new(
                "SNS Publish Policy",
                "Allows publishing messages to SNS topics",
                "sns:topic",
                &["sns:Publish"],
            ),
        );

        templates.insert(
            LOGS_WRITE.to_string(),
            PolicyTemplate::new(
                "CloudWatch Logs Write Policy",
                "Allows writing log events to a log group",
                "logs:log-group",
                &["logs:CreateLogStream", "logs:PutLogEvents"],
            ),
        );

        templates.insert(
            SSM_PARAMETER_READ.to_string(),
            PolicyTemplate::new(
                "SSM Parameter Read Policy",
                "Allows reading a Systems Manager parameter",
                "ssm:parameter",
                &[
                    "ssm:DescribeParameters",
                    "ssm:GetParameters",
                    "ssm:GetParameter",
                    "ssm:GetParameterHistory",
                ],
            ),
        );

        templates
    }

    /// Validate a rendered policy document.
    ///
    /// Every statement needs an effect, at least one action and either a
    /// resource or a principal.
    pub fn validate_policy_document(
        &self,
        name: &str,
        document: &Value,
    ) -> Result<(), PolicyError> {
        if name.is_empty() {
            return Err(PolicyError::InvalidDocument(
                "Policy name cannot be empty".to_string(),
            ));
        }

        let Some(object) = document.as_object() else {
            return Err(PolicyError::InvalidDocument(format!(
                "{}: policy document must be an object",
                name
            )));
        };

        if object.get("Version").and_then(Value::as_str).is_none() {
            return Err(PolicyError::InvalidDocument(format!(
                "{}: policy document has no Version",
                name
            )));
        }

        let statements = match object.get("Statement") {
            Some(Value::Array(statements)) => statements.iter().collect::<Vec<_>>(),
            Some(statement @ Value::Object(_)) => vec![statement],
            _ => {
                return Err(PolicyError::InvalidDocument(format!(
                    "{}: policy document has no Statement",
                    name
                )))
            }
        };

        if statements.is_empty() {
            return Err(PolicyError::InvalidDocument(format!(
                "{}: policy document has no statements",
                name
            )));
        }

        for (index, statement) in statements.iter().enumerate() {
            match statement.get("Effect").and_then(Value::as_str) {
                Some("Allow") | Some("Deny") => {}
                _ => {
                    return Err(PolicyError::ValidationFailed(format!(
                        "{}: statement {} has no valid Effect",
                        name, index
                    )))
                }
            }

            let action = statement
                .get("Action")
                .or_else(|| statement.get("NotAction"));
            let has_action = match action {
                Some(Value::String(action)) => !action.is_empty(),
                Some(Value::Array(actions)) => !actions.is_empty(),
                _ => false,
            };
            if !has_action {
                return Err(PolicyError::ValidationFailed(format!(
                    "{}: statement {} has no actions",
                    name, index
                )));
            }

            let has_target = statement.get("Resource").is_some_and(non_empty)
                || statement.get("Principal").is_some_and(non_empty);
            if !has_target {
                return Err(PolicyError::ValidationFailed(format!(
                    "{}: statement {} has neither a resource nor a principal",
                    name, index
                )));
            }
        }

        Ok(())
    }
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

/// Policy template for generating standardized grants
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTemplate {
    pub name: String,
    pub description: String,
    pub actions: Vec<String>,
    pub resource_type: String,
}

impl PolicyTemplate {
    fn new(name: &str, description: &str, resource_type: &str, actions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resource_type: resource_type.to_string(),
        }
    }
}

/// Errors that can occur while building or checking policies
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Unknown policy template: {0}")]
    UnknownTemplate(String),

    #[error("Invalid policy document: {0}")]
    InvalidDocument(String),

    #[error("Policy validation failed: {0}")]
    ValidationFailed(String),
}

impl PolicyError {
    /// Get suggested remediation steps for the error
    pub fn remediation_steps(&self) -> Vec<String> {
        match self {
            PolicyError::UnknownTemplate(_) => vec![
                "Use one of the keys returned by PolicyManager::templates".to_string(),
            ],
            PolicyError::InvalidDocument(_) => vec![
                "Ensure the document has a Version and a Statement list".to_string(),
            ],
            PolicyError::ValidationFailed(_) => vec![
                "Check policy document syntax".to_string(),
                "Ensure policy actions are valid".to_string(),
                "Verify resource ARNs are correctly formatted".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_policy_templates() {
        let templates = PolicyManager::generate_policy_templates();

        for key in [
            S3_READ_WRITE,
            DYNAMODB_READ_WRITE,
            SECRET_READ,
            SNS_PUBLISH,
            LOGS_WRITE,
            SSM_PARAMETER_READ,
        ] {
            assert!(templates.contains_key(key), "missing {}", key);
        }

        let s3 = &templates[S3_READ_WRITE];
        assert_eq!(s3.actions.len(), 10);
        assert!(s3.actions.contains(&"s3:Abort*".to_string()));
        assert_eq!(templates[DYNAMODB_READ_WRITE].actions.len(), 12);
    }

    #[test]
    fn test_unknown_template() {
        let manager = PolicyManager::new();
        assert!(matches!(
            manager.template("kinesis-write"),
            Err(PolicyError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_valid_documents() {
        let manager = PolicyManager::new();

        let identity = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": "sns:Publish",
                "Resource": {"Ref": "Topic"}
            }]
        });
        let result = manager.validate_policy_document("publish", &identity);
        assert!(result.is_ok());

        let trust = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": "sts:AssumeRole",
                "Principal": {"Service": "lambda.amazonaws.com"}
            }]
        });
        assert!(manager.validate_policy_document("trust", &trust).is_ok());
    }

    #[test]
    fn test_policy_validation_failures() {
        let manager = PolicyManager::new();

        let document = |statements: Value| {
            json!({"Version": POLICY_VERSION, "Statement": statements})
        };

        let no_version = json!({
            "Statement": [{"Effect": "Allow", "Action": "s3:*", "Resource": "*"}]
        });
        assert!(manager.validate_policy_document("p", &no_version).is_err());

        let no_effect = document(json!([{"Action": "s3:*", "Resource": "*"}]));
        assert!(manager.validate_policy_document("p", &no_effect).is_err());

        let no_actions = document(json!([{"Effect": "Allow", "Action": [], "Resource": "*"}]));
        assert!(manager.validate_policy_document("p", &no_actions).is_err());

        let no_target = document(json!([{"Effect": "Allow", "Action": "s3:*"}]));
        assert!(manager.validate_policy_document("p", &no_target).is_err());

        let empty = document(json!([]));
        assert!(manager.validate_policy_document("p", &empty).is_err());

        let valid = document(json!([{"Effect": "Deny", "Action": "s3:*", "Resource": "*"}]));
        assert!(manager.validate_policy_document("", &valid).is_err());
    }
}
