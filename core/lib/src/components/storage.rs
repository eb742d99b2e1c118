use crate::config::StorageConfig;
use crate::handles::BucketRef;
use crate::iam::{PolicyDocument, PolicyStatement, Principal};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::join;
use fraud_infra_template::{DeletionPolicy, Resource};
use serde_json::{json, Map, Value};
use tracing::info;

/// Application storage bucket plus the bucket receiving its access logs
pub struct StorageConstruct {
    pub storage_bucket: BucketRef,
    pub logs_bucket: BucketRef,
}

impl StorageConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        config: &StorageConfig,
    ) -> Result<Self, SynthesisError> {
        let logs_bucket = declare_bucket(stack, scope, "LogsBucket", Map::new())?;

        let mut storage_properties = Map::new();
        storage_properties.insert(
            "CorsConfiguration".to_string(),
            json!({
                "CorsRules": [{
                    "AllowedMethods": ["GET"],
                    "AllowedOrigins": config.cors_allowed_origins,
                }]
            }),
        );
        storage_properties.insert(
            "LoggingConfiguration".to_string(),
            json!({
                "DestinationBucketName": logs_bucket.name(),
                "LogFilePrefix": config.access_logs_prefix,
            }),
        );
        let storage_bucket = declare_bucket(stack, scope, "StorageBucket", storage_properties)?;

        // S3 server access logging delivers as the logging service principal
        let log_delivery = PolicyStatement::allow()
            .action("s3:PutObject")
            .principal(Principal::service("logging.s3.amazonaws.com"))
            .resource(join(
                "",
                [
                    logs_bucket.arn(),
                    json!(format!("/{}*", config.access_logs_prefix)),
                ],
            ))
            .condition("ArnLike", "aws:SourceArn", storage_bucket.arn())
            .condition(
                "StringEquals",
                "aws:SourceAccount",
                stack.env().account_value(),
            );

        declare_bucket_policy(stack, scope, "LogsBucket", &logs_bucket, Some(log_delivery))?;
        declare_bucket_policy(stack, scope, "StorageBucket", &storage_bucket, None)?;

        info!("Declared storage resources");
        Ok(Self {
            storage_bucket,
            logs_bucket,
        })
    }
}

/// Private, SSE-S3 encrypted bucket removed with the stack
fn declare_bucket(
    stack: &mut Stack,
    scope: &Scope,
    id: &str,
    extra: Map<String, Value>,
) -> Result<BucketRef, SynthesisError> {
    let mut properties = Map::new();
    properties.insert(
        "BucketEncryption".to_string(),
        json!({
            "ServerSideEncryptionConfiguration": [
                {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}
            ]
        }),
    );
    properties.insert(
        "OwnershipControls".to_string(),
        json!({"Rules": [{"ObjectOwnership": "ObjectWriter"}]}),
    );
    properties.insert(
        "PublicAccessBlockConfiguration".to_string(),
        json!({
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true,
        }),
    );
    properties.extend(extra);

    let logical_id = stack.add_resource(
        scope,
        id,
        Resource::new(BucketRef::RESOURCE_TYPE, Value::Object(properties))
            .removal_policy(DeletionPolicy::Delete),
    )?;
    Ok(BucketRef::new(logical_id))
}

/// Bucket policy denying every request made without TLS
fn declare_bucket_policy(
    stack: &mut Stack,
    scope: &Scope,
    bucket_id: &str,
    bucket: &BucketRef,
    extra: Option<PolicyStatement>,
) -> Result<String, SynthesisError> {
    let mut document = PolicyDocument::new().with_statement(
        PolicyStatement::deny()
            .action("s3:*")
            .principal(Principal::Any)
            .resources([bucket.arn(), bucket.objects_arn()])
            .condition("Bool", "aws:SecureTransport", json!("false")),
    );
    if let Some(statement) = extra {
        document.add_statement(statement);
    }

    stack.add_resource(
        &scope.child(bucket_id),
        "Policy",
        Resource::new(
            "AWS::S3::BucketPolicy",
            json!({
                "Bucket": bucket.name(),
                "PolicyDocument": document.to_json(),
            }),
        )
        .removal_policy(DeletionPolicy::Delete),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::tests::test_stack;

    fn storage() -> (Stack, StorageConstruct) {
        let mut stack = test_stack();
        let scope = Scope::root().child("Storage");
        let storage = StorageConstruct::new(&mut stack, &scope, &StorageConfig::default())
            .unwrap();
        (stack, storage)
    }

    #[test]
    fn test_buckets_are_private_and_encrypted() {
        let (stack, storage) = storage();
        for bucket in [&storage.storage_bucket, &storage.logs_bucket] {
            let resource = stack.template().resource(bucket.logical_id()).unwrap();
            assert_eq!(
                resource.properties["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]
                    ["ServerSideEncryptionByDefault"]["SSEAlgorithm"],
                "AES256"
            );
            assert_eq!(
                resource.properties["PublicAccessBlockConfiguration"]["RestrictPublicBuckets"],
                true
            );
            assert_eq!(
                resource.properties["OwnershipControls"]["Rules"][0]["ObjectOwnership"],
                "ObjectWriter"
            );
            assert_eq!(resource.deletion_policy, Some(DeletionPolicy::Delete));
        }
    }

    #[test]
    fn test_storage_bucket_logs_into_logs_bucket() {
        let (stack, storage) = storage();
        let bucket = stack
            .template()
            .resource(storage.storage_bucket.logical_id())
            .unwrap();
        assert_eq!(
            bucket.properties["LoggingConfiguration"]["DestinationBucketName"],
            storage.logs_bucket.name()
        );
        assert_eq!(
            bucket.properties["LoggingConfiguration"]["LogFilePrefix"],
            "storage-bucket-logs"
        );
        assert_eq!(
            bucket.properties["CorsConfiguration"]["CorsRules"][0]["AllowedMethods"],
            json!(["GET"])
        );
    }

    #[test]
    fn test_bucket_policies_enforce_tls() {
        let (stack, _) = storage();
        let policies: Vec<_> = stack
            .template()
            .resources_of_type("AWS::S3::BucketPolicy")
            .map(|(_, policy)| policy)
            .collect();
        assert_eq!(policies.len(), 2);

        for policy in &policies {
            let deny = &policy.properties["PolicyDocument"]["Statement"][0];
            assert_eq!(deny["Effect"], "Deny");
            assert_eq!(deny["Condition"]["Bool"]["aws:SecureTransport"], "false");
        }

        let delivery = policies
            .iter()
            .filter_map(|policy| policy.properties["PolicyDocument"]["Statement"].get(1))
            .next()
            .unwrap();
        assert_eq!(delivery["Principal"]["Service"], "logging.s3.amazonaws.com");
        assert_eq!(
            delivery["Condition"]["StringEquals"]["aws:SourceAccount"],
            "123456789012"
        );
    }
}
