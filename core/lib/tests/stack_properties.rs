use fraud_infra::template::intrinsic::{ref_, references};
use fraud_infra::template::Resource;
use fraud_infra::{
    validate_template, Check, FraudDetectionStack, InfraConfig, RoleRef, Scope, Stack,
    SynthesisError, Synthesizer,
};
use serde_json::json;
use std::collections::BTreeSet;

fn config() -> InfraConfig {
    InfraConfig::from_toml(
        r#"
        stack_name = "FraudDetection"

        [deployment]
        region = "us-east-1"
        account = "123456789012"
        stage = "test"

        [api]
        image_uri = "123456789012.dkr.ecr.us-east-1.amazonaws.com/fd-api:latest"

        [app]
        image_uri = "123456789012.dkr.ecr.us-east-1.amazonaws.com/fd-app:latest"
        cloudfront_prefix_list_id = "pl-3b927c52"
        "#,
    )
    .unwrap()
}

#[test]
fn test_full_stack_synthesizes_without_validation_errors() {
    let template = FraudDetectionStack::synthesize(&config()).unwrap();
    let report = validate_template(&template);

    let errors: Vec<String> = report.errors().map(ToString::to_string).collect();
    assert!(errors.is_empty(), "validation errors: {:#?}", errors);
    assert_eq!(report.creation_order.len(), template.resources.len());
}

#[test]
fn test_every_reference_resolves() {
    let template = FraudDetectionStack::synthesize(&config()).unwrap();

    for (logical_id, resource) in &template.resources {
        for reference in references(&resource.properties) {
            assert!(
                template.is_declared(&reference.target),
                "{} refers to undeclared {}",
                logical_id,
                reference.target
            );
        }
        for dependency in &resource.depends_on {
            assert!(
                template.resources.contains_key(dependency),
                "{} depends on undeclared {}",
                logical_id,
                dependency
            );
        }
    }
    for (name, output) in &template.outputs {
        for reference in references(&output.value) {
            assert!(
                template.is_declared(&reference.target),
                "output {} is dangling",
                name
            );
        }
    }
}

#[test]
fn test_grant_to_undeclared_role_fails() {
    let mut assembled = FraudDetectionStack::assemble(&config()).unwrap();
    let bucket = assembled.storage.storage_bucket.clone();

    let ghost = RoleRef::new("GhostRole1A2B3C4D");
    let err = bucket
        .grant_read_write(assembled.stack_mut(), &ghost)
        .unwrap_err();
    assert!(matches!(err, SynthesisError::UndeclaredRole(id) if id == "GhostRole1A2B3C4D"));

    // A declared resource that is not a role does not count either
    let not_a_role = RoleRef::new(bucket.logical_id());
    let result = assembled
        .stack_mut()
        .grant(&not_a_role, "s3-read-write", vec![bucket.arn()]);
    assert!(matches!(result, Err(SynthesisError::UndeclaredRole(_))));

    let declared = assembled.auth.ecs_app_role.clone();
    bucket
        .grant_read_write(assembled.stack_mut(), &declared)
        .unwrap();
}

#[test]
fn test_dangling_reference_is_reported() {
    let mut assembled = FraudDetectionStack::assemble(&config()).unwrap();
    assembled
        .stack_mut()
        .add_resource(
            &Scope::root().child("extra"),
            "Topic",
            Resource::new(
                "AWS::SNS::Topic",
                json!({"KmsMasterKeyId": ref_("MissingKey")}),
            ),
        )
        .unwrap();

    let template = assembled.finalize().unwrap();
    let report = validate_template(&template);
    assert!(!report.is_valid());
    let unresolved: Vec<_> = report.of_check(Check::UnresolvedReference).collect();
    assert_eq!(unresolved.len(), 1);
    assert!(unresolved[0].message.contains("MissingKey"));
}

#[test]
fn test_no_conflicting_fixed_names() {
    let template = FraudDetectionStack::synthesize(&config()).unwrap();
    let report = validate_template(&template);
    assert_eq!(report.of_check(Check::NameConflict).count(), 0);

    let collections: BTreeSet<String> = template
        .resources_of_type("AWS::OpenSearchServerless::Collection")
        .map(|(_, resource)| resource.properties["Name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(collections.len(), 2);
}

#[test]
fn test_duplicate_fixed_name_is_detected() {
    let mut assembled = FraudDetectionStack::assemble(&config()).unwrap();
    let existing = assembled
        .stack()
        .template()
        .resources_of_type("AWS::OpenSearchServerless::Collection")
        .map(|(_, resource)| resource.properties["Name"].clone())
        .next()
        .unwrap();
    assembled
        .stack_mut()
        .add_resource(
            &Scope::root().child("extra"),
            "Collection",
            Resource::new(
                "AWS::OpenSearchServerless::Collection",
                json!({"Name": existing, "Type": "VECTORSEARCH"}),
            ),
        )
        .unwrap();

    let report = validate_template(&assembled.finalize().unwrap());
    assert_eq!(report.of_check(Check::NameConflict).count(), 1);
}

#[test]
fn test_runtime_environment_maps() {
    let assembled = FraudDetectionStack::assemble(&config()).unwrap();
    let common = [
        "SERP_API_KEY_SECRET",
        "POOL_ID",
        "APP_CLIENT_ID",
        "APP_CLIENT_SECRET",
        "IDENTITY_POOL_ID",
        "AWS_ACCOUNT_ID",
        "STORAGE_BUCKET",
        "INDEXED_FILES_TABLE",
        "OPENSEARCH_DOMAIN",
        "TEMP_OPENSEARCH_DOMAIN",
        "SM_ENDPOINT_NAME_SSM_PARAMETER",
        "VECTOR_INDEX_NAME",
        "TEMP_VECTOR_INDEX_NAME",
        "COGNITO_REDIRECT_URL",
        "COGNITO_DOMAIN",
    ];
    for key in common {
        assert!(
            assembled.api.environment.contains_key(key),
            "lambda is missing {}",
            key
        );
        assert!(
            assembled.app.environment.contains_key(key),
            "container is missing {}",
            key
        );
    }

    let lambda_only = [
        "ACCOUNT",
        "REGION",
        "HF_HOME",
        "TRANSFORMERS_CACHE",
        "XDG_CACHE_HOME",
        "HUGGINGFACE_HUB_CACHE",
    ];
    for key in lambda_only {
        assert!(assembled.api.environment.contains_key(key));
        assert!(!assembled.app.environment.contains_key(key));
    }
    let container_only = [
        "AWS_DEFAULT_REGION",
        "API_ENDPOINT",
        "CLOUDFRONT_DIST_SSM_PARAMETER_NAME",
    ];
    for key in container_only {
        assert!(assembled.app.environment.contains_key(key));
        assert!(!assembled.api.environment.contains_key(key));
    }
}

#[test]
fn test_roles_receive_default_policies() {
    let assembled = FraudDetectionStack::assemble(&config()).unwrap();
    let app_role = assembled.auth.ecs_app_role.clone();
    let handler_role = assembled.api.handler_role.clone();
    let template = assembled.finalize().unwrap();

    for role in [&app_role, &handler_role] {
        let policy = template
            .resource(&Stack::default_policy_id(role))
            .unwrap_or_else(|| panic!("{} has no default policy", role.logical_id()));
        assert_eq!(policy.resource_type, "AWS::IAM::Policy");
        assert_eq!(
            policy.properties["Roles"],
            json!([{"Ref": role.logical_id()}])
        );
    }
}

#[test]
fn test_service_waits_for_listener_and_policy() {
    let assembled = FraudDetectionStack::assemble(&config()).unwrap();
    let service_id = assembled.app.service.clone();
    let app_role = assembled.auth.ecs_app_role.clone();
    let template = assembled.finalize().unwrap();

    let service = template.resource(&service_id).unwrap();
    let dependency_types: Vec<&str> = service
        .depends_on
        .iter()
        .map(|id| template.resource(id).unwrap().resource_type.as_str())
        .collect();
    assert!(dependency_types.contains(&"AWS::ElasticLoadBalancingV2::Listener"));
    assert!(service.depends_on.contains(&Stack::default_policy_id(&app_role)));
}

#[test]
fn test_synthesizer_writes_valid_output() {
    let out_dir = tempfile::TempDir::new().unwrap();
    let output = Synthesizer::new(out_dir.path())
        .synthesize(&config())
        .unwrap();

    assert!(output.template_path.exists());
    assert!(output.manifest_path.exists());
    assert_eq!(output.manifest.region, "us-east-1");
    assert_eq!(
        output.manifest.resource_count,
        output.template.resources.len()
    );
}
