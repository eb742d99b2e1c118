use crate::components::environment::{lambda_variables, EnvironmentMap, RuntimeEnvironment};
use crate::config::ApiConfig;
use crate::handles::{
    BucketRef, FunctionRef, RestApiRef, RoleRef, SecretRef, SecurityGroupRef, SubnetRef, TableRef,
    VpcRef,
};
use crate::iam::{PolicyDocument, PolicyStatement, Principal, Role};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::{self, join};
use fraud_infra_template::{Output, Resource};
use serde_json::{json, Value};
use tracing::info;

/// Output carrying the invoke URL of the deployed stage
pub const API_URL_OUTPUT: &str = "FraudDetectionApiUrl";

const METHOD_TYPE: &str = "AWS::ApiGateway::Method";
const CORS_METHODS: &str = "GET,PUT,POST,DELETE,OPTIONS";
const CORS_HEADERS: &str =
    "Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token,X-Amz-User-Agent";

pub struct ApiProps<'a> {
    pub config: &'a ApiConfig,
    pub vpc: &'a VpcRef,
    pub private_subnets: &'a [SubnetRef],
    /// Allowed to invoke the API besides the account itself
    pub ecs_app_role: &'a RoleRef,
    pub storage_bucket: &'a BucketRef,
    pub logs_bucket: &'a BucketRef,
    pub serp_api_key_secret: &'a SecretRef,
    pub indexed_files_table: &'a TableRef,
    pub runtime: &'a RuntimeEnvironment<'a>,
}

/// IAM-authorized REST API proxying every request to a container-image Lambda
pub struct FraudDetectionApi {
    pub rest_api: RestApiRef,
    pub handler: FunctionRef,
    pub handler_role: RoleRef,
    pub environment: EnvironmentMap,
    /// Invoke URL of the deployed stage, ending in `/`
    pub url: Value,
}

impl FraudDetectionApi {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        props: ApiProps<'_>,
    ) -> Result<Self, SynthesisError> {
        let id = scope.id().to_string();
        let config = props.config;

        let handler_role = Role::new(Principal::service("lambda.amazonaws.com"))
            .aws_managed_policy("service-role/AWSLambdaVPCAccessExecutionRole")
            .declare(stack, scope, "HandlerRole")?;
        for statement in handler_statements(stack) {
            stack.add_to_role_policy(&handler_role, statement)?;
        }
        props.serp_api_key_secret.grant_read(stack, &handler_role)?;
        props.storage_bucket.grant_read_write(stack, &handler_role)?;
        props.logs_bucket.grant_read_write(stack, &handler_role)?;
        props.indexed_files_table.grant_read_write_data(stack, &handler_role)?;

        let environment = props.runtime.lambda(stack.env());

        let handler_scope = scope.child("Handler");
        let group_description = format!(
            "Automatic security group for Lambda Function {}",
            handler_scope.path()
        );
        let security_group = SecurityGroupRef::new(stack.add_resource(
            &handler_scope,
            "SecurityGroup",
            Resource::new(
                SecurityGroupRef::RESOURCE_TYPE,
                json!({
                    "GroupDescription": group_description,
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1",
                    }],
                    "VpcId": props.vpc.id(),
                }),
            ),
        )?);

        let subnet_ids: Vec<Value> = props.private_subnets.iter().map(SubnetRef::id).collect();
        let handler = FunctionRef::new(stack.add_resource(
            scope,
            "Handler",
            Resource::new(
                FunctionRef::RESOURCE_TYPE,
                json!({
                    "Architectures": ["arm64"],
                    "Code": {"ImageUri": config.image_uri},
                    "Environment": lambda_variables(&environment),
                    "MemorySize": config.memory_size,
                    "PackageType": "Image",
                    "Role": handler_role.arn(),
                    "Timeout": config.timeout_seconds,
                    "VpcConfig": {
                        "SecurityGroupIds": [security_group.id()],
                        "SubnetIds": subnet_ids,
                    },
                }),
            )
            .depends_on(handler_role.logical_id()),
        )?);
        stack.depend_on_role_policy(handler.logical_id(), &handler_role);

        let api_id = format!("{}-rest-api", id);
        let rest_api = RestApiRef::new(stack.add_resource(
            scope,
            &api_id,
            Resource::new(
                RestApiRef::RESOURCE_TYPE,
                json!({
                    "Name": api_id,
                    "Policy": resource_policy(props.ecs_app_role).to_json(),
                }),
            ),
        )?);

        let api_scope = scope.child(&api_id);
        let root_scope = api_scope.child("Default");
        let integration_uri = invocation_uri(&handler);

        let mut methods = vec![
            declare_proxy_method(
                stack,
                &root_scope,
                &rest_api,
                rest_api.root_resource_id(),
                &integration_uri,
            )?,
            declare_preflight_method(
                stack,
                &root_scope,
                &rest_api,
                rest_api.root_resource_id(),
                &config.cors_allow_origin,
            )?,
        ];

        let proxy = stack.add_resource(
            &root_scope,
            "{proxy+}",
            Resource::new(
                "AWS::ApiGateway::Resource",
                json!({
                    "ParentId": rest_api.root_resource_id(),
                    "PathPart": "{proxy+}",
                    "RestApiId": rest_api.id(),
                }),
            ),
        )?;
        let proxy_scope = root_scope.child("{proxy+}");
        methods.push(declare_proxy_method(
            stack,
            &proxy_scope,
            &rest_api,
            intrinsic::ref_(&proxy),
            &integration_uri,
        )?);
        methods.push(declare_preflight_method(
            stack,
            &proxy_scope,
            &rest_api,
            intrinsic::ref_(&proxy),
            &config.cors_allow_origin,
        )?);

        stack.add_resource(
            scope,
            "ApiPermission",
            Resource::new(
                "AWS::Lambda::Permission",
                json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": handler.arn(),
                    "Principal": "apigateway.amazonaws.com",
                    "SourceArn": join(
                        "",
                        [
                            json!("arn:"),
                            intrinsic::partition(),
                            json!(":execute-api:"),
                            intrinsic::region(),
                            json!(":"),
                            stack.env().account_value(),
                            json!(":"),
                            rest_api.id(),
                            json!("/*"),
                        ],
                    ),
                }),
            ),
        )?;

        let mut deployment = Resource::new(
            "AWS::ApiGateway::Deployment",
            json!({
                "Description": "Automatically created by the RestApi construct",
                "RestApiId": rest_api.id(),
            }),
        );
        for method in methods.iter().chain(std::iter::once(&proxy)) {
            deployment = deployment.depends_on(method.clone());
        }
        let deployment = stack.add_resource(&api_scope, "Deployment", deployment)?;

        stack.add_resource(
            &api_scope,
            &format!("DeploymentStage.{}", config.stage_name),
            Resource::new(
                "AWS::ApiGateway::Stage",
                json!({
                    "DeploymentId": intrinsic::ref_(&deployment),
                    "RestApiId": rest_api.id(),
                    "StageName": config.stage_name,
                }),
            ),
        )?;

        let url = join(
            "",
            [
                json!("https://"),
                rest_api.id(),
                json!(".execute-api."),
                intrinsic::region(),
                json!("."),
                intrinsic::url_suffix(),
                json!(format!("/{}/", config.stage_name)),
            ],
        );
        stack.add_output(API_URL_OUTPUT, Output::new(url.clone()))?;

        info!(
            stage = %config.stage_name,
            methods = methods.len(),
            "Declared api resources"
        );
        Ok(Self {
            rest_api,
            handler,
            handler_role,
            environment,
            url,
        })
    }
}

fn handler_statements(stack: &Stack) -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow().action("bedrock:*").resource("*"),
        PolicyStatement::allow()
            .actions([
                "cloudformation:DescribeStacks",
                "cloudformation:DescribeStackEvents",
                "cloudformation:DescribeStackResource",
                "cloudformation:DescribeStackResources",
                "cloudformation:DeleteStack",
                "aoss:*",
                "geo:*",
            ])
            .resource("*"),
        PolicyStatement::allow()
            .actions([
                "apigateway:GET",
                "apigateway:POST",
                "apigateway:PUT",
                "apigateway:DELETE",
            ])
            .resource(format!("arn:aws:apigateway:{}::/*", stack.env().region)),
    ]
}

/// Callers in this account and the web app may invoke anything; preflight is public
fn resource_policy(ecs_app_role: &RoleRef) -> PolicyDocument {
    PolicyDocument::new()
        .with_statement(
            PolicyStatement::allow()
                .action("execute-api:Invoke")
                .principal(Principal::this_account())
                .resource("execute-api:/*"),
        )
        .with_statement(
            PolicyStatement::allow()
                .action("execute-api:Invoke")
                .principal(Principal::Arn(ecs_app_role.arn()))
                .resource("execute-api:/*"),
        )
        .with_statement(
            PolicyStatement::allow()
                .action("execute-api:Invoke")
                .principal(Principal::Any)
                .resource("execute-api:/*/OPTIONS/*"),
        )
}

fn invocation_uri(handler: &FunctionRef) -> Value {
    join(
        "",
        [
            json!("arn:"),
            intrinsic::partition(),
            json!(":apigateway:"),
            intrinsic::region(),
            json!(":lambda:path/2015-03-31/functions/"),
            handler.arn(),
            json!("/invocations"),
        ],
    )
}

fn declare_proxy_method(
    stack: &mut Stack,
    scope: &Scope,
    rest_api: &RestApiRef,
    resource_id: Value,
    integration_uri: &Value,
) -> Result<String, SynthesisError> {
    stack.add_resource(
        scope,
        "ANY",
        Resource::new(
            METHOD_TYPE,
            json!({
                "AuthorizationType": "AWS_IAM",
                "HttpMethod": "ANY",
                "Integration": {
                    "IntegrationHttpMethod": "POST",
                    "Type": "AWS_PROXY",
                    "Uri": integration_uri,
                },
                "ResourceId": resource_id,
                "RestApiId": rest_api.id(),
            }),
        ),
    )
}

/// Mock CORS preflight answering 204 without authorization
fn declare_preflight_method(
    stack: &mut Stack,
    scope: &Scope,
    rest_api: &RestApiRef,
    resource_id: Value,
    allow_origin: &str,
) -> Result<String, SynthesisError> {
    let allow_headers = format!("'{}'", CORS_HEADERS);
    let allow_methods = format!("'{}'", CORS_METHODS);
    let allow_origin = format!("'{}'", allow_origin);
    stack.add_resource(
        scope,
        "OPTIONS",
        Resource::new(
            METHOD_TYPE,
            json!({
                "AuthorizationType": "NONE",
                "HttpMethod": "OPTIONS",
                "Integration": {
                    "IntegrationResponses": [{
                        "ResponseParameters": {
                            "method.response.header.Access-Control-Allow-Headers": allow_headers,
                            "method.response.header.Access-Control-Allow-Methods": allow_methods,
                            "method.response.header.Access-Control-Allow-Origin": allow_origin,
                        },
                        "StatusCode": "204",
                    }],
                    "RequestTemplates": {"application/json": "{ statusCode: 200 }"},
                    "Type": "MOCK",
                },
                "MethodResponses": [{
                    "ResponseParameters": {
                        "method.response.header.Access-Control-Allow-Headers": true,
                        "method.response.header.Access-Control-Allow-Methods": true,
                        "method.response.header.Access-Control-Allow-Origin": true,
                    },
                    "StatusCode": "204",
                }],
                "ResourceId": resource_id,
                "RestApiId": rest_api.id(),
            }),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::environment::tests::Handles;
    use crate::stack::tests::test_stack;
    use fraud_infra_template::Template;

    fn api() -> (Template, FraudDetectionApi) {
        let mut stack = test_stack();
        let root = Scope::root();
        let declare = |stack: &mut Stack, id: &str, resource_type: &str| {
            stack
                .add_resource(&root, id, Resource::new(resource_type, json!({})))
                .unwrap()
        };
        let vpc = VpcRef::new(declare(&mut stack, "Vpc", "AWS::EC2::VPC"));
        let subnet = SubnetRef::new(declare(&mut stack, "Subnet", "AWS::EC2::Subnet"));
        let storage = BucketRef::new(declare(&mut stack, "Storage", "AWS::S3::Bucket"));
        let logs = BucketRef::new(declare(&mut stack, "Logs", "AWS::S3::Bucket"));
        let secret = SecretRef::new(declare(&mut stack, "Secret", "AWS::SecretsManager::Secret"));
        let table = TableRef::new(declare(&mut stack, "Table", "AWS::DynamoDB::Table"));
        let app_role = Role::new(Principal::service("ecs-tasks.amazonaws.com"))
            .declare(&mut stack, &root, "AppRole")
            .unwrap();

        let handles = Handles::new();
        let runtime = handles.runtime();
        let config = ApiConfig {
            image_uri: "123456789012.dkr.ecr.us-east-1.amazonaws.com/api:latest".to_string(),
            ..ApiConfig::default()
        };
        let api = FraudDetectionApi::new(
            &mut stack,
            &root.child("api"),
            ApiProps {
                config: &config,
                vpc: &vpc,
                private_subnets: std::slice::from_ref(&subnet),
                ecs_app_role: &app_role,
                storage_bucket: &storage,
                logs_bucket: &logs,
                serp_api_key_secret: &secret,
                indexed_files_table: &table,
                runtime: &runtime,
            },
        )
        .unwrap();
        (stack.finalize().unwrap(), api)
    }

    #[test]
    fn test_handler_function() {
        let (template, api) = api();
        let function = template.resource(api.handler.logical_id()).unwrap();
        assert_eq!(function.properties["PackageType"], "Image");
        assert_eq!(function.properties["Architectures"], json!(["arm64"]));
        assert_eq!(function.properties["MemorySize"], 10240);
        assert_eq!(function.properties["Timeout"], 60);
        assert_eq!(
            function.properties["Environment"]["Variables"]["HF_HOME"],
            "/tmp"
        );
        let subnets = function.properties["VpcConfig"]["SubnetIds"].as_array();
        assert_eq!(subnets.unwrap().len(), 1);
        assert!(function
            .depends_on
            .contains(&Stack::default_policy_id(&api.handler_role)));
    }

    #[test]
    fn test_handler_role_permissions() {
        let (template, api) = api();
        let role = template.resource(api.handler_role.logical_id()).unwrap();
        assert!(role.properties["ManagedPolicyArns"][0]["Fn::Join"][1][2]
            .as_str()
            .unwrap()
            .ends_with("service-role/AWSLambdaVPCAccessExecutionRole"));

        let policy = template
            .resource(&Stack::default_policy_id(&api.handler_role))
            .unwrap();
        let statements = &policy.properties["PolicyDocument"]["Statement"];
        assert_eq!(statements[0]["Action"], "bedrock:*");
        assert_eq!(
            statements[2]["Resource"],
            "arn:aws:apigateway:us-east-1::/*"
        );
        // three inline statements plus secret, two buckets and the table
        assert_eq!(statements.as_array().unwrap().len(), 7);
    }

    #[test]
    fn test_preflight_methods_skip_authorization() {
        let (template, _) = api();
        let methods: Vec<_> = template.resources_of_type(METHOD_TYPE).collect();
        assert_eq!(methods.len(), 4);
        for (_, method) in methods {
            let expected = if method.properties["HttpMethod"] == "OPTIONS" {
                "NONE"
            } else {
                "AWS_IAM"
            };
            assert_eq!(method.properties["AuthorizationType"], expected);
        }
    }

    #[test]
    fn test_resource_policy_allows_public_preflight_only() {
        let (template, api) = api();
        let rest_api = template.resource(api.rest_api.logical_id()).unwrap();
        let statements = &rest_api.properties["Policy"]["Statement"];
        let public: Vec<_> = statements
            .as_array()
            .unwrap()
            .iter()
            .filter(|statement| statement["Principal"]["AWS"] == "*")
            .collect();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0]["Resource"], "execute-api:/*/OPTIONS/*");
    }

    #[test]
    fn test_deployment_waits_for_methods() {
        let (template, _) = api();
        let (_, deployment) = template
            .resources_of_type("AWS::ApiGateway::Deployment")
            .next()
            .unwrap();
        assert_eq!(deployment.depends_on.len(), 5);

        let (_, stage) = template
            .resources_of_type("AWS::ApiGateway::Stage")
            .next()
            .unwrap();
        assert_eq!(stage.properties["StageName"], "prod");
        assert!(template.outputs.contains_key(API_URL_OUTPUT));
    }
}
