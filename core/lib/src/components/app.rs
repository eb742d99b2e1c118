use crate::components::environment::{container_variables, EnvironmentMap, RuntimeEnvironment};
use crate::config::AppConfig;
use crate::handles::{
    BucketRef, ClusterRef, DistributionRef, FileSystemRef, LoadBalancerRef, LogGroupRef, RestApiRef,
    RoleRef, SecretRef, SecurityGroupRef, StringParameterRef, SubnetRef, TableRef, TargetGroupRef,
    TopicRef, VpcRef,
};
use crate::iam::PolicyStatement;
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::{self, join};
use fraud_infra_template::{DeletionPolicy, Output, Parameter, Resource};
use serde_json::{json, Value};
use tracing::info;

/// Template parameter holding the CloudFront origin-facing managed prefix list
pub const CLOUDFRONT_PREFIX_LIST_PARAMETER: &str = "CloudFrontOriginPrefixListId";

/// Header CloudFront adds to every origin request; the listener rejects requests without it
pub const CLOUDFRONT_CUSTOM_HEADER: &str = "x-cf-origin";

const CACHING_DISABLED_POLICY_ID: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
const NFS_PORT: u16 = 2049;
const ORIGIN_ID: &str = "alb-origin";
const STICKINESS_SECONDS: u32 = 86400;

const ALL_METHODS: [&str; 7] = ["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"];
const WEBSOCKET_HEADERS: [&str; 4] = [
    "Sec-WebSocket-Key",
    "Sec-WebSocket-Version",
    "Sec-WebSocket-Protocol",
    "Sec-WebSocket-Accept",
];

pub struct AppProps<'a> {
    pub config: &'a AppConfig,
    pub vpc: &'a VpcRef,
    pub public_subnets: &'a [SubnetRef],
    pub private_subnets: &'a [SubnetRef],
    pub ecs_role: &'a RoleRef,
    pub ecs_app_role: &'a RoleRef,
    pub storage_bucket: &'a BucketRef,
    pub logs_bucket: &'a BucketRef,
    pub serp_api_key_secret: &'a SecretRef,
    pub indexed_files_table: &'a TableRef,
    pub api: &'a RestApiRef,
    pub api_url: &'a Value,
    pub runtime: &'a RuntimeEnvironment<'a>,
}

/// Web application on Fargate behind a load balancer that only CloudFront can reach
pub struct AppConstruct {
    pub cluster: ClusterRef,
    pub file_system: FileSystemRef,
    pub topic: TopicRef,
    pub security_group: SecurityGroupRef,
    pub log_group: LogGroupRef,
    pub task_definition: String,
    pub service: String,
    pub load_balancer: LoadBalancerRef,
    pub target_group: TargetGroupRef,
    pub header_secret: SecretRef,
    pub distribution: DistributionRef,
    pub cloudfront_endpoint_parameter: StringParameterRef,
    pub environment: EnvironmentMap,
}

impl AppConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        props: AppProps<'_>,
    ) -> Result<Self, SynthesisError> {
        let id = scope.id().to_string();
        let config = props.config;
        let port = config.container_port;

        let mut prefix_list =
            Parameter::string("Managed prefix list of CloudFront origin-facing servers");
        if let Some(default) = &config.cloudfront_prefix_list_id {
            prefix_list = prefix_list.with_default(default.as_str());
        }
        let prefix_list_id = stack.add_parameter(CLOUDFRONT_PREFIX_LIST_PARAMETER, prefix_list)?;

        let cluster_id = format!("{}AppCluster", id);
        let cluster = ClusterRef::new(stack.add_resource(
            scope,
            &cluster_id,
            Resource::new(
                ClusterRef::RESOURCE_TYPE,
                json!({"ClusterSettings": [{"Name": "containerInsights", "Value": "enabled"}]}),
            ),
        )?);
        stack.add_resource(
            &scope.child(&cluster_id),
            &cluster_id,
            Resource::new(
                "AWS::ECS::ClusterCapacityProviderAssociations",
                json!({
                    "CapacityProviders": ["FARGATE", "FARGATE_SPOT"],
                    "Cluster": cluster.name(),
                    "DefaultCapacityProviderStrategy": [],
                }),
            ),
        )?;

        let security_group = SecurityGroupRef::new(stack.add_resource(
            scope,
            &format!("{}sgapp", id),
            Resource::new(
                SecurityGroupRef::RESOURCE_TYPE,
                json!({
                    "GroupDescription": scope.child(&format!("{}sgapp", id)).path(),
                    "GroupName": format!("{}AppSecurityGroup", id),
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow all outbound traffic by default",
                        "IpProtocol": "-1",
                    }],
                    "SecurityGroupIngress": [
                        tcp_ingress("CidrIp", props.vpc.cidr_block(), port, None),
                        tcp_ingress(
                            "CidrIp",
                            props.vpc.cidr_block(),
                            NFS_PORT,
                            Some("allow NFS traffic from within the VPC"),
                        ),
                        tcp_ingress("SourcePrefixListId", prefix_list_id, port, None),
                    ],
                    "VpcId": props.vpc.id(),
                }),
            ),
        )?);

        let file_system = declare_file_system(stack, scope, &id, &props, &security_group)?;

        let topic = TopicRef::new(stack.add_resource(
            scope,
            &format!("{}asgAppTopic", id),
            Resource::new(TopicRef::RESOURCE_TYPE, json!({})),
        )?);

        let app_role = props.ecs_app_role;
        stack.add_to_role_policy(
            app_role,
            PolicyStatement::allow()
                .actions([
                    "elasticfilesystem:ClientMount",
                    "elasticfilesystem:ClientWrite",
                    "elasticfilesystem:ClientRootAccess",
                ])
                .resource(file_system.arn()),
        )?;
        stack.add_to_role_policy(app_role, app_wildcard_statement())?;
        let invoke_arn = join(
            "",
            [
                json!(format!("arn:aws:execute-api:{}:", stack.env().region)),
                stack.env().account_value(),
                json!(":"),
                props.api.id(),
                json!("/*/*/*"),
            ],
        );
        stack.add_to_role_policy(
            app_role,
            PolicyStatement::allow()
                .action("execute-api:Invoke")
                .resource(invoke_arn),
        )?;
        props.storage_bucket.grant_read_write(stack, app_role)?;
        props.logs_bucket.grant_read_write(stack, app_role)?;
        topic.grant_publish(stack, app_role)?;
        props.serp_api_key_secret.grant_read(stack, app_role)?;
        props.indexed_files_table.grant_read_write_data(stack, app_role)?;

        let task_id = format!("{}AppTaskDefinition", id);
        let container_name = format!("{}AppContainer", id);
        let volume_name = format!("{}efs-volume", id);

        let log_group = LogGroupRef::new(stack.add_resource(
            &scope.child(&task_id).child(&container_name),
            "LogGroup",
            Resource::new(LogGroupRef::RESOURCE_TYPE, json!({}))
                .removal_policy(DeletionPolicy::Retain),
        )?);
        log_group.grant_write(stack, props.ecs_role)?;
        stack.add_to_role_policy(
            props.ecs_role,
            PolicyStatement::allow()
                .action("ecr:GetAuthorizationToken")
                .resource("*"),
        )?;

        let environment = props.runtime.container(
            stack.env(),
            props.api_url.clone(),
            &config.cloudfront_endpoint_parameter,
        );

        let task_definition = stack.add_resource(
            scope,
            &task_id,
            Resource::new(
                "AWS::ECS::TaskDefinition",
                json!({
                    "ContainerDefinitions": [{
                        "Cpu": config.container_cpu,
                        "Environment": container_variables(&environment),
                        "Essential": true,
                        "Image": config.image_uri,
                        "LogConfiguration": {
                            "LogDriver": "awslogs",
                            "Options": {
                                "awslogs-group": log_group.name(),
                                "awslogs-region": intrinsic::region(),
                                "awslogs-stream-prefix": config.log_stream_prefix,
                            },
                        },
                        "Memory": config.container_memory_mib,
                        "MountPoints": [{
                            "ContainerPath": "/mnt/efs",
                            "ReadOnly": false,
                            "SourceVolume": volume_name,
                        }],
                        "Name": container_name,
                        "PortMappings": [{
                            "ContainerPort": port,
                            "HostPort": port,
                            "Protocol": "tcp",
                        }],
                    }],
                    "Cpu": config.task_cpu.to_string(),
                    "ExecutionRoleArn": props.ecs_role.arn(),
                    "Memory": config.task_memory_mib.to_string(),
                    "NetworkMode": "awsvpc",
                    "RequiresCompatibilities": ["FARGATE"],
                    "RuntimePlatform": {
                        "CpuArchitecture": "ARM64",
                        "OperatingSystemFamily": "LINUX",
                    },
                    "TaskRoleArn": app_role.arn(),
                    "Volumes": [{
                        "EFSVolumeConfiguration": {"FilesystemId": file_system.id()},
                        "Name": volume_name,
                    }],
                }),
            ),
        )?;

        let public_subnet_ids: Vec<Value> =
            props.public_subnets.iter().map(SubnetRef::id).collect();

        let lb_id = format!("{}lbApp", id);
        let load_balancer = LoadBalancerRef::new(stack.add_resource(
            scope,
            &lb_id,
            Resource::new(
                LoadBalancerRef::RESOURCE_TYPE,
                json!({
                    "LoadBalancerAttributes": [
                        {"Key": "deletion_protection.enabled", "Value": "false"}
                    ],
                    "Scheme": "internet-facing",
                    "SecurityGroups": [security_group.id()],
                    "Subnets": public_subnet_ids,
                    "Type": "application",
                }),
            ),
        )?);

        let target_group = TargetGroupRef::new(stack.add_resource(
            scope,
            &format!("{}tgApp", id),
            Resource::new(
                TargetGroupRef::RESOURCE_TYPE,
                json!({
                    "HealthCheckEnabled": true,
                    "HealthCheckIntervalSeconds": 30,
                    "HealthCheckPath": config.health_check_path,
                    "HealthCheckPort": port.to_string(),
                    "HealthCheckProtocol": "HTTP",
                    "HealthCheckTimeoutSeconds": 5,
                    "Port": port,
                    "Protocol": "HTTP",
                    "TargetGroupAttributes": [
                        {"Key": "stickiness.enabled", "Value": "true"},
                        {"Key": "stickiness.type", "Value": "lb_cookie"},
                        {
                            "Key": "stickiness.lb_cookie.duration_seconds",
                            "Value": STICKINESS_SECONDS.to_string(),
                        },
                    ],
                    "TargetType": "ip",
                    "UnhealthyThresholdCount": 5,
                    "VpcId": props.vpc.id(),
                }),
            ),
        )?);

        let listener_id = format!("{}listenerApp", id);
        let listener_scope = scope.child(&lb_id);
        let listener = stack.add_resource(
            &listener_scope,
            &listener_id,
            Resource::new(
                "AWS::ElasticLoadBalancingV2::Listener",
                json!({
                    "DefaultActions": [{
                        "FixedResponseConfig": {"StatusCode": "403"},
                        "Type": "fixed-response",
                    }],
                    "LoadBalancerArn": load_balancer.arn(),
                    "Port": port,
                    "Protocol": "HTTP",
                }),
            ),
        )?;

        let header_secret = SecretRef::new(stack.add_resource(
            scope,
            "CloudfrontCustomHeaderValue",
            Resource::new(
                SecretRef::RESOURCE_TYPE,
                json!({
                    "GenerateSecretString": {"ExcludePunctuation": true, "PasswordLength": 64},
                }),
            )
            .removal_policy(DeletionPolicy::Delete),
        )?);
        // Resolved by CloudFormation at deploy time; the value never appears in the template
        let header_value = join(
            "",
            [
                json!("{{resolve:secretsmanager:"),
                header_secret.arn(),
                json!(":SecretString:::}}"),
            ],
        );

        let rule = stack.add_resource(
            &listener_scope.child(&listener_id),
            "VerifyCustomHeaderRule",
            Resource::new(
                "AWS::ElasticLoadBalancingV2::ListenerRule",
                json!({
                    "Actions": [{"TargetGroupArn": target_group.arn(), "Type": "forward"}],
                    "Conditions": [{
                        "Field": "http-header",
                        "HttpHeaderConfig": {
                            "HttpHeaderName": CLOUDFRONT_CUSTOM_HEADER,
                            "Values": [header_value],
                        },
                    }],
                    "ListenerArn": intrinsic::ref_(&listener),
                    "Priority": 1,
                }),
            ),
        )?;

        let service = stack.add_resource(
            scope,
            &format!("{}AppService", id),
            Resource::new(
                "AWS::ECS::Service",
                json!({
                    "Cluster": cluster.name(),
                    "DeploymentConfiguration": {
                        "MaximumPercent": 200,
                        "MinimumHealthyPercent": 50,
                    },
                    "DesiredCount": config.desired_count,
                    "HealthCheckGracePeriodSeconds": 60,
                    "LaunchType": "FARGATE",
                    "LoadBalancers": [{
                        "ContainerName": container_name,
                        "ContainerPort": port,
                        "TargetGroupArn": target_group.arn(),
                    }],
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": "ENABLED",
                            "SecurityGroups": [security_group.id()],
                            "Subnets": public_subnet_ids,
                        }
                    },
                    "TaskDefinition": intrinsic::ref_(&task_definition),
                }),
            )
            .depends_on(rule)
            .depends_on(listener),
        )?;
        stack.depend_on_role_policy(&service, app_role);

        let distribution =
            declare_distribution(stack, scope, &id, &load_balancer, port, header_value)?;

        let parameter_id = stack.add_resource(
            scope,
            &format!("{}SsmParameter", id),
            Resource::new(
                StringParameterRef::RESOURCE_TYPE,
                json!({
                    "Name": config.cloudfront_endpoint_parameter,
                    "Type": "String",
                    "Value": distribution_endpoint(&distribution),
                }),
            )
            .depends_on(distribution.logical_id()),
        )?;
        let cloudfront_endpoint_parameter =
            StringParameterRef::new(parameter_id, config.cloudfront_endpoint_parameter.clone());
        cloudfront_endpoint_parameter.grant_read(stack, app_role)?;

        stack.add_output(
            &format!("{}appDnsName", id),
            Output::new(load_balancer.dns_name()),
        )?;
        stack.add_output(
            &format!("{}appDistributionName", id),
            Output::new(distribution.domain_name()),
        )?;
        stack.add_output(
            &format!("{}appDistributionEndpoint", id),
            Output::new(distribution_endpoint(&distribution)),
        )?;

        info!(
            task_cpu = config.task_cpu,
            task_memory_mib = config.task_memory_mib,
            port,
            "Declared app resources"
        );
        Ok(Self {
            cluster,
            file_system,
            topic,
            security_group,
            log_group,
            task_definition,
            service,
            load_balancer,
            target_group,
            header_secret,
            distribution,
            cloudfront_endpoint_parameter,
            environment,
        })
    }
}

fn tcp_ingress(source_key: &str, source: Value, port: u16, description: Option<&str>) -> Value {
    let mut rule = json!({
        "FromPort": port,
        "IpProtocol": "tcp",
        "ToPort": port,
    });
    rule[source_key] = source;
    if let Some(description) = description {
        rule["Description"] = json!(description);
    }
    rule
}

/// Encrypted EFS file system with a mount target in every private subnet
fn declare_file_system(
    stack: &mut Stack,
    scope: &Scope,
    id: &str,
    props: &AppProps<'_>,
    app_security_group: &SecurityGroupRef,
) -> Result<FileSystemRef, SynthesisError> {
    let fs_id = format!("{}AppFileSystem", id);
    let file_system = FileSystemRef::new(stack.add_resource(
        scope,
        &fs_id,
        Resource::new(
            FileSystemRef::RESOURCE_TYPE,
            json!({
                "Encrypted": true,
                "FileSystemTags": [{"Key": "Name", "Value": fs_id}],
                "LifecyclePolicies": [
                    {"TransitionToIA": "AFTER_30_DAYS"},
                    {"TransitionToPrimaryStorageClass": "AFTER_1_ACCESS"},
                ],
                "PerformanceMode": "generalPurpose",
            }),
        )
        .removal_policy(DeletionPolicy::Retain),
    )?);

    let fs_scope = scope.child(&fs_id);
    let efs_security_group = SecurityGroupRef::new(stack.add_resource(
        &fs_scope,
        "EfsSecurityGroup",
        Resource::new(
            SecurityGroupRef::RESOURCE_TYPE,
            json!({
                "GroupDescription": fs_scope.child("EfsSecurityGroup").path(),
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }],
                "SecurityGroupIngress": [
                    tcp_ingress(
                        "SourceSecurityGroupId",
                        app_security_group.id(),
                        NFS_PORT,
                        Some("from app tasks on the NFS port"),
                    ),
                ],
                "VpcId": props.vpc.id(),
            }),
        ),
    )?);

    for (index, subnet) in props.private_subnets.iter().enumerate() {
        stack.add_resource(
            &fs_scope,
            &format!("EfsMountTarget{}", index + 1),
            Resource::new(
                "AWS::EFS::MountTarget",
                json!({
                    "FileSystemId": file_system.id(),
                    "SecurityGroups": [efs_security_group.id(), app_security_group.id()],
                    "SubnetId": subnet.id(),
                }),
            ),
        )?;
    }

    Ok(file_system)
}

fn declare_distribution(
    stack: &mut Stack,
    scope: &Scope,
    id: &str,
    load_balancer: &LoadBalancerRef,
    port: u16,
    header_value: Value,
) -> Result<DistributionRef, SynthesisError> {
    let pass_through_name = format!("{}-{}-pass-through", stack.name(), id);
    let pass_through = stack.add_resource(
        scope,
        "OriginRequestPolicy",
        Resource::new(
            "AWS::CloudFront::OriginRequestPolicy",
            json!({
                "OriginRequestPolicyConfig": {
                    "CookiesConfig": {"CookieBehavior": "none"},
                    "HeadersConfig": {"HeaderBehavior": "allViewer"},
                    "Name": pass_through_name,
                    "QueryStringsConfig": {"QueryStringBehavior": "all"},
                }
            }),
        ),
    )?;

    let websocket_name = format!("{}webSocketPolicy", id);
    let websocket = stack.add_resource(
        scope,
        &websocket_name,
        Resource::new(
            "AWS::CloudFront::OriginRequestPolicy",
            json!({
                "OriginRequestPolicyConfig": {
                    "Comment": "A default WebSocket policy",
                    "CookiesConfig": {"CookieBehavior": "none"},
                    "HeadersConfig": {
                        "HeaderBehavior": "whitelist",
                        "Headers": WEBSOCKET_HEADERS,
                    },
                    "Name": websocket_name,
                    "QueryStringsConfig": {"QueryStringBehavior": "none"},
                }
            }),
        ),
    )?;

    let logical_id = stack.add_resource(
        scope,
        &format!("{}appDistribution", id),
        Resource::new(
            DistributionRef::RESOURCE_TYPE,
            json!({
                "DistributionConfig": {
                    "CacheBehaviors": [{
                        "AllowedMethods": ALL_METHODS,
                        "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
                        "CachedMethods": ["GET", "HEAD"],
                        "Compress": true,
                        "OriginRequestPolicyId": intrinsic::ref_(&pass_through),
                        "PathPattern": "/*",
                        "TargetOriginId": ORIGIN_ID,
                        "ViewerProtocolPolicy": "allow-all",
                    }],
                    "DefaultCacheBehavior": {
                        "AllowedMethods": ALL_METHODS,
                        "CachePolicyId": CACHING_DISABLED_POLICY_ID,
                        "CachedMethods": ["GET", "HEAD"],
                        "Compress": true,
                        "OriginRequestPolicyId": intrinsic::ref_(&websocket),
                        "TargetOriginId": ORIGIN_ID,
                        "ViewerProtocolPolicy": "redirect-to-https",
                    },
                    "Enabled": true,
                    "HttpVersion": "http2",
                    "IPV6Enabled": true,
                    "Origins": [{
                        "CustomOriginConfig": {
                            "HTTPPort": port,
                            "OriginProtocolPolicy": "http-only",
                            "OriginSSLProtocols": ["TLSv1.2"],
                        },
                        "DomainName": load_balancer.dns_name(),
                        "Id": ORIGIN_ID,
                        "OriginCustomHeaders": [{
                            "HeaderName": CLOUDFRONT_CUSTOM_HEADER,
                            "HeaderValue": header_value,
                        }],
                    }],
                }
            }),
        )
        .depends_on(load_balancer.logical_id()),
    )?;
    Ok(DistributionRef::new(logical_id))
}

fn distribution_endpoint(distribution: &DistributionRef) -> Value {
    join(
        "",
        [json!("https://"), distribution.domain_name(), json!("/")],
    )
}

fn app_wildcard_statement() -> PolicyStatement {
    PolicyStatement::allow()
        .actions([
            "bedrock:*",
            "ecs:CreateCluster",
            "ecs:DeregisterContainerInstance",
            "ecs:DiscoverPollEndpoint",
            "ecs:Poll",
            "ecs:RegisterContainerInstance",
            "ecs:StartTelemetrySession",
            "ecs:Submit*",
            "ssm:*",
            "ecr:GetAuthorizationToken",
            "ecr:BatchCheckLayerAvailability",
            "ecr:GetDownloadUrlForLayer",
            "ecr:BatchGetImage",
            "logs:CreateLogStream",
            "logs:PutLogEvents",
            "ec2:AuthorizeSecurityGroupIngress",
            "ec2:Describe*",
            "cognito-identity:*",
            "cognito-idp:*",
            "rekognition:DetectLabels",
            "sagemaker:*",
            "elasticloadbalancing:DeregisterInstancesFromLoadBalancer",
            "elasticloadbalancing:DeregisterTargets",
            "elasticloadbalancing:Describe*",
            "elasticloadbalancing:RegisterInstancesWithLoadBalancer",
            "elasticloadbalancing:RegisterTargets",
            "aoss:*",
            "geo:*",
        ])
        .resource("*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::environment::tests::Handles;
    use crate::iam::{Principal, Role};
    use crate::stack::tests::test_stack;
    use fraud_infra_template::Template;

    fn app() -> (Template, AppConstruct, RoleRef, RoleRef) {
        let mut stack = test_stack();
        let root = Scope::root();
        let declare = |stack: &mut Stack, id: &str, resource_type: &str| {
            stack
                .add_resource(&root, id, Resource::new(resource_type, json!({})))
                .unwrap()
        };
        let vpc = VpcRef::new(declare(&mut stack, "Vpc", "AWS::EC2::VPC"));
        let public = vec![
            SubnetRef::new(declare(&mut stack, "Public1", "AWS::EC2::Subnet")),
            SubnetRef::new(declare(&mut stack, "Public2", "AWS::EC2::Subnet")),
        ];
        let private = vec![
            SubnetRef::new(declare(&mut stack, "Private1", "AWS::EC2::Subnet")),
            SubnetRef::new(declare(&mut stack, "Private2", "AWS::EC2::Subnet")),
        ];
        let storage = BucketRef::new(declare(&mut stack, "Storage", "AWS::S3::Bucket"));
        let logs = BucketRef::new(declare(&mut stack, "Logs", "AWS::S3::Bucket"));
        let secret = SecretRef::new(declare(&mut stack, "Secret", "AWS::SecretsManager::Secret"));
        let table = TableRef::new(declare(&mut stack, "Table", "AWS::DynamoDB::Table"));
        let api = RestApiRef::new(declare(&mut stack, "Api", "AWS::ApiGateway::RestApi"));
        let ecs_role = Role::new(Principal::service("ecs-tasks.amazonaws.com"))
            .declare(&mut stack, &root, "EcsRole")
            .unwrap();
        let app_role = Role::new(Principal::service("ecs-tasks.amazonaws.com"))
            .declare(&mut stack, &root, "AppRole")
            .unwrap();

        let handles = Handles::new();
        let runtime = handles.runtime();
        let api_url = json!("https://api.example.com/prod/");
        let config = AppConfig {
            image_uri: "123456789012.dkr.ecr.us-east-1.amazonaws.com/app:latest".to_string(),
            cloudfront_prefix_list_id: Some("pl-3b927c52".to_string()),
            ..AppConfig::default()
        };
        let app = AppConstruct::new(
            &mut stack,
            &root.child("appEcs"),
            AppProps {
                config: &config,
                vpc: &vpc,
                public_subnets: &public,
                private_subnets: &private,
                ecs_role: &ecs_role,
                ecs_app_role: &app_role,
                storage_bucket: &storage,
                logs_bucket: &logs,
                serp_api_key_secret: &secret,
                indexed_files_table: &table,
                api: &api,
                api_url: &api_url,
                runtime: &runtime,
            },
        )
        .unwrap();
        (stack.finalize().unwrap(), app, ecs_role, app_role)
    }

    fn default_policy_statements(template: &Template, role: &RoleRef) -> Vec<Value> {
        let policy = template.resource(&Stack::default_policy_id(role)).unwrap();
        let document = &policy.properties["PolicyDocument"];
        document["Statement"].as_array().unwrap().clone()
    }

    #[test]
    fn test_task_definition_shape() {
        let (template, app, _, _) = app();
        let task = template.resource(&app.task_definition).unwrap();
        assert_eq!(task.properties["Cpu"], "8192");
        assert_eq!(task.properties["Memory"], "32768");
        assert_eq!(
            task.properties["RuntimePlatform"]["CpuArchitecture"],
            "ARM64"
        );

        let container = &task.properties["ContainerDefinitions"][0];
        assert_eq!(container["Memory"], 24576);
        assert_eq!(container["PortMappings"][0]["ContainerPort"], 8501);
        assert_eq!(container["MountPoints"][0]["ContainerPath"], "/mnt/efs");
        assert_eq!(
            container["LogConfiguration"]["Options"]["awslogs-stream-prefix"],
            "FraudDetectionApp"
        );
        let names: Vec<&str> = container["Environment"]
            .as_array()
            .unwrap()
            .iter()
            .map(|var| var["Name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"API_ENDPOINT"));
        assert!(names.contains(&"CLOUDFRONT_DIST_SSM_PARAMETER_NAME"));
    }

    #[test]
    fn test_listener_rejects_requests_without_header() {
        let (template, app, _, _) = app();
        let (_, listener) = template
            .resources_of_type("AWS::ElasticLoadBalancingV2::Listener")
            .next()
            .unwrap();
        assert_eq!(
            listener.properties["DefaultActions"][0]["Type"],
            "fixed-response"
        );
        assert_eq!(
            listener.properties["DefaultActions"][0]["FixedResponseConfig"]["StatusCode"],
            "403"
        );

        let (_, rule) = template
            .resources_of_type("AWS::ElasticLoadBalancingV2::ListenerRule")
            .next()
            .unwrap();
        assert_eq!(rule.properties["Priority"], 1);
        let condition = &rule.properties["Conditions"][0]["HttpHeaderConfig"];
        assert_eq!(condition["HttpHeaderName"], CLOUDFRONT_CUSTOM_HEADER);
        let parts = condition["Values"][0]["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts[1], app.header_secret.arn());
    }

    #[test]
    fn test_target_group_health_check_and_stickiness() {
        let (template, app, _, _) = app();
        let group = template.resource(app.target_group.logical_id()).unwrap();
        assert_eq!(group.properties["HealthCheckPath"], "/_stcore/health");
        assert_eq!(group.properties["TargetType"], "ip");
        assert_eq!(
            group.properties["TargetGroupAttributes"][2]["Value"],
            "86400"
        );
    }

    #[test]
    fn test_distribution_behaviors() {
        let (template, app, _, _) = app();
        let distribution = template.resource(app.distribution.logical_id()).unwrap();
        let config = &distribution.properties["DistributionConfig"];
        assert_eq!(
            config["DefaultCacheBehavior"]["CachePolicyId"],
            CACHING_DISABLED_POLICY_ID
        );
        assert_eq!(
            config["DefaultCacheBehavior"]["ViewerProtocolPolicy"],
            "redirect-to-https"
        );
        assert_eq!(config["CacheBehaviors"][0]["PathPattern"], "/*");
        assert_eq!(
            config["CacheBehaviors"][0]["CachePolicyId"],
            CACHING_OPTIMIZED_POLICY_ID
        );
        assert_eq!(
            config["Origins"][0]["OriginCustomHeaders"][0]["HeaderName"],
            CLOUDFRONT_CUSTOM_HEADER
        );
        assert_eq!(
            distribution.depends_on,
            vec![app.load_balancer.logical_id().to_string()]
        );

        let parameter = template
            .resource(app.cloudfront_endpoint_parameter.logical_id())
            .unwrap();
        assert_eq!(
            parameter.properties["Name"],
            "/fraud-detection/cloudfront-endpoint"
        );
        assert_eq!(
            parameter.depends_on,
            vec![app.distribution.logical_id().to_string()]
        );
    }

    #[test]
    fn test_file_system_mounted_in_private_subnets() {
        let (template, app, _, _) = app();
        let file_system = template.resource(app.file_system.logical_id()).unwrap();
        assert_eq!(file_system.deletion_policy, Some(DeletionPolicy::Retain));
        assert_eq!(file_system.properties["Encrypted"], true);
        assert_eq!(
            template.resources_of_type("AWS::EFS::MountTarget").count(),
            2
        );
    }

    #[test]
    fn test_security_group_ingress() {
        let (template, app, _, _) = app();
        let group = template.resource(app.security_group.logical_id()).unwrap();
        let ingress = group.properties["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(ingress.len(), 3);
        assert_eq!(ingress[1]["FromPort"], 2049);
        assert_eq!(
            ingress[2]["SourcePrefixListId"],
            json!({"Ref": CLOUDFRONT_PREFIX_LIST_PARAMETER})
        );
        assert_eq!(
            template.parameters[CLOUDFRONT_PREFIX_LIST_PARAMETER].default.as_deref(),
            Some("pl-3b927c52")
        );
    }

    #[test]
    fn test_app_role_grants() {
        let (template, app, _, app_role) = app();
        let statements = default_policy_statements(&template, &app_role);
        let resources: Vec<&Value> = statements.iter().map(|s| &s["Resource"]).collect();
        assert!(resources.contains(&&app.topic.arn()));
        assert!(resources.contains(&&app.cloudfront_endpoint_parameter.arn()));
        assert!(resources.contains(&&app.file_system.arn()));

        let service = template.resource(&app.service).unwrap();
        assert!(service
            .depends_on
            .contains(&Stack::default_policy_id(&app_role)));
    }

    #[test]
    fn test_execution_role_can_pull_images() {
        let (template, _, ecs_role, _) = app();
        let statements = default_policy_statements(&template, &ecs_role);
        let token = statements
            .iter()
            .find(|s| s["Action"] == "ecr:GetAuthorizationToken")
            .unwrap();
        assert_eq!(token["Resource"], "*");
    }
}
