use crate::config::AuthConfig;
use crate::handles::{
    BucketRef, IdentityPoolRef, RoleRef, UserPoolClientRef, UserPoolDomainRef, UserPoolRef,
};
use crate::iam::{InlinePolicy, PolicyStatement, Principal, Role};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::{self, join};
use fraud_infra_template::{DeletionPolicy, Output, Resource};
use serde_json::json;
use tracing::info;

const COGNITO_IDENTITY: &str = "cognito-identity.amazonaws.com";

const VERIFICATION_SUBJECT: &str = "You need to verify your email";
const VERIFICATION_BODY: &str = "Thanks for signing up for the Insurance Claim Image Fraud \
    Detection Solution. Click to verify your account: {##Verify Email##}";

pub struct AuthProps<'a> {
    pub config: &'a AuthConfig,
    /// Lowercase prefix of the hosted UI domain; account and region are appended
    pub domain_prefix: &'a str,
    pub storage_bucket: &'a BucketRef,
}

/// User directory, federated identities and the roles workloads run as
pub struct AuthConstruct {
    pub user_pool: UserPoolRef,
    pub user_pool_client: UserPoolClientRef,
    pub user_pool_domain: UserPoolDomainRef,
    pub identity_pool: IdentityPoolRef,
    pub authenticated_role: RoleRef,
    pub unauthenticated_role: RoleRef,
    pub ground_truth_role: RoleRef,
    /// Execution role of the web app task and principal of the search data policies
    pub ecs_role: RoleRef,
    pub ecs_app_role: RoleRef,
}

impl AuthConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        props: AuthProps<'_>,
    ) -> Result<Self, SynthesisError> {
        let id = scope.id().to_string();
        let config = props.config;

        let user_pool = UserPoolRef::new(stack.add_resource(
            scope,
            &format!("{}userpool", id),
            Resource::new(
                UserPoolRef::RESOURCE_TYPE,
                json!({
                    "AccountRecoverySetting": {
                        "RecoveryMechanisms": [
                            {"Name": "verified_phone_number", "Priority": 1},
                            {"Name": "verified_email", "Priority": 2},
                        ]
                    },
                    "AdminCreateUserConfig": {"AllowAdminCreateUserOnly": true},
                    "AutoVerifiedAttributes": ["email"],
                    "DeletionProtection": "INACTIVE",
                    "Policies": {
                        "PasswordPolicy": {
                            "MinimumLength": config.password_min_length,
                            "RequireLowercase": true,
                            "RequireNumbers": true,
                            "RequireSymbols": true,
                            "RequireUppercase": true,
                            "TemporaryPasswordValidityDays": config.temp_password_validity_days,
                        }
                    },
                    "Schema": [
                        {"AttributeDataType": "String", "Mutable": true, "Name": "uiTheme"},
                        {"AttributeDataType": "String", "Mutable": true, "Name": "uiDensity"},
                    ],
                    "UserPoolAddOns": {"AdvancedSecurityMode": "ENFORCED"},
                    "UsernameAttributes": ["email"],
                    "VerificationMessageTemplate": {
                        "DefaultEmailOption": "CONFIRM_WITH_LINK",
                        "EmailMessageByLink": VERIFICATION_BODY,
                        "EmailSubjectByLink": VERIFICATION_SUBJECT,
                        "SmsMessage": "The verification code to your new account is {####}",
                    },
                }),
            )
            .removal_policy(DeletionPolicy::Delete),
        )?);

        let pool_scope = scope.child(&format!("{}userpool", id));
        let user_pool_domain = UserPoolDomainRef::new(stack.add_resource(
            &pool_scope,
            "userpooldomain",
            Resource::new(
                UserPoolDomainRef::RESOURCE_TYPE,
                json!({
                    "Domain": join(
                        "",
                        [
                            json!(props.domain_prefix.to_lowercase()),
                            stack.env().account_value(),
                            json!("-"),
                            intrinsic::region(),
                        ],
                    ),
                    "UserPoolId": user_pool.id(),
                }),
            ),
        )?);

        let user_pool_client = UserPoolClientRef::new(stack.add_resource(
            &pool_scope,
            &format!("{}userpoolclient", id),
            Resource::new(
                UserPoolClientRef::RESOURCE_TYPE,
                json!({
                    "AllowedOAuthFlows": ["implicit", "code"],
                    "AllowedOAuthFlowsUserPoolClient": true,
                    "AllowedOAuthScopes": [
                        "profile",
                        "phone",
                        "email",
                        "openid",
                        "aws.cognito.signin.user.admin",
                    ],
                    "CallbackURLs": ["https://example.com"],
                    "ExplicitAuthFlows": [
                        "ALLOW_USER_PASSWORD_AUTH",
                        "ALLOW_USER_SRP_AUTH",
                        "ALLOW_REFRESH_TOKEN_AUTH",
                    ],
                    "GenerateSecret": true,
                    "SupportedIdentityProviders": ["COGNITO"],
                    "UserPoolId": user_pool.id(),
                }),
            ),
        )?);

        let identity_pool = IdentityPoolRef::new(stack.add_resource(
            scope,
            "IdentityPool",
            Resource::new(
                IdentityPoolRef::RESOURCE_TYPE,
                json!({
                    "AllowUnauthenticatedIdentities": false,
                    "CognitoIdentityProviders": [{
                        "ClientId": user_pool_client.id(),
                        "ProviderName": user_pool.provider_name(),
                    }],
                }),
            ),
        )?);

        let unauthenticated_role = identity_role(
            stack,
            scope,
            "UnauthenticatedRole",
            &identity_pool,
            "unauthenticated",
        )?;
        let authenticated_role = identity_role(
            stack,
            scope,
            "AuthenticatedRole",
            &identity_pool,
            "authenticated",
        )?;

        stack.add_resource(
            scope,
            "RoleAttachment",
            Resource::new(
                "AWS::Cognito::IdentityPoolRoleAttachment",
                json!({
                    "IdentityPoolId": identity_pool.id(),
                    "Roles": {
                        "authenticated": authenticated_role.arn(),
                        "unauthenticated": unauthenticated_role.arn(),
                    },
                }),
            ),
        )?;

        let ground_truth_role = Role::new(Principal::service("sagemaker.amazonaws.com"))
            .declare(stack, scope, "GroundTruthRole")?;
        InlinePolicy::new("ground-truth-policy")
            .statement(
                PolicyStatement::allow()
                    .actions([
                        "sagemaker:CreateLabelingJob",
                        "sagemaker:DescribeLabelingJob",
                        "sagemaker:ListLabelingJobsForWorkteam",
                        "sagemaker:ListWorkteams",
                        "sagemaker:StopLabelingJob",
                        "sagemaker:CreateWorkteam",
                        "sagemaker:DeleteWorkteam",
                        "sagemaker:UpdateWorkteam",
                        "sagemaker:ListUserProfiles",
                    ])
                    .resource("*"),
            )
            .statement(
                PolicyStatement::allow()
                    .action("lambda:InvokeFunction")
                    .resource(config.ground_truth_pre_annotation_lambda_arn.as_str()),
            )
            .attach(stack, scope, "ground-truth-policy", &[&ground_truth_role])?;
        props.storage_bucket.grant_read_write(stack, &ground_truth_role)?;

        let ecs_role = Role::new(Principal::service("ecs-tasks.amazonaws.com"))
            .declare(stack, scope, &format!("{}EcsExecutionRole", id))?;
        let ecs_policy_name = format!("{}-ecs-policy", id);
        ecs_execution_policy(&id)
            .attach(stack, scope, &ecs_policy_name, &[&ecs_role])?;

        let ecs_app_role = Role::new(Principal::service("ecs-tasks.amazonaws.com"))
            .declare(stack, scope, &format!("{}app-role", id))?;

        props.storage_bucket.grant_read_write(stack, &ecs_role)?;

        stack.add_output("userPoolId", Output::new(user_pool.id()))?;
        stack.add_output("userPoolClientId", Output::new(user_pool_client.id()))?;

        info!(domain_prefix = %props.domain_prefix, "Declared auth resources");
        Ok(Self {
            user_pool,
            user_pool_client,
            user_pool_domain,
            identity_pool,
            authenticated_role,
            unauthenticated_role,
            ground_truth_role,
            ecs_role,
            ecs_app_role,
        })
    }
}

/// Role assumed through the identity pool by users with the given `amr`
fn identity_role(
    stack: &mut Stack,
    scope: &Scope,
    id: &str,
    identity_pool: &IdentityPoolRef,
    amr: &str,
) -> Result<RoleRef, SynthesisError> {
    Role::new(Principal::Federated {
        provider: COGNITO_IDENTITY.to_string(),
        conditions: json!({
            "ForAnyValue:StringLike": {"cognito-identity.amazonaws.com:amr": amr},
            "StringEquals": {"cognito-identity.amazonaws.com:aud": identity_pool.id()},
        }),
    })
    .declare(stack, scope, id)
}

/// Permissions of the task execution role: image pulls, task logs and the
/// ML services the app calls
fn ecs_execution_policy(id: &str) -> InlinePolicy {
    InlinePolicy::new(format!("{}-ecs-policy", id))
        .statement(
            PolicyStatement::allow()
                .actions([
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage",
                    "ecr:BatchCheckLayerAvailability",
                ])
                .resource("*"),
        )
        .statement(
            PolicyStatement::allow()
                .actions([
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                    "logs:CreateLogGroup",
                ])
                .resource("arn:aws:logs:*:*:log-group:/ecs/*"),
        )
        .statement(
            PolicyStatement::allow()
                .actions(["ec2:Describe*", "rekognition:*", "sagemaker:*"])
                .resource("*"),
        )
        .statement(
            PolicyStatement::allow()
                .actions([
                    "ecs:CreateCluster",
                    "ecs:DeregisterContainerInstance",
                    "ecs:DiscoverPollEndpoint",
                    "ecs:Poll",
                    "ecs:RegisterContainerInstance",
                    "ecs:StartTelemetrySession",
                    "ecs:Submit*",
                    "ecs:StartTask",
                    "ecs:StopTask",
                    "ecs:UpdateContainerInstancesState",
                    "ecs:UpdateService",
                    "rekognition:DetectLabels",
                    "sagemaker:*",
                ])
                .resource("*"),
        )
        .statement(
            PolicyStatement::allow()
                .actions([
                    "s3:CreateBucket",
                    "s3:DeleteBucket",
                    "s3:DeleteObject",
                    "s3:GetBucketLocation",
                    "s3:GetObject",
                    "s3:ListBucket",
                    "s3:PutObject",
                ])
                .resource("arn:aws:s3:::codepipeline-*"),
        )
}
