//! Typed handles on declared resources.
//!
//! A handle is the logical id of a resource plus accessors for the attribute
//! values other components need. Handles are plain values, cloned freely.

use crate::policy;
use crate::stack::{Stack, SynthesisError};
use fraud_infra_template::intrinsic::{self, get_att, join, ref_};
use serde_json::{json, Value};

macro_rules! handle {
    (
        $(#[$meta:meta])*
        $name:ident => $resource_type:literal
        $(, ref $ref_method:ident)*
        $(, att $att_method:ident = $attribute:literal)*
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            logical_id: String,
        }

        impl $name {
            pub const RESOURCE_TYPE: &'static str = $resource_type;

            pub fn new(logical_id: impl Into<String>) -> Self {
                Self {
                    logical_id: logical_id.into(),
                }
            }

            pub fn logical_id(&self) -> &str {
                &self.logical_id
            }

            /// `{"Ref": <logical id>}`
            pub fn reference(&self) -> Value {
                ref_(&self.logical_id)
            }

            $(
                pub fn $ref_method(&self) -> Value {
                    ref_(&self.logical_id)
                }
            )*

            $(
                pub fn $att_method(&self) -> Value {
                    get_att(&self.logical_id, $attribute)
                }
            )*
        }
    };
}

handle!(VpcRef => "AWS::EC2::VPC", ref id, att cidr_block = "CidrBlock");
handle!(SubnetRef => "AWS::EC2::Subnet", ref id);
handle!(SecurityGroupRef => "AWS::EC2::SecurityGroup", att id = "GroupId");
handle!(LogGroupRef => "AWS::Logs::LogGroup", ref name, att arn = "Arn");
handle!(RoleRef => "AWS::IAM::Role", ref name, att arn = "Arn");
handle!(
    BucketRef => "AWS::S3::Bucket",
    ref name,
    att arn = "Arn",
    att regional_domain_name = "RegionalDomainName"
);
handle!(TableRef => "AWS::DynamoDB::Table", ref name, att arn = "Arn");
handle!(
    /// `Ref` on a secret yields its ARN
    SecretRef => "AWS::SecretsManager::Secret", ref arn
);
handle!(TopicRef => "AWS::SNS::Topic", ref arn, att name = "TopicName");
handle!(
    UserPoolRef => "AWS::Cognito::UserPool",
    ref id,
    att arn = "Arn",
    att provider_name = "ProviderName"
);
handle!(
    UserPoolClientRef => "AWS::Cognito::UserPoolClient",
    ref id,
    att secret = "ClientSecret"
);
handle!(UserPoolDomainRef => "AWS::Cognito::UserPoolDomain", ref name);
handle!(IdentityPoolRef => "AWS::Cognito::IdentityPool", ref id);
handle!(
    CollectionRef => "AWS::OpenSearchServerless::Collection",
    ref id,
    att arn = "Arn",
    att endpoint = "CollectionEndpoint",
    att dashboard_endpoint = "DashboardEndpoint"
);
handle!(PlaceIndexRef => "AWS::Location::PlaceIndex", ref name, att arn = "Arn");
handle!(FunctionRef => "AWS::Lambda::Function", ref name, att arn = "Arn");
handle!(
    RestApiRef => "AWS::ApiGateway::RestApi",
    ref id,
    att root_resource_id = "RootResourceId"
);
handle!(ClusterRef => "AWS::ECS::Cluster", ref name, att arn = "Arn");
handle!(FileSystemRef => "AWS::EFS::FileSystem", ref id, att arn = "Arn");
handle!(
    LoadBalancerRef => "AWS::ElasticLoadBalancingV2::LoadBalancer",
    ref arn,
    att dns_name = "DNSName"
);
handle!(TargetGroupRef => "AWS::ElasticLoadBalancingV2::TargetGroup", ref arn);
handle!(
    DistributionRef => "AWS::CloudFront::Distribution",
    ref id,
    att domain_name = "DomainName"
);

/// SSM string parameter; its name is fixed, so the ARN is built from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringParameterRef {
    logical_id: String,
    parameter_name: String,
}

impl StringParameterRef {
    pub const RESOURCE_TYPE: &'static str = "AWS::SSM::Parameter";

    pub fn new(logical_id: impl Into<String>, parameter_name: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            parameter_name: parameter_name.into(),
        }
    }

    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// The literal parameter name, e.g. `/fraud-detection/cloudfront-endpoint`
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    pub fn name(&self) -> Value {
        ref_(&self.logical_id)
    }

    pub fn arn(&self) -> Value {
        join(
            "",
            [
                json!("arn:"),
                intrinsic::partition(),
                json!(":ssm:"),
                intrinsic::region(),
                json!(":"),
                intrinsic::account_id(),
                json!(format!(
                    ":parameter/{}",
                    self.parameter_name.trim_start_matches('/')
                )),
            ],
        )
    }
}

impl BucketRef {
    /// ARN pattern covering every object key
    pub fn objects_arn(&self) -> Value {
        join("", [self.arn(), json!("/*")])
    }

    pub fn grant_read_write(
        &self,
        stack: &mut Stack,
        role: &RoleRef,
    ) -> Result<(), SynthesisError> {
        let resources = vec![self.arn(), self.objects_arn()];
        stack.grant(role, policy::S3_READ_WRITE, resources)
    }
}

impl TableRef {
    pub fn grant_read_write_data(
        &self,
        stack: &mut Stack,
        role: &RoleRef,
    ) -> Result<(), SynthesisError> {
        stack.grant(role, policy::DYNAMODB_READ_WRITE, vec![self.arn()])
    }
}

impl SecretRef {
    pub fn grant_read(&self, stack: &mut Stack, role: &RoleRef) -> Result<(), SynthesisError> {
        stack.grant(role, policy::SECRET_READ, vec![self.arn()])
    }
}

impl TopicRef {
    pub fn grant_publish(&self, stack: &mut Stack, role: &RoleRef) -> Result<(), SynthesisError> {
        stack.grant(role, policy::SNS_PUBLISH, vec![self.arn()])
    }
}

impl LogGroupRef {
    pub fn grant_write(&self, stack: &mut Stack, role: &RoleRef) -> Result<(), SynthesisError> {
        stack.grant(role, policy::LOGS_WRITE, vec![self.arn()])
    }
}

impl StringParameterRef {
    pub fn grant_read(&self, stack: &mut Stack, role: &RoleRef) -> Result<(), SynthesisError> {
        stack.grant(role, policy::SSM_PARAMETER_READ, vec![self.arn()])
    }
}
