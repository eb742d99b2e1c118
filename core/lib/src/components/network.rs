use crate::cidr::Ipv4Cidr;
use crate::config::NetworkConfig;
use crate::handles::{LogGroupRef, RoleRef, SubnetRef, VpcRef};
use crate::iam::{PolicyStatement, Principal, Role};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::{get_att, get_azs, ref_, select};
use fraud_infra_template::{DeletionPolicy, Resource};
use serde_json::{json, Value};
use tracing::info;

/// VPC with public and private subnets across the configured AZs, and a
/// flow log shipping all traffic records to CloudWatch Logs
pub struct NetworkConstruct {
    pub vpc: VpcRef,
    pub public_subnets: Vec<SubnetRef>,
    pub private_subnets: Vec<SubnetRef>,
    pub flow_log_group: LogGroupRef,
    pub flow_log_role: RoleRef,
}

/// Route table and association ids for one subnet
struct SubnetRouting {
    subnet: SubnetRef,
    route_table: String,
}

impl NetworkConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        config: &NetworkConfig,
    ) -> Result<Self, SynthesisError> {
        let stack_name = stack.name().to_string();

        let flow_log_group = LogGroupRef::new(stack.add_resource(
            scope,
            "VpcLogs",
            Resource::new(
                LogGroupRef::RESOURCE_TYPE,
                json!({"RetentionInDays": config.flow_log_retention_days}),
            )
            .removal_policy(DeletionPolicy::Retain),
        )?);

        let flow_log_role = Role::new(Principal::service("vpc-flow-logs.amazonaws.com"))
            .declare(stack, scope, "VpcFlowLogRole")?;
        flow_log_group.grant_write(stack, &flow_log_role)?;

        let vpc_scope = scope.child(&format!("{}FraudDetectionVpc", stack_name));
        let vpc = VpcRef::new(stack.add_resource(
            &vpc_scope,
            "Resource",
            Resource::new(
                VpcRef::RESOURCE_TYPE,
                json!({
                    "CidrBlock": config.cidr,
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "InstanceTenancy": "default",
                    "Tags": [{"Key": "Name", "Value": format!("{}-fd-vpc", stack_name)}],
                }),
            ),
        )?);

        let igw = stack.add_resource(
            &vpc_scope,
            "IGW",
            Resource::new("AWS::EC2::InternetGateway", json!({})),
        )?;
        let attachment = stack.add_resource(
            &vpc_scope,
            "VPCGW",
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({"InternetGatewayId": ref_(&igw), "VpcId": vpc.id()}),
            ),
        )?;

        let azs = usize::from(config.max_azs);
        let cidr: Ipv4Cidr = config.cidr.parse()?;
        let blocks = cidr.split(azs * 2)?;
        let (public_blocks, private_blocks) = blocks.split_at(azs);

        let mut public = Vec::with_capacity(azs);
        for (index, block) in public_blocks.iter().enumerate() {
            let routing = declare_subnet(stack, &vpc_scope, &vpc, "Public", index, block)?;
            let route = stack.add_resource(
                &vpc_scope.child(&format!("PublicSubnet{}", index + 1)),
                "DefaultRoute",
                Resource::new(
                    "AWS::EC2::Route",
                    json!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": ref_(&igw),
                        "RouteTableId": ref_(&routing.route_table),
                    }),
                )
                .depends_on(attachment.clone()),
            )?;
            public.push((routing, route));
        }

        let nat_count = usize::from(config.nat_gateways).min(azs);
        let mut nat_gateways = Vec::with_capacity(nat_count);
        for (index, (routing, route)) in public.iter().take(nat_count).enumerate() {
            let subnet_scope = vpc_scope.child(&format!("PublicSubnet{}", index + 1));
            let eip = stack.add_resource(
                &subnet_scope,
                "EIP",
                Resource::new(
                    "AWS::EC2::EIP",
                    json!({"Domain": "vpc", "Tags": [name_tag(&subnet_scope)]}),
                ),
            )?;
            let nat = stack.add_resource(
                &subnet_scope,
                "NATGateway",
                Resource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "AllocationId": get_att(&eip, "AllocationId"),
                        "SubnetId": routing.subnet.id(),
                        "Tags": [name_tag(&subnet_scope)],
                    }),
                )
                .depends_on(route.clone()),
            )?;
            nat_gateways.push(nat);
        }

        let mut private_subnets = Vec::with_capacity(azs);
        for (index, block) in private_blocks.iter().enumerate() {
            let routing = declare_subnet(stack, &vpc_scope, &vpc, "Private", index, block)?;
            let Some(nat) = nat_gateways.get(index % nat_gateways.len().max(1)) else {
                private_subnets.push(routing.subnet);
                continue;
            };
            stack.add_resource(
                &vpc_scope.child(&format!("PrivateSubnet{}", index + 1)),
                "DefaultRoute",
                Resource::new(
                    "AWS::EC2::Route",
                    json!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": ref_(nat),
                        "RouteTableId": ref_(&routing.route_table),
                    }),
                ),
            )?;
            private_subnets.push(routing.subnet);
        }

        stack.add_to_role_policy(
            &flow_log_role,
            PolicyStatement::allow()
                .actions([
                    "logs:CreateLogStream",
                    "logs:PutLogEvents",
                    "logs:DescribeLogStreams",
                ])
                .resource(flow_log_group.arn()),
        )?;
        stack.add_to_role_policy(
            &flow_log_role,
            PolicyStatement::allow()
                .action("iam:PassRole")
                .resource(flow_log_role.arn()),
        )?;

        stack.add_resource(
            scope,
            "FlowLog",
            Resource::new(
                "AWS::EC2::FlowLog",
                json!({
                    "DeliverLogsPermissionArn": flow_log_role.arn(),
                    "LogDestinationType": "cloud-watch-logs",
                    "LogGroupName": flow_log_group.name(),
                    "ResourceId": vpc.id(),
                    "ResourceType": "VPC",
                    "TrafficType": "ALL",
                }),
            ),
        )?;

        info!(
            cidr = %config.cidr,
            azs,
            nat_gateways = nat_count,
            "Declared network resources"
        );

        Ok(Self {
            vpc,
            public_subnets: public
                .into_iter()
                .map(|(routing, _)| routing.subnet)
                .collect(),
            private_subnets,
            flow_log_group,
            flow_log_role,
        })
    }
}

fn name_tag(scope: &Scope) -> Value {
    json!({"Key": "Name", "Value": scope.path()})
}

fn declare_subnet(
    stack: &mut Stack,
    vpc_scope: &Scope,
    vpc: &VpcRef,
    kind: &str,
    index: usize,
    block: &Ipv4Cidr,
) -> Result<SubnetRouting, SynthesisError> {
    let subnet_scope = vpc_scope.child(&format!("{}Subnet{}", kind, index + 1));
    let subnet = SubnetRef::new(stack.add_resource(
        &subnet_scope,
        "Subnet",
        Resource::new(
            SubnetRef::RESOURCE_TYPE,
            json!({
                "AvailabilityZone": select(index, get_azs()),
                "CidrBlock": block.to_string(),
                "MapPublicIpOnLaunch": kind == "Public",
                "Tags": [
                    {"Key": "aws-cdk:subnet-name", "Value": kind},
                    {"Key": "aws-cdk:subnet-type", "Value": kind},
                    name_tag(&subnet_scope),
                ],
                "VpcId": vpc.id(),
            }),
        ),
    )?);

    let route_table = stack.add_resource(
        &subnet_scope,
        "RouteTable",
        Resource::new(
            "AWS::EC2::RouteTable",
            json!({"Tags": [name_tag(&subnet_scope)], "VpcId": vpc.id()}),
        ),
    )?;
    stack.add_resource(
        &subnet_scope,
        "RouteTableAssociation",
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({"RouteTableId": ref_(&route_table), "SubnetId": subnet.id()}),
        ),
    )?;

    Ok(SubnetRouting {
        subnet,
        route_table,
    })
}
