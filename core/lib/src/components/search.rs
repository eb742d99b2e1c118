use crate::config::SearchConfig;
use crate::handles::{CollectionRef, RoleRef};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::intrinsic::sub_with;
use fraud_infra_template::Resource;
use serde_json::{json, Map};
use tracing::info;

const SECURITY_POLICY_TYPE: &str = "AWS::OpenSearchServerless::SecurityPolicy";
const ACCESS_POLICY_TYPE: &str = "AWS::OpenSearchServerless::AccessPolicy";
const COLLECTION_DESCRIPTION: &str =
    "Collection to be used for vector search using OpenSearch Serverless";

pub struct SearchProps<'a> {
    pub config: &'a SearchConfig,
    /// Role granted data access alongside the admin role
    pub ecs_role: &'a RoleRef,
}

/// Vector search collections for image embeddings
pub struct SearchConstruct {
    pub collection: CollectionRef,
    /// Used for ephemeral searches such as internet reverse image lookups
    pub temp_collection: CollectionRef,
}

impl SearchConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        props: SearchProps<'_>,
    ) -> Result<Self, SynthesisError> {
        let collection =
            declare_collection(stack, scope, &props, &props.config.collection_name)?;
        let temp_collection =
            declare_collection(stack, scope, &props, &props.config.temp_collection_name)?;

        info!(
            collection = %props.config.collection_name,
            temp_collection = %props.config.temp_collection_name,
            "Declared search resources"
        );
        Ok(Self {
            collection,
            temp_collection,
        })
    }
}

fn declare_collection(
    stack: &mut Stack,
    scope: &Scope,
    props: &SearchProps<'_>,
    name: &str,
) -> Result<CollectionRef, SynthesisError> {
    let collection_resource = format!("collection/{}", name);

    let network_policy = json!([{
        "Rules": [
            {"Resource": [collection_resource], "ResourceType": "dashboard"},
            {"Resource": [collection_resource], "ResourceType": "collection"},
        ],
        "AllowFromPublic": true,
    }]);
    let network = stack.add_resource(
        scope,
        &format!("{}aossNetworkSecPolicy", name),
        Resource::new(
            SECURITY_POLICY_TYPE,
            json!({
                "Name": format!("{}-sec-policy", name),
                "Policy": network_policy.to_string(),
                "Type": "network",
            }),
        ),
    )?;

    let encryption_policy = json!({
        "Rules": [{"Resource": [collection_resource], "ResourceType": "collection"}],
        "AWSOwnedKey": true,
    });
    let encryption = stack.add_resource(
        scope,
        &format!("{}aossEncryptionSecPolicy", name),
        Resource::new(
            SECURITY_POLICY_TYPE,
            json!({
                "Name": format!("{}-enc-sec-pol", name),
                "Policy": encryption_policy.to_string(),
                "Type": "encryption",
            }),
        ),
    )?;

    let collection = CollectionRef::new(stack.add_resource(
        scope,
        &format!("{}{}Collection", scope.id(), name),
        Resource::new(
            CollectionRef::RESOURCE_TYPE,
            json!({
                "Description": COLLECTION_DESCRIPTION,
                "Name": name,
                "Type": "VECTORSEARCH",
            }),
        )
        .depends_on(network)
        .depends_on(encryption),
    )?);

    // Principals are resolved at deploy time through Fn::Sub
    let access_policy = json!([{
        "Rules": [
            {
                "Resource": [collection_resource],
                "Permission": [
                    "aoss:CreateCollectionItems",
                    "aoss:DeleteCollectionItems",
                    "aoss:UpdateCollectionItems",
                    "aoss:DescribeCollectionItems",
                ],
                "ResourceType": "collection",
            },
            {
                "Resource": [format!("index/{}/*", name)],
                "Permission": [
                    "aoss:CreateIndex",
                    "aoss:DeleteIndex",
                    "aoss:UpdateIndex",
                    "aoss:DescribeIndex",
                    "aoss:ReadDocument",
                    "aoss:WriteDocument",
                ],
                "ResourceType": "index",
            },
        ],
        "Principal": [
            "arn:aws:iam::${AWS::AccountId}:role/${EcsRoleName}",
            format!(
                "arn:aws:iam::${{AWS::AccountId}}:role/{}",
                props.config.admin_role_name
            ),
        ],
        "Description": "data-access-rule",
    }]);
    let mut variables = Map::new();
    variables.insert("EcsRoleName".to_string(), props.ecs_role.name());

    stack.add_resource(
        scope,
        &format!("{}dataAccessPolicy", name),
        Resource::new(
            ACCESS_POLICY_TYPE,
            json!({
                "Description": format!("Data access policy for: {}", name),
                "Name": format!("{}-dap", name),
                "Policy": sub_with(access_policy.to_string(), variables),
                "Type": "data",
            }),
        ),
    )?;

    Ok(collection)
}
