use crate::config::SearchConfig;
use crate::handles::{
    BucketRef, CollectionRef, IdentityPoolRef, StringParameterRef, TableRef, UserPoolClientRef,
    UserPoolDomainRef, UserPoolRef,
};
use crate::stack::Environment;
use fraud_infra_template::intrinsic::{self, join};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Directory the Lambda may write model caches into
const LAMBDA_CACHE_DIR: &str = "/tmp";

/// Environment variables, rendered in key order
pub type EnvironmentMap = BTreeMap<String, Value>;

/// Everything the API handler and the web app both need to locate at runtime
pub struct RuntimeEnvironment<'a> {
    pub serp_api_key_secret_name: &'a str,
    pub user_pool: &'a UserPoolRef,
    pub user_pool_client: &'a UserPoolClientRef,
    pub user_pool_domain: &'a UserPoolDomainRef,
    pub identity_pool: &'a IdentityPoolRef,
    pub storage_bucket: &'a BucketRef,
    pub indexed_files_table: &'a TableRef,
    pub collection: &'a CollectionRef,
    pub temp_collection: &'a CollectionRef,
    pub sagemaker_endpoint_name_parameter: &'a StringParameterRef,
    pub search: &'a SearchConfig,
}

impl RuntimeEnvironment<'_> {
    fn common(&self, env: &Environment) -> EnvironmentMap {
        let domain = self.user_pool_domain.name();
        let mut vars = EnvironmentMap::new();
        vars.insert(
            "SERP_API_KEY_SECRET".into(),
            json!(self.serp_api_key_secret_name),
        );
        vars.insert("POOL_ID".into(), self.user_pool.id());
        vars.insert("APP_CLIENT_ID".into(), self.user_pool_client.id());
        vars.insert("APP_CLIENT_SECRET".into(), self.user_pool_client.secret());
        vars.insert("IDENTITY_POOL_ID".into(), self.identity_pool.id());
        vars.insert("AWS_ACCOUNT_ID".into(), env.account_value());
        vars.insert("STORAGE_BUCKET".into(), self.storage_bucket.name());
        vars.insert(
            "INDEXED_FILES_TABLE".into(),
            self.indexed_files_table.name(),
        );
        vars.insert("OPENSEARCH_DOMAIN".into(), self.collection.endpoint());
        vars.insert(
            "TEMP_OPENSEARCH_DOMAIN".into(),
            self.temp_collection.endpoint(),
        );
        vars.insert(
            "SM_ENDPOINT_NAME_SSM_PARAMETER".into(),
            json!(self.sagemaker_endpoint_name_parameter.parameter_name()),
        );
        vars.insert(
            "VECTOR_INDEX_NAME".into(),
            json!(self.search.vector_index_name),
        );
        vars.insert(
            "TEMP_VECTOR_INDEX_NAME".into(),
            json!(self.search.temp_vector_index_name),
        );
        vars.insert(
            "COGNITO_REDIRECT_URL".into(),
            join(
                "",
                [
                    json!("https://"),
                    domain.clone(),
                    json!("/oauth2/idpresponse"),
                ],
            ),
        );
        vars.insert(
            "COGNITO_DOMAIN".into(),
            join(
                "",
                [
                    json!("https://"),
                    domain,
                    json!(format!(".auth.{}.amazoncognito.com", env.region)),
                ],
            ),
        );
        vars
    }

    /// Variables of the API handler function
    pub fn lambda(&self, env: &Environment) -> EnvironmentMap {
        let mut vars = self.common(env);
        vars.insert("ACCOUNT".into(), env.account_value());
        vars.insert("REGION".into(), intrinsic::region());
        for key in ["HF_HOME", "TRANSFORMERS_CACHE", "XDG_CACHE_HOME", "HUGGINGFACE_HUB_CACHE"] {
            vars.insert(key.into(), json!(LAMBDA_CACHE_DIR));
        }
        vars
    }

    /// Variables of the web app container
    pub fn container(
        &self,
        env: &Environment,
        api_endpoint: Value,
        cloudfront_parameter_name: &str,
    ) -> EnvironmentMap {
        let mut vars = self.common(env);
        vars.insert("AWS_DEFAULT_REGION".into(), intrinsic::region());
        vars.insert("API_ENDPOINT".into(), api_endpoint);
        vars.insert(
            "CLOUDFRONT_DIST_SSM_PARAMETER_NAME".into(),
            json!(cloudfront_parameter_name),
        );
        vars
    }
}

/// `{"Variables": {...}}` as a Lambda function expects it
pub fn lambda_variables(vars: &EnvironmentMap) -> Value {
    json!({ "Variables": vars })
}

/// `[{"Name", "Value"}]` as an ECS container definition expects it
pub fn container_variables(vars: &EnvironmentMap) -> Value {
    Value::Array(
        vars.iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect(),
    )
}
