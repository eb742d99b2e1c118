//! The fraud-detection stack: every component, declared in dependency order.

use crate::components::{
    ApiProps, AppConstruct, AppProps, AuthConstruct, AuthProps, DatabaseConstruct,
    FraudDetectionApi, LocationConstruct, NetworkConstruct, ParametersConstruct,
    RuntimeEnvironment, SearchConstruct, SearchProps, StorageConstruct,
};
use crate::config::InfraConfig;
use crate::logging::{SynthesisLogger, TimedOperation};
use crate::stack::{Environment, Scope, Stack, SynthesisError};
use fraud_infra_template::Template;
use std::collections::BTreeMap;
use tracing::info;

/// Scope ids of the components, in declaration order
pub const COMPONENT_IDS: [&str; 9] = [
    "Location",
    "network",
    "storage",
    "database",
    "parameters",
    "auth",
    "search",
    "api",
    "appEcs",
];

pub struct FraudDetectionStack {
    stack: Stack,
    pub location: LocationConstruct,
    pub network: NetworkConstruct,
    pub storage: StorageConstruct,
    pub database: DatabaseConstruct,
    pub parameters: ParametersConstruct,
    pub auth: AuthConstruct,
    pub search: SearchConstruct,
    pub api: FraudDetectionApi,
    pub app: AppConstruct,
}

/// Account and region the stack targets
pub fn stack_environment(config: &InfraConfig) -> Environment {
    Environment {
        account: config.deployment.account.clone(),
        region: config.deployment.region.clone(),
    }
}

/// Stack tags: configured tags plus `stage`, configured values win
pub fn stack_tags(config: &InfraConfig) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::from([("stage".to_string(), config.deployment.stage.clone())]);
    if let Some(configured) = &config.tags {
        tags.extend(configured.clone());
    }
    tags
}

/// Runs each component declaration, timed when a logger is attached
struct Steps<'l> {
    logger: Option<&'l mut SynthesisLogger>,
}

impl Steps<'_> {
    fn run<R>(
        &mut self,
        component: &str,
        declare: impl FnOnce() -> Result<R, SynthesisError>,
    ) -> Result<R, SynthesisError> {
        match self.logger.as_deref_mut() {
            Some(logger) => logger.timed("declare", component, declare),
            None => declare(),
        }
    }
}

impl FraudDetectionStack {
    pub fn assemble(config: &InfraConfig) -> Result<Self, SynthesisError> {
        Self::build(config, Steps { logger: None })
    }

    /// Assemble while recording per-component timing in `logger`
    pub fn assemble_logged(
        config: &InfraConfig,
        logger: &mut SynthesisLogger,
    ) -> Result<Self, SynthesisError> {
        Self::build(
            config,
            Steps {
                logger: Some(logger),
            },
        )
    }

    fn build(config: &InfraConfig, mut steps: Steps<'_>) -> Result<Self, SynthesisError> {
        let mut stack = Stack::new(
            config.stack_name.clone(),
            stack_environment(config),
            config.description.clone(),
        );
        stack.set_tags(stack_tags(config));
        let root = Scope::root();
        let [
            location_id,
            network_id,
            storage_id,
            database_id,
            parameters_id,
            auth_id,
            search_id,
            api_id,
            app_id,
        ] = COMPONENT_IDS;

        let location = steps.run(location_id, || {
            LocationConstruct::new(&mut stack, &root.child(location_id), &config.location)
        })?;

        let network = steps.run(network_id, || {
            NetworkConstruct::new(&mut stack, &root.child(network_id), &config.network)
        })?;

        let storage = steps.run(storage_id, || {
            StorageConstruct::new(&mut stack, &root.child(storage_id), &config.storage)
        })?;

        let database = steps.run(database_id, || {
            DatabaseConstruct::new(&mut stack, &root.child(database_id))
        })?;

        let parameters = steps.run(parameters_id, || {
            ParametersConstruct::new(&mut stack, &root.child(parameters_id), &config.parameters)
        })?;

        let domain_prefix = config.domain_prefix();
        let auth = steps.run(auth_id, || {
            AuthConstruct::new(
                &mut stack,
                &root.child(auth_id),
                AuthProps {
                    config: &config.auth,
                    domain_prefix: &domain_prefix,
                    storage_bucket: &storage.storage_bucket,
                },
            )
        })?;

        let search = steps.run(search_id, || {
            SearchConstruct::new(
                &mut stack,
                &root.child(search_id),
                SearchProps {
                    config: &config.search,
                    ecs_role: &auth.ecs_role,
                },
            )
        })?;

        let runtime = RuntimeEnvironment {
            serp_api_key_secret_name: &config.parameters.serp_api_key_secret_name,
            user_pool: &auth.user_pool,
            user_pool_client: &auth.user_pool_client,
            user_pool_domain: &auth.user_pool_domain,
            identity_pool: &auth.identity_pool,
            storage_bucket: &storage.storage_bucket,
            indexed_files_table: &database.indexed_files_table,
            collection: &search.collection,
            temp_collection: &search.temp_collection,
            sagemaker_endpoint_name_parameter: &parameters.sagemaker_endpoint_name_parameter,
            search: &config.search,
        };

        let api = steps.run(api_id, || {
            FraudDetectionApi::new(
                &mut stack,
                &root.child(api_id),
                ApiProps {
                    config: &config.api,
                    vpc: &network.vpc,
                    private_subnets: &network.private_subnets,
                    ecs_app_role: &auth.ecs_app_role,
                    storage_bucket: &storage.storage_bucket,
                    logs_bucket: &storage.logs_bucket,
                    serp_api_key_secret: &parameters.serp_api_key_secret,
                    indexed_files_table: &database.indexed_files_table,
                    runtime: &runtime,
                },
            )
        })?;

        let app = steps.run(app_id, || {
            AppConstruct::new(
                &mut stack,
                &root.child(app_id),
                AppProps {
                    config: &config.app,
                    vpc: &network.vpc,
                    public_subnets: &network.public_subnets,
                    private_subnets: &network.private_subnets,
                    ecs_role: &auth.ecs_role,
                    ecs_app_role: &auth.ecs_app_role,
                    storage_bucket: &storage.storage_bucket,
                    logs_bucket: &storage.logs_bucket,
                    serp_api_key_secret: &parameters.serp_api_key_secret,
                    indexed_files_table: &database.indexed_files_table,
                    api: &api.rest_api,
                    api_url: &api.url,
                    runtime: &runtime,
                },
            )
        })?;

        info!(
            stack = %config.stack_name,
            resources = stack.template().resources.len(),
            "Assembled fraud detection stack"
        );
        Ok(Self {
            stack,
            location,
            network,
            storage,
            database,
            parameters,
            auth,
            search,
            api,
            app,
        })
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Access for declarations added after assembly
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Emit default policies and tags, yielding the final template
    pub fn finalize(self) -> Result<Template, SynthesisError> {
        self.stack.finalize()
    }

    /// Assemble and finalize in one step
    pub fn synthesize(config: &InfraConfig) -> Result<Template, SynthesisError> {
        Self::assemble(config)?.finalize()
    }
}
