use crate::cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "infra.toml";

/// infra.toml configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfraConfig {
    pub stack_name: String,
    pub description: Option<String>,
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub parameters: ParametersConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub location: LocationConfig,
    /// Tags applied to every taggable resource
    pub tags: Option<BTreeMap<String, String>>,
    /// Environment-specific overrides, deep-merged over the base tables
    pub environments: Option<HashMap<String, toml::Table>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentConfig {
    pub region: String,
    /// Resolved through STS at deploy time when absent
    pub account: Option<String>,
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Bucket for template bodies over the inline size limit
    pub template_bucket: Option<String>,
}

fn default_stage() -> String {
    "prod".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub cidr: String,
    pub max_azs: u8,
    pub nat_gateways: u8,
    pub flow_log_retention_days: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: 1,
            flow_log_retention_days: 731,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub access_logs_prefix: String,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            access_logs_prefix: "storage-bucket-logs".to_string(),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParametersConfig {
    pub serp_api_key_secret_name: String,
    /// Environment variable read at deploy time for the SERP API key
    pub serp_api_key_env: String,
    pub sagemaker_endpoint_parameter: String,
    pub sagemaker_endpoint_name: String,
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            serp_api_key_secret_name: "SERPApiKeySecret".to_string(),
            serp_api_key_env: "SERP_API_KEY".to_string(),
            sagemaker_endpoint_parameter: "/fraud-detection/sagemaker/endpoint/name".to_string(),
            sagemaker_endpoint_name: "fraud-detection-sagemaker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Defaults to `<stage>frauddetection`
    pub domain_prefix: Option<String>,
    pub password_min_length: u8,
    pub temp_password_validity_days: u16,
    pub ground_truth_pre_annotation_lambda_arn: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain_prefix: None,
            password_min_length: 12,
            temp_password_validity_days: 3,
            ground_truth_pre_annotation_lambda_arn:
                "arn:aws:lambda:ap-southeast-2:454466003867:function:PRE-BoundingBox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub collection_name: String,
    /// Collection for ephemeral searches such as reverse image lookups
    pub temp_collection_name: String,
    pub admin_role_name: String,
    pub vector_index_name: String,
    pub temp_vector_index_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            collection_name: "fd-col".to_string(),
            temp_collection_name: "fd-temp-col".to_string(),
            admin_role_name: "Admin".to_string(),
            vector_index_name: "img-vector".to_string(),
            temp_vector_index_name: "img-vector".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Container image for the request handler
    pub image_uri: String,
    pub memory_size: u32,
    pub timeout_seconds: u32,
    pub stage_name: String,
    /// `Access-Control-Allow-Origin` returned by preflight responses
    pub cors_allow_origin: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            image_uri: String::new(),
            memory_size: 10240,
            timeout_seconds: 60,
            stage_name: "prod".to_string(),
            cors_allow_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Container image for the web application
    pub image_uri: String,
    pub task_cpu: u32,
    pub task_memory_mib: u32,
    pub container_cpu: u32,
    pub container_memory_mib: u32,
    pub container_port: u16,
    pub desired_count: u32,
    pub health_check_path: String,
    pub log_stream_prefix: String,
    /// Id of `com.amazonaws.global.cloudfront.origin-facing` in the target region
    pub cloudfront_prefix_list_id: Option<String>,
    pub cloudfront_endpoint_parameter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            image_uri: String::new(),
            task_cpu: 8192,
            task_memory_mib: 32768,
            container_cpu: 8192,
            container_memory_mib: 24576,
            container_port: 8501,
            desired_count: 1,
            health_check_path: "/_stcore/health".to_string(),
            log_stream_prefix: "FraudDetectionApp".to_string(),
            cloudfront_prefix_list_id: None,
            cloudfront_endpoint_parameter: "/fraud-detection/cloudfront-endpoint".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub index_name: String,
    pub data_source: String,
    pub pricing_plan: String,
    pub intended_use: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            index_name: "claims-index".to_string(),
            data_source: "Esri".to_string(),
            pricing_plan: "RequestBasedUsage".to_string(),
            intended_use: "SingleUse".to_string(),
        }
    }
}

/// Fargate task memory (MiB) accepted for each CPU size
fn fargate_memory_options(cpu: u32) -> Option<Vec<u32>> {
    let options = match cpu {
        256 => vec![512, 1024, 2048],
        512 => (1..=4).map(|gb| gb * 1024).collect(),
        1024 => (2..=8).map(|gb| gb * 1024).collect(),
        2048 => (4..=16).map(|gb| gb * 1024).collect(),
        4096 => (8..=30).map(|gb| gb * 1024).collect(),
        8192 => (4..=15).map(|step| step * 4096).collect(),
        16384 => (4..=15).map(|step| step * 8192).collect(),
        _ => return None,
    };
    Some(options)
}

impl InfraConfig {
    /// Load configuration from an infra.toml file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from current directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file(CONFIG_FILE_NAME)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: InfraConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_name.is_empty() {
            return Err(ConfigError::Validation(
                "stack_name cannot be empty".to_string(),
            ));
        }

        if !self
            .stack_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || !self.stack_name.starts_with(|c: char| c.is_ascii_alphabetic())
        {
            return Err(ConfigError::Validation(
                "stack_name must start with a letter and contain only letters, digits and hyphens"
                    .to_string(),
            ));
        }

        if self.deployment.region.is_empty() {
            return Err(ConfigError::Validation(
                "deployment.region cannot be empty".to_string(),
            ));
        }

        if let Some(account) = &self.deployment.account {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::Validation(
                    "deployment.account must be a 12-digit AWS account id".to_string(),
                ));
            }
        }

        if self.deployment.stage.is_empty() {
            return Err(ConfigError::Validation(
                "deployment.stage cannot be empty".to_string(),
            ));
        }

        self.validate_network()?;
        self.validate_api()?;
        self.validate_app()?;

        if self.search.collection_name == self.search.temp_collection_name {
            return Err(ConfigError::Validation(
                "search.collection_name and search.temp_collection_name must differ".to_string(),
            ));
        }

        // Serverless collection names: 3-32 chars, lowercase, digits, hyphens
        for name in [&self.search.collection_name, &self.search.temp_collection_name] {
            if name.len() < 3
                || name.len() > 32
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                return Err(ConfigError::Validation(format!(
                    "search collection name '{}' must be 3-32 lowercase letters, digits or hyphens",
                    name
                )));
            }
        }

        if self.auth.password_min_length < 6 || self.auth.password_min_length > 99 {
            return Err(ConfigError::Validation(
                "auth.password_min_length must be between 6 and 99".to_string(),
            ));
        }

        if self.auth.temp_password_validity_days == 0
            || self.auth.temp_password_validity_days > 365
        {
            return Err(ConfigError::Validation(
                "auth.temp_password_validity_days must be between 1 and 365".to_string(),
            ));
        }

        if self.location.index_name.is_empty() {
            return Err(ConfigError::Validation(
                "location.index_name cannot be empty".to_string(),
            ));
        }

        if let Some(environments) = &self.environments {
            if environments.keys().any(String::is_empty) {
                return Err(ConfigError::Validation(
                    "Environment name cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate_network(&self) -> Result<(), ConfigError> {
        let cidr: Ipv4Cidr = self
            .network
            .cidr
            .parse()
            .map_err(|e| ConfigError::Validation(format!("network.cidr: {}", e)))?;

        if cidr.prefix_len() < 16 || cidr.prefix_len() > 28 {
            return Err(ConfigError::Validation(
                "network.cidr prefix must be between /16 and /28".to_string(),
            ));
        }

        if self.network.max_azs == 0 || self.network.max_azs > 6 {
            return Err(ConfigError::Validation(
                "network.max_azs must be between 1 and 6".to_string(),
            ));
        }

        if self.network.nat_gateways > self.network.max_azs {
            return Err(ConfigError::Validation(
                "network.nat_gateways cannot exceed network.max_azs".to_string(),
            ));
        }

        if self.network.nat_gateways == 0 {
            return Err(ConfigError::Validation(
                "network.nat_gateways must be at least 1 for private subnets with egress"
                    .to_string(),
            ));
        }

        // One public and one private subnet per AZ
        let subnets = usize::from(self.network.max_azs) * 2;
        cidr.split(subnets)
            .map_err(|e| ConfigError::Validation(format!("network.cidr: {}", e)))?;

        Ok(())
    }

    fn validate_api(&self) -> Result<(), ConfigError> {
        if self.api.image_uri.is_empty() {
            return Err(ConfigError::Validation(
                "api.image_uri cannot be empty".to_string(),
            ));
        }

        if self.api.memory_size < 128 || self.api.memory_size > 10240 {
            return Err(ConfigError::Validation(
                "api.memory_size must be between 128 and 10240 MB".to_string(),
            ));
        }

        if self.api.timeout_seconds == 0 || self.api.timeout_seconds > 900 {
            return Err(ConfigError::Validation(
                "api.timeout_seconds must be between 1 and 900 seconds".to_string(),
            ));
        }

        if self.api.stage_name.is_empty() {
            return Err(ConfigError::Validation(
                "api.stage_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_app(&self) -> Result<(), ConfigError> {
        let app = &self.app;

        if app.image_uri.is_empty() {
            return Err(ConfigError::Validation(
                "app.image_uri cannot be empty".to_string(),
            ));
        }

        let Some(memory_options) = fargate_memory_options(app.task_cpu) else {
            return Err(ConfigError::Validation(format!(
                "app.task_cpu {} is not a Fargate CPU size \
                 (256, 512, 1024, 2048, 4096, 8192, 16384)",
                app.task_cpu
            )));
        };

        if !memory_options.contains(&app.task_memory_mib) {
            return Err(ConfigError::Validation(format!(
                "app.task_memory_mib {} is not valid for {} CPU units",
                app.task_memory_mib, app.task_cpu
            )));
        }

        if app.container_cpu > app.task_cpu {
            return Err(ConfigError::Validation(
                "app.container_cpu cannot exceed app.task_cpu".to_string(),
            ));
        }

        if app.container_memory_mib == 0 || app.container_memory_mib > app.task_memory_mib {
            return Err(ConfigError::Validation(
                "app.container_memory_mib must be between 1 and app.task_memory_mib".to_string(),
            ));
        }

        if app.container_port == 0 {
            return Err(ConfigError::Validation(
                "app.container_port must be between 1 and 65535".to_string(),
            ));
        }

        if !app.health_check_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "app.health_check_path must start with '/'".to_string(),
            ));
        }

        Ok(())
    }

    /// Cognito hosted UI domain prefix
    pub fn domain_prefix(&self) -> String {
        self.auth
            .domain_prefix
            .clone()
            .unwrap_or_else(|| format!("{}frauddetection", self.deployment.stage))
            .to_lowercase()
    }

    /// Names of the configured environments, sorted
    pub fn environment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .environments
            .as_ref()
            .map(|envs| envs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Apply environment-specific overrides to the configuration
    pub fn with_environment(&self, environment: &str) -> Result<Self, ConfigError> {
        let overrides = self
            .environments
            .as_ref()
            .and_then(|envs| envs.get(environment))
            .ok_or_else(|| ConfigError::UnknownEnvironment(environment.to_string()))?;

        let mut base = toml::Table::try_from(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        base.remove("environments");

        merge_tables(&mut base, overrides);

        let mut config: InfraConfig = toml::Value::Table(base)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        config.environments = self.environments.clone();

        config.validate()?;
        Ok(config)
    }

    /// Generate a hash of the configuration for change detection
    pub fn generate_config_hash(&self) -> String {
        let mut hasher = Sha256::new();

        let config_json = serde_json::to_string(self).unwrap_or_default();
        hasher.update(config_json.as_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Compare this configuration with another to detect changes
    pub fn detect_changes(&self, other: &InfraConfig) -> ConfigChanges {
        ConfigChanges {
            deployment_changed: self.deployment != other.deployment,
            network_changed: self.network != other.network,
            storage_changed: self.storage != other.storage,
            parameters_changed: self.parameters != other.parameters,
            auth_changed: self.auth != other.auth,
            search_changed: self.search != other.search,
            api_changed: self.api != other.api,
            app_changed: self.app != other.app,
            location_changed: self.location != other.location,
            tags_changed: self.tags != other.tags,
        }
    }

    /// Check if configuration can update a stack deployed from a previous version
    pub fn is_backward_compatible(
        &self,
        previous_config: &InfraConfig,
    ) -> Result<(), ConfigCompatibilityError> {
        if self.stack_name != previous_config.stack_name {
            return Err(ConfigCompatibilityError::StackNameChanged {
                old: previous_config.stack_name.clone(),
                new: self.stack_name.clone(),
            });
        }

        if self.deployment.region != previous_config.deployment.region {
            return Err(ConfigCompatibilityError::RegionChanged {
                old: previous_config.deployment.region.clone(),
                new: self.deployment.region.clone(),
            });
        }

        // Collection names are immutable once created
        if self.search.collection_name != previous_config.search.collection_name
            || self.search.temp_collection_name != previous_config.search.temp_collection_name
        {
            return Err(ConfigCompatibilityError::CollectionRenamed);
        }

        Ok(())
    }
}

/// Recursively overlay `overrides` onto `base`; tables merge, other values replace
fn merge_tables(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Configuration change detection results
#[derive(Debug, Clone, Default)]
pub struct ConfigChanges {
    pub deployment_changed: bool,
    pub network_changed: bool,
    pub storage_changed: bool,
    pub parameters_changed: bool,
    pub auth_changed: bool,
    pub search_changed: bool,
    pub api_changed: bool,
    pub app_changed: bool,
    pub location_changed: bool,
    pub tags_changed: bool,
}

impl ConfigChanges {
    pub fn has_changes(&self) -> bool {
        !self.changed_sections().is_empty()
    }

    pub fn changed_sections(&self) -> Vec<&'static str> {
        [
            ("deployment", self.deployment_changed),
            ("network", self.network_changed),
            ("storage", self.storage_changed),
            ("parameters", self.parameters_changed),
            ("auth", self.auth_changed),
            ("search", self.search_changed),
            ("api", self.api_changed),
            ("app", self.app_changed),
            ("location", self.location_changed),
            ("tags", self.tags_changed),
        ]
        .into_iter()
        .filter_map(|(name, changed)| changed.then_some(name))
        .collect()
    }

    /// Network changes replace subnets and everything placed in them
    pub fn requires_replacement(&self) -> bool {
        self.network_changed
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigCompatibilityError {
    #[error("Stack name cannot be changed: '{old}' -> '{new}'")]
    StackNameChanged { old: String, new: String },

    #[error("Deployment region cannot be changed: '{old}' -> '{new}'")]
    RegionChanged { old: String, new: String },

    #[error("Search collections cannot be renamed after creation")]
    CollectionRenamed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> InfraConfig {
        InfraConfig {
            stack_name: "FraudDetection".to_string(),
            description: None,
            deployment: DeploymentConfig {
                region: "ap-southeast-2".to_string(),
                account: Some("123456789012".to_string()),
                stage: "dev".to_string(),
                template_bucket: None,
            },
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            parameters: ParametersConfig::default(),
            auth: AuthConfig::default(),
            search: SearchConfig::default(),
            api: ApiConfig {
                image_uri: "123456789012.dkr.ecr.ap-southeast-2.amazonaws.com/fd-api:latest"
                    .to_string(),
                ..ApiConfig::default()
            },
            app: AppConfig {
                image_uri: "123456789012.dkr.ecr.ap-southeast-2.amazonaws.com/fd-app:latest"
                    .to_string(),
                ..AppConfig::default()
            },
            location: LocationConfig::default(),
            tags: None,
            environments: None,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_stack_name() {
        let mut config = test_config();
        config.stack_name = String::new();
        assert!(config.validate().is_err());

        config.stack_name = "1stack".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = InfraConfig::from_toml(
            r#"
            stack_name = "FraudDetection"

            [deployment]
            region = "us-east-1"

            [api]
            image_uri = "repo/api:1"

            [app]
            image_uri = "repo/app:1"
            "#,
        )
        .unwrap();

        assert_eq!(config.deployment.stage, "prod");
        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert_eq!(config.network.max_azs, 2);
        assert_eq!(config.api.memory_size, 10240);
        assert_eq!(config.app.container_port, 8501);
        assert_eq!(config.search.collection_name, "fd-col");
        assert_eq!(config.domain_prefix(), "prodfrauddetection");
    }

    #[test]
    fn test_missing_image_uri_is_rejected() {
        let result = InfraConfig::from_toml(
            r#"
            stack_name = "FraudDetection"
            [deployment]
            region = "us-east-1"
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::Validation(msg)) if msg.contains("api.image_uri")
        ));
    }

    #[test]
    fn test_invalid_account_id() {
        let mut config = test_config();
        config.deployment.account = Some("12345".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lambda_limits() {
        let mut config = test_config();
        config.api.memory_size = 64;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.api.timeout_seconds = 901;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fargate_cpu_memory_pairs() {
        let mut config = test_config();
        config.app.task_memory_mib = 8192;
        assert!(config.validate().is_err());

        config.app.task_cpu = 1024;
        config.app.container_cpu = 1024;
        config.app.container_memory_mib = 4096;
        assert!(config.validate().is_ok());

        config.app.task_cpu = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_container_limits_within_task() {
        let mut config = test_config();
        config.app.container_memory_mib = 40000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_validation() {
        let mut config = test_config();
        config.network.cidr = "10.0.0.0/8".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.network.cidr = "not-a-cidr".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.network.nat_gateways = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_cidr_must_hold_every_subnet() {
        let mut config = test_config();
        config.network.max_azs = 2;
        config.network.nat_gateways = 1;

        config.network.cidr = "10.0.0.0/26".to_string();
        assert!(config.validate().is_ok());

        config.network.cidr = "10.0.0.0/27".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot be split into 4 subnets"));
    }

    #[test]
    fn test_temp_password_validity_range() {
        let mut config = test_config();
        config.auth.temp_password_validity_days = 365;
        assert!(config.validate().is_ok());

        config.auth.temp_password_validity_days = 366;
        assert!(config.validate().is_err());

        config.auth.temp_password_validity_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collection_names() {
        let mut config = test_config();
        config.search.temp_collection_name = config.search.collection_name.clone();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.search.collection_name = "FD_COL".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_override() {
        let overrides: toml::Table = toml::from_str(
            r#"
            [deployment]
            stage = "staging"
            region = "us-west-2"

            [app]
            desired_count = 2
            "#,
        )
        .unwrap();

        let mut environments = HashMap::new();
        environments.insert("staging".to_string(), overrides);

        let mut config = test_config();
        config.environments = Some(environments);

        let staging = config.with_environment("staging").unwrap();
        assert_eq!(staging.deployment.region, "us-west-2");
        assert_eq!(staging.deployment.stage, "staging");
        assert_eq!(staging.app.desired_count, 2);
        // untouched fields survive the merge
        assert_eq!(staging.app.image_uri, config.app.image_uri);
        assert_eq!(staging.deployment.account, config.deployment.account);
        assert_eq!(staging.domain_prefix(), "stagingfrauddetection");
    }

    #[test]
    fn test_unknown_environment() {
        let config = test_config();
        assert!(matches!(
            config.with_environment("qa"),
            Err(ConfigError::UnknownEnvironment(name)) if name == "qa"
        ));
    }

    #[test]
    fn test_override_is_revalidated() {
        let overrides: toml::Table = toml::from_str("[api]\nmemory_size = 20000").unwrap();
        let mut config = test_config();
        config.environments = Some(HashMap::from([("big".to_string(), overrides)]));
        assert!(config.with_environment("big").is_err());
    }

    #[test]
    fn test_config_hash_generation() {
        let config = test_config();
        assert_eq!(config.generate_config_hash(), config.generate_config_hash());

        let mut other = config.clone();
        other.stack_name = "Other".to_string();
        assert_ne!(config.generate_config_hash(), other.generate_config_hash());
    }

    #[test]
    fn test_config_change_detection() {
        let config = test_config();
        let mut changed = config.clone();
        changed.app.desired_count = 3;
        changed.network.max_azs = 3;

        let changes = config.detect_changes(&changed);
        assert!(changes.app_changed);
        assert!(changes.network_changed);
        assert!(!changes.api_changed);
        assert!(changes.requires_replacement());
        assert_eq!(changes.changed_sections(), vec!["network", "app"]);
    }

    #[test]
    fn test_backward_compatibility() {
        let config = test_config();

        let mut compatible = config.clone();
        compatible.app.desired_count = 4;
        assert!(compatible.is_backward_compatible(&config).is_ok());

        let mut renamed = config.clone();
        renamed.stack_name = "Renamed".to_string();
        assert!(renamed.is_backward_compatible(&config).is_err());

        let mut moved = config.clone();
        moved.deployment.region = "us-east-1".to_string();
        assert!(moved.is_backward_compatible(&config).is_err());
    }
}
