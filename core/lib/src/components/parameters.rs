use crate::config::ParametersConfig;
use crate::handles::{SecretRef, StringParameterRef};
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::{Output, Parameter, Resource};
use serde_json::json;
use tracing::info;

/// Template parameter carrying the SERP API key at deploy time
pub const SERP_API_KEY_PARAMETER: &str = "SerpApiKey";

/// Exported output holding the SERP secret ARN
pub const SERP_SECRET_ARN_OUTPUT: &str = "SERPApiKeySecretArn";

/// Shared secrets and runtime parameters
pub struct ParametersConstruct {
    pub serp_api_key_secret: SecretRef,
    pub sagemaker_endpoint_name_parameter: StringParameterRef,
}

impl ParametersConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        config: &ParametersConfig,
    ) -> Result<Self, SynthesisError> {
        let api_key = stack.add_parameter(
            SERP_API_KEY_PARAMETER,
            Parameter::string("API key for a SERP service").no_echo(),
        )?;

        let serp_api_key_secret = SecretRef::new(stack.add_resource(
            scope,
            "SERPApiKeySecret",
            Resource::new(
                SecretRef::RESOURCE_TYPE,
                json!({
                    "Description": "API key for a SERP service",
                    "Name": config.serp_api_key_secret_name,
                    "SecretString": api_key,
                }),
            ),
        )?);

        stack.add_output(
            SERP_SECRET_ARN_OUTPUT,
            Output::new(serp_api_key_secret.arn())
                .with_description("ARN of the SERP API Key Secret")
                .with_export(SERP_SECRET_ARN_OUTPUT),
        )?;

        let sagemaker_endpoint_name_parameter = StringParameterRef::new(
            stack.add_resource(
                scope,
                "SagemakerEndpointNameSsmParameter",
                Resource::new(
                    StringParameterRef::RESOURCE_TYPE,
                    json!({
                        "Description": "Sagemaker endpoint name for fraud detection",
                        "Name": config.sagemaker_endpoint_parameter,
                        "Type": "String",
                        "Value": config.sagemaker_endpoint_name,
                    }),
                ),
            )?,
            config.sagemaker_endpoint_parameter.clone(),
        );

        info!(secret = %config.serp_api_key_secret_name, "Declared parameter resources");
        Ok(Self {
            serp_api_key_secret,
            sagemaker_endpoint_name_parameter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::tests::test_stack;

    #[test]
    fn test_secret_value_comes_from_no_echo_parameter() {
        let mut stack = test_stack();
        let parameters = ParametersConstruct::new(
            &mut stack,
            &Scope::root().child("Parameters"),
            &ParametersConfig::default(),
        )
        .unwrap();

        let template = stack.template();
        assert_eq!(
            template.parameters[SERP_API_KEY_PARAMETER].no_echo,
            Some(true)
        );

        let secret = template
            .resource(parameters.serp_api_key_secret.logical_id())
            .unwrap();
        assert_eq!(secret.properties["Name"], "SERPApiKeySecret");
        assert_eq!(
            secret.properties["SecretString"],
            json!({"Ref": "SerpApiKey"})
        );

        let output = &template.outputs[SERP_SECRET_ARN_OUTPUT];
        assert_eq!(output.value, parameters.serp_api_key_secret.arn());
        assert_eq!(output.export.as_ref().unwrap().name, "SERPApiKeySecretArn");
    }

    #[test]
    fn test_sagemaker_endpoint_parameter() {
        let mut stack = test_stack();
        let parameters = ParametersConstruct::new(
            &mut stack,
            &Scope::root().child("Parameters"),
            &ParametersConfig::default(),
        )
        .unwrap();

        let parameter = stack
            .template()
            .resource(parameters.sagemaker_endpoint_name_parameter.logical_id())
            .unwrap();
        assert_eq!(
            parameter.properties["Name"],
            "/fraud-detection/sagemaker/endpoint/name"
        );
        assert_eq!(parameter.properties["Value"], "fraud-detection-sagemaker");
        assert_eq!(parameter.properties["Type"], "String");
    }
}
