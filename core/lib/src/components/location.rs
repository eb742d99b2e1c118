use crate::config::LocationConfig;
use crate::handles::PlaceIndexRef;
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::Resource;
use serde_json::json;
use tracing::info;

/// Place index for geocoding claim addresses
pub struct LocationConstruct {
    pub place_index: PlaceIndexRef,
}

impl LocationConstruct {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        config: &LocationConfig,
    ) -> Result<Self, SynthesisError> {
        let place_index = PlaceIndexRef::new(stack.add_resource(
            scope,
            "PlaceIndex",
            Resource::new(
                PlaceIndexRef::RESOURCE_TYPE,
                json!({
                    "DataSource": config.data_source,
                    "DataSourceConfiguration": {"IntendedUse": config.intended_use},
                    "Description": "Place index for geocoding and reverse geocoding",
                    "IndexName": config.index_name,
                    "PricingPlan": config.pricing_plan,
                }),
            ),
        )?);

        info!(index = %config.index_name, "Declared location resources");
        Ok(Self { place_index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::tests::test_stack;

    #[test]
    fn test_place_index_properties() {
        let mut stack = test_stack();
        let scope = Scope::root().child("Location");
        let location = LocationConstruct::new(&mut stack, &scope, &LocationConfig::default())
            .unwrap();

        let index = stack
            .template()
            .resource(location.place_index.logical_id())
            .unwrap();
        assert_eq!(index.properties["IndexName"], "claims-index");
        assert_eq!(index.properties["DataSource"], "Esri");
        assert_eq!(index.properties["PricingPlan"], "RequestBasedUsage");
        assert_eq!(
            index.properties["DataSourceConfiguration"]["IntendedUse"],
            "SingleUse"
        );
    }
}
