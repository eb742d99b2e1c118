use crate::handles::TableRef;
use crate::stack::{Scope, Stack, SynthesisError};
use fraud_infra_template::{DeletionPolicy, Resource};
use serde_json::json;
use tracing::info;

/// Table of indexed files, keyed by `id`
pub struct DatabaseConstruct {
    pub indexed_files_table: TableRef,
}

impl DatabaseConstruct {
    pub fn new(stack: &mut Stack, scope: &Scope) -> Result<Self, SynthesisError> {
        let indexed_files_table = TableRef::new(stack.add_resource(
            scope,
            "IndexFiles",
            Resource::new(
                TableRef::RESOURCE_TYPE,
                json!({
                    "AttributeDefinitions": [{"AttributeName": "id", "AttributeType": "S"}],
                    "BillingMode": "PAY_PER_REQUEST",
                    "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
                    "SSESpecification": {"SSEEnabled": true},
                }),
            )
            .removal_policy(DeletionPolicy::Delete),
        )?);

        info!("Declared database resources");
        Ok(Self {
            indexed_files_table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::tests::test_stack;

    #[test]
    fn test_table_shape() {
        let mut stack = test_stack();
        let scope = Scope::root().child("Database");
        let database = DatabaseConstruct::new(&mut stack, &scope).unwrap();

        let table = stack
            .template()
            .resource(database.indexed_files_table.logical_id())
            .unwrap();
        assert_eq!(table.properties["KeySchema"][0]["AttributeName"], "id");
        assert_eq!(table.properties["KeySchema"][0]["KeyType"], "HASH");
        assert_eq!(
            table.properties["AttributeDefinitions"][0]["AttributeType"],
            "S"
        );
        assert_eq!(table.properties["BillingMode"], "PAY_PER_REQUEST");
        assert_eq!(table.properties["SSESpecification"]["SSEEnabled"], true);
        assert!(table.properties.get("TableName").is_none());
        assert_eq!(table.deletion_policy, Some(DeletionPolicy::Delete));
    }
}
