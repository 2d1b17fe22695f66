use std::collections::HashMap;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue as DynamoValue;
use aws_sdk_dynamodb::Client;
use tokio::runtime::{Builder, Runtime};

use super::{AttributeValue, ClientError, Item, KeyCondition, Page, TableClient};
use crate::storage::Error;

const PARTITION_EXPR: &str = "#pk = :pk";
const RANGE_EXPR: &str = "#pk = :pk AND #sk > :after";

/// DynamoDB table client.
///
/// Owns a single-threaded runtime so the blocking [`TableClient`] calls can
/// be issued from the refresh driver's blocking pool.
pub struct DynamoTableClient {
    table_name: String,
    client: Client,
    runtime: Runtime,
}

impl DynamoTableClient {
    pub fn connect(table_name: &str, region: &str) -> Result<Self, Error> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load(),
        );
        log::info!("Connected to table {} in {}", table_name, region);
        Ok(Self {
            table_name: table_name.to_string(),
            client: Client::new(&config),
            runtime,
        })
    }

    fn names(condition: &KeyCondition) -> HashMap<String, String> {
        let mut names = HashMap::from([("#pk".to_string(), condition.partition_key.clone())]);
        if condition.after.is_some() {
            names.insert("#sk".to_string(), condition.sort_key.clone());
        }
        names
    }

    fn values(condition: &KeyCondition) -> HashMap<String, DynamoValue> {
        let mut values = HashMap::from([(
            ":pk".to_string(),
            DynamoValue::S(condition.partition_value.clone()),
        )]);
        if let Some(after) = &condition.after {
            values.insert(":after".to_string(), to_dynamo(after));
        }
        values
    }

    fn expression(condition: &KeyCondition) -> &'static str {
        if condition.after.is_some() {
            RANGE_EXPR
        } else {
            PARTITION_EXPR
        }
    }
}

impl TableClient for DynamoTableClient {
    fn query_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        let request = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression(Self::expression(condition))
            .set_expression_attribute_names(Some(Self::names(condition)))
            .set_expression_attribute_values(Some(Self::values(condition)))
            .set_exclusive_start_key(start_key.map(to_dynamo_item));

        let output = self.runtime.block_on(request.send()).map_err(client_error)?;
        Ok(Page {
            items: output.items().iter().map(from_dynamo_item).collect(),
            last_evaluated_key: output.last_evaluated_key().map(from_dynamo_item),
        })
    }

    fn scan_page(&self, condition: &KeyCondition, start_key: Option<&Item>) -> Result<Page, ClientError> {
        let request = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression(Self::expression(condition))
            .set_expression_attribute_names(Some(Self::names(condition)))
            .set_expression_attribute_values(Some(Self::values(condition)))
            .set_exclusive_start_key(start_key.map(to_dynamo_item));

        let output = self.runtime.block_on(request.send()).map_err(client_error)?;
        Ok(Page {
            items: output.items().iter().map(from_dynamo_item).collect(),
            last_evaluated_key: output.last_evaluated_key().map(from_dynamo_item),
        })
    }
}

fn client_error<E, R>(err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err.code() {
        // Raised when the key condition names attributes outside the key schema.
        Some("ValidationException") => ClientError::KeySchemaMismatch(message),
        _ => ClientError::Unavailable(message),
    }
}

fn to_dynamo(value: &AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::N(n) => DynamoValue::N(n.clone()),
        AttributeValue::S(s) => DynamoValue::S(s.clone()),
        AttributeValue::Bool(b) => DynamoValue::Bool(*b),
        AttributeValue::Null => DynamoValue::Null(true),
    }
}

fn to_dynamo_item(item: &Item) -> HashMap<String, DynamoValue> {
    item.iter().map(|(k, v)| (k.clone(), to_dynamo(v))).collect()
}

fn from_dynamo_item(item: &HashMap<String, DynamoValue>) -> Item {
    item.iter()
        .map(|(k, v)| {
            let value = match v {
                DynamoValue::N(n) => AttributeValue::N(n.clone()),
                DynamoValue::S(s) => AttributeValue::S(s.clone()),
                DynamoValue::Bool(b) => AttributeValue::Bool(*b),
                _ => AttributeValue::Null,
            };
            (k.clone(), value)
        })
        .collect()
}
