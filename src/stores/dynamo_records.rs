//! DynamoDB-backed record store for the `aws` backend.
//!
//! Items are keyed by `image_id`; owner lookups go through a global secondary
//! index on `user_id` (`UserIndex` unless configured otherwise). Numbers come
//! back from DynamoDB as decimal strings and are converted to integers here so
//! the rest of the crate only ever sees `i64` timestamps.

use super::{RecordStore, StoreError, StoreResult};
use crate::models::image::{DEFAULT_CONTENT_TYPE, ImageRecord};
use async_trait::async_trait;
use aws_sdk_dynamodb::{Client, error::DisplayErrorContext, types::AttributeValue};
use std::{collections::HashMap, error::Error};

type Item = HashMap<String, AttributeValue>;

#[derive(Clone, Debug)]
pub struct DynamoRecordStore {
    client: Client,
    table: String,
    user_index: String,
}

impl DynamoRecordStore {
    pub fn new(client: Client, table: impl Into<String>, user_index: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            user_index: user_index.into(),
        }
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn put(&self, record: &ImageRecord) -> StoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record_to_item(record)))
            .send()
            .await
            .map_err(|err| backend_error("PutItem", err))?;
        Ok(())
    }

    async fn get(&self, image_id: &str) -> StoreResult<Option<ImageRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("image_id", AttributeValue::S(image_id.to_string()))
            .send()
            .await
            .map_err(|err| backend_error("GetItem", err))?;
        output.item().map(item_to_record).transpose()
    }

    async fn delete(&self, image_id: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("image_id", AttributeValue::S(image_id.to_string()))
            .send()
            .await
            .map_err(|err| backend_error("DeleteItem", err))?;
        Ok(())
    }

    async fn query_by_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ImageRecord>> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(&self.user_index)
            .key_condition_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .limit(page_limit(limit))
            .send()
            .await
            .map_err(|err| backend_error("Query", err))?;
        output.items().iter().map(item_to_record).collect()
    }

    async fn scan(&self, limit: usize) -> StoreResult<Vec<ImageRecord>> {
        let output = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(page_limit(limit))
            .send()
            .await
            .map_err(|err| backend_error("Scan", err))?;
        output.items().iter().map(item_to_record).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .map_err(|err| backend_error("DescribeTable", err))?;
        Ok(())
    }
}

fn backend_error<E: Error>(operation: &str, err: E) -> StoreError {
    StoreError::Backend(format!("{operation} failed: {}", DisplayErrorContext(err)))
}

fn page_limit(limit: usize) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

fn record_to_item(record: &ImageRecord) -> Item {
    let tags = record
        .tags
        .iter()
        .cloned()
        .map(AttributeValue::S)
        .collect::<Vec<_>>();

    HashMap::from([
        ("image_id".to_string(), AttributeValue::S(record.image_id.clone())),
        ("user_id".to_string(), AttributeValue::S(record.user_id.clone())),
        ("s3_key".to_string(), AttributeValue::S(record.s3_key.clone())),
        ("filename".to_string(), AttributeValue::S(record.filename.clone())),
        (
            "content_type".to_string(),
            AttributeValue::S(record.content_type.clone()),
        ),
        ("tags".to_string(), AttributeValue::L(tags)),
        (
            "description".to_string(),
            AttributeValue::S(record.description.clone()),
        ),
        (
            "created_at".to_string(),
            AttributeValue::N(record.created_at.to_string()),
        ),
    ])
}

fn item_to_record(item: &Item) -> StoreResult<ImageRecord> {
    let image_id = required_string(item, "image_id", "<unknown>")?;
    Ok(ImageRecord {
        user_id: required_string(item, "user_id", &image_id)?,
        s3_key: required_string(item, "s3_key", &image_id)?,
        filename: required_string(item, "filename", &image_id)?,
        content_type: optional_string(item, "content_type")
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        tags: string_list(item, "tags"),
        description: optional_string(item, "description").unwrap_or_default(),
        created_at: number(item, "created_at", &image_id)?.unwrap_or(0),
        image_id,
    })
}

fn optional_string(item: &Item, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
}

fn required_string(item: &Item, name: &str, image_id: &str) -> StoreResult<String> {
    optional_string(item, name).ok_or_else(|| {
        StoreError::MalformedRecord(format!("`{image_id}` has no string attribute `{name}`"))
    })
}

/// Tags may have been written as a list of strings or as a string set.
fn string_list(item: &Item, name: &str) -> Vec<String> {
    match item.get(name) {
        Some(AttributeValue::L(values)) => values
            .iter()
            .filter_map(|value| value.as_s().ok().cloned())
            .collect(),
        Some(AttributeValue::Ss(values)) => values.clone(),
        _ => Vec::new(),
    }
}

/// DynamoDB numbers are decimal strings; integral values parse directly and
/// anything else (`"1700000000.0"`, `"1.7e9"`) is truncated towards zero.
fn number(item: &Item, name: &str, image_id: &str) -> StoreResult<Option<i64>> {
    let Some(value) = item.get(name) else {
        return Ok(None);
    };
    let raw = value.as_n().map_err(|_| {
        StoreError::MalformedRecord(format!("`{image_id}` attribute `{name}` is not a number"))
    })?;
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Some(int));
    }
    raw.parse::<f64>()
        .map(|float| Some(float as i64))
        .map_err(|_| {
            StoreError::MalformedRecord(format!("`{image_id}` attribute `{name}` = `{raw}`"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ImageRecord {
        ImageRecord {
            image_id: "id-1".into(),
            user_id: "userA".into(),
            s3_key: "userA/id-1/a.jpg".into(),
            filename: "a.jpg".into(),
            content_type: "image/jpeg".into(),
            tags: vec!["sun".into(), "sea".into()],
            description: "beach".into(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn item_conversion_preserves_every_field() {
        let record = sample();
        let item = record_to_item(&record);
        assert_eq!(
            item.get("created_at"),
            Some(&AttributeValue::N("1700000000".into()))
        );
        assert_eq!(item_to_record(&item).unwrap(), record);
    }

    #[test]
    fn decimal_numbers_become_integers() {
        let mut item = record_to_item(&sample());
        item.insert("created_at".into(), AttributeValue::N("1700000000.0".into()));
        assert_eq!(item_to_record(&item).unwrap().created_at, 1_700_000_000);

        item.insert("created_at".into(), AttributeValue::N("1.7e9".into()));
        assert_eq!(item_to_record(&item).unwrap().created_at, 1_700_000_000);
    }

    #[test]
    fn optional_attributes_fall_back_to_defaults() {
        let mut item = record_to_item(&sample());
        item.remove("content_type");
        item.remove("description");
        item.remove("tags");
        item.remove("created_at");

        let record = item_to_record(&item).unwrap();
        assert_eq!(record.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(record.description, "");
        assert!(record.tags.is_empty());
        assert_eq!(record.created_at, 0);
    }

    #[test]
    fn string_set_tags_are_accepted() {
        let mut item = record_to_item(&sample());
        item.insert("tags".into(), AttributeValue::Ss(vec!["mountain".into()]));
        assert_eq!(item_to_record(&item).unwrap().tags, vec!["mountain"]);
    }

    #[test]
    fn missing_key_attributes_are_malformed() {
        let mut item = record_to_item(&sample());
        item.remove("s3_key");
        assert!(matches!(
            item_to_record(&item),
            Err(StoreError::MalformedRecord(_))
        ));

        let mut item = record_to_item(&sample());
        item.insert("created_at".into(), AttributeValue::S("yesterday".into()));
        assert!(matches!(
            item_to_record(&item),
            Err(StoreError::MalformedRecord(_))
        ));
    }
}
