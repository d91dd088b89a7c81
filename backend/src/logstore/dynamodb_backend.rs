use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use shared::VisionLogRecord;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{LogBackend, StoreError};

/// Primary backend. The client is built from the ambient AWS configuration
/// the first time a record is written and reused afterwards.
pub struct DynamoDbLogBackend {
    client: OnceCell<Client>,
    table: String,
}

impl DynamoDbLogBackend {
    pub fn new(table: String) -> Self {
        Self {
            client: OnceCell::new(),
            table,
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                log::info!("Initialising DynamoDB client for table '{}'", self.table);
                let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
                Client::new(&aws_config)
            })
            .await
    }

    pub fn to_item(record: &VisionLogRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert(
            "id".to_string(),
            AttributeValue::S(Uuid::new_v4().to_string()),
        );
        item.insert(
            "userId".to_string(),
            match &record.user_id {
                Some(user_id) => AttributeValue::S(user_id.clone()),
                None => AttributeValue::Null(true),
            },
        );
        item.insert("fruit".to_string(), AttributeValue::S(record.fruit.clone()));
        item.insert(
            "disease".to_string(),
            AttributeValue::S(record.disease.clone()),
        );
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(record.confidence.to_string()),
        );
        item.insert(
            "reasons".to_string(),
            AttributeValue::L(
                record
                    .reasons
                    .iter()
                    .map(|reason| AttributeValue::S(reason.clone()))
                    .collect(),
            ),
        );
        item.insert(
            "imagePath".to_string(),
            AttributeValue::S(record.image_path.clone()),
        );
        item.insert(
            "createdAt".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );
        item
    }
}

#[async_trait]
impl LogBackend for DynamoDbLogBackend {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    async fn append(&self, record: &VisionLogRecord) -> Result<(), StoreError> {
        let item = Self::to_item(record);

        match self
            .client()
            .await
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
        {
            Ok(_) => {
                log::debug!("Vision log written to DynamoDB table '{}'", self.table);
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "DynamoDB put_item failed for table '{}': {:?}",
                    self.table,
                    e
                );
                Err(StoreError::DynamoDb(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(user_id: Option<&str>) -> VisionLogRecord {
        VisionLogRecord {
            user_id: user_id.map(str::to_string),
            fruit: "apple".into(),
            disease: "scab".into(),
            confidence: 0.91,
            reasons: vec!["lesion pattern".into(), "olive spots".into()],
            image_path: "uploads/fruit-1.jpg".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn item_uses_portable_field_names() {
        let item = DynamoDbLogBackend::to_item(&record(Some("user-1")));
        for key in [
            "id",
            "userId",
            "fruit",
            "disease",
            "confidence",
            "reasons",
            "imagePath",
            "createdAt",
        ] {
            assert!(item.contains_key(key), "missing {}", key);
        }
        assert_eq!(item["userId"], AttributeValue::S("user-1".into()));
        assert_eq!(item["confidence"], AttributeValue::N("0.91".into()));
    }

    #[test]
    fn item_keeps_reason_order_and_null_user() {
        let item = DynamoDbLogBackend::to_item(&record(None));
        assert_eq!(item["userId"], AttributeValue::Null(true));
        assert_eq!(
            item["reasons"],
            AttributeValue::L(vec![
                AttributeValue::S("lesion pattern".into()),
                AttributeValue::S("olive spots".into()),
            ])
        );
    }
}
