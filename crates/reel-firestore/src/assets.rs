//! Firestore-backed artifact index (`processed_assets` collection).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reel_models::{AssetMetadata, AssetType, ProcessedAsset};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::store::AssetIndex;
use crate::types::{Document, MapValue, ToFirestoreValue, Value};

pub const ASSETS_COLLECTION: &str = "processed_assets";

#[derive(Clone)]
pub struct FirestoreAssetIndex {
    client: FirestoreClient,
}

impl FirestoreAssetIndex {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetIndex for FirestoreAssetIndex {
    async fn get(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>> {
        let doc = self
            .client
            .with_retry("get_asset", || self.client.get_document(ASSETS_COLLECTION, cache_key))
            .await?;

        doc.map(|d| document_to_asset(&d, cache_key)).transpose()
    }

    async fn upsert(&self, asset: &ProcessedAsset) -> FirestoreResult<()> {
        let fields = asset_to_fields(asset);
        self.client
            .with_retry("upsert_asset", || {
                self.client.update_document(
                    ASSETS_COLLECTION,
                    &asset.cache_key,
                    fields.clone(),
                    None,
                    false,
                )
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, cache_key: &str) -> FirestoreResult<()> {
        self.client
            .with_retry("delete_asset", || {
                self.client.delete_document(ASSETS_COLLECTION, cache_key)
            })
            .await
    }
}

pub fn asset_to_fields(asset: &ProcessedAsset) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("created_at".to_string(), asset.metadata.created_at.to_firestore_value());
    metadata.insert(
        "last_accessed".to_string(),
        asset.metadata.last_accessed.to_firestore_value(),
    );
    metadata.insert(
        "access_count".to_string(),
        asset.metadata.access_count.to_firestore_value(),
    );
    metadata.insert("tags".to_string(), asset.metadata.tags.to_firestore_value());

    let mut fields = HashMap::new();
    fields.insert("cache_key".to_string(), asset.cache_key.to_firestore_value());
    fields.insert("asset_type".to_string(), asset.asset_type.as_str().to_firestore_value());
    fields.insert("path".to_string(), asset.path.to_firestore_value());
    fields.insert("hash".to_string(), asset.hash.to_firestore_value());
    fields.insert(
        "metadata".to_string(),
        Value::MapValue(MapValue {
            fields: Some(metadata),
        }),
    );
    fields.insert("created_at".to_string(), asset.created_at.to_firestore_value());
    fields
}

pub fn document_to_asset(doc: &Document, cache_key: &str) -> FirestoreResult<ProcessedAsset> {
    let path = format!("{}/{}", ASSETS_COLLECTION, cache_key);

    let asset_type = doc
        .get::<String>("asset_type")
        .ok_or_else(|| FirestoreError::invalid_document(&path, "missing asset_type"))?
        .parse::<AssetType>()
        .map_err(|e| FirestoreError::invalid_document(&path, e))?;

    let object_path = doc
        .get::<String>("path")
        .ok_or_else(|| FirestoreError::invalid_document(&path, "missing path"))?;

    let created_at = doc
        .get::<DateTime<Utc>>("created_at")
        .ok_or_else(|| FirestoreError::invalid_document(&path, "missing created_at"))?;

    let meta_fields = match doc.field("metadata") {
        Some(Value::MapValue(m)) => m.fields.clone().unwrap_or_default(),
        _ => HashMap::new(),
    };
    let meta = Document::new(meta_fields);

    Ok(ProcessedAsset {
        cache_key: doc
            .get::<String>("cache_key")
            .unwrap_or_else(|| cache_key.to_string()),
        asset_type,
        path: object_path,
        hash: doc.get::<String>("hash").unwrap_or_default(),
        metadata: AssetMetadata {
            created_at: meta.get::<DateTime<Utc>>("created_at").unwrap_or(created_at),
            last_accessed: meta
                .get::<DateTime<Utc>>("last_accessed")
                .unwrap_or(created_at),
            access_count: meta.get::<u32>("access_count").unwrap_or(0),
            tags: meta.get::<Vec<String>>("tags").unwrap_or_default(),
        },
        created_at,
    })
}
