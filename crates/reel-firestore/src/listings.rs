//! Listing coordinates lookup (`listings` collection).
//!
//! Listings are owned by the request layer. Coordinates are read from a
//! `location` geo point, a `coordinates` map with `lat`/`lng`, or top-level
//! `latitude`/`longitude` fields, in that order.

use async_trait::async_trait;
use tracing::warn;

use reel_models::Coordinates;

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::store::ListingLookup;
use crate::types::{Document, Value};

pub const LISTINGS_COLLECTION: &str = "listings";

#[derive(Clone)]
pub struct FirestoreListingLookup {
    client: FirestoreClient,
}

impl FirestoreListingLookup {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ListingLookup for FirestoreListingLookup {
    async fn coordinates(&self, listing_id: &str) -> FirestoreResult<Option<Coordinates>> {
        let doc = self
            .client
            .with_retry("get_listing", || {
                self.client.get_document(LISTINGS_COLLECTION, listing_id)
            })
            .await?;

        Ok(doc.as_ref().and_then(|d| {
            let coords = coordinates_from_document(d);
            if coords.is_none() {
                warn!(listing_id = %listing_id, "Listing has no usable coordinates");
            }
            coords
        }))
    }
}

pub fn coordinates_from_document(doc: &Document) -> Option<Coordinates> {
    let (lat, lng) = if let Some(Value::GeoPointValue(p)) = doc.field("location") {
        (p.latitude, p.longitude)
    } else if let Some(Value::MapValue(m)) = doc.field("coordinates") {
        let inner = Document::new(m.fields.clone().unwrap_or_default());
        (inner.get::<f64>("lat")?, inner.get::<f64>("lng")?)
    } else {
        (doc.get::<f64>("latitude")?, doc.get::<f64>("longitude")?)
    };

    Coordinates::new(lat, lng).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoPoint, MapValue, ToFirestoreValue};
    use std::collections::HashMap;

    fn doc_with(name: &str, value: Value) -> Document {
        let mut fields = HashMap::new();
        fields.insert(name.to_string(), value);
        Document::new(fields)
    }

    #[test]
    fn test_geo_point() {
        let doc = doc_with(
            "location",
            Value::GeoPointValue(GeoPoint {
                latitude: 34.05,
                longitude: -118.24,
            }),
        );
        let c = coordinates_from_document(&doc).unwrap();
        assert_eq!((c.lat, c.lng), (34.05, -118.24));
    }

    #[test]
    fn test_coordinates_map() {
        let mut inner = HashMap::new();
        inner.insert("lat".to_string(), 10.0f64.to_firestore_value());
        inner.insert("lng".to_string(), 20.0f64.to_firestore_value());
        let doc = doc_with("coordinates", Value::MapValue(MapValue { fields: Some(inner) }));
        assert!(coordinates_from_document(&doc).is_some());
    }

    #[test]
    fn test_missing_or_invalid() {
        assert!(coordinates_from_document(&Document::new(HashMap::new())).is_none());

        let mut fields = HashMap::new();
        fields.insert("latitude".to_string(), 200.0f64.to_firestore_value());
        fields.insert("longitude".to_string(), 0.0f64.to_firestore_value());
        assert!(coordinates_from_document(&Document::new(fields)).is_none());
    }
}
