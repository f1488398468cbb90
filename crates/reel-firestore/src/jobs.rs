//! Firestore-backed job store (`jobs` collection).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use reel_models::{Job, JobId, JobMetadata, JobStatus, JobUpdate, NewJob};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::store::JobStore;
use crate::types::{
    firestore_value_to_json, json_to_firestore_value, Direction, Document, Filter,
    FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value,
};

pub const JOBS_COLLECTION: &str = "jobs";

/// Job records stored one document per job, keyed by job id.
#[derive(Clone)]
pub struct FirestoreJobStore {
    client: FirestoreClient,
}

impl FirestoreJobStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    async fn query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Job>> {
        let docs = self
            .client
            .with_retry("list_jobs", || self.client.run_query(query.clone()))
            .await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for doc in docs {
            let Some(id) = doc.id().map(str::to_string) else {
                continue;
            };
            match document_to_job(&doc, &id) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job_id = %id, "Skipping unreadable job document: {}", e),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FirestoreJobStore {
    async fn create(&self, new_job: NewJob) -> FirestoreResult<Job> {
        let job = Job::from_new(new_job);
        let fields = job_to_fields(&job)?;

        self.client
            .create_document(JOBS_COLLECTION, job.id.as_str(), fields)
            .await?;

        info!(job_id = %job.id, listing_id = %job.listing_id, "Created job record");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> FirestoreResult<Option<Job>> {
        let doc = self
            .client
            .with_retry("get_job", || self.client.get_document(JOBS_COLLECTION, id.as_str()))
            .await?;

        doc.map(|d| document_to_job(&d, id.as_str())).transpose()
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> FirestoreResult<()> {
        let (fields, mask) = update_to_fields(&update)?;

        self.client
            .with_retry("update_job", || {
                self.client.update_document(
                    JOBS_COLLECTION,
                    id.as_str(),
                    fields.clone(),
                    Some(mask.clone()),
                    true,
                )
            })
            .await?;
        Ok(())
    }

    async fn list_by_status_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> FirestoreResult<Vec<Job>> {
        let query = StructuredQuery::collection(JOBS_COLLECTION)
            .filter(Filter::and(vec![
                Filter::field("status", "EQUAL", status.as_str().to_firestore_value()),
                Filter::field("created_at", "GREATER_THAN_OR_EQUAL", since.to_firestore_value()),
            ]))
            .order_by("created_at", Direction::Descending)
            .limit(limit.min(i32::MAX as usize) as i32);

        self.query(query).await
    }

    async fn list_processing_by_listing(&self, listing_id: &str) -> FirestoreResult<Vec<Job>> {
        let query = StructuredQuery::collection(JOBS_COLLECTION).filter(Filter::and(vec![
            Filter::field("listing_id", "EQUAL", listing_id.to_firestore_value()),
            Filter::field(
                "status",
                "EQUAL",
                JobStatus::Processing.as_str().to_firestore_value(),
            ),
        ]));

        self.query(query).await
    }
}

fn metadata_to_value(metadata: &JobMetadata) -> FirestoreResult<Value> {
    Ok(json_to_firestore_value(&serde_json::to_value(metadata)?))
}

/// Full document for a new job.
pub fn job_to_fields(job: &Job) -> FirestoreResult<HashMap<String, Value>> {
    let mut fields = HashMap::new();
    fields.insert("listing_id".to_string(), job.listing_id.to_firestore_value());
    fields.insert("user_id".to_string(), job.user_id.to_firestore_value());
    fields.insert("status".to_string(), job.status.as_str().to_firestore_value());
    fields.insert("progress".to_string(), (job.progress as u32).to_firestore_value());
    fields.insert("template".to_string(), job.template.to_firestore_value());
    fields.insert("input_files".to_string(), job.input_files.to_firestore_value());
    fields.insert("output_file".to_string(), job.output_file.to_firestore_value());
    fields.insert("error".to_string(), job.error.to_firestore_value());
    fields.insert("metadata".to_string(), metadata_to_value(&job.metadata)?);
    fields.insert("created_at".to_string(), job.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), job.updated_at.to_firestore_value());
    fields.insert("completed_at".to_string(), job.completed_at.to_firestore_value());
    Ok(fields)
}

/// Fields and update mask for a partial update. `updated_at` is always set.
pub fn update_to_fields(
    update: &JobUpdate,
) -> FirestoreResult<(HashMap<String, Value>, Vec<String>)> {
    let mut fields = HashMap::new();

    if let Some(status) = update.status {
        fields.insert("status".to_string(), status.as_str().to_firestore_value());
    }
    if let Some(progress) = update.progress {
        fields.insert("progress".to_string(), (progress.min(100) as u32).to_firestore_value());
    }
    if update.clear_output_file {
        fields.insert("output_file".to_string(), Value::NullValue(()));
    }
    if let Some(ref output) = update.output_file {
        fields.insert("output_file".to_string(), output.to_firestore_value());
    }
    if update.clear_error {
        fields.insert("error".to_string(), Value::NullValue(()));
    }
    if let Some(ref error) = update.error {
        fields.insert("error".to_string(), error.to_firestore_value());
    }
    if let Some(ref metadata) = update.metadata {
        fields.insert("metadata".to_string(), metadata_to_value(metadata)?);
    }
    if let Some(completed_at) = update.completed_at {
        fields.insert("completed_at".to_string(), completed_at.to_firestore_value());
    }
    fields.insert("updated_at".to_string(), Utc::now().to_firestore_value());

    let mut mask: Vec<String> = fields.keys().cloned().collect();
    mask.sort();
    Ok((fields, mask))
}

/// Parse a job document.
pub fn document_to_job(doc: &Document, id: &str) -> FirestoreResult<Job> {
    let path = format!("{}/{}", JOBS_COLLECTION, id);
    let required = |name: &str| -> FirestoreResult<String> {
        doc.get::<String>(name)
            .ok_or_else(|| FirestoreError::invalid_document(&path, format!("missing {}", name)))
    };

    let status = required("status")?
        .parse::<JobStatus>()
        .map_err(|e| FirestoreError::invalid_document(&path, e))?;

    let metadata = match doc.field("metadata") {
        Some(Value::NullValue(())) | None => JobMetadata::default(),
        Some(value) => serde_json::from_value(firestore_value_to_json(value)).map_err(|e| {
            FirestoreError::invalid_document(&path, format!("metadata: {}", e))
        })?,
    };

    let created_at = doc
        .get::<DateTime<Utc>>("created_at")
        .ok_or_else(|| FirestoreError::invalid_document(&path, "missing created_at"))?;

    Ok(Job {
        id: JobId::from_string(id),
        listing_id: required("listing_id")?,
        user_id: doc.get::<String>("user_id").unwrap_or_default(),
        status,
        progress: doc.get::<u32>("progress").unwrap_or(0).min(100) as u8,
        template: required("template")?,
        input_files: doc.get::<Vec<String>>("input_files").unwrap_or_default(),
        output_file: doc.field("output_file").and_then(String::from_firestore_value),
        error: doc.field("error").and_then(String::from_firestore_value),
        metadata,
        created_at,
        updated_at: doc.get::<DateTime<Utc>>("updated_at").unwrap_or(created_at),
        completed_at: doc.get::<DateTime<Utc>>("completed_at"),
    })
}
