use consent_core::contract::SubmissionRecord;
use consent_core::signature::{encode_data_url, ImageFormat};
use consent_core::storage_keys::{
    email_prefix, event_prefix, parse_submission_key, sanitize_component,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::adapters::{BlobStore, KeyValueStore, StoreError};
use crate::handlers::http::{
    error_response, not_found_response, storage_error_response, success_response,
    validation_error_response, ApiGatewayResponse,
};
use crate::handlers::HandlerContext;

pub const DEFAULT_LOOKUP_LIMIT: usize = 50;
pub const MAX_LOOKUP_LIMIT: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupQuery {
    pub email: Option<String>,
    pub name: Option<String>,
    pub event: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedKey {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupResponse {
    pub submissions: Vec<SubmissionRecord>,
    /// Keys read from the store for this page. The name filter applies after
    /// paging, so a page may hold no submissions while `cursor` is still set.
    #[serde(default)]
    pub scanned: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped: Vec<SkippedKey>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResponse {
    pub status: String,
    pub key: String,
    pub blobs_deleted: Vec<String>,
}

pub enum RecordLoad {
    Found(SubmissionRecord),
    Missing,
    Unreadable(String),
}

pub fn load_record(kv: &dyn KeyValueStore, key: &str) -> Result<RecordLoad, StoreError> {
    let Some(body) = kv.get(key)? else {
        return Ok(RecordLoad::Missing);
    };
    Ok(match serde_json::from_slice::<SubmissionRecord>(&body) {
        Ok(record) => RecordLoad::Found(record),
        Err(error) => RecordLoad::Unreadable(format!("record is not a current submission: {error}")),
    })
}

pub fn handle_lookup(
    query: &LookupQuery,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
) -> ApiGatewayResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOOKUP_LIMIT);
    if limit == 0 || limit > MAX_LOOKUP_LIMIT {
        return validation_error_response(&format!(
            "limit must be between 1 and {MAX_LOOKUP_LIMIT}"
        ));
    }

    let event = query
        .event
        .as_deref()
        .unwrap_or(ctx.config.default_event.as_str());
    let prefix = match query.email.as_deref() {
        Some(email) => email_prefix(event, email),
        None => event_prefix(event),
    };
    let name_filter = query.name.as_deref().map(sanitize_component);

    let page = match kv.list(&prefix, query.cursor.as_deref(), limit) {
        Ok(value) => value,
        Err(error) => {
            return storage_error_response(&format!("Failed to list submissions: {error}"))
        }
    };

    let scanned = page.keys.len();
    let mut submissions = Vec::with_capacity(scanned);
    let mut skipped = Vec::new();
    for key in page.keys {
        if let Some(filter) = &name_filter {
            let matches = parse_submission_key(&key)
                .map(|parts| parts.name.contains(filter.as_str()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        match load_record(kv, &key) {
            Ok(RecordLoad::Found(record)) => submissions.push(record),
            Ok(RecordLoad::Missing) => skipped.push(SkippedKey {
                key,
                reason: "record disappeared during lookup".to_string(),
            }),
            Ok(RecordLoad::Unreadable(reason)) => skipped.push(SkippedKey { key, reason }),
            Err(error) => skipped.push(SkippedKey {
                key,
                reason: error.to_string(),
            }),
        }
    }

    tracing::info!(
        component = "admin_handler",
        event = "lookup_completed",
        prefix = %prefix,
        scanned,
        returned = submissions.len(),
        skipped = skipped.len(),
    );

    success_response(
        200,
        LookupResponse {
            submissions,
            scanned,
            skipped,
            cursor: page.cursor,
        },
    )
}

pub fn handle_get(
    key: &str,
    include_signature: bool,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    let record = match load_record(kv, key) {
        Ok(RecordLoad::Found(record)) => record,
        Ok(RecordLoad::Missing) => return not_found_response(&format!("Submission not found: {key}")),
        Ok(RecordLoad::Unreadable(reason)) => {
            return error_response(
                422,
                json!({
                    "error": "unreadable_record",
                    "message": reason,
                    "key": key,
                }),
            )
        }
        Err(error) => return storage_error_response(&error.to_string()),
    };

    if !include_signature {
        return success_response(200, json!({ "submission": record }));
    }

    let signature_data_url = match blobs.get_blob(&record.signature_path) {
        Ok(Some(bytes)) => Some(encode_data_url(
            ImageFormat::from_path(&record.signature_path),
            &bytes,
        )),
        Ok(None) => None,
        Err(error) => {
            return storage_error_response(&format!("Failed to read signature image: {error}"))
        }
    };

    success_response(
        200,
        json!({
            "submission": record,
            "signature_data_url": signature_data_url,
        }),
    )
}

pub fn handle_delete(
    key: &str,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    let record = match load_record(kv, key) {
        Ok(RecordLoad::Found(record)) => Some(record),
        Ok(RecordLoad::Missing) => return not_found_response(&format!("Submission not found: {key}")),
        // An unreadable entry has no blob references we can trust; drop the key alone.
        Ok(RecordLoad::Unreadable(_)) => None,
        Err(error) => return storage_error_response(&error.to_string()),
    };

    let mut blobs_deleted = Vec::new();
    if let Some(record) = &record {
        for path in record.blob_paths() {
            if let Err(error) = blobs.delete_blob(path) {
                tracing::error!(
                    component = "admin_handler",
                    event = "signature_delete_failed",
                    key = %key,
                    path = %path,
                    error = %error,
                );
                return storage_error_response(&format!(
                    "Failed to delete signature image {path}: {error}"
                ));
            }
            blobs_deleted.push(path.to_string());
        }
    }

    if let Err(error) = kv.delete(key) {
        return storage_error_response(&format!("Failed to delete submission: {error}"));
    }

    tracing::info!(
        component = "admin_handler",
        event = "submission_deleted",
        key = %key,
        blobs_deleted = blobs_deleted.len(),
    );

    success_response(
        200,
        DeleteResponse {
            status: "deleted".to_string(),
            key: key.to_string(),
            blobs_deleted,
        },
    )
}
