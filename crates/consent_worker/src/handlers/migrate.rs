use consent_core::contract::{
    signature_digest, SubmissionRecord, SUBMISSION_RECORD_SCHEMA_VERSION,
};
use consent_core::migration::{
    plan_migration, LegacyRecord, MigrationDefaults, MigrationPlan, SignatureSource,
};
use consent_core::storage_keys::{is_legacy_key, SignatureRole, LEGACY_KEY_PREFIX};
use serde::{Deserialize, Serialize};

use crate::adapters::{BlobStore, KeyValueStore};
use crate::handlers::admin::SkippedKey;
use crate::handlers::http::{
    parse_json_body, storage_error_response, success_response, validation_error_response,
    ApiGatewayResponse,
};
use crate::handlers::HandlerContext;

pub const DEFAULT_MIGRATION_LIMIT: usize = 100;
pub const MAX_MIGRATION_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationRequest {
    pub dry_run: bool,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedKey {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedMove {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub skipped: Vec<SkippedKey>,
    pub failed: Vec<FailedKey>,
    pub planned: Vec<PlannedMove>,
    pub cursor: Option<String>,
    pub dry_run: bool,
}

pub fn handle_migrate(
    body: Option<&str>,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    let request: MigrationRequest = match parse_json_body(body) {
        Ok(value) => value,
        Err(message) => return validation_error_response(&message),
    };
    let limit = request.limit.unwrap_or(DEFAULT_MIGRATION_LIMIT);
    if limit == 0 || limit > MAX_MIGRATION_LIMIT {
        return validation_error_response(&format!(
            "limit must be between 1 and {MAX_MIGRATION_LIMIT}"
        ));
    }

    match run_migration(&request, limit, ctx, kv, blobs) {
        Ok(report) => success_response(200, report),
        Err(message) => storage_error_response(&message),
    }
}

/// Sweeps one page of legacy keys. Each key is migrated independently and a
/// failure on one key never stops the sweep.
pub fn run_migration(
    request: &MigrationRequest,
    limit: usize,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> Result<MigrationReport, String> {
    let page = kv
        .list(LEGACY_KEY_PREFIX, request.cursor.as_deref(), limit)
        .map_err(|error| format!("Failed to list legacy submissions: {error}"))?;

    let defaults = MigrationDefaults {
        default_event: &ctx.config.default_event,
        signature_prefix: &ctx.config.signature_prefix,
        max_signature_bytes: ctx.config.max_signature_bytes,
    };

    let mut report = MigrationReport {
        cursor: page.cursor,
        dry_run: request.dry_run,
        ..MigrationReport::default()
    };

    for key in page.keys {
        report.scanned += 1;
        if !is_legacy_key(&key) {
            report.skipped.push(SkippedKey {
                key,
                reason: "key does not follow the legacy layout".to_string(),
            });
            continue;
        }

        let plan = match load_plan(&key, &defaults, kv) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                report.skipped.push(SkippedKey {
                    key,
                    reason: "record disappeared during migration".to_string(),
                });
                continue;
            }
            Err(error) => {
                log_key_failure(&key, &error);
                report.failed.push(FailedKey { key, error });
                continue;
            }
        };

        let resume = match target_state(&plan, kv, blobs) {
            Ok(TargetState::Absent) => false,
            Ok(TargetState::Migrated) => true,
            Ok(TargetState::Occupied(reason)) => {
                report.skipped.push(SkippedKey { key, reason });
                continue;
            }
            Err(error) => {
                log_key_failure(&key, &error);
                report.failed.push(FailedKey { key, error });
                continue;
            }
        };

        report.planned.push(PlannedMove {
            from: key.clone(),
            to: plan.new_key.clone(),
        });
        if request.dry_run {
            continue;
        }

        let outcome = if resume {
            retire_legacy(&plan, kv, blobs)
        } else {
            execute_plan(plan, kv, blobs)
        };
        match outcome {
            Ok(()) => report.migrated += 1,
            Err(error) => {
                log_key_failure(&key, &error);
                report.failed.push(FailedKey { key, error });
            }
        }
    }

    tracing::info!(
        component = "migration",
        event = "migration_page_completed",
        dry_run = report.dry_run,
        scanned = report.scanned,
        migrated = report.migrated,
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        has_more = report.cursor.is_some(),
    );

    Ok(report)
}

fn load_plan(
    key: &str,
    defaults: &MigrationDefaults<'_>,
    kv: &dyn KeyValueStore,
) -> Result<Option<MigrationPlan>, String> {
    let Some(body) = kv
        .get(key)
        .map_err(|error| format!("Failed to read legacy record: {error}"))?
    else {
        return Ok(None);
    };
    let legacy: LegacyRecord = serde_json::from_slice(&body)
        .map_err(|error| format!("Legacy record is not valid JSON: {error}"))?;
    plan_migration(key, &legacy, defaults).map(Some)
}

fn execute_plan(
    mut plan: MigrationPlan,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> Result<(), String> {
    let mut written: Vec<String> = Vec::new();

    for blob_move in &plan.blob_moves {
        let bytes = match &blob_move.source {
            SignatureSource::Inline(image) => image.bytes.clone(),
            SignatureSource::Copy { from } => match blobs.get_blob(from) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    remove_blobs(blobs, &written);
                    return Err(format!("Source signature {from} is missing"));
                }
                Err(error) => {
                    remove_blobs(blobs, &written);
                    return Err(format!("Failed to read source signature {from}: {error}"));
                }
            },
        };

        if blob_move.role == SignatureRole::Participant && plan.record.signature_sha256.is_none() {
            plan.record.signature_sha256 = Some(signature_digest(&bytes));
        }

        if let Err(error) = blobs.put_blob(&blob_move.to, &bytes, blob_move.format.mime()) {
            remove_blobs(blobs, &written);
            return Err(format!(
                "Failed to write signature {}: {error}",
                blob_move.to
            ));
        }
        written.push(blob_move.to.clone());
    }

    let body = serde_json::to_vec(&plan.record).map_err(|error| {
        remove_blobs(blobs, &written);
        format!("Failed to serialize migrated record: {error}")
    })?;
    if let Err(error) = kv.put(&plan.new_key, &body) {
        remove_blobs(blobs, &written);
        return Err(format!("Failed to write migrated record: {error}"));
    }

    tracing::info!(
        component = "migration",
        event = "submission_migrated",
        from = %plan.old_key,
        to = %plan.new_key,
        blobs_written = written.len(),
    );
    retire_legacy(&plan, kv, blobs)
}

enum TargetState {
    Absent,
    /// A current record from an earlier sweep whose legacy cleanup did not finish.
    Migrated,
    Occupied(String),
}

fn target_state(
    plan: &MigrationPlan,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> Result<TargetState, String> {
    let Some(body) = kv
        .get(&plan.new_key)
        .map_err(|error| format!("Failed to check target key: {error}"))?
    else {
        return Ok(TargetState::Absent);
    };

    let occupied = || TargetState::Occupied(format!("target key {} already exists", plan.new_key));
    let Ok(existing) = serde_json::from_slice::<SubmissionRecord>(&body) else {
        return Ok(occupied());
    };
    if existing.key != plan.new_key || existing.record_schema != SUBMISSION_RECORD_SCHEMA_VERSION {
        return Ok(occupied());
    }

    match blobs.get_blob(&existing.signature_path) {
        Ok(Some(_)) => Ok(TargetState::Migrated),
        Ok(None) => Ok(TargetState::Occupied(format!(
            "target key {} exists but its signature {} is missing",
            plan.new_key, existing.signature_path
        ))),
        Err(error) => Err(format!("Failed to check target signature: {error}")),
    }
}

/// Removes the legacy key and its source blobs once the new record is in place.
fn retire_legacy(
    plan: &MigrationPlan,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> Result<(), String> {
    kv.delete(&plan.old_key).map_err(|error| {
        format!(
            "Migrated record written to {} but legacy key could not be deleted: {error}",
            plan.new_key
        )
    })?;

    for path in plan.obsolete_blobs() {
        if let Err(error) = blobs.delete_blob(path) {
            tracing::warn!(
                component = "migration",
                event = "legacy_blob_delete_failed",
                path = %path,
                error = %error,
            );
        }
    }
    Ok(())
}

fn remove_blobs(blobs: &dyn BlobStore, paths: &[String]) {
    for path in paths {
        if let Err(error) = blobs.delete_blob(path) {
            tracing::warn!(
                component = "migration",
                event = "signature_rollback_failed",
                path = %path,
                error = %error,
            );
        }
    }
}

fn log_key_failure(key: &str, error: &str) {
    tracing::error!(
        component = "migration",
        event = "migration_key_failed",
        key = %key,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use consent_core::contract::SubmissionRecord;
    use consent_core::signature::{encode_data_url, ImageFormat};
    use serde_json::json;

    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::config::WorkerConfig;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nlegacy-strokes";

    fn context(config: &WorkerConfig) -> HandlerContext<'_> {
        HandlerContext {
            config,
            now: chrono::Utc::now(),
        }
    }

    fn seed_inline(kv: &MemoryStore) -> &'static str {
        let key = "submission_jane_doe_1700000000000";
        kv.seed(
            key,
            json!({
                "name": "Jane Doe",
                "email": "jane@example.com",
                "dob": "2001-05-05",
                "signature": encode_data_url(ImageFormat::Png, PNG),
            })
            .to_string()
            .as_bytes(),
        );
        key
    }

    fn seed_blob_backed(kv: &MemoryStore, blobs: &MemoryStore) -> &'static str {
        let key = "submission_sam_lee_1751623200000";
        kv.seed(
            key,
            json!({
                "firstName": "Sam",
                "lastName": "Lee",
                "email": "sam@example.com",
                "signatureUrl": "sam_lee_1751623200000.png",
            })
            .to_string()
            .as_bytes(),
        );
        blobs.seed("sam_lee_1751623200000.png", PNG);
        key
    }

    fn run(request: MigrationRequest, kv: &MemoryStore, blobs: &MemoryStore) -> MigrationReport {
        let config = WorkerConfig::local();
        run_migration(&request, 100, &context(&config), kv, blobs).expect("sweep should run")
    }

    #[test]
    fn migrates_inline_and_blob_backed_records() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let inline_key = seed_inline(&kv);
        let blob_key = seed_blob_backed(&kv, &blobs);

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.scanned, 2);
        assert_eq!(report.migrated, 2);
        assert!(report.failed.is_empty());
        assert!(kv.body(inline_key).is_none());
        assert!(kv.body(blob_key).is_none());
        assert!(blobs.body("sam_lee_1751623200000.png").is_none());

        for key in kv.keys() {
            let record: SubmissionRecord =
                serde_json::from_slice(&kv.body(&key).expect("record should exist"))
                    .expect("migrated record should parse");
            assert_eq!(record.key, key);
            assert_eq!(record.event, "general");
            assert_eq!(blobs.body(&record.signature_path).as_deref(), Some(PNG));
            assert_eq!(record.signature_sha256, Some(signature_digest(PNG)));
        }
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let key = seed_inline(&kv);

        let report = run(
            MigrationRequest {
                dry_run: true,
                ..MigrationRequest::default()
            },
            &kv,
            &blobs,
        );

        assert_eq!(report.migrated, 0);
        assert_eq!(report.planned.len(), 1);
        assert_eq!(report.planned[0].from, key);
        assert_eq!(kv.keys(), vec![key.to_string()]);
        assert!(blobs.is_empty());
    }

    #[test]
    fn failures_are_recorded_per_key_without_stopping() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        kv.seed("submission_broken_1700000000001", b"{not json");
        kv.seed(
            "submission_nomail_1700000000002",
            json!({"name": "No Mail", "signatureUrl": "x.png"}).to_string().as_bytes(),
        );
        seed_inline(&kv);

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.scanned, 3);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .any(|failed| failed.error == "legacy record has no email"));
    }

    #[test]
    fn missing_source_blob_leaves_legacy_record_in_place() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let key = seed_blob_backed(&kv, &blobs);
        blobs
            .delete_blob("sam_lee_1751623200000.png")
            .expect("delete should succeed");

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("is missing"));
        assert_eq!(kv.keys(), vec![key.to_string()]);
    }

    #[test]
    fn record_write_failure_rolls_back_new_blobs() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        seed_inline(&kv);
        kv.deny_writes_containing("submission:");

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.failed.len(), 1);
        assert!(blobs.is_empty());
    }

    #[test]
    fn skips_when_target_already_exists() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        seed_inline(&kv);
        let first = run(
            MigrationRequest {
                dry_run: true,
                ..MigrationRequest::default()
            },
            &kv,
            &blobs,
        );
        kv.seed(&first.planned[0].to, b"{}");

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.migrated, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("already exists"));
    }

    #[test]
    fn later_sweep_finishes_cleanup_after_legacy_delete_failure() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let legacy_key = seed_blob_backed(&kv, &blobs);
        kv.deny_deletes_containing("submission_");

        let first = run(MigrationRequest::default(), &kv, &blobs);
        assert_eq!(first.migrated, 0);
        assert_eq!(first.failed.len(), 1);
        assert!(first.failed[0].error.contains("legacy key could not be deleted"));
        assert_eq!(kv.len(), 2);

        kv.clear_failures();
        let second = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(second.migrated, 1);
        assert!(second.skipped.is_empty());
        assert_eq!(kv.keys(), vec![first.planned[0].to.clone()]);
        assert!(kv.body(legacy_key).is_none());
        assert!(blobs.body("sam_lee_1751623200000.png").is_none());
        assert_eq!(blobs.len(), 1);
    }

    #[test]
    fn existing_target_without_signature_is_left_alone() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let legacy_key = seed_blob_backed(&kv, &blobs);
        let planned = run(
            MigrationRequest {
                dry_run: true,
                ..MigrationRequest::default()
            },
            &kv,
            &blobs,
        );
        let new_key = planned.planned[0].to.clone();
        let record = SubmissionRecord {
            record_schema: SUBMISSION_RECORD_SCHEMA_VERSION.to_string(),
            key: new_key.clone(),
            event: "general".to_string(),
            submitted_at: "2025-07-04T10:00:00+00:00".to_string(),
            first_name: "Sam".to_string(),
            last_name: "Lee".to_string(),
            email: "sam@example.com".to_string(),
            phone: None,
            date_of_birth: String::new(),
            age_years: None,
            is_minor: false,
            emergency_contact_name: String::new(),
            emergency_contact_phone: String::new(),
            emergency_contact_relationship: None,
            guardian_name: None,
            guardian_email: None,
            guardian_signature_path: None,
            media_consent: false,
            language: None,
            signature_path: "signatures/general/never-written.png".to_string(),
            signature_sha256: None,
        };
        kv.seed(&new_key, &serde_json::to_vec(&record).expect("record should serialize"));

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.migrated, 0);
        assert!(report.skipped[0].reason.contains("is missing"));
        assert!(kv.body(legacy_key).is_some());
        assert!(blobs.body("sam_lee_1751623200000.png").is_some());
    }

    #[test]
    fn failed_rollback_is_reported_as_key_failure() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        seed_inline(&kv);
        kv.deny_writes_containing("submission:");
        blobs.deny_deletes_containing("signatures/");

        let report = run(MigrationRequest::default(), &kv, &blobs);

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("Failed to write migrated record"));
        assert_eq!(blobs.len(), 1);
    }

    #[test]
    fn handler_rejects_bad_limit() {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let config = WorkerConfig::local();
        let response = handle_migrate(
            Some("{\"limit\": 0}"),
            &context(&config),
            &kv,
            &blobs,
        );
        assert_eq!(response.status_code, 400);
    }
}
