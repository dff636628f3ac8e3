use consent_core::contract::{
    validate_submission, SubmissionRequest, SubmitAcceptedResponse, ValidationContext,
    SUBMISSION_RECORD_SCHEMA_VERSION,
};
use consent_core::storage_keys::SignatureRole;
use serde_json::json;

use crate::adapters::{BlobStore, KeyValueStore};
use crate::handlers::http::{
    error_response, parse_json_body, storage_error_response, success_response,
    validation_error_response, ApiGatewayResponse,
};
use crate::handlers::HandlerContext;

pub fn handle_submit(
    body: Option<&str>,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    let request: SubmissionRequest = match parse_json_body(body) {
        Ok(value) => value,
        Err(message) => return validation_error_response(&message),
    };

    let validation = ValidationContext {
        now: ctx.now,
        default_event: &ctx.config.default_event,
        max_signature_bytes: ctx.config.max_signature_bytes,
    };
    let submission = match validate_submission(&request, &validation) {
        Ok(value) => value,
        Err(errors) => {
            tracing::info!(
                component = "submit_handler",
                event = "submission_rejected",
                error_count = errors.fields().len(),
                first_error = errors.message(),
            );
            return error_response(
                400,
                json!({
                    "error": "validation_error",
                    "message": errors.message(),
                    "fields": errors.fields(),
                }),
            );
        }
    };

    let parts = submission.key_parts();
    let key = parts.key();

    match kv.get(&key) {
        Ok(None) => {}
        Ok(Some(_)) => {
            return error_response(
                409,
                json!({
                    "error": "duplicate_submission",
                    "message": "A submission with this identity and timestamp already exists",
                    "key": key,
                }),
            );
        }
        Err(error) => {
            tracing::error!(
                component = "submit_handler",
                event = "duplicate_check_failed",
                key = %key,
                error = %error,
            );
            return storage_error_response(&format!("Failed to check for existing submission: {error}"));
        }
    }

    let prefix = &ctx.config.signature_prefix;
    let signature_path = parts.signature_path(
        prefix,
        SignatureRole::Participant,
        submission.signature.format,
    );
    let guardian_upload = submission.guardian.as_ref().map(|guardian| {
        (
            parts.signature_path(prefix, SignatureRole::Guardian, guardian.signature.format),
            &guardian.signature,
        )
    });

    let mut uploads = vec![(signature_path.clone(), &submission.signature)];
    uploads.extend(guardian_upload.iter().map(|(path, image)| (path.clone(), *image)));

    let mut uploaded: Vec<String> = Vec::with_capacity(uploads.len());
    for (path, image) in &uploads {
        if let Err(error) = blobs.put_blob(path, &image.bytes, image.format.mime()) {
            tracing::error!(
                component = "submit_handler",
                event = "signature_upload_failed",
                key = %key,
                path = %path,
                error = %error,
            );
            rollback_blobs(blobs, &uploaded);
            return storage_error_response(&format!("Failed to persist signature image: {error}"));
        }
        uploaded.push(path.clone());
    }

    let guardian_signature_path = guardian_upload.map(|(path, _)| path);
    let record = submission.to_record(
        key.clone(),
        signature_path.clone(),
        guardian_signature_path.clone(),
    );
    let body = match serde_json::to_vec(&record) {
        Ok(value) => value,
        Err(error) => {
            rollback_blobs(blobs, &uploaded);
            return error_response(
                500,
                json!({
                    "error": "serialization_error",
                    "message": error.to_string(),
                }),
            );
        }
    };

    if let Err(error) = kv.put(&key, &body) {
        tracing::error!(
            component = "submit_handler",
            event = "record_write_failed",
            key = %key,
            error = %error,
        );
        rollback_blobs(blobs, &uploaded);
        return storage_error_response(&format!("Failed to persist submission: {error}"));
    }

    tracing::info!(
        component = "submit_handler",
        event = "submission_stored",
        key = %key,
        minor = submission.is_minor(),
        signature_bytes = submission.signature.bytes.len(),
    );

    success_response(
        201,
        SubmitAcceptedResponse {
            status: "stored".to_string(),
            key,
            signature_path,
            guardian_signature_path,
            schema_version: SUBMISSION_RECORD_SCHEMA_VERSION.to_string(),
        },
    )
}

fn rollback_blobs(blobs: &dyn BlobStore, paths: &[String]) {
    for path in paths {
        if let Err(error) = blobs.delete_blob(path) {
            tracing::warn!(
                component = "submit_handler",
                event = "signature_rollback_failed",
                path = %path,
                error = %error,
            );
        }
    }
}
