//! Planning for the legacy-record upgrade sweep.
//!
//! The first worker generation stored `submission_{name}_{epoch_millis}` keys,
//! sometimes with the signature inlined as a data URL and sometimes with a
//! root-level blob. Planning is pure: it derives the current key, the target
//! blob paths, and the upgraded record. Executing a plan is the worker's job.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::contract::{
    age_on, signature_digest, SubmissionRecord, ADULT_AGE_YEARS, SUBMISSION_RECORD_SCHEMA_VERSION,
};
use crate::signature::{decode_signature, ImageFormat, SignatureImage};
use crate::storage_keys::{parse_legacy_key, KeyParts, SignatureRole};

/// Any record shape written before `record_schema` existed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegacyRecord {
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(alias = "fullName")]
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(alias = "dateOfBirth", alias = "dob")]
    pub date_of_birth: Option<String>,
    pub event: Option<String>,
    #[serde(
        alias = "submittedAt",
        alias = "timestamp",
        deserialize_with = "text_or_number"
    )]
    pub submitted_at: Option<String>,
    #[serde(alias = "emergencyContactName")]
    pub emergency_contact_name: Option<String>,
    #[serde(alias = "emergencyContactPhone")]
    pub emergency_contact_phone: Option<String>,
    #[serde(alias = "emergencyContactRelationship")]
    pub emergency_contact_relationship: Option<String>,
    #[serde(alias = "guardianName")]
    pub guardian_name: Option<String>,
    #[serde(alias = "guardianEmail")]
    pub guardian_email: Option<String>,
    #[serde(alias = "guardianSignature")]
    pub guardian_signature: Option<String>,
    #[serde(alias = "guardianSignatureUrl", alias = "guardianSignaturePath")]
    pub guardian_signature_path: Option<String>,
    pub signature: Option<String>,
    #[serde(alias = "signatureUrl", alias = "signaturePath")]
    pub signature_path: Option<String>,
    #[serde(alias = "mediaConsent", deserialize_with = "loose_flag")]
    pub media_consent: bool,
    pub language: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseValue {
    Flag(bool),
    Integer(i64),
    Text(String),
}

// Older forms wrote `Date.now()` numbers where later ones wrote strings.
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<LooseValue>::deserialize(deserializer)? {
        Some(LooseValue::Text(text)) => Some(text),
        Some(LooseValue::Integer(number)) => Some(number.to_string()),
        Some(LooseValue::Flag(flag)) => Some(flag.to_string()),
        None => None,
    })
}

fn loose_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<LooseValue>::deserialize(deserializer)? {
        Some(LooseValue::Flag(flag)) => flag,
        Some(LooseValue::Integer(number)) => number != 0,
        Some(LooseValue::Text(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        ),
        None => false,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSource {
    /// Decoded from a data URL stored inside the legacy record.
    Inline(SignatureImage),
    /// An existing blob that must be copied to the new path.
    Copy { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMove {
    pub role: SignatureRole,
    pub source: SignatureSource,
    pub to: String,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub old_key: String,
    pub new_key: String,
    pub record: SubmissionRecord,
    pub blob_moves: Vec<BlobMove>,
}

impl MigrationPlan {
    /// Source blobs to delete once the new record is in place.
    pub fn obsolete_blobs(&self) -> Vec<&str> {
        self.blob_moves
            .iter()
            .filter_map(|blob_move| match &blob_move.source {
                SignatureSource::Copy { from } if from != &blob_move.to => Some(from.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MigrationDefaults<'a> {
    pub default_event: &'a str,
    pub signature_prefix: &'a str,
    pub max_signature_bytes: usize,
}

pub fn plan_migration(
    old_key: &str,
    legacy: &LegacyRecord,
    defaults: &MigrationDefaults<'_>,
) -> Result<MigrationPlan, String> {
    let legacy_key = parse_legacy_key(old_key);

    let email = non_blank(&legacy.email)
        .map(|email| email.to_lowercase())
        .ok_or_else(|| "legacy record has no email".to_string())?;
    let (first_name, last_name) = resolve_name(legacy, legacy_key.as_ref().map(|k| k.name.as_str()))?;
    let event = non_blank(&legacy.event).unwrap_or_else(|| defaults.default_event.to_string());
    let submitted_at = resolve_submitted_at(legacy, legacy_key.as_ref().map(|k| k.epoch_millis))?;

    let parts = KeyParts::new(&event, &email, &last_name, &first_name, &submitted_at);
    let new_key = parts.key();

    let participant = resolve_signature(
        &legacy.signature,
        &legacy.signature_path,
        defaults.max_signature_bytes,
    )?
    .ok_or_else(|| "legacy record has no signature".to_string())?;
    let guardian = resolve_signature(
        &legacy.guardian_signature,
        &legacy.guardian_signature_path,
        defaults.max_signature_bytes,
    )?;

    let mut blob_moves = vec![blob_move(
        &parts,
        defaults.signature_prefix,
        SignatureRole::Participant,
        participant,
    )];
    if let Some(source) = guardian {
        blob_moves.push(blob_move(
            &parts,
            defaults.signature_prefix,
            SignatureRole::Guardian,
            source,
        ));
    }

    let date_of_birth = non_blank(&legacy.date_of_birth).unwrap_or_default();
    let age_years = NaiveDate::parse_from_str(&date_of_birth, "%Y-%m-%d")
        .ok()
        .and_then(|birth| age_on(birth, submitted_at.date_naive()));

    let signature_sha256 = match &blob_moves[0].source {
        SignatureSource::Inline(image) => Some(signature_digest(&image.bytes)),
        SignatureSource::Copy { .. } => None,
    };

    let record = SubmissionRecord {
        record_schema: SUBMISSION_RECORD_SCHEMA_VERSION.to_string(),
        key: new_key.clone(),
        event,
        submitted_at: submitted_at.to_rfc3339(),
        first_name,
        last_name,
        email,
        phone: non_blank(&legacy.phone),
        date_of_birth,
        age_years,
        is_minor: age_years.is_some_and(|age| age < ADULT_AGE_YEARS),
        emergency_contact_name: non_blank(&legacy.emergency_contact_name).unwrap_or_default(),
        emergency_contact_phone: non_blank(&legacy.emergency_contact_phone).unwrap_or_default(),
        emergency_contact_relationship: non_blank(&legacy.emergency_contact_relationship),
        guardian_name: non_blank(&legacy.guardian_name),
        guardian_email: non_blank(&legacy.guardian_email).map(|email| email.to_lowercase()),
        guardian_signature_path: blob_moves
            .iter()
            .find(|blob_move| blob_move.role == SignatureRole::Guardian)
            .map(|blob_move| blob_move.to.clone()),
        media_consent: legacy.media_consent,
        language: non_blank(&legacy.language),
        signature_path: blob_moves[0].to.clone(),
        signature_sha256,
    };

    Ok(MigrationPlan {
        old_key: old_key.to_string(),
        new_key,
        record,
        blob_moves,
    })
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn resolve_name(legacy: &LegacyRecord, key_name: Option<&str>) -> Result<(String, String), String> {
    let first = non_blank(&legacy.first_name);
    let last = non_blank(&legacy.last_name);
    if first.is_some() || last.is_some() {
        return Ok((first.unwrap_or_default(), last.unwrap_or_default()));
    }

    let full = non_blank(&legacy.name)
        .or_else(|| key_name.map(|name| name.replace('_', " ")))
        .ok_or_else(|| "legacy record has no participant name".to_string())?;
    let full = full.trim();
    match full.rsplit_once(char::is_whitespace) {
        Some((first, last)) => Ok((first.trim().to_string(), last.to_string())),
        None => Ok((String::new(), full.to_string())),
    }
}

fn resolve_submitted_at(
    legacy: &LegacyRecord,
    key_millis: Option<i64>,
) -> Result<DateTime<Utc>, String> {
    if let Some(raw) = non_blank(&legacy.submitted_at) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        if let Ok(millis) = raw.parse::<i64>() {
            if let Some(parsed) = Utc.timestamp_millis_opt(millis).single() {
                return Ok(parsed);
            }
        }
    }

    key_millis
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .ok_or_else(|| "legacy record has no usable submission time".to_string())
}

fn resolve_signature(
    inline: &Option<String>,
    path: &Option<String>,
    max_bytes: usize,
) -> Result<Option<SignatureSource>, String> {
    if let Some(data_url) = non_blank(inline) {
        return decode_signature(&data_url, max_bytes)
            .map(|image| Some(SignatureSource::Inline(image)))
            .map_err(|error| format!("legacy inline signature is unusable: {error}"));
    }
    Ok(non_blank(path).map(|from| SignatureSource::Copy { from }))
}

fn blob_move(
    parts: &KeyParts,
    prefix: &str,
    role: SignatureRole,
    source: SignatureSource,
) -> BlobMove {
    let format = match &source {
        SignatureSource::Inline(image) => image.format,
        SignatureSource::Copy { from } => ImageFormat::from_path(from),
    };
    BlobMove {
        role,
        to: parts.signature_path(prefix, role, format),
        source,
        format,
    }
}
