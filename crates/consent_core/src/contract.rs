use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signature::{decode_signature, SignatureImage};
use crate::storage_keys::KeyParts;

pub const SUBMISSION_RECORD_SCHEMA_VERSION: &str = "v2";
pub const MAX_FIELD_CHARS: usize = 200;
pub const MAX_EMAIL_CHARS: usize = 254;
pub const MAX_AGE_YEARS: u32 = 120;
pub const ADULT_AGE_YEARS: u32 = 18;
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubmissionRequest {
    #[serde(alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(alias = "lastName")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(alias = "dateOfBirth", alias = "dob")]
    pub date_of_birth: Option<String>,
    pub event: Option<String>,
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
    pub signature: Option<String>,
    #[serde(alias = "agreeTerms")]
    pub agree_terms: bool,
    #[serde(alias = "mediaConsent")]
    pub media_consent: bool,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guardian {
    pub name: String,
    pub email: Option<String>,
    pub signature: SignatureImage,
}

/// A submission that passed every validation check, with trimmed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub event: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: NaiveDate,
    pub age_years: u32,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub emergency_contact_relationship: Option<String>,
    pub guardian: Option<Guardian>,
    pub signature: SignatureImage,
    pub media_consent: bool,
    pub language: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn key_parts(&self) -> KeyParts {
        KeyParts::new(
            &self.event,
            &self.email,
            &self.last_name,
            &self.first_name,
            &self.submitted_at,
        )
    }

    pub fn is_minor(&self) -> bool {
        self.age_years < ADULT_AGE_YEARS
    }

    pub fn to_record(
        &self,
        key: String,
        signature_path: String,
        guardian_signature_path: Option<String>,
    ) -> SubmissionRecord {
        SubmissionRecord {
            record_schema: SUBMISSION_RECORD_SCHEMA_VERSION.to_string(),
            key,
            event: self.event.clone(),
            submitted_at: self.submitted_at.to_rfc3339(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            date_of_birth: self.date_of_birth.format("%Y-%m-%d").to_string(),
            age_years: Some(self.age_years),
            is_minor: self.is_minor(),
            emergency_contact_name: self.emergency_contact_name.clone(),
            emergency_contact_phone: self.emergency_contact_phone.clone(),
            emergency_contact_relationship: self.emergency_contact_relationship.clone(),
            guardian_name: self.guardian.as_ref().map(|guardian| guardian.name.clone()),
            guardian_email: self
                .guardian
                .as_ref()
                .and_then(|guardian| guardian.email.clone()),
            guardian_signature_path,
            media_consent: self.media_consent,
            language: self.language.clone(),
            signature_path,
            signature_sha256: Some(signature_digest(&self.signature.bytes)),
        }
    }
}

/// The persisted key-value entry for one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub record_schema: String,
    pub key: String,
    pub event: String,
    pub submitted_at: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub age_years: Option<u32>,
    #[serde(default)]
    pub is_minor: bool,
    #[serde(default)]
    pub emergency_contact_name: String,
    #[serde(default)]
    pub emergency_contact_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact_relationship: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_signature_path: Option<String>,
    #[serde(default)]
    pub media_consent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub signature_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_sha256: Option<String>,
}

impl SubmissionRecord {
    pub fn blob_paths(&self) -> Vec<&str> {
        std::iter::once(self.signature_path.as_str())
            .chain(self.guardian_signature_path.as_deref())
            .filter(|path| !path.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitAcceptedResponse {
    pub status: String,
    pub key: String,
    pub signature_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian_signature_path: Option<String>,
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn message(&self) -> &str {
        self.errors
            .first()
            .map(|error| error.message.as_str())
            .unwrap_or("validation failed")
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|error| format!("{}: {}", error.field, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub now: DateTime<Utc>,
    pub default_event: &'a str,
    pub max_signature_bytes: usize,
}

#[derive(Default)]
struct ErrorCollector {
    errors: Vec<FieldError>,
}

impl ErrorCollector {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn required(&mut self, field: &str, value: &Option<String>) -> Option<String> {
        self.required_within(field, value, MAX_FIELD_CHARS)
    }

    fn required_within(
        &mut self,
        field: &str,
        value: &Option<String>,
        max: usize,
    ) -> Option<String> {
        match present(value) {
            Some(text) => self.within(field, text, max),
            None => {
                self.push(field, format!("{field} is required"));
                None
            }
        }
    }

    fn optional(&mut self, field: &str, value: &Option<String>) -> Option<String> {
        self.optional_within(field, value, MAX_FIELD_CHARS)
    }

    fn optional_within(
        &mut self,
        field: &str,
        value: &Option<String>,
        max: usize,
    ) -> Option<String> {
        present(value).and_then(|text| self.within(field, text, max))
    }

    fn bounded(&mut self, field: &str, text: String) -> Option<String> {
        self.within(field, text, MAX_FIELD_CHARS)
    }

    fn within(&mut self, field: &str, text: String, max: usize) -> Option<String> {
        if text.chars().count() > max {
            self.push(field, format!("{field} must be at most {max} characters"));
            None
        } else {
            Some(text)
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn validate_submission(
    request: &SubmissionRequest,
    context: &ValidationContext<'_>,
) -> Result<Submission, ValidationErrors> {
    let mut collector = ErrorCollector::default();

    let first_name = collector.required("first_name", &request.first_name);
    let last_name = collector.required("last_name", &request.last_name);
    let email = collector
        .required_within("email", &request.email, MAX_EMAIL_CHARS)
        .and_then(|email| check_email(&mut collector, "email", email));
    let phone = collector
        .optional("phone", &request.phone)
        .and_then(|phone| check_phone(&mut collector, "phone", phone));
    let event = collector
        .optional("event", &request.event)
        .unwrap_or_else(|| context.default_event.to_string());
    let emergency_contact_name =
        collector.required("emergency_contact_name", &request.emergency_contact_name);
    let emergency_contact_phone = collector
        .required("emergency_contact_phone", &request.emergency_contact_phone)
        .and_then(|phone| check_phone(&mut collector, "emergency_contact_phone", phone));
    let emergency_contact_relationship = collector.optional(
        "emergency_contact_relationship",
        &request.emergency_contact_relationship,
    );
    let language = collector.optional("language", &request.language);

    let birth = collector
        .required("date_of_birth", &request.date_of_birth)
        .and_then(|raw| check_birth_date(&mut collector, &raw, context.now));

    let signature = match present(&request.signature) {
        Some(data_url) => match decode_signature(&data_url, context.max_signature_bytes) {
            Ok(image) => Some(image),
            Err(message) => {
                collector.push("signature", message);
                None
            }
        },
        None => {
            collector.push("signature", "signature is required");
            None
        }
    };

    let guardian = match birth {
        Some((_, age)) if age < ADULT_AGE_YEARS => check_guardian(&mut collector, request, context),
        _ => None,
    };

    if !request.agree_terms {
        collector.push("agree_terms", "terms must be accepted");
    }

    if !collector.errors.is_empty() {
        return Err(ValidationErrors {
            errors: collector.errors,
        });
    }

    // Every required value is Some once the collector is empty.
    match (
        first_name,
        last_name,
        email,
        birth,
        emergency_contact_name,
        emergency_contact_phone,
        signature,
    ) {
        (
            Some(first_name),
            Some(last_name),
            Some(email),
            Some((date_of_birth, age_years)),
            Some(emergency_contact_name),
            Some(emergency_contact_phone),
            Some(signature),
        ) => Ok(Submission {
            event,
            first_name,
            last_name,
            email,
            phone,
            date_of_birth,
            age_years,
            emergency_contact_name,
            emergency_contact_phone,
            emergency_contact_relationship,
            guardian,
            signature,
            media_consent: request.media_consent,
            language,
            submitted_at: context.now,
        }),
        _ => Err(ValidationErrors::single(
            "submission",
            "submission is incomplete",
        )),
    }
}

fn check_guardian(
    collector: &mut ErrorCollector,
    request: &SubmissionRequest,
    context: &ValidationContext<'_>,
) -> Option<Guardian> {
    let name = match present(&request.guardian_name) {
        Some(name) => collector.bounded("guardian_name", name),
        None => {
            collector.push(
                "guardian_name",
                "guardian_name is required for participants under 18",
            );
            None
        }
    };
    let email = collector
        .optional_within("guardian_email", &request.guardian_email, MAX_EMAIL_CHARS)
        .and_then(|email| check_email(&mut *collector, "guardian_email", email));
    let signature = match present(&request.guardian_signature) {
        Some(data_url) => match decode_signature(&data_url, context.max_signature_bytes) {
            Ok(image) => Some(image),
            Err(message) => {
                collector.push("guardian_signature", message);
                None
            }
        },
        None => {
            collector.push(
                "guardian_signature",
                "guardian_signature is required for participants under 18",
            );
            None
        }
    };

    Some(Guardian {
        name: name?,
        email,
        signature: signature?,
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
            .expect("email pattern must compile")
    })
}

pub fn is_valid_email(email: &str) -> bool {
    email.chars().count() <= MAX_EMAIL_CHARS && email_pattern().is_match(email)
}

fn check_email(collector: &mut ErrorCollector, field: &str, email: String) -> Option<String> {
    let normalized = email.to_lowercase();
    if is_valid_email(&normalized) {
        Some(normalized)
    } else {
        collector.push(field, format!("{field} is not a valid email address"));
        None
    }
}

pub fn is_valid_phone(phone: &str) -> bool {
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')' | '.'));
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    allowed && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
}

fn check_phone(collector: &mut ErrorCollector, field: &str, phone: String) -> Option<String> {
    if is_valid_phone(&phone) {
        Some(phone)
    } else {
        collector.push(field, format!("{field} is not a valid phone number"));
        None
    }
}

fn check_birth_date(
    collector: &mut ErrorCollector,
    raw: &str,
    now: DateTime<Utc>,
) -> Option<(NaiveDate, u32)> {
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        collector.push("date_of_birth", "date_of_birth must be formatted as YYYY-MM-DD");
        return None;
    };
    let Some(age) = age_on(date, now.date_naive()) else {
        collector.push("date_of_birth", "date_of_birth cannot be in the future");
        return None;
    };
    if age > MAX_AGE_YEARS {
        collector.push(
            "date_of_birth",
            format!("date_of_birth implies an age above {MAX_AGE_YEARS}"),
        );
        return None;
    }
    Some((date, age))
}

/// Whole years between `birth` and `today`, `None` when `birth` is later.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if birth > today {
        return None;
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

pub fn signature_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
