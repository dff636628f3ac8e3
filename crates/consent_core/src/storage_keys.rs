use chrono::{DateTime, Utc};

use crate::signature::ImageFormat;

pub const SUBMISSION_KEY_PREFIX: &str = "submission:";
pub const LEGACY_KEY_PREFIX: &str = "submission_";
pub const MAX_COMPONENT_CHARS: usize = 64;
const UNKNOWN_COMPONENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRole {
    Participant,
    Guardian,
}

impl SignatureRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Guardian => "guardian",
        }
    }
}

/// Identity segments shared by a submission key and its signature paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub event: String,
    pub email: String,
    pub name: String,
    pub timestamp: String,
}

impl KeyParts {
    pub fn new(
        event: &str,
        email: &str,
        last_name: &str,
        first_name: &str,
        submitted_at: &DateTime<Utc>,
    ) -> Self {
        Self {
            event: sanitize_component(event),
            email: sanitize_component(email),
            name: name_segment(last_name, first_name),
            timestamp: submission_timestamp(submitted_at),
        }
    }

    pub fn key(&self) -> String {
        format!(
            "{SUBMISSION_KEY_PREFIX}{}:{}:{}:{}",
            self.event, self.email, self.name, self.timestamp
        )
    }

    pub fn signature_path(&self, prefix: &str, role: SignatureRole, format: ImageFormat) -> String {
        let trimmed = prefix.trim_matches('/');
        let file = format!(
            "{}-{}-{}.{}",
            self.name,
            self.timestamp,
            role.as_str(),
            format.extension()
        );
        if trimmed.is_empty() {
            format!("{}/{}/{file}", self.event, self.email)
        } else {
            format!("{trimmed}/{}/{}/{file}", self.event, self.email)
        }
    }
}

/// Lowercases and collapses everything outside `[a-z0-9]` into single dashes.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }

    if out.len() > MAX_COMPONENT_CHARS {
        out.truncate(MAX_COMPONENT_CHARS);
        while out.ends_with('-') {
            out.pop();
        }
    }

    if out.is_empty() {
        UNKNOWN_COMPONENT.to_string()
    } else {
        out
    }
}

fn name_segment(last_name: &str, first_name: &str) -> String {
    let last = sanitize_component(last_name);
    let first = sanitize_component(first_name);
    format!("{last}-{first}")
}

pub fn submission_timestamp(submitted_at: &DateTime<Utc>) -> String {
    submitted_at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

pub fn submission_key(
    event: &str,
    email: &str,
    last_name: &str,
    first_name: &str,
    submitted_at: &DateTime<Utc>,
) -> String {
    KeyParts::new(event, email, last_name, first_name, submitted_at).key()
}

pub fn event_prefix(event: &str) -> String {
    format!("{SUBMISSION_KEY_PREFIX}{}:", sanitize_component(event))
}

pub fn email_prefix(event: &str, email: &str) -> String {
    format!(
        "{SUBMISSION_KEY_PREFIX}{}:{}:",
        sanitize_component(event),
        sanitize_component(email)
    )
}

pub fn parse_submission_key(key: &str) -> Option<KeyParts> {
    let rest = key.strip_prefix(SUBMISSION_KEY_PREFIX)?;
    let mut segments = rest.split(':');
    let event = segments.next()?;
    let email = segments.next()?;
    let name = segments.next()?;
    let timestamp = segments.next()?;
    if segments.next().is_some()
        || [event, email, name, timestamp]
            .iter()
            .any(|segment| segment.is_empty())
    {
        return None;
    }

    Some(KeyParts {
        event: event.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        timestamp: timestamp.to_string(),
    })
}

/// A key written by the first worker generation: `submission_{name}_{epoch_millis}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyKey {
    pub name: String,
    pub epoch_millis: i64,
}

pub fn parse_legacy_key(key: &str) -> Option<LegacyKey> {
    let rest = key.strip_prefix(LEGACY_KEY_PREFIX)?;
    let (name, millis) = rest.rsplit_once('_')?;
    if name.is_empty() || millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(LegacyKey {
        name: name.to_string(),
        epoch_millis: millis.parse().ok()?,
    })
}

pub fn is_legacy_key(key: &str) -> bool {
    parse_legacy_key(key).is_some()
}
