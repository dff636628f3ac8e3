//! Offline CSV export of stored submissions.

use std::io::Write;
use std::thread;
use std::time::Duration;

use consent_core::contract::SubmissionRecord;
use consent_core::storage_keys::{event_prefix, SUBMISSION_KEY_PREFIX};
use serde::Serialize;

use crate::adapters::{KeyValueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to list submissions: {0}")]
    List(#[from] StoreError),
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush csv output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Runs `operation` until it succeeds or the attempts run out, doubling the
    /// delay after every failure.
    pub fn run<T, E: std::fmt::Display>(
        &self,
        label: &str,
        mut operation: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if attempt < attempts => {
                    tracing::warn!(
                        component = "export",
                        event = "retrying",
                        operation = label,
                        attempt,
                        error = %error,
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub event: Option<String>,
    pub page_size: usize,
    pub retry: RetryPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            event: None,
            page_size: 200,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    key: &'a str,
    event: &'a str,
    submitted_at: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    age_years: Option<u32>,
    is_minor: bool,
    guardian_name: Option<&'a str>,
    media_consent: bool,
    signature_path: &'a str,
}

impl<'a> From<&'a SubmissionRecord> for ExportRow<'a> {
    fn from(record: &'a SubmissionRecord) -> Self {
        Self {
            key: &record.key,
            event: &record.event,
            submitted_at: &record.submitted_at,
            first_name: &record.first_name,
            last_name: &record.last_name,
            email: &record.email,
            age_years: record.age_years,
            is_minor: record.is_minor,
            guardian_name: record.guardian_name.as_deref(),
            media_consent: record.media_consent,
            signature_path: &record.signature_path,
        }
    }
}

pub fn export_submissions(
    kv: &dyn KeyValueStore,
    options: &ExportOptions,
    output: impl Write,
) -> Result<ExportSummary, ExportError> {
    let prefix = options
        .event
        .as_deref()
        .map(event_prefix)
        .unwrap_or_else(|| SUBMISSION_KEY_PREFIX.to_string());
    let mut writer = csv::Writer::from_writer(output);
    let mut summary = ExportSummary::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = options.retry.run("list", || {
            kv.list(&prefix, cursor.as_deref(), options.page_size.max(1))
        })?;

        for key in &page.keys {
            let body = match options.retry.run("get", || kv.get(key)) {
                Ok(Some(body)) => body,
                Ok(None) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(error) => {
                    tracing::error!(
                        component = "export",
                        event = "record_read_failed",
                        key = %key,
                        error = %error,
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            match serde_json::from_slice::<SubmissionRecord>(&body) {
                Ok(record) => {
                    writer.serialize(ExportRow::from(&record))?;
                    summary.exported += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        component = "export",
                        event = "record_unreadable",
                        key = %key,
                        error = %error,
                    );
                    summary.skipped += 1;
                }
            }
        }

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    writer.flush()?;
    tracing::info!(
        component = "export",
        event = "export_completed",
        exported = summary.exported,
        skipped = summary.skipped,
        failed = summary.failed,
    );
    Ok(summary)
}
