use consent_core::signature::DEFAULT_MAX_SIGNATURE_BYTES;

pub const DEFAULT_KV_PREFIX: &str = "consent-kv";
pub const DEFAULT_SIGNATURE_PREFIX: &str = "signatures";
pub const DEFAULT_EVENT: &str = "general";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub kv_bucket: String,
    pub kv_prefix: String,
    pub signature_bucket: String,
    pub signature_prefix: String,
    pub admin_token: Option<String>,
    pub default_event: String,
    pub allowed_origin: String,
    pub max_signature_bytes: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let kv_bucket = read("CONSENT_KV_BUCKET").ok_or(ConfigError::Missing("CONSENT_KV_BUCKET"))?;
        let max_signature_bytes = match read("MAX_SIGNATURE_BYTES") {
            Some(raw) => parse_positive("MAX_SIGNATURE_BYTES", &raw)?,
            None => DEFAULT_MAX_SIGNATURE_BYTES,
        };

        Ok(Self {
            signature_bucket: read("SIGNATURE_BUCKET").unwrap_or_else(|| kv_bucket.clone()),
            kv_bucket,
            kv_prefix: read("CONSENT_KV_PREFIX").unwrap_or_else(|| DEFAULT_KV_PREFIX.to_string()),
            signature_prefix: read("SIGNATURE_PREFIX")
                .unwrap_or_else(|| DEFAULT_SIGNATURE_PREFIX.to_string()),
            admin_token: read("ADMIN_TOKEN"),
            default_event: read("DEFAULT_EVENT").unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            allowed_origin: read("ALLOWED_ORIGIN")
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string()),
            max_signature_bytes,
        })
    }

    /// Configuration for tests and local runs against in-memory stores.
    pub fn local() -> Self {
        Self {
            kv_bucket: "local-bucket".to_string(),
            kv_prefix: DEFAULT_KV_PREFIX.to_string(),
            signature_bucket: "local-bucket".to_string(),
            signature_prefix: DEFAULT_SIGNATURE_PREFIX.to_string(),
            admin_token: None,
            default_event: DEFAULT_EVENT.to_string(),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            max_signature_bytes: DEFAULT_MAX_SIGNATURE_BYTES,
        }
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be a positive integer".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(error) => Err(ConfigError::Invalid {
            name,
            reason: error.to_string(),
        }),
    }
}
