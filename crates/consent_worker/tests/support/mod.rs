#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use consent_core::signature::{encode_data_url, ImageFormat};
use consent_worker::adapters::memory::MemoryStore;
use consent_worker::config::WorkerConfig;
use consent_worker::handlers::http::ApiGatewayResponse;
use consent_worker::handlers::router::handle_http_event;
use consent_worker::handlers::HandlerContext;
use serde_json::{json, Value};

pub const ADMIN_TOKEN: &str = "integration-token";
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\nintegration-strokes";

pub struct Harness {
    pub config: WorkerConfig,
    pub kv: MemoryStore,
    pub blobs: MemoryStore,
    pub now: DateTime<Utc>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig {
                admin_token: Some(ADMIN_TOKEN.to_string()),
                ..WorkerConfig::local()
            },
            kv: MemoryStore::new(),
            blobs: MemoryStore::new(),
            now: Utc
                .with_ymd_and_hms(2026, 5, 20, 9, 30, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    pub fn send(&self, event: Value) -> ApiGatewayResponse {
        let ctx = HandlerContext {
            config: &self.config,
            now: self.now,
        };
        handle_http_event(event, &ctx, &self.kv, &self.blobs)
    }

    pub fn submit(&self, body: Value) -> ApiGatewayResponse {
        self.send(json!({
            "httpMethod": "POST",
            "path": "/submit",
            "headers": {"Content-Type": "application/json"},
            "body": body.to_string(),
        }))
    }

    pub fn admin(&self, method: &str, path: &str, query: Value, body: Option<Value>) -> ApiGatewayResponse {
        self.send(json!({
            "requestContext": {"http": {"method": method}},
            "rawPath": path,
            "headers": {"authorization": format!("Bearer {ADMIN_TOKEN}")},
            "queryStringParameters": query,
            "body": body.map(|value| value.to_string()),
        }))
    }
}

pub fn signature_data_url() -> String {
    encode_data_url(ImageFormat::Png, PNG)
}

pub fn adult_submission() -> Value {
    json!({
        "firstName": "Jane",
        "lastName": "Doe",
        "email": "Jane@Example.com",
        "dateOfBirth": "1990-04-12",
        "event": "Spring Gala",
        "emergencyContactName": "John Doe",
        "emergencyContactPhone": "+1 555 010 3000",
        "signature": signature_data_url(),
        "agreeTerms": true,
        "mediaConsent": true
    })
}
