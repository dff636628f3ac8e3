use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    pub fn json_body(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }

    pub fn with_cors(mut self, allowed_origin: &str) -> Self {
        if let Value::Object(headers) = &mut self.headers {
            insert_cors_headers(headers, allowed_origin);
        }
        self
    }
}

/// A proxy event reduced to what the router needs. Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn segments(&self) -> Vec<String> {
        self.path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(percent_decode)
            .collect()
    }
}

/// Normalizes API Gateway REST (v1) and HTTP API (v2) proxy events.
pub fn normalize_event(event: Value) -> Result<HttpRequest, String> {
    let Some(object) = event.as_object() else {
        return Err("Request payload must be a JSON object".to_string());
    };

    let method = object
        .get("httpMethod")
        .and_then(Value::as_str)
        .or_else(|| {
            object
                .get("requestContext")
                .and_then(|context| context.get("http"))
                .and_then(|http| http.get("method"))
                .and_then(Value::as_str)
        })
        .ok_or_else(|| "Request is missing an HTTP method".to_string())?
        .to_ascii_uppercase();

    let raw_path = object
        .get("rawPath")
        .or_else(|| object.get("path"))
        .and_then(Value::as_str)
        .unwrap_or("/");
    let path = format!("/{}", raw_path.trim_matches('/'));

    let headers = string_map(object.get("headers"))
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect();
    let query = string_map(object.get("queryStringParameters"));

    let is_base64 = object
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let body = match object.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if is_base64 => {
            let bytes = STANDARD
                .decode(text.as_bytes())
                .map_err(|error| format!("Malformed base64 body: {error}"))?;
            Some(
                String::from_utf8(bytes)
                    .map_err(|error| format!("Request body must be UTF-8: {error}"))?,
            )
        }
        Some(Value::String(text)) => Some(text.clone()),
        Some(other @ Value::Object(_)) => Some(other.to_string()),
        Some(_) => return Err("Request body must be a JSON object".to_string()),
    };

    Ok(HttpRequest {
        method,
        path,
        headers,
        query,
        body,
    })
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|text| (name.clone(), text.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let high = char::from(bytes[index + 1]).to_digit(16);
            let low = char::from(bytes[index + 2]).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                out.push((high * 16 + low) as u8);
                index += 3;
                continue;
            }
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn parse_json_body<T: serde::de::DeserializeOwned>(body: Option<&str>) -> Result<T, String> {
    match body.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => {
            serde_json::from_str(text).map_err(|error| format!("Malformed JSON body: {error}"))
        }
        None => serde_json::from_value(json!({}))
            .map_err(|error| format!("Malformed JSON body: {error}")),
    }
}

fn insert_cors_headers(headers: &mut Map<String, Value>, allowed_origin: &str) {
    headers.insert(
        "Access-Control-Allow-Origin".to_string(),
        Value::from(allowed_origin),
    );
    headers.insert(
        "Access-Control-Allow-Methods".to_string(),
        Value::from("GET,POST,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers".to_string(),
        Value::from("Content-Type,Authorization"),
    );
}

pub fn success_response(status_code: u16, payload: impl Serialize) -> ApiGatewayResponse {
    match serde_json::to_string(&payload) {
        Ok(body) => ApiGatewayResponse {
            status_code,
            headers: json!({"Content-Type": "application/json"}),
            body,
        },
        Err(error) => error_response(
            500,
            json!({
                "error": "serialization_error",
                "message": error.to_string(),
            }),
        ),
    }
}

pub fn error_response(status_code: u16, payload: Value) -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code,
        headers: json!({"Content-Type": "application/json"}),
        body: payload.to_string(),
    }
}

pub fn validation_error_response(message: &str) -> ApiGatewayResponse {
    error_response(
        400,
        json!({
            "error": "validation_error",
            "message": message,
        }),
    )
}

pub fn not_found_response(message: &str) -> ApiGatewayResponse {
    error_response(
        404,
        json!({
            "error": "not_found",
            "message": message,
        }),
    )
}

pub fn storage_error_response(message: &str) -> ApiGatewayResponse {
    error_response(
        502,
        json!({
            "error": "storage_error",
            "message": message,
        }),
    )
}

pub fn no_content_response() -> ApiGatewayResponse {
    ApiGatewayResponse {
        status_code: 204,
        headers: json!({}),
        body: String::new(),
    }
}
