use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::adapters::{BlobStore, KeyValueStore};
use crate::handlers::admin::{handle_delete, handle_get, handle_lookup, LookupQuery};
use crate::handlers::http::{
    error_response, no_content_response, normalize_event, not_found_response,
    validation_error_response, ApiGatewayResponse, HttpRequest,
};
use crate::handlers::migrate::handle_migrate;
use crate::handlers::submit::handle_submit;
use crate::handlers::HandlerContext;

/// Entry point for every proxy event the worker receives.
pub fn handle_http_event(
    event: Value,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    let response = match normalize_event(event) {
        Ok(request) => route(&request, ctx, kv, blobs),
        Err(message) => validation_error_response(&message),
    };
    response.with_cors(&ctx.config.allowed_origin)
}

pub fn route(
    request: &HttpRequest,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    if request.method == "OPTIONS" {
        return no_content_response();
    }

    let segments = request.segments();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let method = request.method.as_str();

    match segments.as_slice() {
        ["submit"] => match method {
            "POST" => handle_submit(request.body.as_deref(), ctx, kv, blobs),
            _ => method_not_allowed(method, "POST"),
        },
        ["admin", rest @ ..] => {
            if let Err(response) = authorize(request, ctx) {
                return response;
            }
            route_admin(rest, method, request, ctx, kv, blobs)
        }
        _ => not_found_response(&format!("No route for {method} {}", request.path)),
    }
}

fn route_admin(
    segments: &[&str],
    method: &str,
    request: &HttpRequest,
    ctx: &HandlerContext<'_>,
    kv: &dyn KeyValueStore,
    blobs: &dyn BlobStore,
) -> ApiGatewayResponse {
    match segments {
        ["submissions"] => match method {
            "GET" => match lookup_query(request) {
                Ok(query) => handle_lookup(&query, ctx, kv),
                Err(message) => validation_error_response(&message),
            },
            _ => method_not_allowed(method, "GET"),
        },
        ["submissions", key] => match method {
            "GET" => handle_get(key, flag(request, "include_signature"), kv, blobs),
            "DELETE" => handle_delete(key, kv, blobs),
            _ => method_not_allowed(method, "GET, DELETE"),
        },
        ["migrate"] => match method {
            "POST" => handle_migrate(request.body.as_deref(), ctx, kv, blobs),
            _ => method_not_allowed(method, "POST"),
        },
        _ => not_found_response(&format!("No route for {method} {}", request.path)),
    }
}

fn authorize(request: &HttpRequest, ctx: &HandlerContext<'_>) -> Result<(), ApiGatewayResponse> {
    let Some(expected) = ctx.config.admin_token.as_deref() else {
        return Err(error_response(
            500,
            json!({
                "error": "misconfiguration",
                "message": "ADMIN_TOKEN must be configured",
            }),
        ));
    };

    let presented = request
        .header("authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if digest(token) == digest(expected) => Ok(()),
        _ => {
            tracing::warn!(
                component = "router",
                event = "admin_unauthorized",
                path = %request.path,
            );
            Err(error_response(
                401,
                json!({
                    "error": "unauthorized",
                    "message": "A valid admin bearer token is required",
                }),
            ))
        }
    }
}

// Compares fixed-length digests instead of the raw tokens.
fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

fn lookup_query(request: &HttpRequest) -> Result<LookupQuery, String> {
    let limit = request
        .query_param("limit")
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|_| format!("limit must be a positive integer, got '{raw}'"))
        })
        .transpose()?;

    Ok(LookupQuery {
        email: request.query_param("email").map(str::to_string),
        name: request.query_param("name").map(str::to_string),
        event: request.query_param("event").map(str::to_string),
        limit,
        cursor: request.query_param("cursor").map(str::to_string),
    })
}

fn flag(request: &HttpRequest, name: &str) -> bool {
    request
        .query_param(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn method_not_allowed(method: &str, allowed: &str) -> ApiGatewayResponse {
    error_response(
        405,
        json!({
            "error": "method_not_allowed",
            "message": format!("{method} is not allowed; expected {allowed}"),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::config::WorkerConfig;

    fn event(method: &str, path: &str, token: Option<&str>) -> Value {
        let mut headers = serde_json::Map::new();
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), Value::from(format!("Bearer {token}")));
        }
        json!({
            "httpMethod": method,
            "path": path,
            "headers": headers,
            "body": null
        })
    }

    fn dispatch(event: Value, config: &WorkerConfig) -> ApiGatewayResponse {
        let kv = MemoryStore::new();
        let blobs = MemoryStore::new();
        let ctx = HandlerContext {
            config,
            now: chrono::Utc::now(),
        };
        handle_http_event(event, &ctx, &kv, &blobs)
    }

    fn admin_config() -> WorkerConfig {
        WorkerConfig {
            admin_token: Some("s3cret".to_string()),
            allowed_origin: "https://forms.example".to_string(),
            ..WorkerConfig::local()
        }
    }

    #[test]
    fn preflight_returns_cors_headers() {
        let response = dispatch(event("OPTIONS", "/submit", None), &admin_config());
        assert_eq!(response.status_code, 204);
        assert_eq!(
            response.headers["Access-Control-Allow-Origin"],
            "https://forms.example"
        );
    }

    #[test]
    fn unknown_route_is_not_found() {
        let response = dispatch(event("GET", "/nope", None), &admin_config());
        assert_eq!(response.status_code, 404);
    }

    #[test]
    fn wrong_method_is_rejected() {
        let response = dispatch(event("GET", "/submit", None), &admin_config());
        assert_eq!(response.status_code, 405);
    }

    #[test]
    fn admin_routes_require_token() {
        let missing = dispatch(event("GET", "/admin/submissions", None), &admin_config());
        assert_eq!(missing.status_code, 401);

        let wrong = dispatch(
            event("GET", "/admin/submissions", Some("guess")),
            &admin_config(),
        );
        assert_eq!(wrong.status_code, 401);

        let ok = dispatch(
            event("GET", "/admin/submissions", Some("s3cret")),
            &admin_config(),
        );
        assert_eq!(ok.status_code, 200);
    }

    #[test]
    fn admin_routes_refuse_without_configured_token() {
        let response = dispatch(
            event("GET", "/admin/submissions", Some("anything")),
            &WorkerConfig::local(),
        );
        assert_eq!(response.status_code, 500);
        assert_eq!(response.json_body()["error"], "misconfiguration");
    }

    #[test]
    fn rejects_non_numeric_limit() {
        let mut lookup = event("GET", "/admin/submissions", Some("s3cret"));
        lookup["queryStringParameters"] = json!({"limit": "ten"});
        let response = dispatch(lookup, &admin_config());
        assert_eq!(response.status_code, 400);
    }
}
