use chrono::Utc;
use consent_worker::adapters::s3::S3Namespace;
use consent_worker::config::WorkerConfig;
use consent_worker::handlers::http::ApiGatewayResponse;
use consent_worker::handlers::router::handle_http_event;
use consent_worker::handlers::HandlerContext;
use consent_worker::logging::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct RuntimeDependencies {
    config: WorkerConfig,
    kv: S3Namespace,
    signatures: S3Namespace,
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: &RuntimeDependencies,
) -> Result<ApiGatewayResponse, Error> {
    let ctx = HandlerContext {
        config: &deps.config,
        now: Utc::now(),
    };
    Ok(handle_http_event(
        event.payload,
        &ctx,
        &deps.kv,
        &deps.signatures,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = WorkerConfig::from_env().map_err(|error| Error::from(error.to_string()))?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = aws_sdk_s3::Client::new(&aws_config);
    let deps = RuntimeDependencies {
        kv: S3Namespace::new(client.clone(), config.kv_bucket.clone(), &config.kv_prefix),
        signatures: S3Namespace::bucket_root(client, config.signature_bucket.clone()),
        config,
    };

    tracing::info!(
        component = "consent_runtime",
        event = "runtime_started",
        kv_bucket = %deps.config.kv_bucket,
        signature_bucket = %deps.config.signature_bucket,
        admin_enabled = deps.config.admin_token.is_some(),
    );

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event| handle_request(event, deps))).await
}
