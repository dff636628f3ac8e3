use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::Parser;
use consent_worker::adapters::s3::S3Namespace;
use consent_worker::config::DEFAULT_KV_PREFIX;
use consent_worker::export::{export_submissions, ExportOptions, RetryPolicy};
use consent_worker::logging::init_tracing;

/// Writes every stored submission to CSV.
#[derive(Parser)]
#[command(name = "consent_export")]
struct Args {
    /// Bucket holding the submission records
    #[arg(long, env = "CONSENT_KV_BUCKET")]
    bucket: String,
    /// Key prefix of the submission namespace
    #[arg(long, env = "CONSENT_KV_PREFIX", default_value = DEFAULT_KV_PREFIX)]
    prefix: String,
    /// Only export one event
    #[arg(long)]
    event: Option<String>,
    /// Output file; stdout when omitted
    #[arg(long)]
    output: Option<PathBuf>,
    /// Keys listed per page
    #[arg(long, default_value_t = 200)]
    page_size: usize,
    /// Attempts per read before a record counts as failed
    #[arg(long, default_value_t = 4)]
    max_attempts: u32,
    /// Delay before the first retry, doubled after each failure
    #[arg(long, default_value_t = 250)]
    base_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let kv = S3Namespace::new(aws_sdk_s3::Client::new(&aws_config), args.bucket, &args.prefix);
    let options = ExportOptions {
        event: args.event,
        page_size: args.page_size,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            base_delay: Duration::from_millis(args.base_delay_ms),
        },
    };

    let output: Box<dyn Write> = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(file),
            Err(error) => {
                eprintln!("Failed to create {}: {error}", path.display());
                exit(1);
            }
        },
        None => Box::new(io::stdout().lock()),
    };

    match export_submissions(&kv, &options, output) {
        Ok(summary) => {
            eprintln!(
                "Exported {} submissions ({} skipped, {} failed)",
                summary.exported, summary.skipped, summary.failed
            );
            if summary.failed > 0 {
                exit(2);
            }
        }
        Err(error) => {
            eprintln!("Export failed: {error}");
            exit(1);
        }
    }
}
