// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry streaming pipeline CLI
//!
//! Reads newline-delimited JSON records from a file or stdin and runs them
//! through the configured pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Using configuration file, records from stdin
//! tail -F records.jsonl | telemetry-stream --config pipeline.toml
//!
//! # Ad-hoc interest rules (source:node[:key], can repeat)
//! telemetry-stream --input records.jsonl --interest src1:nodeA:temperature
//!
//! # Generate and check a configuration file
//! telemetry-stream gen-config --output pipeline.toml
//! telemetry-stream validate --config pipeline.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_stream::config::{
    BatchingConfig, DeliveryConfig, OutputConfig, ProcessingConfig, RemoteConfig,
};
use telemetry_stream::{
    ConfigError, InterestRule, LineConsumer, OutputAction, Pipeline, PipelineConfig,
    PipelineStats, PipelineStatsSnapshot, ProcessingMode, RemoteTransport, TcpRemoteTransport,
};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Telemetry streaming pipeline
#[derive(Parser, Debug)]
#[command(name = "telemetry-stream")]
#[command(about = "Telemetry streaming pipeline - projection, aggregation and batched delivery")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file of newline-delimited records (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Additional interest rules (format: "source:node[:key]", can repeat)
    #[arg(long, value_delimiter = ',')]
    interest: Option<Vec<String>>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    if config.interests.is_empty() {
        tracing::warn!("No interest rules configured, every record will be skipped");
    }

    let remote = match &config.output.remote {
        Some(remote) if config.output.action.sends() => {
            let transport: Arc<dyn RemoteTransport> =
                Arc::new(TcpRemoteTransport::from_config(remote));
            Some(transport)
        }
        _ => None,
    };

    let pipeline = Pipeline::new(&config, remote)?;

    eprintln!("Telemetry Stream v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("=====================================");
    eprintln!("Pipeline: {}", pipeline.name());
    eprintln!("Interests: {}", config.interests.len());
    eprintln!("Mode: {:?}", config.processing.mode);
    eprintln!("Output: {:?}", config.output.action);
    eprintln!();
    eprintln!("Press Ctrl+C to stop...");
    eprintln!();

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nShutting down...");
                cancel.cancel();
            }
        });
    }

    let stats_interval = config.delivery.stats_interval_secs;
    if stats_interval > 0 {
        let stats = pipeline.stats();
        let cancel = cancel.clone();
        tokio::spawn(report_stats(stats, Duration::from_secs(stats_interval), cancel));
    }

    let manual_commit = config.delivery.manual_commit;
    let snapshot = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            let topic = path.display().to_string();
            let mut consumer = LineConsumer::new(topic, BufReader::new(file), manual_commit);
            pipeline.run(&mut consumer, &cancel).await
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            let mut consumer = LineConsumer::new("stdin", stdin, manual_commit);
            pipeline.run(&mut consumer, &cancel).await
        }
    };
    cancel.cancel();

    eprintln!("\nFinal Statistics:");
    print_stats(&snapshot);

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<PipelineConfig, ConfigError> {
    let mut config = match args.config {
        Some(ref path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    for text in args.interest.iter().flatten() {
        config.add_interest(parse_interest(text)?);
    }

    if let Some(interval) = args.stats_interval {
        config.delivery.stats_interval_secs = interval;
    }

    config.validate()?;
    Ok(config)
}

fn parse_interest(text: &str) -> Result<InterestRule, ConfigError> {
    let parts: Vec<&str> = text.splitn(3, ':').collect();
    match parts.as_slice() {
        [source, node] => Ok(InterestRule::new(*source, *node)),
        [source, node, key] => Ok(InterestRule::new(*source, *node).key(*key)),
        _ => Err(ConfigError::Invalid(format!(
            "Invalid interest format: {} (expected source:node[:key])",
            text
        ))),
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig {
        name: "example-pipeline".into(),
        log_level: "info".into(),
        interests: vec![
            InterestRule::new("src1", "nodeA").key("temperature"),
            InterestRule::new("src1", "nodeA").key("humidity"),
            InterestRule::new("src2", "pressure"),
        ],
        processing: ProcessingConfig {
            mode: ProcessingMode::Aggregation,
            window_secs: 60,
        },
        batching: BatchingConfig {
            enabled: true,
            max_batch_size: 100,
            flush_interval_secs: 5,
        },
        output: OutputConfig {
            action: OutputAction::LogAndSend,
            log_payloads: false,
            remote: Some(RemoteConfig::new("127.0.0.1:9400")),
        },
        delivery: DeliveryConfig::default(),
    };

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# Telemetry Stream Configuration
# Generated by telemetry-stream gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match PipelineConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Pipeline: {}", config.name);
            println!(
                "Processing: {:?} (window {}s)",
                config.processing.mode, config.processing.window_secs
            );
            if config.batching.enabled {
                println!(
                    "Batching: {} measurements / {}s",
                    config.batching.max_batch_size, config.batching.flush_interval_secs
                );
            }
            println!("Output: {:?}", config.output.action);
            println!("Interests: {}", config.interests.len());
            for (i, rule) in config.interests.iter().enumerate() {
                println!(
                    "  [{}] {} / {} -> {}",
                    i,
                    rule.source,
                    rule.node_name,
                    rule.measurement_key().unwrap_or("(whole value)")
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn report_stats(stats: Arc<PipelineStats>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => print_stats(&stats.snapshot()),
        }
    }
}

fn print_stats(stats: &PipelineStatsSnapshot) {
    eprintln!("--- Pipeline Statistics ---");
    eprintln!(
        "  {} records ({:.1} rec/s), {} committed, {} skipped, {} measurements",
        stats.records_received,
        stats.records_per_second(),
        stats.records_committed,
        stats.records_skipped,
        stats.measurements_projected
    );
    eprintln!(
        "  {} transient errors, {} restarts, uptime {}s",
        stats.transient_errors, stats.restarts, stats.uptime_secs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interest() {
        let rule = parse_interest("src1:nodeA:temperature").expect("rule");
        assert_eq!(rule.source, "src1");
        assert_eq!(rule.node_name, "nodeA");
        assert_eq!(rule.measurement_key(), Some("temperature"));

        let rule = parse_interest("src1:nodeA").expect("rule");
        assert_eq!(rule.measurement_key(), None);

        assert!(parse_interest("src1").is_err());
    }
}
