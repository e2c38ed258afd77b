// src/main.rs

use anyhow::Context;
use clap::Parser;
use hubspot_tap::{
    hubspot_catalog, open_output, AppError, BearerTokenAuth, CommandLineInput, HubSpotHttpClient,
    JsonLinesSink, Pipeline, PipelineConfig, PipelineReport,
};
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    append::file::FileAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sets up logging configuration.
///
/// Stdout carries the record stream, so console logging goes to stderr.
fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_file_path = std::env::temp_dir().join("hubspot_tap.log");
    if let Some(parent) = log_file_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pattern = if verbose {
        "{d(%Y-%m-%d %H:%M:%S)} [{l}] - {m}{n}"
    } else {
        "{m}{n}"
    };

    let stderr_appender = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}] - {m}{n}",
        )))
        .build(&log_file_path)?;

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr_appender)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Debug)))
                .build("file", Box::new(file_appender)),
        )
        .build(
            Root::builder()
                .appender("stderr")
                .appender("file")
                .build(log_level),
        )?;

    log4rs::init_config(config)?;
    log::debug!("Logging initialized. Log file: {}", log_file_path.display());
    Ok(())
}

/// Runs the HubSpot catalog against the live API and streams records out.
async fn execute_pipeline(
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<PipelineReport, AppError> {
    let client = Arc::new(HubSpotHttpClient::new(&config.pool)?);
    let auth = Arc::new(
        BearerTokenAuth::new(config.access_token.clone()).with_user_agent(config.user_agent.clone()),
    );
    let graph = hubspot_catalog(&config.catalog)?;

    log::info!(
        "Extracting from {} ({} stages)",
        config.api_base_url,
        graph.stages().len()
    );

    let pipeline = Pipeline::new(graph, config.api_base_url.clone(), client.clone(), auth)
        .with_selection(config.selection.clone());
    let mut sink = JsonLinesSink::new(open_output(config.output_file.as_deref())?);

    let result = pipeline.run(&mut sink, cancel).await;

    let stats = client.stats().snapshot();
    log::info!(
        "HTTP: {} requests, {} rate limited, {} failed, {}ms average latency",
        stats.requests,
        stats.rate_limited,
        stats.failed,
        stats.average_latency_ms
    );
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLineInput::parse();

    setup_logging(cli.verbose)
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))?;

    let config = PipelineConfig::resolve(cli).context("invalid configuration")?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after in-flight requests are dropped");
            trigger.cancel();
        }
    });

    execute_pipeline(&config, &cancel)
        .await
        .context("extraction failed")?;

    Ok(())
}
