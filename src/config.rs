// src/config.rs
//! Command line and settings resolution.
//!
//! Precedence, lowest first: built-in defaults, the JSON settings file,
//! the `HUBSPOT_ACCESS_TOKEN` environment variable, command-line flags.

use crate::api::{PoolConfig, QueryFilters};
use crate::constants::{
    CAMPAIGN_FANOUT_BATCH_SIZE, DEFAULT_API_BASE_URL, DEFAULT_RATE_LIMIT_DELAY,
    DEFAULT_TRANSIENT_ATTEMPTS, MAX_BATCH_SIZE, RECIPIENT_FANOUT_BATCH_SIZE,
    SUBSCRIPTION_RATE_LIMIT_DELAY,
};
use crate::error::AppError;
use crate::error_recovery::RetryPolicy;
use crate::streams::CatalogSettings;
use crate::types::{AccessToken, EpochMillis, RecordCap, StageName, ValidatedUrl, ValidationError};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the private app token.
pub const ACCESS_TOKEN_ENV: &str = "HUBSPOT_ACCESS_TOKEN";

/// Parsed command-line input.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineInput {
    /// JSON settings file (tap settings keys such as access_token, campaigns_limit)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Private app access token (overrides the settings file and HUBSPOT_ACCESS_TOKEN)
    #[arg(long)]
    pub access_token: Option<String>,

    /// API root URL
    #[arg(long)]
    pub api_base_url: Option<String>,

    /// Maximum campaigns to extract (-1 = unlimited)
    #[arg(long, allow_negative_numbers = true)]
    pub campaigns_limit: Option<i64>,

    /// Maximum email events to extract (-1 = unlimited)
    #[arg(long, allow_negative_numbers = true)]
    pub email_events_limit: Option<i64>,

    /// Only events at or after this time (epoch millis or RFC 3339)
    #[arg(long)]
    pub start_timestamp: Option<String>,

    /// Only events before this time (epoch millis or RFC 3339)
    #[arg(long)]
    pub end_timestamp: Option<String>,

    /// Only events of this type (e.g. OPEN, CLICK, DELIVERED)
    #[arg(long)]
    pub event_type: Option<String>,

    /// Whether to exclude events HubSpot has filtered out
    #[arg(long)]
    pub exclude_filtered_events: Option<bool>,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Emit only these stages (repeatable); their ancestors still run
    #[arg(short, long = "select")]
    pub select: Vec<String>,

    /// Write records to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Keys per concurrent batch for campaign detail lookups
    #[arg(long, default_value_t = CAMPAIGN_FANOUT_BATCH_SIZE)]
    pub details_batch_size: usize,

    /// Keys per concurrent batch for per-campaign event queries
    #[arg(long, default_value_t = CAMPAIGN_FANOUT_BATCH_SIZE)]
    pub events_batch_size: usize,

    /// Keys per concurrent batch for subscription lookups
    #[arg(long, default_value_t = RECIPIENT_FANOUT_BATCH_SIZE)]
    pub subscription_batch_size: usize,

    /// Wait after a 429 response, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_DELAY.as_millis() as u64)]
    pub rate_limit_delay_ms: u64,

    /// Wait after a 429 from the subscriptions endpoint, in milliseconds
    #[arg(long, default_value_t = SUBSCRIPTION_RATE_LIMIT_DELAY.as_millis() as u64)]
    pub subscription_rate_limit_delay_ms: u64,

    /// Give up after this many consecutive 429s (default: never)
    #[arg(long)]
    pub max_rate_limit_retries: Option<u32>,

    /// Attempts for connection errors, timeouts and 5xx responses
    #[arg(long, default_value_t = DEFAULT_TRANSIENT_ATTEMPTS)]
    pub transient_attempts: u32,

    /// First backoff after a transient failure, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,

    /// Backoff ceiling, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub backoff_cap_ms: u64,

    /// Random jitter added to every wait, up to this many milliseconds
    #[arg(long, default_value_t = 0)]
    pub jitter_ms: u64,

    /// Whole-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,
}

/// A timestamp setting given either as epoch millis or as text.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TimestampSetting {
    Millis(i64),
    Text(String),
}

impl TimestampSetting {
    fn resolve(&self) -> Result<EpochMillis, ValidationError> {
        match self {
            Self::Millis(ms) => Ok(EpochMillis::new(*ms)),
            Self::Text(text) => EpochMillis::parse(text),
        }
    }
}

/// The JSON settings file. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SettingsFile {
    pub access_token: Option<String>,
    pub api_base_url: Option<String>,
    pub campaigns_limit: Option<i64>,
    pub email_events_limit: Option<i64>,
    pub email_events_start_timestamp: Option<TimestampSetting>,
    pub email_events_end_timestamp: Option<TimestampSetting>,
    pub email_events_type: Option<String>,
    pub email_events_exclude_filtered_events: Option<bool>,
    pub user_agent: Option<String>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| AppError::ConfigFileParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved configuration, validated and ready to build a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub access_token: AccessToken,
    pub api_base_url: ValidatedUrl,
    pub user_agent: Option<String>,
    pub catalog: CatalogSettings,
    pub selection: Vec<StageName>,
    pub pool: PoolConfig,
    pub output_file: Option<PathBuf>,
    pub verbose: bool,
}

impl PipelineConfig {
    /// Resolves a complete configuration from CLI input, the settings file
    /// and the process environment.
    pub fn resolve(cli: CommandLineInput) -> Result<Self, AppError> {
        let settings = match &cli.config {
            Some(path) => SettingsFile::load(path)?,
            None => SettingsFile::default(),
        };
        let env_token = std::env::var(ACCESS_TOKEN_ENV).ok();
        Self::from_sources(cli, settings, env_token)
    }

    /// Merges already-loaded sources.
    pub fn from_sources(
        cli: CommandLineInput,
        settings: SettingsFile,
        env_token: Option<String>,
    ) -> Result<Self, AppError> {
        let token = cli
            .access_token
            .or(env_token)
            .or(settings.access_token)
            .ok_or_else(|| {
                AppError::MissingConfiguration(format!(
                    "access token not set; use --access-token, {} or the settings file",
                    ACCESS_TOKEN_ENV
                ))
            })?;
        let access_token = AccessToken::new(token)?;

        let api_base_url = ValidatedUrl::parse(
            cli.api_base_url
                .as_deref()
                .or(settings.api_base_url.as_deref())
                .unwrap_or(DEFAULT_API_BASE_URL),
        )?;

        let campaigns_limit =
            RecordCap::from_setting(cli.campaigns_limit.or(settings.campaigns_limit).unwrap_or(-1))?;
        let email_events_limit = RecordCap::from_setting(
            cli.email_events_limit
                .or(settings.email_events_limit)
                .unwrap_or(-1),
        )?;

        let start_timestamp = match &cli.start_timestamp {
            Some(text) => Some(EpochMillis::parse(text)?),
            None => settings
                .email_events_start_timestamp
                .as_ref()
                .map(TimestampSetting::resolve)
                .transpose()?,
        };
        let end_timestamp = match &cli.end_timestamp {
            Some(text) => Some(EpochMillis::parse(text)?),
            None => settings
                .email_events_end_timestamp
                .as_ref()
                .map(TimestampSetting::resolve)
                .transpose()?,
        };
        if let (Some(start), Some(end)) = (start_timestamp, end_timestamp) {
            if start > end {
                return Err(ValidationError::InvertedTimeRange {
                    start: start.as_millis(),
                    end: end.as_millis(),
                }
                .into());
            }
        }

        let event_filters = QueryFilters {
            start_timestamp,
            end_timestamp,
            event_type: cli
                .event_type
                .or(settings.email_events_type)
                .filter(|t| !t.trim().is_empty()),
            exclude_filtered_events: cli
                .exclude_filtered_events
                .or(settings.email_events_exclude_filtered_events),
        };

        let details_batch_size = check_batch_size(cli.details_batch_size)?;
        let events_batch_size = check_batch_size(cli.events_batch_size)?;
        let recipient_batch_size = check_batch_size(cli.subscription_batch_size)?;
        if cli.transient_attempts == 0 {
            return Err(ValidationError::OutOfBounds {
                value: 0,
                min: 1,
                max: u32::MAX as u64,
            }
            .into());
        }

        let retry = RetryPolicy {
            rate_limit_delay: Duration::from_millis(cli.rate_limit_delay_ms),
            max_rate_limit_retries: cli.max_rate_limit_retries,
            transient_attempts: cli.transient_attempts,
            transient_backoff: Duration::from_millis(cli.backoff_ms),
            transient_backoff_cap: Duration::from_millis(cli.backoff_cap_ms.max(cli.backoff_ms)),
            jitter: Duration::from_millis(cli.jitter_ms),
        };

        let selection = cli
            .select
            .iter()
            .map(StageName::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PipelineConfig {
            access_token,
            api_base_url,
            user_agent: cli.user_agent.or(settings.user_agent),
            catalog: CatalogSettings {
                campaigns_limit,
                email_events_limit,
                event_filters,
                retry,
                details_batch_size,
                events_batch_size,
                recipient_batch_size,
                subscription_rate_limit_delay: Duration::from_millis(
                    cli.subscription_rate_limit_delay_ms,
                ),
            },
            selection,
            pool: PoolConfig::default()
                .with_request_timeout(Duration::from_secs(cli.request_timeout_secs.max(1))),
            output_file: cli.output,
            verbose: cli.verbose,
        })
    }
}

fn check_batch_size(size: usize) -> Result<usize, ValidationError> {
    if (1..=MAX_BATCH_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(ValidationError::OutOfBounds {
            value: size as u64,
            min: 1,
            max: MAX_BATCH_SIZE as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CommandLineInput {
        let mut argv = vec!["hubspot-tap"];
        argv.extend_from_slice(args);
        CommandLineInput::parse_from(argv)
    }

    fn settings(json: &str) -> SettingsFile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn missing_token_is_reported() {
        let err = PipelineConfig::from_sources(cli(&[]), SettingsFile::default(), None).unwrap_err();
        assert!(matches!(err, AppError::MissingConfiguration(_)));
    }

    #[test]
    fn defaults_apply_without_settings() {
        let config =
            PipelineConfig::from_sources(cli(&[]), SettingsFile::default(), Some("pat-abc".into()))
                .unwrap();
        assert_eq!(config.api_base_url.as_str(), "http://api.hubapi.com");
        assert_eq!(config.catalog.campaigns_limit, RecordCap::Unlimited);
        assert_eq!(config.catalog.email_events_limit, RecordCap::Unlimited);
        assert!(config.catalog.event_filters.is_empty());
        assert_eq!(config.catalog.retry.max_rate_limit_retries, None);
        assert!(config.selection.is_empty());
    }

    #[test]
    fn settings_file_keys_are_read() {
        let file = settings(
            r#"{
                "access_token": "pat-file",
                "api_base_url": "https://api.hubapi.com/",
                "campaigns_limit": 25,
                "email_events_limit": -1,
                "email_events_start_timestamp": 1700000000000,
                "email_events_end_timestamp": "2024-01-01T00:00:00Z",
                "email_events_type": "OPEN",
                "email_events_exclude_filtered_events": true,
                "flattening_enabled": false
            }"#,
        );
        let config = PipelineConfig::from_sources(cli(&[]), file, None).unwrap();

        assert_eq!(config.access_token.as_str(), "pat-file");
        assert_eq!(config.api_base_url.as_str(), "https://api.hubapi.com");
        assert_eq!(config.catalog.campaigns_limit, RecordCap::AtMost(25));
        let filters = &config.catalog.event_filters;
        assert_eq!(filters.start_timestamp, Some(EpochMillis::new(1_700_000_000_000)));
        assert_eq!(filters.end_timestamp, Some(EpochMillis::new(1_704_067_200_000)));
        assert_eq!(filters.event_type.as_deref(), Some("OPEN"));
        assert_eq!(filters.exclude_filtered_events, Some(true));
    }

    #[test]
    fn precedence_is_cli_then_env_then_file() {
        let file = settings(r#"{"access_token": "pat-file", "campaigns_limit": 5}"#);

        let config = PipelineConfig::from_sources(cli(&[]), file.clone(), Some("pat-env".into())).unwrap();
        assert_eq!(config.access_token.as_str(), "pat-env");

        let config = PipelineConfig::from_sources(
            cli(&["--access-token", "pat-cli", "--campaigns-limit", "-1"]),
            file,
            Some("pat-env".into()),
        )
        .unwrap();
        assert_eq!(config.access_token.as_str(), "pat-cli");
        assert_eq!(config.catalog.campaigns_limit, RecordCap::Unlimited);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let token = || Some("pat-abc".to_string());

        let err = PipelineConfig::from_sources(cli(&["--campaigns-limit", "-2"]), SettingsFile::default(), token());
        assert!(matches!(err, Err(AppError::Validation(ValidationError::InvalidRecordCap(-2)))));

        let err = PipelineConfig::from_sources(cli(&["--details-batch-size", "0"]), SettingsFile::default(), token());
        assert!(matches!(err, Err(AppError::Validation(ValidationError::OutOfBounds { .. }))));

        let err = PipelineConfig::from_sources(cli(&["--events-batch-size", "0"]), SettingsFile::default(), token());
        assert!(matches!(err, Err(AppError::Validation(ValidationError::OutOfBounds { .. }))));

        let err = PipelineConfig::from_sources(
            cli(&["--start-timestamp", "2000", "--end-timestamp", "1000"]),
            SettingsFile::default(),
            token(),
        );
        assert!(matches!(err, Err(AppError::Validation(ValidationError::InvertedTimeRange { .. }))));

        let err = PipelineConfig::from_sources(cli(&["--api-base-url", "ftp://x"]), SettingsFile::default(), token());
        assert!(matches!(err, Err(AppError::Validation(ValidationError::InvalidUrl { .. }))));
    }

    #[test]
    fn selection_and_tuning_flags() {
        let config = PipelineConfig::from_sources(
            cli(&[
                "--select",
                "email_events",
                "--select",
                "email_subscriptions",
                "--rate-limit-delay-ms",
                "250",
                "--max-rate-limit-retries",
                "10",
                "--jitter-ms",
                "20",
            ]),
            SettingsFile::default(),
            Some("pat-abc".into()),
        )
        .unwrap();

        let selected: Vec<&str> = config.selection.iter().map(StageName::as_str).collect();
        assert_eq!(selected, vec!["email_events", "email_subscriptions"]);
        assert_eq!(config.catalog.retry.rate_limit_delay, Duration::from_millis(250));
        assert_eq!(config.catalog.retry.max_rate_limit_retries, Some(10));
        assert_eq!(config.catalog.retry.jitter, Duration::from_millis(20));
        assert_eq!(config.catalog.subscription_rate_limit_delay, Duration::from_secs(12));
    }

    #[test]
    fn fan_out_stages_take_separate_batch_sizes() {
        let config = PipelineConfig::from_sources(cli(&[]), SettingsFile::default(), Some("pat-abc".into())).unwrap();
        assert_eq!(config.catalog.details_batch_size, 50);
        assert_eq!(config.catalog.events_batch_size, 50);

        let config = PipelineConfig::from_sources(
            cli(&["--details-batch-size", "10", "--events-batch-size", "200"]),
            SettingsFile::default(),
            Some("pat-abc".into()),
        )
        .unwrap();
        assert_eq!(config.catalog.details_batch_size, 10);
        assert_eq!(config.catalog.events_batch_size, 200);
        assert_eq!(config.catalog.recipient_batch_size, 100);
    }
}
