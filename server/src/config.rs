use std::time::Duration;

use clap::Parser;
use common::helpers::{parse_duration, parse_period, parse_size};

use crate::{relay::RelayTimings, retry::RetryPolicy};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Accounts validation front-end", long_about = None)]
pub struct Args {
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Base URL of the storage, validation and rendering APIs.
    #[arg(long, env = "INTERNAL_API_URL")]
    pub internal_api_url: String,

    #[arg(long, env = "CHS_INTERNAL_API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "MAX_FILE_SIZE", default_value = "30MB", value_parser = parse_size)]
    pub max_file_size: u64,

    #[arg(long, env = "FILE_UPLOAD_FIELD_NAME", default_value = "file")]
    pub file_field_name: String,

    #[arg(long, env = "UI_UPDATE_INTERVAL", default_value = "10s", value_parser = parse_period)]
    pub ui_update_interval: Duration,

    #[arg(long, env = "UI_UPDATE_TIMEOUT", default_value = "15m", value_parser = parse_period)]
    pub ui_update_timeout: Duration,

    /// How often an idle progress stream writes a comment line.
    #[arg(long, env = "SSE_HEARTBEAT_INTERVAL", default_value = "1s", value_parser = parse_period)]
    pub sse_heartbeat_interval: Duration,

    #[arg(long, env = "MAX_API_CALL_RETRIES", default_value_t = 3)]
    pub max_api_call_retries: u32,

    #[arg(long, env = "API_CALL_RETRY_DELAY", default_value = "1s", value_parser = parse_duration)]
    pub api_call_retry_delay: Duration,

    /// Per-request timeout for calls to the backend APIs.
    #[arg(long, env = "BACKEND_TIMEOUT", default_value = "60s", value_parser = parse_period)]
    pub backend_timeout: Duration,

    #[arg(long, env = "RENDER_BASE_URL", default_value = "/xbrl_validate/render")]
    pub render_base_url: String,

    /// Hold the upload response until validation finishes.
    #[arg(long, env = "WAIT_FOR_RESULT", default_value_t = false)]
    pub wait_for_result: bool,
}

/// The part of the configuration handlers read at request time.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_file_size: u64,
    pub file_field_name: String,
    pub ui_update_interval: Duration,
    pub ui_update_timeout: Duration,
    pub sse_heartbeat_interval: Duration,
    pub wait_for_result: bool,
}

impl Settings {
    pub fn relay_timings(&self) -> RelayTimings {
        RelayTimings {
            every: self.ui_update_interval,
            heartbeat: self.sse_heartbeat_interval,
            timeout: self.ui_update_timeout,
        }
    }
}

impl Args {
    pub fn settings(&self) -> Settings {
        Settings {
            max_file_size: self.max_file_size,
            file_field_name: self.file_field_name.clone(),
            ui_update_interval: self.ui_update_interval,
            ui_update_timeout: self.ui_update_timeout,
            sse_heartbeat_interval: self.sse_heartbeat_interval,
            wait_for_result: self.wait_for_result,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_api_call_retries, self.api_call_retry_delay)
    }
}

/// Keeps the first `keep` characters and masks the rest.
pub fn mask(secret: &str, keep: usize) -> String {
    secret
        .chars()
        .enumerate()
        .map(|(i, c)| if i < keep { c } else { '*' })
        .collect()
}
