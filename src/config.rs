use anyhow::Error;
use clap::Parser;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ROUTING_ATTEMPTS: u32 = 2;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(long, default_value = "callrouter.toml")]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Request paths left out of the access log; a trailing `*` matches a prefix.
    pub access_log_skip_paths: Vec<String>,
    pub routing: RoutingConfig,
    pub gather: GatherConfig,
    pub classifier: ClassifierConfig,
    pub callrecord: CallRecordConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SalesMode {
    /// Sales inquiries share Michael's routing path.
    #[default]
    Michael,
    /// Sales inquiries leave their details for a callback.
    Callback,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoutingConfig {
    pub emma_phone: Option<String>,
    pub michael_phone: Option<String>,
    pub max_attempts: u32,
    pub sales_mode: SalesMode,
    pub speech_path: String,
    pub status_path: String,
    /// Prefix of the per-target dial callbacks, the target name is appended.
    pub routing_status_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatherConfig {
    pub company_name: String,
    pub timeout_secs: u32,
    pub speech_timeout: String,
    pub voicemail_timeout_secs: u32,
    pub voicemail_max_length_secs: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum CallRecordConfig {
    Memory,
    Local { root: String },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    pub channel_capacity: usize,
    pub heartbeat_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            emma_phone: None,
            michael_phone: None,
            max_attempts: DEFAULT_MAX_ROUTING_ATTEMPTS,
            sales_mode: SalesMode::default(),
            speech_path: "/api/process-speech".to_string(),
            status_path: "/api/call-status".to_string(),
            routing_status_path: "/api/routing-status".to_string(),
        }
    }
}

impl RoutingConfig {
    pub fn callback_path(&self, target: &str) -> String {
        format!(
            "{}/{}",
            self.routing_status_path.trim_end_matches('/'),
            target
        )
    }
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            company_name: "NuVance Labs".to_string(),
            timeout_secs: 5,
            speech_timeout: "auto".to_string(),
            voicemail_timeout_secs: 30,
            voicemail_max_length_secs: 120,
        }
    }
}

impl GatherConfig {
    /// Speech gather timeout, kept within the 5..=8 second answer window.
    pub fn gather_timeout(&self) -> u32 {
        self.timeout_secs.clamp(5, 8)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            timeout_ms: 3000,
            temperature: Some(0.0),
            max_tokens: Some(200),
        }
    }
}

impl Default for CallRecordConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            heartbeat_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            access_log_skip_paths: vec!["/api/live".to_string()],
            routing: RoutingConfig::default(),
            gather: GatherConfig::default(),
            classifier: ClassifierConfig::default(),
            callrecord: CallRecordConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    /// Fill unset secrets and phone numbers from the environment (and `.env`).
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenv::dotenv();
        self.apply_env(|key| std::env::var(key).ok());
        self
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if self.routing.emma_phone.is_none() {
            self.routing.emma_phone = non_empty("EMMA_PHONE");
        }
        if self.routing.michael_phone.is_none() {
            self.routing.michael_phone = non_empty("MICHAEL_PHONE");
        }
        if self.classifier.api_key.is_none() {
            self.classifier.api_key =
                non_empty("LLM_API_KEY").or_else(|| non_empty("OPENAI_API_KEY"));
        }
        if self.classifier.base_url.is_none() {
            self.classifier.base_url = non_empty("LLM_BASE_URL");
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.classifier.model = model;
        }
    }
}
