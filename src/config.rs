use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::DemoOptions;
use crate::post_list::PostListConfig;
use crate::suggestion::at_mention::AtMentionOptions;

const DEFAULT_ENV_PREFIX: &str = "TEAMCHAT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub post_list: PostListSettings,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Channel opened at startup.
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            channel: default_channel(),
        }
    }
}

fn default_user_id() -> String {
    "me".into()
}

fn default_channel() -> String {
    "town-square".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_true")]
    pub show_unread_section: bool,
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            show_unread_section: true,
            tick_rate: default_tick_rate(),
        }
    }
}

fn default_theme() -> String {
    "default".into()
}

fn default_true() -> bool {
    true
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(120)
}

/// Scroll thresholds measured in terminal rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostListSettings {
    #[serde(default = "default_load_trigger")]
    pub load_trigger: u32,
    #[serde(default = "default_load_trigger_ratio")]
    pub load_trigger_ratio: f32,
    #[serde(default = "default_bottom_margin")]
    pub bottom_margin: u32,
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,
    #[serde(default = "default_max_extra_pages")]
    pub max_extra_pages: u32,
}

impl Default for PostListSettings {
    fn default() -> Self {
        Self {
            load_trigger: default_load_trigger(),
            load_trigger_ratio: default_load_trigger_ratio(),
            bottom_margin: default_bottom_margin(),
            max_auto_retries: default_max_auto_retries(),
            max_extra_pages: default_max_extra_pages(),
        }
    }
}

fn default_load_trigger() -> u32 {
    40
}

fn default_load_trigger_ratio() -> f32 {
    0.3
}

fn default_bottom_margin() -> u32 {
    2
}

fn default_max_auto_retries() -> u32 {
    3
}

fn default_max_extra_pages() -> u32 {
    10
}

impl PostListSettings {
    pub fn to_post_list_config(&self) -> PostListConfig {
        PostListConfig {
            load_trigger: self.load_trigger,
            load_trigger_ratio: self.load_trigger_ratio,
            bottom_margin: self.bottom_margin,
            max_auto_retries: self.max_auto_retries,
            max_extra_pages: self.max_extra_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestionConfig {
    #[serde(default = "default_loading_delay", with = "humantime_serde")]
    pub loading_delay: Duration,
    #[serde(default = "default_max_local_results")]
    pub max_local_results: usize,
    #[serde(default = "default_true")]
    pub use_channel_mentions: bool,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            loading_delay: default_loading_delay(),
            max_local_results: default_max_local_results(),
            use_channel_mentions: true,
        }
    }
}

fn default_loading_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_local_results() -> usize {
    25
}

impl SuggestionConfig {
    pub fn to_at_mention_options(&self) -> AtMentionOptions {
        AtMentionOptions {
            use_channel_mentions: self.use_channel_mentions,
            loading_delay: self.loading_delay,
            max_local_results: self.max_local_results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Defaults to the platform state directory.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemoConfig {
    #[serde(default = "default_history_per_channel")]
    pub history_per_channel: usize,
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default = "default_latency", with = "humantime_serde")]
    pub latency: Duration,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Chance per tick that someone posts in the open channel.
    #[serde(default = "default_incoming_rate")]
    pub incoming_rate: f64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            history_per_channel: default_history_per_channel(),
            failure_rate: 0.0,
            latency: default_latency(),
            seed: default_seed(),
            incoming_rate: default_incoming_rate(),
            workers: default_workers(),
        }
    }
}

fn default_history_per_channel() -> usize {
    240
}

fn default_latency() -> Duration {
    Duration::from_millis(150)
}

fn default_seed() -> u64 {
    7
}

fn default_incoming_rate() -> f64 {
    0.01
}

fn default_workers() -> usize {
    2
}

impl DemoConfig {
    pub fn to_demo_options(&self, current_user_id: &str) -> DemoOptions {
        DemoOptions {
            current_user_id: current_user_id.to_string(),
            history_per_channel: self.history_per_channel,
            failure_rate: self.failure_rate,
            latency: self.latency,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Reads the YAML file (when present) and applies `PREFIX_SECTION__KEY`
/// environment overrides on top.
pub fn load(options: LoadOptions) -> Result<Config> {
    let path = options.config_file.or_else(default_config_path);
    let mut cfg = match path {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "session.user_id" => cfg.session.user_id = value,
        "session.channel" => cfg.session.channel = value,
        "ui.theme" => cfg.ui.theme = value,
        "ui.show_unread_section" => cfg.ui.show_unread_section = parse_bool(&value),
        "ui.tick_rate" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.tick_rate = duration;
            }
        }
        "post_list.load_trigger" => {
            if let Ok(parsed) = value.parse() {
                cfg.post_list.load_trigger = parsed;
            }
        }
        "post_list.load_trigger_ratio" => {
            if let Ok(parsed) = value.parse() {
                cfg.post_list.load_trigger_ratio = parsed;
            }
        }
        "post_list.bottom_margin" => {
            if let Ok(parsed) = value.parse() {
                cfg.post_list.bottom_margin = parsed;
            }
        }
        "post_list.max_auto_retries" => {
            if let Ok(parsed) = value.parse() {
                cfg.post_list.max_auto_retries = parsed;
            }
        }
        "post_list.max_extra_pages" => {
            if let Ok(parsed) = value.parse() {
                cfg.post_list.max_extra_pages = parsed;
            }
        }
        "suggestions.loading_delay" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.suggestions.loading_delay = duration;
            }
        }
        "suggestions.max_local_results" => {
            if let Ok(parsed) = value.parse() {
                cfg.suggestions.max_local_results = parsed;
            }
        }
        "suggestions.use_channel_mentions" => {
            cfg.suggestions.use_channel_mentions = parse_bool(&value);
        }
        "logging.level" => cfg.logging.level = value,
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        "demo.history_per_channel" => {
            if let Ok(parsed) = value.parse() {
                cfg.demo.history_per_channel = parsed;
            }
        }
        "demo.failure_rate" => {
            if let Ok(parsed) = value.parse() {
                cfg.demo.failure_rate = parsed;
            }
        }
        "demo.latency" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.demo.latency = duration;
            }
        }
        "demo.seed" => {
            if let Ok(parsed) = value.parse() {
                cfg.demo.seed = parsed;
            }
        }
        "demo.incoming_rate" => {
            if let Ok(parsed) = value.parse() {
                cfg.demo.incoming_rate = parsed;
            }
        }
        "demo.workers" => {
            if let Ok(parsed) = value.parse() {
                cfg.demo.workers = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("teamchat-tui").join("config.yaml"))
}

/// Writes `cfg` as YAML, creating parent directories. Refuses to overwrite
/// an existing file.
pub fn save(path: Option<PathBuf>, cfg: &Config) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };
    anyhow::ensure!(
        !path.exists(),
        "config: {} already exists",
        path.display()
    );

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(dir: &Path) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("missing.yaml")),
            env_prefix: Some("TEAMCHAT_TEST_DEFAULTS".into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(dir.path())).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.suggestions.loading_delay, Duration::from_millis(500));
        assert_eq!(cfg.post_list.max_auto_retries, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "ui:\n  show_unread_section: false\ndemo:\n  latency: 2s\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("TEAMCHAT_TEST_PARTIAL".into()),
        })
        .unwrap();
        assert!(!cfg.ui.show_unread_section);
        assert_eq!(cfg.ui.theme, "default");
        assert_eq!(cfg.demo.latency, Duration::from_secs(2));
        assert_eq!(cfg.demo.seed, 7);
    }

    #[test]
    fn save_writes_loadable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let mut cfg = Config::default();
        cfg.session.channel = "engineering".into();
        save(Some(path.clone()), &cfg).unwrap();
        assert_eq!(read_config_file(&path).unwrap(), cfg);
        assert!(save(Some(path), &cfg).is_err());
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("TEAMCHAT_TEST_ENV_SUGGESTIONS__LOADING_DELAY", "750ms");
        env::set_var("TEAMCHAT_TEST_ENV_UI__THEME", "dracula");
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("TEAMCHAT_TEST_ENV".into()),
        })
        .unwrap();
        env::remove_var("TEAMCHAT_TEST_ENV_SUGGESTIONS__LOADING_DELAY");
        env::remove_var("TEAMCHAT_TEST_ENV_UI__THEME");
        assert_eq!(cfg.suggestions.loading_delay, Duration::from_millis(750));
        assert_eq!(cfg.ui.theme, "dracula");
    }
}
