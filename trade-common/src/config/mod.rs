//! Configuration for the trade daemon.
//!
//! Values come from three layers, later ones winning:
//! - built-in defaults
//! - a TOML file (every section optional)
//! - `TRADE_*` environment overrides

pub mod env;

pub use env::{EnvError, EnvParser};

use crate::device::PointerPath;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment overrides: {}", join(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

fn join(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Sections ────────────────────────────────────────────────────────────

/// `[trade]`: session limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeSection {
    /// Seconds to wait for a partner after starting the search.
    pub trade_wait_time_secs: u64,
    /// Poll iterations while confirming the exchange.
    pub max_trade_confirm_iterations: u32,
    pub max_dump_trade_time_secs: u64,
    pub max_dumps_per_trade: u32,
    /// Send the full legality report for every dumped payload.
    pub dump_trade_legality_check: bool,
    /// Return the payload a clone requester showed before cloning it.
    pub return_shown_payload: bool,
}

impl Default for TradeSection {
    fn default() -> Self {
        Self {
            trade_wait_time_secs: 45,
            max_trade_confirm_iterations: 15,
            max_dump_trade_time_secs: 180,
            max_dumps_per_trade: 20,
            dump_trade_legality_check: false,
            return_shown_payload: false,
        }
    }
}

/// `[timings]`: extra delays added on top of the built-in waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsSection {
    pub extra_time_open_code_entry_ms: u64,
    /// Delay between keypad presses while entering a link code.
    pub keypress_time_ms: u64,
    pub extra_time_open_box_ms: u64,
    pub extra_time_load_portal_ms: u64,
    pub extra_time_connect_online_ms: u64,
    pub extra_time_multi_trade_ms: u64,
    pub extra_time_reopen_game_ms: u64,
    pub reconnect_attempts: u32,
    pub extra_reconnect_delay_ms: u64,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            extra_time_open_code_entry_ms: 0,
            keypress_time_ms: 0,
            extra_time_open_box_ms: 0,
            extra_time_load_portal_ms: 0,
            extra_time_connect_online_ms: 0,
            extra_time_multi_trade_ms: 0,
            extra_time_reopen_game_ms: 0,
            reconnect_attempts: 30,
            extra_reconnect_delay_ms: 0,
        }
    }
}

/// One template-match rule: what the partner shows and what they get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRule {
    /// Match the offered payload's nickname (case-insensitive).
    #[serde(default)]
    pub nickname: Option<String>,
    /// Match the offered payload's species.
    #[serde(default)]
    pub species: Option<u16>,
    /// Encoded payload file to send back.
    pub send: PathBuf,
}

/// `[distribution]`: fallback trading and synchronized starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionSection {
    /// Fixed link code used by fallback requests.
    pub trade_code: u32,
    /// Draw a fresh random code for every fallback request instead.
    pub random_code: bool,
    pub synchronize_bots: bool,
    pub synchronize_timeout_secs: u64,
    /// Folder of encoded payloads served when the queue is empty.
    pub pool_folder: Option<PathBuf>,
    pub templates: Vec<TemplateRule>,
    /// Only match templates against offers of this species.
    pub template_species: Option<u16>,
    pub quit_if_no_match: bool,
}

impl Default for DistributionSection {
    fn default() -> Self {
        Self {
            trade_code: 7196_0000,
            random_code: false,
            synchronize_bots: false,
            synchronize_timeout_secs: 90,
            pool_folder: None,
            templates: Vec::new(),
            template_species: None,
            quit_if_no_match: false,
        }
    }
}

/// `[clone]`: clone-request triggers and encounter limits.
///
/// A trigger item id of zero disables that trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneSection {
    pub item_swap_item: u16,
    pub ot_swap_item: u16,
    pub nick_swap_item: u16,
    pub distro_swap_item: u16,
    pub genned_swap_item: u16,
    pub trades_per_encounter: u32,
    pub clone_while_idle: bool,
}

impl Default for CloneSection {
    fn default() -> Self {
        Self {
            item_swap_item: 0,
            ot_swap_item: 0,
            nick_swap_item: 0,
            distro_swap_item: 0,
            genned_swap_item: 0,
            trades_per_encounter: 1,
            clone_while_idle: false,
        }
    }
}

impl CloneSection {
    /// All five triggers with their labels.
    pub fn triggers(&self) -> [(&'static str, u16); 5] {
        [
            ("item_swap_item", self.item_swap_item),
            ("ot_swap_item", self.ot_swap_item),
            ("nick_swap_item", self.nick_swap_item),
            ("distro_swap_item", self.distro_swap_item),
            ("genned_swap_item", self.genned_swap_item),
        ]
    }
}

/// `[legality]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegalitySection {
    pub reset_home_tracker: bool,
}

/// `[abuse]`: partner reputation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseSection {
    /// Online ids refused outright.
    pub banned_ids: Vec<u64>,
    /// Minimum minutes between two encounters with the same partner. Zero disables.
    pub trade_cooldown_mins: u64,
    /// Entries kept per partner history.
    pub history_capacity: usize,
    /// Include the partner's online id in abuse events.
    pub echo_online_id: bool,
    /// Prefix for abuse events, e.g. a moderator mention.
    pub abuse_echo_mention: String,
}

impl Default for AbuseSection {
    fn default() -> Self {
        Self {
            banned_ids: Vec::new(),
            trade_cooldown_mins: 0,
            history_capacity: 30,
            echo_online_id: false,
            abuse_echo_mention: String::new(),
        }
    }
}

/// `[folder]`: payload archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSection {
    pub dump: bool,
    pub dump_folder: Option<PathBuf>,
}

/// `[title]`: pointer catalog and UI flag values for the device title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleSection {
    pub game_title_id: u64,
    /// Applet that shows the news screen over the menu.
    pub news_applet_id: u64,
    pub pointers: HashMap<String, PointerPath>,
    pub overworld_value: u8,
    pub portal_value: u8,
    pub box_value: u8,
    pub connected_value: u8,
    /// Stride in bytes between two box slots.
    pub slot_stride: u64,
}

/// Pointer names every title profile must define.
pub const REQUIRED_POINTERS: [&str; 10] = [
    "box_start",
    "overworld",
    "portal_box_status",
    "is_connected",
    "partner_nid",
    "partner_offered",
    "trader1_my_status",
    "trader2_my_status",
    "my_status",
    "current_box",
];

impl Default for TitleSection {
    fn default() -> Self {
        let pointers = [
            ("box_start", vec![0x4616648, 0xD8, 0x8, 0xB8, 0x30, 0x9D0, 0x0]),
            ("overworld", vec![0x4622A30, 0x160, 0xE8, 0x28]),
            ("portal_box_status", vec![0x4622A30, 0x160, 0x178]),
            ("is_connected", vec![0x4385F30, 0x30]),
            ("partner_nid", vec![0x4622A30, 0x108, 0x108]),
            ("partner_offered", vec![0x4622A30, 0x48, 0xE0, 0x0]),
            ("trader1_my_status", vec![0x4622A30, 0x48, 0xB0, 0x0]),
            ("trader2_my_status", vec![0x4622A30, 0x48, 0xE0, 0x0, 0x400]),
            ("my_status", vec![0x4616648, 0xD8, 0x8, 0xB8, 0x0, 0x40]),
            ("current_box", vec![0x4616648, 0xD8, 0x8, 0xB8, 0x28, 0x570]),
        ]
        .into_iter()
        .map(|(name, hops)| (name.to_string(), PointerPath::new(hops)))
        .collect();

        Self {
            game_title_id: 0x0100_A3D0_0862_2000,
            news_applet_id: 0x0100_0000_0000_100A,
            pointers,
            overworld_value: 0x11,
            portal_value: 0x10,
            box_value: 0x14,
            connected_value: 1,
            slot_stride: crate::payload::SLOT_SIZE as u64,
        }
    }
}

// ── Root ────────────────────────────────────────────────────────────────

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub trade: TradeSection,
    pub timings: TimingsSection,
    pub distribution: DistributionSection,
    pub clone: CloneSection,
    pub legality: LegalitySection,
    pub abuse: AbuseSection,
    pub folder: FolderSection,
    pub title: TitleSection,
    pub log: LogConfig,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            trade: TradeSection::default(),
            timings: TimingsSection::default(),
            distribution: DistributionSection::default(),
            clone: CloneSection::default(),
            legality: LegalitySection::default(),
            abuse: AbuseSection::default(),
            folder: FolderSection::default(),
            title: TitleSection::default(),
            log: LogConfig::default(),
        }
    }
}

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field,
            message: message.into(),
        }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl TradeConfig {
    /// Default config file location (`~/.config/traded/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("traded").join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply env overrides.
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            _ => Self::default(),
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TRADE_*` overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut env = EnvParser::new();

        env.number("WAIT_TIME_SECS", &mut self.trade.trade_wait_time_secs, 3, 3_600);
        env.number(
            "MAX_TRADE_CONFIRM_ITERATIONS",
            &mut self.trade.max_trade_confirm_iterations,
            1,
            1_000,
        );
        env.number("MAX_DUMP_TRADE_TIME_SECS", &mut self.trade.max_dump_trade_time_secs, 1, 3_600);
        env.number("MAX_DUMPS_PER_TRADE", &mut self.trade.max_dumps_per_trade, 1, 1_000);
        env.bool("RETURN_SHOWN_PAYLOAD", &mut self.trade.return_shown_payload);

        env.number("RECONNECT_ATTEMPTS", &mut self.timings.reconnect_attempts, 0, 10_000);
        env.number(
            "RECONNECT_DELAY_MS",
            &mut self.timings.extra_reconnect_delay_ms,
            0,
            600_000,
        );
        env.number(
            "CODE_ENTRY_DELAY_MS",
            &mut self.timings.extra_time_open_code_entry_ms,
            0,
            60_000,
        );

        env.bool("SYNCHRONIZE_BOTS", &mut self.distribution.synchronize_bots);
        env.number(
            "SYNCHRONIZE_TIMEOUT_SECS",
            &mut self.distribution.synchronize_timeout_secs,
            1,
            3_600,
        );
        env.number("DISTRIBUTION_CODE", &mut self.distribution.trade_code, 0, 9_999_9999);
        env.bool("DISTRIBUTION_RANDOM_CODE", &mut self.distribution.random_code);
        env.path("DISTRIBUTION_POOL", &mut self.distribution.pool_folder);
        env.bool("QUIT_IF_NO_MATCH", &mut self.distribution.quit_if_no_match);

        env.number("TRADES_PER_ENCOUNTER", &mut self.clone.trades_per_encounter, 1, 100);
        env.bool("CLONE_WHILE_IDLE", &mut self.clone.clone_while_idle);
        env.bool("RESET_HOME_TRACKER", &mut self.legality.reset_home_tracker);

        env.list("BANNED_IDS", &mut self.abuse.banned_ids);

        env.bool("DUMP", &mut self.folder.dump);
        env.path("DUMP_FOLDER", &mut self.folder.dump_folder);

        env.string("LOG_LEVEL", &mut self.log.level);
        env.bool("LOG_JSON", &mut self.log.json);
        env.path("LOG_DIR", &mut self.log.directory);

        if env.has_errors() {
            return Err(ConfigError::Env(env.take_errors()));
        }
        Ok(())
    }

    /// Check cross-field rules. Errors make the configuration unusable.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.clone.trades_per_encounter == 0 {
            issues.push(ConfigIssue::error(
                "clone.trades_per_encounter",
                "must be at least 1",
            ));
        }
        if self.trade.max_trade_confirm_iterations == 0 {
            issues.push(ConfigIssue::error(
                "trade.max_trade_confirm_iterations",
                "must be at least 1",
            ));
        }
        if self.distribution.synchronize_bots && self.distribution.synchronize_timeout_secs == 0 {
            issues.push(ConfigIssue::error(
                "distribution.synchronize_timeout_secs",
                "must be positive when synchronize_bots is enabled",
            ));
        }
        if self.trade.trade_wait_time_secs < 3 {
            issues.push(ConfigIssue::warning(
                "trade.trade_wait_time_secs",
                "shorter than the fixed 2 s search warm-up; partners will never be found",
            ));
        }

        let triggers = self.clone.triggers();
        for (i, (name, item)) in triggers.iter().enumerate() {
            if *item == 0 {
                continue;
            }
            if let Some((other, _)) = triggers[..i].iter().find(|(_, o)| o == item) {
                issues.push(ConfigIssue::error(
                    "clone",
                    format!("{name} and {other} share trigger item {item}"),
                ));
            }
        }

        if self.folder.dump && self.folder.dump_folder.is_none() {
            issues.push(ConfigIssue::warning(
                "folder.dump_folder",
                "dumping enabled without a folder; nothing will be archived",
            ));
        }
        if self.timings.reconnect_attempts == 0 {
            issues.push(ConfigIssue::warning(
                "timings.reconnect_attempts",
                "workers stop on the first connection error",
            ));
        }
        for name in REQUIRED_POINTERS {
            if !self.title.pointers.contains_key(name) {
                issues.push(ConfigIssue::error("title.pointers", format!("missing {name}")));
            }
        }

        issues
    }

    /// Fail with every error-level issue.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|issue| issue.severity == Severity::Error)
            .map(|issue| issue.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TradeConfig::default();
        assert_eq!(config.trade.trade_wait_time_secs, 45);
        assert_eq!(config.trade.max_trade_confirm_iterations, 15);
        assert_eq!(config.trade.max_dump_trade_time_secs, 180);
        assert_eq!(config.trade.max_dumps_per_trade, 20);
        assert_eq!(config.timings.reconnect_attempts, 30);
        assert_eq!(config.timings.extra_reconnect_delay_ms, 0);
        assert_eq!(config.distribution.synchronize_timeout_secs, 90);
        assert_eq!(config.clone.trades_per_encounter, 1);
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: TradeConfig = toml::from_str(
            r#"
            [trade]
            trade_wait_time_secs = 30

            [clone]
            ot_swap_item = 1606
            trades_per_encounter = 3

            [[distribution.templates]]
            nickname = "Ralts"
            send = "pool/ralts.bin"
            "#,
        )
        .unwrap();
        assert_eq!(config.trade.trade_wait_time_secs, 30);
        assert_eq!(config.trade.max_trade_confirm_iterations, 15);
        assert_eq!(config.clone.ot_swap_item, 1606);
        assert_eq!(config.clone.trades_per_encounter, 3);
        assert_eq!(config.distribution.templates.len(), 1);
        assert_eq!(config.timings.reconnect_attempts, 30);
    }

    #[test]
    fn duplicate_triggers_are_errors() {
        let mut config = TradeConfig::default();
        config.clone.item_swap_item = 10;
        config.clone.genned_swap_item = 10;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.severity == Severity::Error
            && i.message.contains("genned_swap_item and item_swap_item")));
        assert!(matches!(config.ensure_valid(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_trades_per_encounter_is_an_error() {
        let mut config = TradeConfig::default();
        config.clone.trades_per_encounter = 0;
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn dump_without_folder_is_only_a_warning() {
        let mut config = TradeConfig::default();
        config.folder.dump = true;
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn load_reads_file_and_env_overrides() {
        let _guard = env_test_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[distribution]\nsynchronize_bots = true\n").unwrap();

        // SAFETY: env mutation is serialized by env_test_lock
        unsafe { std::env::set_var("TRADE_TRADES_PER_ENCOUNTER", "4") };
        let config = TradeConfig::load(Some(&path));
        unsafe { std::env::remove_var("TRADE_TRADES_PER_ENCOUNTER") };

        let config = config.unwrap();
        assert!(config.distribution.synchronize_bots);
        assert_eq!(config.clone.trades_per_encounter, 4);
    }

    #[test]
    fn load_reports_bad_env_values() {
        let _guard = env_test_lock();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        // SAFETY: env mutation is serialized by env_test_lock
        unsafe { std::env::set_var("TRADE_RECONNECT_ATTEMPTS", "forever") };
        let result = TradeConfig::load(Some(&missing));
        unsafe { std::env::remove_var("TRADE_RECONNECT_ATTEMPTS") };

        match result {
            Err(ConfigError::Env(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected env error, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[trade\n").unwrap();
        let err = TradeConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
