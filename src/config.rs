use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AmplitudeConfig, AmplitudeRule, PatternRule, RangeReversalConfig, RangeReversalRule, TrendConfig, TrendRule};
use crate::lifecycle::LifecycleConfig;
use crate::retry::RetryConfig;
use crate::sizing::SizerConfig;

/// Which pattern rule the cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Single-bar moderate band + extreme threshold on the body.
    Amplitude,
    /// Single-bar full-range fade.
    RangeReversal,
    /// 7-bar trend confirmation with optional EMA filter.
    Trend,
}

/// Full per-process configuration: defaults overlaid by an optional config
/// file and `REVERSAL__`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Instrument to trade (e.g., "VINE-USDT-SWAP")
    pub instrument: String,
    /// Candle interval (e.g., "5m", "15m")
    pub bar: String,
    /// How many candles to request per cycle.
    pub candle_limit: usize,
    pub rule: RuleKind,
    pub amplitude: AmplitudeConfig,
    pub range_reversal: RangeReversalConfig,
    pub trend: TrendConfig,
    pub sizer: SizerConfig,
    pub lifecycle: LifecycleConfig,
    pub retry: RetryConfig,
    pub fanout: FanoutConfig,
    pub notify: NotifyConfig,
    pub audit: AuditConfig,
    /// Environment-variable suffixes of the accounts to fan out over
    /// ("1" reads OKX1_API_KEY etc., "" reads OKX_API_KEY).
    pub account_suffixes: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instrument: "VINE-USDT-SWAP".to_string(),
            bar: "5m".to_string(),
            candle_limit: 2,
            rule: RuleKind::RangeReversal,
            amplitude: AmplitudeConfig::default(),
            range_reversal: RangeReversalConfig::default(),
            trend: TrendConfig::default(),
            sizer: SizerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            retry: RetryConfig::default(),
            fanout: FanoutConfig::default(),
            notify: NotifyConfig::default(),
            audit: AuditConfig::default(),
            account_suffixes: vec!["1".to_string(), "2".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Upper bound on accounts processed at once.
    pub max_concurrency: usize,
    /// Per-account deadline so one stuck account cannot stall the cycle.
    pub account_deadline_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            account_deadline_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Notification group label shown by the push client.
    pub group: String,
    pub sound: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            group: "reversalbot".to_string(),
            sound: "minuet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for the append-only audit trail and the order-time marker.
    pub log_dir: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration: built-in defaults, then `reversal.toml` if present,
    /// then `REVERSAL__`-prefixed environment variables (REVERSAL__SIZER__MARGIN=10).
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("reversal").required(false))
            .add_source(
                Environment::with_prefix("REVERSAL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Instantiate the configured pattern rule.
    pub fn build_rule(&self) -> Box<dyn PatternRule> {
        match self.rule {
            RuleKind::Amplitude => Box::new(AmplitudeRule::new(self.amplitude.clone())),
            RuleKind::RangeReversal => {
                Box::new(RangeReversalRule::new(self.range_reversal.clone()))
            }
            RuleKind::Trend => Box::new(TrendRule::new(self.trend.clone())),
        }
    }

    /// Candles to request: at least what the rule needs to fire.
    pub fn effective_candle_limit(&self) -> usize {
        self.candle_limit.max(self.build_rule().min_candles())
    }

    /// Client order id prefix, derived from the instrument base ("VINE").
    pub fn client_id_prefix(&self) -> String {
        self.instrument
            .split('-')
            .next()
            .unwrap_or("ORD")
            .to_string()
    }
}

/// One account's API credentials, loaded once at startup and never mutated.
///
/// `flag` selects the OKX environment: "0" live, "1" demo trading.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub name: String,
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    pub flag: String,
}

impl AccountCredentials {
    /// Read one account from `OKX{suffix}_API_KEY` / `_SECRET_KEY` /
    /// `_PASSPHRASE` / `_FLAG` / `_ACCOUNT_NAME`.
    ///
    /// Missing or partial credentials yield None so the caller can skip the
    /// account instead of failing the batch.
    pub fn from_env(suffix: &str) -> Option<Self> {
        let var = |name: &str| std::env::var(format!("OKX{}_{}", suffix, name)).ok();

        let api_key = var("API_KEY");
        let secret_key = var("SECRET_KEY");
        let passphrase = var("PASSPHRASE");

        let name = var("ACCOUNT_NAME").unwrap_or_else(|| {
            if suffix.is_empty() {
                "default".to_string()
            } else {
                format!("account{}", suffix)
            }
        });

        match (api_key, secret_key, passphrase) {
            (Some(api_key), Some(secret_key), Some(passphrase))
                if !api_key.is_empty() && !secret_key.is_empty() && !passphrase.is_empty() =>
            {
                Some(Self {
                    name,
                    api_key,
                    secret_key,
                    passphrase,
                    flag: var("FLAG").unwrap_or_else(|| "0".to_string()),
                })
            }
            _ => {
                tracing::warn!(account = %name, suffix, "credentials missing or incomplete, skipping account");
                None
            }
        }
    }

    /// Demo-trading environment flag.
    pub fn is_demo(&self) -> bool {
        self.flag == "1"
    }
}
