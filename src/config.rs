// ABOUTME: Host configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates channel classes and timing knobs at startup, never at runtime

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use troupe_core::{ArbitrationConfig, ChannelClass, DriftConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_persona_dir")]
    pub persona_dir: String,
    #[serde(default = "default_ensemble_catalog")]
    pub ensemble_catalog: String,
    /// Channel that receives event and storyline announcements.
    pub broadcast_channel: String,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Retry policy for outbound platform operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Static classification of one chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    /// "shared", "silent", or "exclusive".
    pub class: String,
    /// Required when class is "exclusive".
    #[serde(default)]
    pub agent: Option<String>,
}

fn default_store_path() -> String {
    "./troupe.db".to_string()
}

fn default_persona_dir() -> String {
    "./personas".to_string()
}

fn default_ensemble_catalog() -> String {
    "./ensemble.toml".to_string()
}

fn default_tick_interval_secs() -> u64 {
    180
}

impl Config {
    /// Load configuration from a TOML file with environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Ok(val) = std::env::var("TROUPE_STORE_PATH") {
            config.store_path = val;
        }
        if let Ok(val) = std::env::var("TROUPE_PERSONA_DIR") {
            config.persona_dir = val;
        }
        if let Ok(val) = std::env::var("TROUPE_ENSEMBLE_CATALOG") {
            config.ensemble_catalog = val;
        }
        if let Ok(val) = std::env::var("TROUPE_BROADCAST_CHANNEL") {
            config.broadcast_channel = val;
        }
        if let Ok(val) = std::env::var("TROUPE_TICK_SECS") {
            config.tick_interval_secs = val
                .parse()
                .with_context(|| format!("TROUPE_TICK_SECS must be a number, got: {}", val))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broadcast_channel.trim().is_empty() {
            bail!("broadcast_channel is required");
        }
        if self.tick_interval_secs == 0 {
            bail!("tick_interval_secs must be positive");
        }
        if self.arbitration.global_cooldown_secs <= 0
            || self.arbitration.personal_cooldown_secs <= 0
        {
            bail!("Cooldown windows must be positive");
        }
        for probability in [
            self.arbitration.base_probability,
            self.arbitration.relevance_boost,
            self.arbitration.direct_address_probability,
            self.arbitration.question_boost,
            self.arbitration.long_message_boost,
            self.arbitration.chattiness_damping,
        ] {
            if !(0.0..=1.0).contains(&probability) {
                bail!("Arbitration probabilities must be within 0..=1");
            }
        }
        if self.send.max_attempts == 0 {
            bail!("send.max_attempts must be at least 1");
        }
        for channel in &self.channels {
            match channel.class.as_str() {
                "shared" | "silent" => {}
                "exclusive" => {
                    if channel.agent.as_deref().unwrap_or("").trim().is_empty() {
                        bail!("Exclusive channel '{}' must name its agent", channel.id);
                    }
                }
                other => bail!(
                    "Channel '{}' has unknown class '{}' (use shared, silent, or exclusive)",
                    channel.id,
                    other
                ),
            }
        }
        Ok(())
    }

    /// Resolve a channel's class; unconfigured channels default to shared.
    pub fn channel_class(&self, channel_id: &str) -> ChannelClass {
        for channel in &self.channels {
            if channel.id == channel_id {
                return match channel.class.as_str() {
                    "silent" => ChannelClass::Silent,
                    "exclusive" => ChannelClass::Exclusive {
                        // Validated at load time.
                        agent_id: channel.agent.clone().unwrap_or_default(),
                    },
                    _ => ChannelClass::Shared,
                };
            }
        }
        ChannelClass::Shared
    }
}
