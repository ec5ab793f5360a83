//! Deployment settings for the presale and vesting engines.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults
//!   2) Config file (explicit path, or `kerc.{toml,yaml,yml,json}` in the
//!      working directory)
//!   3) Environment variables, optionally via `.env`
//!
//! Environment keys use the `KERC` prefix and `__` as the nesting separator:
//!
//!   KERC__PRESALE__TREASURY=0x00000000000000000000000000000000000000fe
//!   KERC__PRESALE__TOKENS=0x…,0x…
//!   KERC__TELEMETRY__LOG_FILTER=info,presale=debug
//!   KERC__TELEMETRY__ENGINE_LEVEL=debug

use std::path::{Path, PathBuf};

use config as cfg;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{normalize::CANONICAL_ONE, primitives::Address};

pub const ENV_PREFIX: &str = "KERC";

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub presale: PresaleSettings,
    pub vesting: VestingSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresaleSettings {
    /// Ledger address of the sale contract (the allowance spender).
    pub address: Address,
    pub owner: Address,
    pub treasury: Address,
    /// Initially accepted deposit tokens.
    pub tokens: Vec<Address>,
    /// Soft target, whole canonical tokens.
    pub target_amount: u64,
    /// Hard cap, whole canonical tokens.
    pub hard_cap_amount: u64,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub event_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingSettings {
    pub address: Address,
    pub owner: Address,
    pub receiver: Address,
    pub event_capacity: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// RUST_LOG-like directive, e.g. "info,presale=debug". Falls back to
    /// `RUST_LOG` when unset.
    pub log_filter: Option<String>,
    /// Level pinned on the `presale` and `vesting` targets.
    pub engine_level: Option<String>,
    pub json: bool,
    pub ansi: bool,
}

impl Default for PresaleSettings {
    fn default() -> Self {
        Self {
            address: Address::ZERO,
            owner: Address::ZERO,
            treasury: Address::ZERO,
            tokens: Vec::new(),
            target_amount: 0,
            hard_cap_amount: 0,
            start_time: None,
            end_time: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for VestingSettings {
    fn default() -> Self {
        Self {
            address: Address::ZERO,
            owner: Address::ZERO,
            receiver: Address::ZERO,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("`{0}` must not be the zero address")]
    ZeroAddress(&'static str),
    #[error("presale.start_time must precede presale.end_time")]
    InvalidWindow,
    #[error("`{0}` looks like an 18-decimal value; expected a whole-token count")]
    UnitMismatch(&'static str),
    #[error("presale.target_amount exceeds presale.hard_cap_amount")]
    TargetAboveCap,
    #[error("`{0}` must be > 0")]
    ZeroCapacity(&'static str),
}

/// Load settings: defaults → file → environment, then validate.
pub fn load(explicit_file: Option<&Path>) -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut builder = cfg::Config::builder()
        .set_default("presale.event_capacity", DEFAULT_EVENT_CAPACITY as u64)?
        .set_default("vesting.event_capacity", DEFAULT_EVENT_CAPACITY as u64)?
        .set_default("telemetry.json", false)?
        .set_default("telemetry.ansi", false)?;

    if let Some(path) = discover_config_file(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }

    builder = builder.add_source(
        cfg::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("presale.tokens")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    tracing::debug!(
        target: "presale",
        presale = %settings.presale.address,
        vesting = %settings.vesting.address,
        "settings loaded"
    );
    Ok(settings)
}

fn discover_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(Some(p.to_path_buf()));
        }
        return Err(ConfigError::PathNotFound(p.display().to_string()));
    }
    Ok(["kerc.toml", "kerc.yaml", "kerc.yml", "kerc.json"]
        .iter()
        .map(PathBuf::from)
        .find(|c| c.exists()))
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.presale;
        for (name, a) in [
            ("presale.address", p.address),
            ("presale.owner", p.owner),
            ("presale.treasury", p.treasury),
            ("vesting.address", self.vesting.address),
            ("vesting.owner", self.vesting.owner),
            ("vesting.receiver", self.vesting.receiver),
        ] {
            if a.is_zero() {
                return Err(ConfigError::ZeroAddress(name));
            }
        }
        if p.tokens.iter().any(Address::is_zero) {
            return Err(ConfigError::ZeroAddress("presale.tokens"));
        }
        if let (Some(start), Some(end)) = (p.start_time, p.end_time) {
            if start >= end {
                return Err(ConfigError::InvalidWindow);
            }
        }
        if u128::from(p.hard_cap_amount) >= CANONICAL_ONE {
            return Err(ConfigError::UnitMismatch("presale.hard_cap_amount"));
        }
        if u128::from(p.target_amount) >= CANONICAL_ONE {
            return Err(ConfigError::UnitMismatch("presale.target_amount"));
        }
        if p.target_amount > p.hard_cap_amount {
            return Err(ConfigError::TargetAboveCap);
        }
        if p.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("presale.event_capacity"));
        }
        if self.vesting.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("vesting.event_capacity"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Settings {
        Settings {
            presale: PresaleSettings {
                address: Address::from_low_u64(0xa0),
                owner: Address::from_low_u64(1),
                treasury: Address::from_low_u64(2),
                tokens: vec![Address::from_low_u64(0x7000)],
                target_amount: 2_500_000,
                hard_cap_amount: 3_500_000,
                ..PresaleSettings::default()
            },
            vesting: VestingSettings {
                address: Address::from_low_u64(0xb0),
                owner: Address::from_low_u64(1),
                receiver: Address::from_low_u64(0x50),
                ..VestingSettings::default()
            },
            telemetry: TelemetrySettings::default(),
        }
    }

    #[test]
    fn validation_rules() {
        assert!(valid().validate().is_ok());

        let mut s = valid();
        s.presale.treasury = Address::ZERO;
        assert!(matches!(s.validate(), Err(ConfigError::ZeroAddress("presale.treasury"))));

        let mut s = valid();
        s.presale.start_time = Some(10);
        s.presale.end_time = Some(10);
        assert!(matches!(s.validate(), Err(ConfigError::InvalidWindow)));

        let mut s = valid();
        s.presale.hard_cap_amount = 5_000_000_000_000_000_000;
        assert!(matches!(s.validate(), Err(ConfigError::UnitMismatch(_))));

        let mut s = valid();
        s.presale.target_amount = 4_000_000;
        assert!(matches!(s.validate(), Err(ConfigError::TargetAboveCap)));
    }

    #[test]
    fn loads_file_with_env_override() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            f,
            r#"
[presale]
address = "0x00000000000000000000000000000000000000a0"
owner = "0x0000000000000000000000000000000000000001"
treasury = "0x0000000000000000000000000000000000000002"
tokens = ["0x0000000000000000000000000000000000007000", "0x0000000000000000000000000000000000007001"]
target_amount = 2500000
hard_cap_amount = 3500000
start_time = 1700000000

[vesting]
address = "0x00000000000000000000000000000000000000b0"
owner = "0x0000000000000000000000000000000000000001"
receiver = "0x0000000000000000000000000000000000000050"
"#
        )
        .unwrap();

        std::env::set_var("KERC__TELEMETRY__LOG_FILTER", "debug");
        let s = load(Some(f.path())).unwrap();
        std::env::remove_var("KERC__TELEMETRY__LOG_FILTER");

        assert_eq!(s.presale.treasury, Address::from_low_u64(2));
        assert_eq!(s.presale.tokens.len(), 2);
        assert_eq!(s.presale.hard_cap_amount, 3_500_000);
        assert_eq!(s.presale.start_time, Some(1_700_000_000));
        assert_eq!(s.presale.end_time, None);
        assert_eq!(s.presale.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(s.vesting.receiver, Address::from_low_u64(0x50));
        assert_eq!(s.telemetry.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::PathNotFound(_)));
    }
}
