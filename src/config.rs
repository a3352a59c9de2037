//! Compilation options.
//!
//! Every per-query option has a default in [`CompileOptions`]. Defaults can
//! be loaded from the environment; a query's `with` clause overrides them.
//!
//! # Environment Variables
//!
//! - `IVMC_SELFJOIN`: `sub`, `aug`, `das`, `assume_disjoint` or
//!   `assume_disjoint_verify` (default: `sub`)
//! - `IVMC_RC`: `yes`, `no` or `safe` (default: `safe`)
//! - `IVMC_IMPL`: `batch`, `inc` or `dem` (default: `dem`)
//! - `IVMC_FILTERS`: `on` or `off` (default: `on`)
//! - `IVMC_INSTRUMENT`: `on` or `off` (default: `off`)

use std::fmt;
use std::str::FromStr;

use crate::ivm::SelfJoin;

/// Whether a query's result relation keeps reference counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RcMode {
    Yes,
    No,
    /// Count only when the result is not duplicate safe.
    #[default]
    Safe,
}

impl FromStr for RcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(RcMode::Yes),
            "no" => Ok(RcMode::No),
            "safe" => Ok(RcMode::Safe),
            _ => Err(format!("expected yes, no or safe, got '{}'", s)),
        }
    }
}

/// How a query is implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ImplMode {
    /// No maintenance; evaluated on every read.
    Batch,
    /// Maintained for every parameter value.
    Inc,
    /// Maintained for demanded parameter values only. Queries without
    /// parameters fall back to `Inc`.
    #[default]
    Dem,
}

impl ImplMode {
    pub fn name(self) -> &'static str {
        match self {
            ImplMode::Batch => "batch",
            ImplMode::Inc => "inc",
            ImplMode::Dem => "dem",
        }
    }
}

impl fmt::Display for ImplMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ImplMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(ImplMode::Batch),
            "inc" => Ok(ImplMode::Inc),
            "dem" => Ok(ImplMode::Dem),
            _ => Err(format!("expected batch, inc or dem, got '{}'", s)),
        }
    }
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(format!("expected on or off, got '{}'", s)),
    }
}

/// Error returned when an option is unknown or has a bad value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownOption(String),
    InvalidValue { name: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOption(name) => write!(f, "unknown option: {name}"),
            Self::InvalidValue { name, message } => write!(f, "invalid value for {name}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Options given explicitly on one query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub selfjoin: Option<SelfJoin>,
    pub rc: Option<RcMode>,
    pub impl_mode: Option<ImplMode>,
    pub filters: Option<bool>,
    pub instrument: Option<bool>,
}

impl QueryOptions {
    /// Set option `name` from its source text.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            name: name.to_string(),
            message,
        };
        match name {
            "selfjoin" => self.selfjoin = Some(value.parse().map_err(invalid)?),
            "rc" => self.rc = Some(value.parse().map_err(invalid)?),
            "impl" => self.impl_mode = Some(value.parse().map_err(invalid)?),
            "filters" => self.filters = Some(parse_switch(value).map_err(invalid)?),
            "instrument" => self.instrument = Some(parse_switch(value).map_err(invalid)?),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }
        Ok(())
    }
}

/// Concrete options of one compiled query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub selfjoin: SelfJoin,
    pub rc: RcMode,
    pub impl_mode: ImplMode,
    pub filters: bool,
    pub instrument: bool,
}

/// Defaults for every per-query option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub selfjoin: SelfJoin,
    pub rc: RcMode,
    pub impl_mode: ImplMode,
    pub filters: bool,
    pub instrument: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            selfjoin: SelfJoin::Sub,
            rc: RcMode::Safe,
            impl_mode: ImplMode::Dem,
            filters: true,
            instrument: false,
        }
    }
}

impl CompileOptions {
    pub const ENV_SELFJOIN: &'static str = "IVMC_SELFJOIN";
    pub const ENV_RC: &'static str = "IVMC_RC";
    pub const ENV_IMPL: &'static str = "IVMC_IMPL";
    pub const ENV_FILTERS: &'static str = "IVMC_FILTERS";
    pub const ENV_INSTRUMENT: &'static str = "IVMC_INSTRUMENT";

    /// Load defaults from environment variables. Unset variables keep the
    /// built-in default.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load defaults through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut opts = QueryOptions::default();
        for (var, option) in [
            (Self::ENV_SELFJOIN, "selfjoin"),
            (Self::ENV_RC, "rc"),
            (Self::ENV_IMPL, "impl"),
            (Self::ENV_FILTERS, "filters"),
            (Self::ENV_INSTRUMENT, "instrument"),
        ] {
            if let Some(value) = lookup(var) {
                opts.set(option, value.trim()).map_err(|e| match e {
                    ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
                        name: var.to_string(),
                        message,
                    },
                    other => other,
                })?;
            }
        }
        let defaults = Self::default();
        Ok(Self {
            selfjoin: opts.selfjoin.unwrap_or(defaults.selfjoin),
            rc: opts.rc.unwrap_or(defaults.rc),
            impl_mode: opts.impl_mode.unwrap_or(defaults.impl_mode),
            filters: opts.filters.unwrap_or(defaults.filters),
            instrument: opts.instrument.unwrap_or(defaults.instrument),
        })
    }

    /// Options of a query with the given overrides. `dem` on a query
    /// without parameters becomes `inc`.
    pub fn resolve(&self, overrides: &QueryOptions, has_params: bool) -> ResolvedOptions {
        let impl_mode = match overrides.impl_mode.unwrap_or(self.impl_mode) {
            ImplMode::Dem if !has_params => ImplMode::Inc,
            mode => mode,
        };
        ResolvedOptions {
            selfjoin: overrides.selfjoin.unwrap_or(self.selfjoin),
            rc: overrides.rc.unwrap_or(self.rc),
            impl_mode,
            filters: overrides.filters.unwrap_or(self.filters),
            instrument: overrides.instrument.unwrap_or(self.instrument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(CompileOptions::from_lookup(lookup(&[])).unwrap(), CompileOptions::default());
    }

    #[test]
    fn test_env_overrides() {
        let opts = CompileOptions::from_lookup(lookup(&[("IVMC_SELFJOIN", "das"), ("IVMC_FILTERS", "off")])).unwrap();
        assert_eq!(opts.selfjoin, SelfJoin::Das);
        assert!(!opts.filters);
    }

    #[test]
    fn test_invalid_env_value_names_variable() {
        let err = CompileOptions::from_lookup(lookup(&[("IVMC_RC", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "IVMC_RC"));
    }

    #[test]
    fn test_resolve_dem_without_params() {
        let defaults = CompileOptions::default();
        let resolved = defaults.resolve(&QueryOptions::default(), false);
        assert_eq!(resolved.impl_mode, ImplMode::Inc);
        let resolved = defaults.resolve(&QueryOptions::default(), true);
        assert_eq!(resolved.impl_mode, ImplMode::Dem);
    }

    #[test]
    fn test_unknown_option() {
        let mut opts = QueryOptions::default();
        assert_eq!(
            opts.set("speed", "fast"),
            Err(ConfigError::UnknownOption("speed".to_string()))
        );
    }
}
