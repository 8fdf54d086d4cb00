//! Engine configuration
//!
//! Options are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (explicit path, or `VERDICT_CONFIG_PATH`)
//! 3. `VERDICT__*` environment variables (e.g. `VERDICT__POOL_MAX=16`)
//! 4. Explicit overrides set on the builder
//!
//! # Example
//!
//! ```no_run
//! use verdict_core::config::EngineOptions;
//!
//! let options = EngineOptions::builder()
//!     .config_path(Some("verdict.toml".into()))
//!     .yield_supported(Some(true))
//!     .build()?;
//! # Ok::<(), verdict_core::EngineError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Environment variable naming a config file when none is passed explicitly
pub const CONFIG_PATH_ENV: &str = "VERDICT_CONFIG_PATH";

const ENV_PREFIX: &str = "VERDICT";

/// Options fixed at engine construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Track suspensions. When false, an operator that yields fails the run.
    pub yield_supported: bool,

    /// Skip compile-time evaluation of constant deterministic subtrees
    pub disable_inline: bool,

    /// Default upper bound on checked-out instances for pooled programs
    pub pool_max: usize,

    /// Deepest logic nesting the compiler accepts
    pub max_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            yield_supported: false,
            disable_inline: false,
            pool_max: 100,
            max_depth: 256,
        }
    }
}

impl EngineOptions {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    pub fn with_yield_supported(mut self, yield_supported: bool) -> Self {
        self.yield_supported = yield_supported;
        self
    }

    pub fn with_disable_inline(mut self, disable_inline: bool) -> Self {
        self.disable_inline = disable_inline;
        self
    }
}

/// Builder that loads [`EngineOptions`] from file and environment
#[derive(Debug, Default)]
pub struct OptionsBuilder {
    config_path: Option<PathBuf>,
    yield_supported: Option<bool>,
    disable_inline: Option<bool>,
    pool_max: Option<usize>,
    max_depth: Option<usize>,
}

impl OptionsBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn yield_supported(mut self, value: Option<bool>) -> Self {
        self.yield_supported = value;
        self
    }

    pub fn disable_inline(mut self, value: Option<bool>) -> Self {
        self.disable_inline = value;
        self
    }

    pub fn pool_max(mut self, value: Option<usize>) -> Self {
        self.pool_max = value;
        self
    }

    pub fn max_depth(mut self, value: Option<usize>) -> Self {
        self.max_depth = value;
        self
    }

    pub fn build(self) -> Result<EngineOptions> {
        let defaults = EngineOptions::default();
        let mut builder = config::Config::builder()
            .set_default("yield_supported", defaults.yield_supported)?
            .set_default("disable_inline", defaults.disable_inline)?
            .set_default("pool_max", defaults.pool_max as u64)?
            .set_default("max_depth", defaults.max_depth as u64)?;

        let path = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(path) = &path {
            tracing::debug!(path = %path.display(), "loading engine config file");
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let options: EngineOptions = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("yield_supported", self.yield_supported)?
            .set_override_option("disable_inline", self.disable_inline)?
            .set_override_option("pool_max", self.pool_max.map(|v| v as u64))?
            .set_override_option("max_depth", self.max_depth.map(|v| v as u64))?
            .build()?
            .try_deserialize()?;

        if options.max_depth == 0 {
            return Err(config::ConfigError::Message("max_depth must be at least 1".into()).into());
        }

        Ok(options)
    }
}
