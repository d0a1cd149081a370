// config.rs
// Description: Playground configuration. Every field has a default so an empty TOML
//              document is a valid configuration.
// History:
// - 2026-10-12: Add TOML backed configuration for playback timing and weight init.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlaygroundError, Result};
use crate::layer::{CachedSampler, GlorotUniformSampler, HeNormalSampler, SeededSampler, WeightSampler};
use crate::{MAX_SPEED_MULTIPLIER, MIN_SPEED_MULTIPLIER};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightInit {
    #[default]
    GlorotUniform,
    HeNormal,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlaygroundConfig {
    #[serde(default = "default_base_step_period_ms")]
    pub i_base_step_period_ms: u64,
    #[serde(default = "default_speed_multiplier")]
    pub d_speed_multiplier: f32,
    #[serde(default = "default_weight_cache_ttl_secs")]
    pub i_weight_cache_ttl_secs: u64,
    #[serde(default)]
    pub weight_init: WeightInit,
    // When set, weights come from a seeded sampler and are reproducible.
    #[serde(default)]
    pub opt_u64_weight_seed: Option<u64>,
    #[serde(default = "default_large_input_warning_tokens")]
    pub i_large_input_warning_tokens: usize,
    #[serde(default = "default_save_dir")]
    pub s_save_dir: String,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            i_base_step_period_ms: default_base_step_period_ms(),
            d_speed_multiplier: default_speed_multiplier(),
            i_weight_cache_ttl_secs: default_weight_cache_ttl_secs(),
            weight_init: WeightInit::default(),
            opt_u64_weight_seed: None,
            i_large_input_warning_tokens: default_large_input_warning_tokens(),
            s_save_dir: default_save_dir(),
        }
    }
}

impl PlaygroundConfig {
    pub fn from_toml_str(s_toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(s_toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(p_path: impl AsRef<Path>) -> Result<Self> {
        let p_path = p_path.as_ref();
        let s_toml = std::fs::read_to_string(p_path).map_err(|e| {
            PlaygroundError::Config(format!("config_read_error: {}: {}", p_path.display(), e))
        })?;
        Self::from_toml_str(&s_toml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.i_base_step_period_ms == 0 {
            return Err(PlaygroundError::Config("base_step_period_zero".to_string()));
        }
        if !self.d_speed_multiplier.is_finite()
            || self.d_speed_multiplier < MIN_SPEED_MULTIPLIER
            || self.d_speed_multiplier > MAX_SPEED_MULTIPLIER
        {
            return Err(PlaygroundError::Config("speed_multiplier_out_of_range".to_string()));
        }
        if self.s_save_dir.trim().is_empty() {
            return Err(PlaygroundError::Config("save_dir_empty".to_string()));
        }
        Ok(())
    }

    pub fn base_step_period(&self) -> Duration {
        Duration::from_millis(self.i_base_step_period_ms)
    }

    pub fn weight_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.i_weight_cache_ttl_secs)
    }

    // Sampler stack described by this configuration.
    pub fn build_sampler(&self) -> Arc<dyn WeightSampler> {
        let ttl = self.weight_cache_ttl();
        match (self.opt_u64_weight_seed, self.weight_init) {
            (Some(u64_seed), init) => Arc::new(SeededSampler::new(u64_seed, init)),
            (None, WeightInit::GlorotUniform) => {
                Arc::new(CachedSampler::new(GlorotUniformSampler, ttl))
            }
            (None, WeightInit::HeNormal) => Arc::new(CachedSampler::new(HeNormalSampler, ttl)),
        }
    }
}

fn default_base_step_period_ms() -> u64 {
    2000
}

fn default_speed_multiplier() -> f32 {
    1.0
}

fn default_weight_cache_ttl_secs() -> u64 {
    300
}

fn default_large_input_warning_tokens() -> usize {
    256
}

fn default_save_dir() -> String {
    "visualizations".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = PlaygroundConfig::from_toml_str("").unwrap();
        assert_eq!(config, PlaygroundConfig::default());
        assert_eq!(config.base_step_period(), Duration::from_millis(2000));
        assert_eq!(config.weight_cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_toml_overrides() {
        let config = PlaygroundConfig::from_toml_str(
            r#"
            i_base_step_period_ms = 500
            d_speed_multiplier = 2.0
            weight_init = "he_normal"
            opt_u64_weight_seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.i_base_step_period_ms, 500);
        assert_eq!(config.weight_init, WeightInit::HeNormal);
        assert_eq!(config.opt_u64_weight_seed, Some(7));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            PlaygroundConfig::from_toml_str("i_base_step_period_ms = 0"),
            Err(PlaygroundError::Config(_))
        ));
        assert!(PlaygroundConfig::from_toml_str("d_speed_multiplier = 5.0").is_err());
        assert!(PlaygroundConfig::from_toml_str("weight_init = \"zeros\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let p_path = dir.path().join("playground.toml");
        std::fs::write(&p_path, "s_save_dir = \"out\"\n").unwrap();
        let config = PlaygroundConfig::load(&p_path).unwrap();
        assert_eq!(config.s_save_dir, "out");
        assert!(PlaygroundConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let config = PlaygroundConfig {
            opt_u64_weight_seed: Some(11),
            ..PlaygroundConfig::default()
        };
        let a = config.build_sampler().sample(3, 4);
        let b = config.build_sampler().sample(3, 4);
        assert_eq!(a, b);
    }
}
