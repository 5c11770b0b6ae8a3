//! Configuration surface.
//!
//! `serde`-deserialized tree mirroring the external configuration keys: one
//! `perf_model/<name>` sub-tree per cache level plus a `general` tree for
//! the PIC/microbenchmark toggles. Validated eagerly at construction
//! (`Config::validate`) rather than discovered mid-simulation, matching the
//! donor crate's up-front validation of hierarchical config.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::common::SimError;

mod defaults {
    pub const OUTSTANDING_MISSES: usize = 4;
    pub const SHARED_CORES: usize = 1;
    pub const TAGS_ACCESS_TIME: u64 = 1;
    pub const DATA_ACCESS_TIME: u64 = 4;
    pub const WRITEBACK_TIME: u64 = 10;
    pub const CACHE_SIZE: usize = 32 * 1024;
    pub const LINE_SIZE: usize = 64;
    pub const WAYS: usize = 8;
}

/// Named replacement policy, selected at controller construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicyKind {
    #[default]
    Lru,
    Plru,
    Fifo,
    Random,
    Mru,
}

/// Named hardware prefetcher, selected at controller construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PrefetcherKind {
    #[default]
    None,
    NextLine,
    Stride,
    Stream,
    Tagged,
}

/// Auxiliary tag directory (per-sharer tracking) settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AtdConfig {
    /// Enables `cached_locs` sharer tracking on each block.
    #[serde(default)]
    pub enabled: bool,
}

/// Prefetcher sub-tree (`perf_model/<name>/prefetcher/*`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PrefetcherConfig {
    /// Which prefetcher implementation to instantiate.
    #[serde(default)]
    pub kind: PrefetcherKind,
    /// Pattern table size, for prefetchers that keep per-address history.
    #[serde(default = "PrefetcherConfig::default_table_size")]
    pub table_size: usize,
    /// Lines to prefetch per trigger.
    #[serde(default = "PrefetcherConfig::default_degree")]
    pub degree: usize,
}

impl PrefetcherConfig {
    fn default_table_size() -> usize {
        64
    }
    fn default_degree() -> usize {
        1
    }
}

/// One `perf_model/<name>` sub-tree: the configuration for a single cache level.
#[derive(Debug, Clone, Deserialize)]
pub struct PerfModelConfig {
    /// Every access is a synthetic hit (testing / idealized configurations).
    #[serde(default)]
    pub perfect: bool,
    /// Whether this level participates in coherence at all.
    #[serde(default = "PerfModelConfig::default_coherent")]
    pub coherent: bool,
    /// Write-through to the next level rather than write-back.
    #[serde(default)]
    pub writethrough: bool,
    /// Cycles to write a dirty block back to the next level or DRAM.
    #[serde(default = "PerfModelConfig::default_writeback_time")]
    pub writeback_time: u64,
    /// Cycles to access the data array.
    #[serde(default = "PerfModelConfig::default_data_access_time")]
    pub data_access_time: u64,
    /// Cycles to access the tag array.
    #[serde(default = "PerfModelConfig::default_tags_access_time")]
    pub tags_access_time: u64,
    /// Maximum in-flight misses; `0` disables MSHR gating.
    #[serde(default = "PerfModelConfig::default_outstanding_misses")]
    pub outstanding_misses: usize,
    /// Number of cores sharing one master controller at this level; `1` = private.
    #[serde(default = "PerfModelConfig::default_shared_cores")]
    pub shared_cores: usize,
    /// Cache size in bytes.
    #[serde(default = "PerfModelConfig::default_cache_size")]
    pub size_bytes: usize,
    /// Cache line size in bytes.
    #[serde(default = "PerfModelConfig::default_line_size")]
    pub line_bytes: usize,
    /// Associativity.
    #[serde(default = "PerfModelConfig::default_ways")]
    pub ways: usize,
    /// Named replacement policy.
    #[serde(default)]
    pub replacement_policy: ReplacementPolicyKind,
    /// Named home-lookup hash function (resolved by the embedding driver).
    #[serde(default)]
    pub hash_function: Option<String>,
    /// Auxiliary tag directory settings.
    #[serde(default)]
    pub atd: AtdConfig,
    /// Hardware prefetcher settings.
    #[serde(default)]
    pub prefetcher: PrefetcherConfig,
}

impl PerfModelConfig {
    fn default_coherent() -> bool {
        true
    }
    fn default_writeback_time() -> u64 {
        defaults::WRITEBACK_TIME
    }
    fn default_data_access_time() -> u64 {
        defaults::DATA_ACCESS_TIME
    }
    fn default_tags_access_time() -> u64 {
        defaults::TAGS_ACCESS_TIME
    }
    fn default_outstanding_misses() -> usize {
        defaults::OUTSTANDING_MISSES
    }
    fn default_shared_cores() -> usize {
        defaults::SHARED_CORES
    }
    fn default_cache_size() -> usize {
        defaults::CACHE_SIZE
    }
    fn default_line_size() -> usize {
        defaults::LINE_SIZE
    }
    fn default_ways() -> usize {
        defaults::WAYS
    }

    /// Validates this level's configuration, independent of its neighbors.
    /// `last_level` is `true` for the level that terminates the hierarchy
    /// (the LLC): write-through is meaningless there since there is no next
    /// level to write through to, so it is rejected rather than silently
    /// ignored (4.7's "mismatched write-through on last-level cache" fatal).
    pub fn validate(&self, name: &str, last_level: bool) -> Result<(), SimError> {
        if !self.line_bytes.is_power_of_two() {
            return Err(SimError::ConfigInvalid(format!(
                "perf_model/{name}/line_bytes must be a power of two, got {}",
                self.line_bytes
            )));
        }
        if self.ways == 0 {
            return Err(SimError::ConfigInvalid(format!("perf_model/{name}/ways must be nonzero")));
        }
        if self.writethrough && !self.coherent {
            return Err(SimError::ConfigInvalid(format!(
                "perf_model/{name}/writethrough requires coherent=true"
            )));
        }
        if self.writethrough && last_level {
            return Err(SimError::ConfigInvalid(format!(
                "perf_model/{name}/writethrough is not permitted on the last-level cache"
            )));
        }
        Ok(())
    }
}

impl Default for PerfModelConfig {
    fn default() -> Self {
        Self {
            perfect: false,
            coherent: Self::default_coherent(),
            writethrough: false,
            writeback_time: Self::default_writeback_time(),
            data_access_time: Self::default_data_access_time(),
            tags_access_time: Self::default_tags_access_time(),
            outstanding_misses: Self::default_outstanding_misses(),
            shared_cores: Self::default_shared_cores(),
            size_bytes: Self::default_cache_size(),
            line_bytes: Self::default_line_size(),
            ways: Self::default_ways(),
            replacement_policy: ReplacementPolicyKind::default(),
            hash_function: None,
            atd: AtdConfig::default(),
            prefetcher: PrefetcherConfig::default(),
        }
    }
}

/// `general/*` toggles governing PIC and microbenchmark statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Enables the PIC operator pipeline at all.
    #[serde(default)]
    pub pic_on: bool,
    /// Routes PIC replies through the VPIC remote message set rather than
    /// reusing ordinary coherence messages.
    #[serde(default)]
    pub pic_use_vpic: bool,
    /// Avoids issuing PIC operations directly against DRAM-backed lines.
    #[serde(default)]
    pub pic_avoid_dram: bool,
    /// Named cache level PIC operators should prefer to execute at.
    #[serde(default)]
    pub pic_cache_level: Option<String>,
    /// Enables the search-key-miss microbenchmark estimator (see `crate::pic`).
    #[serde(default)]
    pub microbench_search_key_enabled: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            pic_on: false,
            pic_use_vpic: false,
            pic_avoid_dram: false,
            pic_cache_level: None,
            microbench_search_key_enabled: false,
        }
    }
}

/// Root configuration: one `perf_model/<name>` entry per cache level plus `general`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cache-level configurations, keyed by level name (`"l1"`, `"l2"`, `"llc"`, ...).
    #[serde(default, rename = "perf_model")]
    pub perf_model: BTreeMap<String, PerfModelConfig>,
    /// General PIC/microbenchmark toggles.
    #[serde(default)]
    pub general: GeneralConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut perf_model = BTreeMap::new();
        perf_model.insert("l1".to_string(), PerfModelConfig {
            shared_cores: 1,
            ..PerfModelConfig::default()
        });
        perf_model.insert("l2".to_string(), PerfModelConfig {
            shared_cores: 1,
            size_bytes: 256 * 1024,
            tags_access_time: 3,
            data_access_time: 10,
            ..PerfModelConfig::default()
        });
        perf_model.insert("llc".to_string(), PerfModelConfig {
            shared_cores: 8,
            size_bytes: 8 * 1024 * 1024,
            ways: 16,
            tags_access_time: 5,
            data_access_time: 30,
            ..PerfModelConfig::default()
        });
        Self { perf_model, general: GeneralConfig::default() }
    }
}

impl Config {
    /// Validates every named level; returns the first failure encountered.
    /// `"llc"` is the hardcoded last-level name `sim::Simulator::new` builds
    /// (it is always the hierarchy's single shared terminal level), so that
    /// is the one entry validated with `last_level = true`.
    pub fn validate(&self) -> Result<(), SimError> {
        for (name, level) in &self.perf_model {
            level.validate(name, name == "llc")?;
        }
        if self.perf_model.is_empty() {
            return Err(SimError::ConfigInvalid("perf_model must name at least one cache level".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn non_power_of_two_line_size_is_rejected() {
        let mut cfg = Config::default();
        cfg.perf_model.get_mut("l1").unwrap().line_bytes = 65;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn writethrough_without_coherent_is_rejected() {
        let mut cfg = Config::default();
        let l1 = cfg.perf_model.get_mut("l1").unwrap();
        l1.writethrough = true;
        l1.coherent = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn writethrough_on_last_level_is_rejected() {
        let mut cfg = Config::default();
        cfg.perf_model.get_mut("llc").unwrap().writethrough = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn writethrough_on_a_non_last_level_is_accepted() {
        let mut cfg = Config::default();
        cfg.perf_model.get_mut("l1").unwrap().writethrough = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_from_json_with_defaults_filled_in() {
        let json = r#"{
            "perf_model": {
                "l1": { "size_bytes": 16384, "ways": 4 }
            },
            "general": { "pic_on": true }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.perf_model["l1"].size_bytes, 16384);
        assert_eq!(cfg.perf_model["l1"].tags_access_time, defaults::TAGS_ACCESS_TIME);
        assert!(cfg.general.pic_on);
    }
}
