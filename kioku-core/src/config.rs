//! Buffer configurations.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// How importance-sampling weights are normalized.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum WeightNormalizer {
    /// Normalize by the maximum weight over the whole buffer.
    All,

    /// Normalize by the maximum weight within the sampled batch.
    Batch,
}

/// Configuration of a [`Buffer`](crate::Buffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct BufferConfig {
    /// Maximum number of records that can be stored. When the buffer is
    /// full, new records replace the oldest ones.
    pub capacity: usize,

    /// Random seed for uniform sampling.
    pub seed: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
        }
    }
}

impl BufferConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Configuration of prioritized sampling.
///
/// Priorities entering the weight tree are transformed as
/// `(p + eps)^alpha`; importance-sampling weights use an exponent `beta`
/// annealed linearly from `beta_0` to `beta_final` over `n_opts_final`
/// priority updates.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PerConfig {
    /// Exponent for prioritization. A value of 0 results in uniform
    /// sampling.
    pub alpha: f32,

    /// Small constant keeping zero-priority records sampleable.
    pub eps: f32,

    /// Initial value of the importance-sampling exponent.
    pub beta_0: f32,

    /// Final value of the importance-sampling exponent, typically 1.0.
    pub beta_final: f32,

    /// Number of priority updates after which `beta` reaches its final
    /// value.
    pub n_opts_final: usize,

    /// Normalization of importance-sampling weights.
    pub normalize: WeightNormalizer,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            eps: 1e-8,
            beta_0: 0.4,
            beta_final: 1.0,
            n_opts_final: 500_000,
            normalize: WeightNormalizer::Batch,
        }
    }
}

impl PerConfig {
    /// Sets the prioritization exponent `alpha`.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the priority offset `eps`.
    pub fn eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Sets the initial importance-sampling exponent `beta_0`.
    pub fn beta_0(mut self, beta_0: f32) -> Self {
        self.beta_0 = beta_0;
        self
    }

    /// Sets the final importance-sampling exponent `beta_final`.
    pub fn beta_final(mut self, beta_final: f32) -> Self {
        self.beta_final = beta_final;
        self
    }

    /// Sets the number of priority updates to reach `beta_final`.
    pub fn n_opts_final(mut self, n_opts_final: usize) -> Self {
        self.n_opts_final = n_opts_final;
        self
    }

    /// Sets the weight normalization.
    pub fn normalize(mut self, normalize: WeightNormalizer) -> Self {
        self.normalize = normalize;
        self
    }
}

/// Configuration of a [`PrioritizedBuffer`](crate::PrioritizedBuffer).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PrioritizedBufferConfig {
    /// Maximum number of records that can be stored.
    pub capacity: usize,

    /// Random seed for sampling.
    pub seed: u64,

    /// Prioritized sampling parameters.
    pub per: PerConfig,
}

impl Default for PrioritizedBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
            per: PerConfig::default(),
        }
    }
}

impl PrioritizedBufferConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the prioritized sampling parameters.
    pub fn per(mut self, per: PerConfig) -> Self {
        self.per = per;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_yaml_round_trip() {
        let dir = TempDir::new("kioku_config").unwrap();
        let path = dir.path().join("buffer.yaml");

        let config = PrioritizedBufferConfig::default()
            .capacity(256)
            .seed(7)
            .per(PerConfig::default().alpha(0.7).beta_0(0.5));
        config.save(&path).unwrap();

        let loaded = PrioritizedBufferConfig::load(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
