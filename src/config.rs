use super::*;
use common::*;

use serde::{Deserialize, Serialize};

/// Tunables picked at mount time. The on-disk geometry comes from the super block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// resident blocks at which the cache starts reusing slots
    pub eviction_threshold: usize,
    /// credits granted to every operation by `begin_op`
    pub op_max_num_blocks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            eviction_threshold: EVICTION_THRESHOLD,
            op_max_num_blocks: OP_MAX_NUM_BLOCKS,
        }
    }
}

impl CacheConfig {
    /// A single operation must always fit in an empty log, otherwise
    /// `begin_op` could never admit it.
    pub fn validate(&self, log_capacity: usize) -> Result<()> {
        if self.eviction_threshold == 0 {
            return Err(CacheError::InvalidConfig(
                "eviction threshold must be positive".to_owned(),
            ));
        }
        if self.op_max_num_blocks == 0 {
            return Err(CacheError::InvalidConfig(
                "operations need at least one block of credit".to_owned(),
            ));
        }
        if self.op_max_num_blocks > log_capacity {
            return Err(CacheError::InvalidConfig(format!(
                "{} blocks per operation exceed the log capacity of {log_capacity}",
                self.op_max_num_blocks
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fits_default_log() {
        CacheConfig::default().validate(LOG_MAX_SIZE).unwrap();
    }

    #[test]
    fn operation_larger_than_log_is_rejected() {
        let config = CacheConfig {
            op_max_num_blocks: 31,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(30),
            Err(CacheError::InvalidConfig(_))
        ));
    }
}
