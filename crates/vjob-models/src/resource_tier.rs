//! Resource tier definitions for remote transcoding tasks.
//!
//! The tier is chosen at submission time and only influences how the remote
//! task is sized when it is launched:
//!
//! - `Economy`: smallest task size, cheapest
//! - `Standard`: default sizing
//! - `Premium`: largest task size, fastest turnaround

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Resource tier for a transcoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    /// Smallest task size.
    Economy,

    /// Balanced default sizing.
    #[default]
    Standard,

    /// Largest task size.
    Premium,
}

impl ResourceTier {
    /// All available tiers.
    pub const ALL: &'static [ResourceTier] = &[
        ResourceTier::Economy,
        ResourceTier::Standard,
        ResourceTier::Premium,
    ];

    /// Returns the tier name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTier::Economy => "economy",
            ResourceTier::Standard => "standard",
            ResourceTier::Premium => "premium",
        }
    }

    /// Task-level CPU units (1024 = one vCPU).
    pub fn task_cpu(&self) -> u32 {
        match self {
            ResourceTier::Economy => 1024,
            ResourceTier::Standard => 2048,
            ResourceTier::Premium => 4096,
        }
    }

    /// Task-level memory in MiB.
    pub fn task_memory_mib(&self) -> u32 {
        match self {
            ResourceTier::Economy => 2048,
            ResourceTier::Standard => 4096,
            ResourceTier::Premium => 8192,
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceTier {
    type Err = ResourceTierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "economy" | "eco" => Ok(ResourceTier::Economy),
            "standard" | "std" => Ok(ResourceTier::Standard),
            "premium" => Ok(ResourceTier::Premium),
            _ => Err(ResourceTierParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown resource tier: {0}")]
pub struct ResourceTierParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse() {
        assert_eq!("economy".parse::<ResourceTier>().unwrap(), ResourceTier::Economy);
        assert_eq!("eco".parse::<ResourceTier>().unwrap(), ResourceTier::Economy);
        assert_eq!("Standard".parse::<ResourceTier>().unwrap(), ResourceTier::Standard);
        assert_eq!("premium".parse::<ResourceTier>().unwrap(), ResourceTier::Premium);
        assert!("gold".parse::<ResourceTier>().is_err());
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&ResourceTier::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
        let tier: ResourceTier = serde_json::from_str("\"economy\"").unwrap();
        assert_eq!(tier, ResourceTier::Economy);
    }

    #[test]
    fn test_sizing_grows_with_tier() {
        for pair in ResourceTier::ALL.windows(2) {
            assert!(pair[0].task_cpu() < pair[1].task_cpu());
            assert!(pair[0].task_memory_mib() < pair[1].task_memory_mib());
        }
    }
}
