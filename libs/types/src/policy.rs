//! Freshness policies for feature resolution

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-specified tolerance for staleness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// Serve from the cache, fall back to the store on a miss
    #[default]
    #[serde(alias = "BEST_EFFORT")]
    BestEffort,
    /// Always read the store, ignore the cache
    #[serde(alias = "STRICT")]
    Strict,
}

impl FreshnessPolicy {
    pub fn uses_cache(&self) -> bool {
        matches!(self, FreshnessPolicy::BestEffort)
    }
}

impl fmt::Display for FreshnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessPolicy::BestEffort => write!(f, "best_effort"),
            FreshnessPolicy::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for FreshnessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(FreshnessPolicy::BestEffort),
            "strict" => Ok(FreshnessPolicy::Strict),
            other => Err(format!("unknown freshness policy: {other}")),
        }
    }
}
