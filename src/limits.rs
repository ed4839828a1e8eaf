//! Tier quota policy.
//!
//! Pure tier-to-quota lookup. Nothing here enforces a limit; the usage
//! metering collaborator reads these values and decides whether an operation
//! would push a counter past its ceiling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tenant::TenantTier;

/// Sentinel meaning "no ceiling" for a limit value.
pub const UNLIMITED: i64 = -1;

/// Resource ceilings for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of member users.
    pub max_users: i64,
    /// Maximum number of concurrently provisioned sandboxes.
    pub max_sandboxes: i64,
    /// Token budget per calendar month.
    pub monthly_tokens: i64,
    /// API call budget per calendar month.
    pub monthly_api_calls: i64,
    /// Storage budget in gigabytes.
    pub storage_gb: i64,
}

impl ResourceLimits {
    /// Default limits for a tier.
    pub fn for_tier(tier: TenantTier) -> Self {
        match tier {
            TenantTier::Free => Self {
                max_users: 5,
                max_sandboxes: 2,
                monthly_tokens: 100_000,
                monthly_api_calls: 10_000,
                storage_gb: 1,
            },
            TenantTier::Starter => Self {
                max_users: 25,
                max_sandboxes: 10,
                monthly_tokens: 2_000_000,
                monthly_api_calls: 100_000,
                storage_gb: 10,
            },
            TenantTier::Professional => Self {
                max_users: 100,
                max_sandboxes: 50,
                monthly_tokens: 20_000_000,
                monthly_api_calls: 1_000_000,
                storage_gb: 100,
            },
            TenantTier::Enterprise => Self::unlimited(),
        }
    }

    /// Limits with every ceiling removed.
    pub fn unlimited() -> Self {
        Self {
            max_users: UNLIMITED,
            max_sandboxes: UNLIMITED,
            monthly_tokens: UNLIMITED,
            monthly_api_calls: UNLIMITED,
            storage_gb: UNLIMITED,
        }
    }

    /// Whether a limit value means "no ceiling".
    pub fn is_unlimited(value: i64) -> bool {
        value == UNLIMITED
    }

    /// Flatten into the key-value form stored on the catalog row.
    pub fn as_map(&self) -> HashMap<String, i64> {
        HashMap::from([
            ("max_users".to_string(), self.max_users),
            ("max_sandboxes".to_string(), self.max_sandboxes),
            ("monthly_tokens".to_string(), self.monthly_tokens),
            ("monthly_api_calls".to_string(), self.monthly_api_calls),
            ("storage_gb".to_string(), self.storage_gb),
        ])
    }

    /// Rebuild from the stored key-value form; absent keys fall back to the
    /// free-tier default.
    pub fn from_map(map: &HashMap<String, i64>) -> Self {
        let defaults = Self::default();
        Self {
            max_users: *map.get("max_users").unwrap_or(&defaults.max_users),
            max_sandboxes: *map.get("max_sandboxes").unwrap_or(&defaults.max_sandboxes),
            monthly_tokens: *map.get("monthly_tokens").unwrap_or(&defaults.monthly_tokens),
            monthly_api_calls: *map
                .get("monthly_api_calls")
                .unwrap_or(&defaults.monthly_api_calls),
            storage_gb: *map.get("storage_gb").unwrap_or(&defaults.storage_gb),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::for_tier(TenantTier::Free)
    }
}
