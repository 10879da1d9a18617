//! Routing modes and the per-request routing decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::provider::Provider;
use crate::rng::RandomSource;

/// How traffic is split between the legacy and replacement providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Everything goes to the legacy provider.
    #[default]
    SingleLegacy,
    /// Everything goes to the replacement provider.
    SingleNew,
    /// A configured share goes to the replacement provider.
    Percentage,
    /// Both providers are called; the replacement's result wins when it succeeds.
    Dual,
    /// Both providers are called; the legacy result is always returned.
    Shadow,
}

impl RoutingMode {
    pub const ALL: [RoutingMode; 5] = [
        RoutingMode::SingleLegacy,
        RoutingMode::SingleNew,
        RoutingMode::Percentage,
        RoutingMode::Dual,
        RoutingMode::Shadow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::SingleLegacy => "single-legacy",
            RoutingMode::SingleNew => "single-new",
            RoutingMode::Percentage => "percentage",
            RoutingMode::Dual => "dual",
            RoutingMode::Shadow => "shadow",
        }
    }

    /// Modes that call exactly one provider and may fall back to the other.
    pub fn is_single_target(&self) -> bool {
        matches!(
            self,
            RoutingMode::SingleLegacy | RoutingMode::SingleNew | RoutingMode::Percentage
        )
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown routing mode '{}'", s))
    }
}

/// Where one request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub mode: RoutingMode,
    /// The provider whose result is preferred.
    pub primary: Provider,
    /// The other provider, called concurrently in dual and shadow modes.
    pub secondary: Option<Provider>,
}

impl RoutingDecision {
    fn single(mode: RoutingMode, provider: Provider) -> Self {
        Self {
            mode,
            primary: provider,
            secondary: None,
        }
    }

    pub fn is_multi_target(&self) -> bool {
        self.secondary.is_some()
    }
}

/// Decide where a request goes.
///
/// In percentage mode one value `r` is drawn uniformly from `[0, 100)` and the
/// replacement provider is chosen iff `r < percentage`.
pub fn determine_routing(mode: RoutingMode, percentage: f64, rng: &dyn RandomSource) -> RoutingDecision {
    match mode {
        RoutingMode::SingleLegacy => RoutingDecision::single(mode, Provider::Legacy),
        RoutingMode::SingleNew => RoutingDecision::single(mode, Provider::Replacement),
        RoutingMode::Percentage => {
            let roll = rng.next_f64() * 100.0;
            let provider = if roll < percentage {
                Provider::Replacement
            } else {
                Provider::Legacy
            };
            RoutingDecision::single(mode, provider)
        }
        RoutingMode::Dual => RoutingDecision {
            mode,
            primary: Provider::Replacement,
            secondary: Some(Provider::Legacy),
        },
        RoutingMode::Shadow => RoutingDecision {
            mode,
            primary: Provider::Legacy,
            secondary: Some(Provider::Replacement),
        },
    }
}
