//! When a failed sell should reset the router's allowance

use crate::{config::StrategyConfig, execution_client::error::FailureCause};

/// Decides whether a failed sell resets the allowance before the next try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    /// Whether resets happen at all
    pub enabled: bool,
    /// Reset on every n-th failure regardless of cause; zero disables this
    pub every_n_failures: usize,
}

impl ResetPolicy {
    /// The policy configured by the strategy
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            enabled: config.reset_allowance_on_fail,
            every_n_failures: config.reapprove_every_n_failures,
        }
    }

    /// Whether the `failure_count`-th failure of a sell, with the given
    /// cause, should reset the allowance
    pub fn should_reset(&self, cause: FailureCause, failure_count: usize) -> bool {
        if !self.enabled {
            return false;
        }

        let periodic = self.every_n_failures > 0 && failure_count % self.every_n_failures == 0;
        cause == FailureCause::AllowanceTooLow || periodic
    }
}
