//! Staking contract state.

use alloy_core::primitives::U256;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::ServiceConfigId;
use crate::{Chain, StakingProgramId};

/// Staking status of a service in its selected program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    /// The service was removed from the program for missing its activity target.
    pub evicted: bool,
    /// The service may stake again.
    pub eligible_to_restake: bool,
    /// The service currently holds a staking slot.
    pub currently_staked: bool,
}

/// Supplies staking program requirements, slots and per-service eligibility.
pub trait StakingState: Send + Sync {
    /// Staked OLAS required by a program. `None` when the program is unknown.
    fn get_requirement<'a>(
        &'a self,
        chain: Chain,
        program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<U256>>>;

    /// Whether the program still has free slots. `None` when not known.
    fn get_slot_availability<'a>(
        &'a self,
        chain: Chain,
        program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<bool>>>;

    fn get_eligibility<'a>(&'a self, service: &'a ServiceConfigId)
    -> BoxFuture<'a, Result<Eligibility>>;
}
