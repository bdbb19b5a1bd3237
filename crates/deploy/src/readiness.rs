//! Deployment readiness evaluation.
//!
//! [`assess`] decides, from the cached collaborator snapshots, whether it is safe to
//! activate the selected agent. It is a pure function: the orchestrator rebuilds the
//! [`ReadinessInputs`] from its pollers and calls it whenever it needs a fresh answer.
//!
//! The branches are evaluated in a fixed precedence order and the first one that applies
//! decides:
//!
//! 1. no free staking slot and the service is not staked: blocked
//! 2. an initially funded, staked service: its home-chain staked OLAS must cover the
//!    requirement (the gas threshold is not checked)
//! 3. evicted but eligible to stake again: deployable
//! 4. otherwise OLAS and master Safe gas are checked against the requirement and the
//!    operating threshold, with a strict gas comparison for an already staked service.

use std::fmt;

use alloy_core::primitives::U256;

use crate::{
    Chain, TokenSymbol,
    amount::format_amount,
    snapshot::{BalanceSnapshot, ServiceSnapshot, StakingSnapshot, WalletRole},
};

/// Everything the evaluator looks at. `None` snapshots are still loading.
#[derive(Debug, Clone)]
pub struct ReadinessInputs {
    pub home_chain: Chain,
    pub service: Option<ServiceSnapshot>,
    pub balances: Option<BalanceSnapshot>,
    pub staking: Option<StakingSnapshot>,
    /// The operator funded this agent once already.
    pub initially_funded: bool,
    /// Native-gas threshold of the master Safe on the home chain.
    pub gas_threshold: Option<U256>,
}

/// Outcome of an assessment, with the branch that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Service or balance data has not loaded yet.
    Loading,
    ServiceRunning,
    StakingDetailsLoading,
    RequirementUnknown,
    NoServiceSlots,
    /// Initially funded and staked: only the staked total matters.
    FundedStake { staked: U256, required: U256 },
    /// Evicted and allowed back in.
    Restake,
    /// No operating threshold is configured for the home chain's native token.
    ThresholdUnknown,
    /// Staked service starting again.
    Restart {
        olas: U256,
        required: U256,
        gas: U256,
        threshold: U256,
    },
    /// First deployment, or a service that is not staked.
    FirstDeployment {
        olas: U256,
        required: U256,
        gas: U256,
        threshold: U256,
    },
}

impl Readiness {
    pub fn is_deployable(&self) -> bool {
        match self {
            Readiness::FundedStake { staked, required } => staked >= required,
            Readiness::Restake => true,
            Readiness::Restart {
                olas,
                required,
                gas,
                threshold,
            } => olas >= required && gas > threshold,
            Readiness::FirstDeployment {
                olas,
                required,
                gas,
                threshold,
            } => olas >= required && gas >= threshold,
            Readiness::Loading
            | Readiness::ServiceRunning
            | Readiness::StakingDetailsLoading
            | Readiness::RequirementUnknown
            | Readiness::NoServiceSlots
            | Readiness::ThresholdUnknown => false,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Loading => write!(f, "service or balance data is still loading"),
            Readiness::ServiceRunning => write!(f, "the agent is already running"),
            Readiness::StakingDetailsLoading => write!(f, "staking details are still loading"),
            Readiness::RequirementUnknown => write!(f, "staking requirement is unknown"),
            Readiness::NoServiceSlots => write!(f, "no staking slots available"),
            Readiness::FundedStake { staked, required } => write!(
                f,
                "staked {} of {} OLAS required",
                format_amount(*staked),
                format_amount(*required)
            ),
            Readiness::Restake => write!(f, "evicted service may stake again"),
            Readiness::ThresholdUnknown => write!(f, "no gas threshold configured"),
            Readiness::Restart {
                olas,
                required,
                gas,
                threshold,
            }
            | Readiness::FirstDeployment {
                olas,
                required,
                gas,
                threshold,
            } => write!(
                f,
                "{} of {} OLAS, master Safe gas {} (threshold {})",
                format_amount(*olas),
                format_amount(*required),
                format_amount(*gas),
                format_amount(*threshold)
            ),
        }
    }
}

/// Assess whether the agent can be activated.
pub fn assess(inputs: &ReadinessInputs) -> Readiness {
    let (Some(service), Some(balances)) = (&inputs.service, &inputs.balances) else {
        return Readiness::Loading;
    };
    if service.is_running() {
        return Readiness::ServiceRunning;
    }
    let Some(staking) = &inputs.staking else {
        return Readiness::StakingDetailsLoading;
    };
    let Some(required) = staking.requirement else {
        return Readiness::RequirementUnknown;
    };

    let staked = staking.eligibility.currently_staked;

    if staking.slots_available == Some(false) && !staked {
        return Readiness::NoServiceSlots;
    }

    let home = inputs.home_chain;
    let staked_total = balances.staked_on(home).map(|s| s.total());

    if service.record.is_some() && inputs.initially_funded && staked {
        return Readiness::FundedStake {
            staked: staked_total.unwrap_or_default(),
            required,
        };
    }

    if staking.eligibility.evicted && staking.eligibility.eligible_to_restake {
        return Readiness::Restake;
    }

    let Some(threshold) = inputs.gas_threshold else {
        return Readiness::ThresholdUnknown;
    };

    let service_olas = balances.amount(WalletRole::ServiceSafe, home, TokenSymbol::Olas);
    let gas = balances
        .amount(WalletRole::MasterSafe, home, home.native_token())
        .unwrap_or_default();

    if staked {
        return Readiness::Restart {
            olas: sum([service_olas, staked_total]),
            required,
            gas,
            threshold,
        };
    }

    let master_olas = balances.amount(WalletRole::MasterSafe, home, TokenSymbol::Olas);
    Readiness::FirstDeployment {
        olas: sum([service_olas, staked_total, master_olas]),
        required,
        gas,
        threshold,
    }
}

/// Whether the agent can be activated.
pub fn evaluate(inputs: &ReadinessInputs) -> bool {
    assess(inputs).is_deployable()
}

/// Sum of the known amounts; absent ones count as zero.
fn sum<const N: usize>(amounts: [Option<U256>; N]) -> U256 {
    amounts
        .into_iter()
        .flatten()
        .fold(U256::ZERO, |acc, amount| acc.saturating_add(amount))
}
