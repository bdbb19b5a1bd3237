//! Point-in-time views of the collaborators, as cached by the pollers.
//!
//! A snapshot that has not been fetched yet is represented by `None` at the use site and
//! means "loading". Inside a fetched snapshot, a missing balance entry means the wallet
//! holds nothing of that token.

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    Chain, StakingProgramId, TokenSymbol,
    traits::{
        BalanceSource, Eligibility, ServiceConfigId, ServiceRecord, ServiceRegistry,
        StakedBalance, StakingState, WalletStore,
    },
};

/// The registry's view of the selected service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// `None` when no service has been created yet.
    pub record: Option<ServiceRecord>,
}

impl ServiceSnapshot {
    pub fn is_running(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.running)
    }
}

/// Which operator wallet a balance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum WalletRole {
    MasterSafe,
    ServiceSafe,
}

/// One balance entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub role: WalletRole,
    pub address: Address,
    pub chain: Chain,
    pub symbol: TokenSymbol,
    pub amount: U256,
}

/// Balances of the master Safes, the service Safe and the service's staked OLAS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub wallets: Vec<WalletBalance>,
    pub staked: Vec<StakedBalance>,
}

impl BalanceSnapshot {
    /// Balance of one token for one wallet role on one chain, `None` when not reported.
    pub fn amount(&self, role: WalletRole, chain: Chain, symbol: TokenSymbol) -> Option<U256> {
        self.wallets
            .iter()
            .find(|b| b.role == role && b.chain == chain && b.symbol == symbol)
            .map(|b| b.amount)
    }

    /// Staked balances reported for `chain`, `None` when the service has none there.
    pub fn staked_on(&self, chain: Chain) -> Option<&StakedBalance> {
        self.staked.iter().find(|s| s.chain == chain)
    }
}

/// Staking program details for the selected service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingSnapshot {
    /// Required staked OLAS; `None` when the program is unknown.
    pub requirement: Option<U256>,
    /// Whether free slots remain; `None` when not known.
    pub slots_available: Option<bool>,
    pub eligibility: Eligibility,
}

/// Fetch the record of the selected service.
pub async fn fetch_service(
    registry: &dyn ServiceRegistry,
    selected: Option<&ServiceConfigId>,
) -> Result<ServiceSnapshot> {
    let record = match selected {
        Some(id) => registry
            .get(id)
            .await
            .with_context(|| format!("Failed to fetch service {}", id))?,
        None => None,
    };
    Ok(ServiceSnapshot { record })
}

/// Fetch the staking program details of the selected service.
pub async fn fetch_staking(
    staking: &dyn StakingState,
    home_chain: Chain,
    program: Option<&StakingProgramId>,
    selected: Option<&ServiceConfigId>,
) -> Result<StakingSnapshot> {
    let (requirement, slots_available) = match program {
        Some(program) => (
            staking
                .get_requirement(home_chain, program)
                .await
                .context("Failed to fetch staking requirement")?,
            staking
                .get_slot_availability(home_chain, program)
                .await
                .context("Failed to fetch staking slots")?,
        ),
        None => (None, None),
    };

    let eligibility = match selected {
        Some(id) => staking
            .get_eligibility(id)
            .await
            .context("Failed to fetch staking eligibility")?,
        None => Eligibility::default(),
    };

    Ok(StakingSnapshot {
        requirement,
        slots_available,
        eligibility,
    })
}

/// Fetch balances of every master Safe, the selected service's Safe, and its staked OLAS.
pub async fn fetch_balances(
    balances: &dyn BalanceSource,
    wallets: &dyn WalletStore,
    registry: &dyn ServiceRegistry,
    selected: Option<&ServiceConfigId>,
) -> Result<BalanceSnapshot> {
    let mut snapshot = BalanceSnapshot::default();

    let safes = wallets
        .list_safes()
        .await
        .context("Failed to list master Safes")?;
    for safe in safes {
        let tokens = balances
            .get_balances(safe.address, safe.chain)
            .await
            .with_context(|| format!("Failed to fetch master Safe balances on {}", safe.chain))?;
        snapshot
            .wallets
            .extend(tokens.into_iter().map(|token| WalletBalance {
                role: WalletRole::MasterSafe,
                address: safe.address,
                chain: safe.chain,
                symbol: token.symbol,
                amount: token.amount,
            }));
    }

    let Some(id) = selected else {
        return Ok(snapshot);
    };

    if let Some(record) = registry
        .get(id)
        .await
        .with_context(|| format!("Failed to fetch service {}", id))?
    {
        if let Some(service_safe) = record.safe {
            let tokens = balances
                .get_balances(service_safe, record.home_chain)
                .await
                .context("Failed to fetch service Safe balances")?;
            snapshot
                .wallets
                .extend(tokens.into_iter().map(|token| WalletBalance {
                    role: WalletRole::ServiceSafe,
                    address: service_safe,
                    chain: record.home_chain,
                    symbol: token.symbol,
                    amount: token.amount,
                }));
        }
    }

    snapshot.staked = balances
        .get_staked_balances(id)
        .await
        .context("Failed to fetch staked balances")?;

    Ok(snapshot)
}
