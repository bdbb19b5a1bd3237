//! Wallet and staked balances.

use alloy_core::primitives::{Address, U256};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::ServiceConfigId;
use crate::{Chain, TokenSymbol};

/// Balance of one token held by a wallet on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub symbol: TokenSymbol,
    pub amount: U256,
}

/// OLAS locked by a service in the staking contracts of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakedBalance {
    pub chain: Chain,
    pub bond: U256,
    pub deposit: U256,
}

impl StakedBalance {
    /// Bond plus deposit.
    pub fn total(&self) -> U256 {
        self.bond.saturating_add(self.deposit)
    }
}

/// Supplies wallet balances and staked balances.
pub trait BalanceSource: Send + Sync {
    /// Native and OLAS balances of `wallet` on `chain`.
    fn get_balances(&self, wallet: Address, chain: Chain)
    -> BoxFuture<'_, Result<Vec<TokenBalance>>>;

    /// Bond and deposit balances of a service, one entry per chain it is registered on.
    fn get_staked_balances<'a>(
        &'a self,
        service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Vec<StakedBalance>>>;
}
