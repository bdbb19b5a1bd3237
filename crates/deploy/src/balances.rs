//! On-chain balances read over JSON-RPC.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use futures::{FutureExt, future::BoxFuture};

use crate::{
    Chain, MiddlewareClient, PilotConfig, TokenSymbol,
    rpc::ChainRpc,
    traits::{BalanceSource, ServiceConfigId, StakedBalance, TokenBalance},
};

/// [`BalanceSource`] reading native and OLAS balances from chain RPCs.
///
/// Staked balances are not readable from a wallet and are taken from the middleware.
#[derive(Debug, Clone)]
pub struct RpcBalanceSource {
    rpc: ChainRpc,
    olas_tokens: BTreeMap<Chain, Address>,
    middleware: MiddlewareClient,
}

impl RpcBalanceSource {
    pub fn new(config: &PilotConfig, middleware: MiddlewareClient) -> Result<Self> {
        Ok(Self {
            rpc: ChainRpc::new(config)?,
            olas_tokens: config
                .chains
                .iter()
                .map(|settings| (settings.chain, settings.olas_token))
                .collect(),
            middleware,
        })
    }

    async fn balances(&self, wallet: Address, chain: Chain) -> Result<Vec<TokenBalance>> {
        let native = self
            .rpc
            .native_balance(chain, wallet)
            .await
            .with_context(|| format!("Failed to fetch native balance of {} on {}", wallet, chain))?;
        let mut balances = vec![TokenBalance {
            symbol: chain.native_token(),
            amount: native,
        }];

        match self.olas_tokens.get(&chain) {
            Some(token) => {
                let olas = self
                    .rpc
                    .erc20_balance(chain, *token, wallet)
                    .await
                    .with_context(|| format!("Failed to fetch OLAS balance of {} on {}", wallet, chain))?;
                balances.push(TokenBalance {
                    symbol: TokenSymbol::Olas,
                    amount: olas,
                });
            }
            None => tracing::debug!(chain = %chain, "No OLAS token configured, skipping"),
        }

        Ok(balances)
    }
}

impl BalanceSource for RpcBalanceSource {
    fn get_balances(
        &self,
        wallet: Address,
        chain: Chain,
    ) -> BoxFuture<'_, Result<Vec<TokenBalance>>> {
        self.balances(wallet, chain).boxed()
    }

    fn get_staked_balances<'a>(
        &'a self,
        service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Vec<StakedBalance>>> {
        self.middleware.staked_balances(service).boxed()
    }
}
