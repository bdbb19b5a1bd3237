//! Shared RPC utilities for interacting with Ethereum JSON-RPC endpoints.

use std::{collections::BTreeMap, time::Duration};

use alloy_core::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::IntoEnumIterator;
use url::Url;

use crate::{Chain, PilotConfig};

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
    }

    interface ISafe {
        function getOwners() external view returns (address[] owners);
    }
}

/// Create an HTTP client with the given request timeout.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout` - Maximum time to wait
/// * `check_fn` - Function that returns Ok(()) when the service is ready
pub async fn wait_until_ready<F, Fut>(name: &str, timeout: Duration, check_fn: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            anyhow::bail!("Timeout waiting for {} to be ready", name);
        }

        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}

/// Parse a hex quantity (`0x1bc16d674ec80000`).
fn parse_quantity(quantity: &str) -> Result<U256> {
    let digits = quantity.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| anyhow::anyhow!("Invalid hex quantity '{}': {}", quantity, e))
}

/// Hex-encode calldata for an `eth_call`.
fn calldata<C: SolCall>(call: &C) -> String {
    format!("0x{}", hex::encode(call.abi_encode()))
}

fn decode_hex(data: &str) -> Result<Vec<u8>> {
    hex::decode(data.trim_start_matches("0x")).context("eth_call returned invalid hex")
}

/// Decode the return data of `balanceOf`.
fn decode_balance(data: &[u8]) -> Result<U256> {
    IERC20::balanceOfCall::abi_decode_returns(data, true)
        .map(|ret| ret.balance)
        .map_err(|e| anyhow::anyhow!("Invalid balanceOf return data: {}", e))
}

/// Decode the return data of `getOwners`.
fn decode_owners(data: &[u8]) -> Result<Vec<Address>> {
    ISafe::getOwnersCall::abi_decode_returns(data, true)
        .map(|ret| ret.owners)
        .map_err(|e| anyhow::anyhow!("Invalid getOwners return data: {}", e))
}

/// JSON-RPC access to every supported chain.
#[derive(Debug, Clone)]
pub struct ChainRpc {
    client: reqwest::Client,
    urls: BTreeMap<Chain, Url>,
}

impl ChainRpc {
    /// Resolve the RPC endpoint of every chain from the configuration.
    pub fn new(config: &PilotConfig) -> Result<Self> {
        let urls = Chain::iter()
            .map(|chain| Ok((chain, config.rpc_url(chain)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            client: create_client(config.request_timeout())?,
            urls,
        })
    }

    pub fn url(&self, chain: Chain) -> Result<&Url> {
        self.urls
            .get(&chain)
            .with_context(|| format!("No RPC endpoint for {}", chain))
    }

    /// Native token balance of `address`.
    pub async fn native_balance(&self, chain: Chain, address: Address) -> Result<U256> {
        let quantity: String = json_rpc_call(
            &self.client,
            self.url(chain)?,
            "eth_getBalance",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await?;
        parse_quantity(&quantity)
    }

    /// ERC-20 balance of `owner` in `token`.
    pub async fn erc20_balance(&self, chain: Chain, token: Address, owner: Address) -> Result<U256> {
        let data = self
            .eth_call(chain, token, calldata(&IERC20::balanceOfCall { owner }))
            .await?;
        decode_balance(&decode_hex(&data)?)
            .with_context(|| format!("Failed to decode balance of {} in {} on {}", owner, token, chain))
    }

    /// Owners of the Safe at `safe`.
    pub async fn safe_owners(&self, chain: Chain, safe: Address) -> Result<Vec<Address>> {
        let data = self
            .eth_call(chain, safe, calldata(&ISafe::getOwnersCall {}))
            .await?;
        decode_owners(&decode_hex(&data)?)
            .with_context(|| format!("Failed to decode owners of Safe {} on {}", safe, chain))
    }

    async fn eth_call(&self, chain: Chain, to: Address, data: String) -> Result<String> {
        json_rpc_call(
            &self.client,
            self.url(chain)?,
            "eth_call",
            vec![
                serde_json::json!({ "to": to, "data": data }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}
