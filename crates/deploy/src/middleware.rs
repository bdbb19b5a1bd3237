//! HTTP client of the operate middleware.
//!
//! [`MiddlewareClient`] implements [`WalletStore`], [`ServiceRegistry`] and
//! [`StakingState`]. Safe owners are not reported by the middleware and are read
//! on-chain through [`ChainRpc`].

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::{
    Chain, PilotConfig, ServiceTemplate, StakingProgram, StakingProgramId,
    rpc::{ChainRpc, create_client, wait_until_ready},
    traits::{
        Eligibility, MasterSafe, ServiceConfigId, ServiceRecord, ServiceRegistry, StakedBalance,
        StakingState, WalletStore,
    },
};

/// Deployment status the middleware reports for a running agent.
const DEPLOYED: u8 = 3;

#[derive(Debug, Deserialize)]
struct WalletResponse {
    address: Address,
    #[serde(default)]
    ledger_type: Option<String>,
    #[serde(default)]
    safes: BTreeMap<Chain, Address>,
}

#[derive(Debug, Serialize)]
struct CreateSafeRequest {
    chain: Chain,
    backup_owner: Address,
    fund_amount: u64,
}

#[derive(Debug, Serialize)]
struct UpdateSafeRequest {
    chain: Chain,
    backup_owner: Address,
}

#[derive(Debug, Serialize)]
struct ChainConfigurationRequest<'a> {
    staking_program_id: &'a StakingProgramId,
    use_mech_marketplace: bool,
}

#[derive(Debug, Serialize)]
struct CreateServiceRequest<'a> {
    name: &'a str,
    hash: &'a str,
    description: &'a str,
    home_chain: Chain,
    deploy: bool,
    configurations: BTreeMap<Chain, ChainConfigurationRequest<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateServiceRequest<'a> {
    hash: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ChainData {
    #[serde(default)]
    multisig: Option<Address>,
}

#[derive(Debug, Default, Deserialize)]
struct ChainConfigResponse {
    #[serde(default)]
    chain_data: ChainData,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    service_config_id: ServiceConfigId,
    #[serde(default)]
    name: String,
    hash: String,
    home_chain: Chain,
    #[serde(default)]
    chain_configs: BTreeMap<Chain, ChainConfigResponse>,
}

#[derive(Debug, Deserialize)]
struct DeploymentResponse {
    status: u8,
}

#[derive(Debug, Deserialize)]
struct StakedBalanceResponse {
    chain: Chain,
    olas_bond: U256,
    olas_deposit: U256,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceStakingResponse {
    #[serde(default)]
    evicted: bool,
    #[serde(default)]
    eligible_to_restake: bool,
    #[serde(default)]
    currently_staked: bool,
    #[serde(default)]
    balances: Vec<StakedBalanceResponse>,
}

#[derive(Debug, Deserialize)]
struct StakingProgramResponse {
    #[serde(default)]
    available_slots: Option<u64>,
}

impl ServiceResponse {
    /// Whether the service was created from `template`. The hash is not compared since
    /// it changes when the template is updated.
    fn matches(&self, template: &ServiceTemplate) -> bool {
        self.name == template.name && self.home_chain == template.home_chain
    }

    fn into_record(self, running: bool) -> ServiceRecord {
        let safe = self
            .chain_configs
            .get(&self.home_chain)
            .and_then(|config| config.chain_data.multisig);
        ServiceRecord {
            config_id: self.service_config_id,
            hash: self.hash,
            home_chain: self.home_chain,
            running,
            safe,
        }
    }
}

/// Client of the operate middleware REST API.
#[derive(Debug, Clone)]
pub struct MiddlewareClient {
    client: reqwest::Client,
    base: Url,
    rpc: ChainRpc,
    programs: Arc<Vec<StakingProgram>>,
}

impl MiddlewareClient {
    pub fn new(config: &PilotConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config.request_timeout())?,
            base: config.backend_url.clone(),
            rpc: ChainRpc::new(config)?,
            programs: Arc::new(config.staking_programs.clone()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid middleware path: {}", path))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse GET {} response", path))
    }

    /// Like [`get_json`](Self::get_json) but maps a 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?;
        let value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse GET {} response", path))?;
        Ok(Some(value))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, path))?
            .error_for_status()
            .with_context(|| format!("{} {} failed", method, path))
    }

    /// Wait until the middleware answers.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        wait_until_ready("middleware", timeout, || async {
            self.get_json::<serde_json::Value>("api/wallet").await?;
            Ok(())
        })
        .await
    }

    async fn wallets(&self) -> Result<Vec<WalletResponse>> {
        let wallets: Vec<WalletResponse> = self.get_json("api/wallet").await?;
        Ok(wallets
            .into_iter()
            .filter(|w| w.ledger_type.as_deref().is_none_or(|t| t == "ethereum"))
            .collect())
    }

    async fn service_staking(&self, service: &ServiceConfigId) -> Result<ServiceStakingResponse> {
        Ok(self
            .get_optional(&format!("api/v2/service/{}/staking", service))
            .await?
            .unwrap_or_default())
    }

    /// Bond and deposit of a service on every chain it is registered on.
    pub async fn staked_balances(&self, service: &ServiceConfigId) -> Result<Vec<StakedBalance>> {
        let staking = self.service_staking(service).await?;
        Ok(staking
            .balances
            .into_iter()
            .map(|b| StakedBalance {
                chain: b.chain,
                bond: b.olas_bond,
                deposit: b.olas_deposit,
            })
            .collect())
    }

    async fn fetch_safes(&self) -> Result<Vec<MasterSafe>> {
        let mut safes = Vec::new();
        for wallet in self.wallets().await? {
            for (chain, address) in wallet.safes {
                let owners = self.rpc.safe_owners(chain, address).await?;
                safes.push(MasterSafe {
                    chain,
                    address,
                    owners: owners.into_iter().collect(),
                });
            }
        }
        Ok(safes)
    }

    async fn fetch_service(&self, service: &ServiceConfigId) -> Result<Option<ServiceRecord>> {
        let Some(response) = self
            .get_optional::<ServiceResponse>(&format!("api/v2/service/{}", service))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.with_deployment(response).await?))
    }

    async fn with_deployment(&self, response: ServiceResponse) -> Result<ServiceRecord> {
        let deployment: Option<DeploymentResponse> = self
            .get_optional(&format!(
                "api/v2/service/{}/deployment",
                response.service_config_id
            ))
            .await?;
        let running = deployment.is_some_and(|d| d.status == DEPLOYED);
        Ok(response.into_record(running))
    }

    async fn find_service(&self, template: &ServiceTemplate) -> Result<Option<ServiceRecord>> {
        let services: Vec<ServiceResponse> = self.get_json("api/v2/services").await?;
        match services.into_iter().find(|s| s.matches(template)) {
            Some(response) => Ok(Some(self.with_deployment(response).await?)),
            None => Ok(None),
        }
    }
}

impl WalletStore for MiddlewareClient {
    fn get_eoa(&self) -> BoxFuture<'_, Result<Option<Address>>> {
        async move { Ok(self.wallets().await?.first().map(|w| w.address)) }.boxed()
    }

    fn list_safes(&self) -> BoxFuture<'_, Result<Vec<MasterSafe>>> {
        self.fetch_safes().boxed()
    }

    fn create_safe(&self, chain: Chain, backup_owner: Address) -> BoxFuture<'_, Result<()>> {
        async move {
            let body = CreateSafeRequest {
                chain,
                backup_owner,
                fund_amount: 0,
            };
            self.send_json(reqwest::Method::POST, "api/wallet/safe", Some(&body))
                .await
                .context("Failed to create safe")?;
            Ok(())
        }
        .boxed()
    }

    fn update_safe_backup_owner(
        &self,
        chain: Chain,
        backup_owner: Address,
    ) -> BoxFuture<'_, Result<()>> {
        async move {
            let body = UpdateSafeRequest {
                chain,
                backup_owner,
            };
            self.send_json(reqwest::Method::PUT, "api/wallet/safe", Some(&body))
                .await
                .context("Failed to add backup owner")?;
            Ok(())
        }
        .boxed()
    }
}

impl ServiceRegistry for MiddlewareClient {
    fn create<'a>(
        &'a self,
        template: &'a ServiceTemplate,
        program: &'a StakingProgramId,
        use_marketplace: bool,
    ) -> BoxFuture<'a, Result<ServiceRecord>> {
        async move {
            let body = CreateServiceRequest {
                name: &template.name,
                hash: &template.hash,
                description: &template.description,
                home_chain: template.home_chain,
                deploy: false,
                configurations: BTreeMap::from([(
                    template.home_chain,
                    ChainConfigurationRequest {
                        staking_program_id: program,
                        use_mech_marketplace: use_marketplace,
                    },
                )]),
            };
            let response: ServiceResponse = self
                .send_json(reqwest::Method::POST, "api/v2/service", Some(&body))
                .await?
                .json()
                .await
                .context("Failed to parse created service")?;
            Ok(response.into_record(false))
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        service: &'a ServiceConfigId,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.send_json(
                reqwest::Method::PATCH,
                &format!("api/v2/service/{}", service),
                Some(&UpdateServiceRequest { hash }),
            )
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn start<'a>(&'a self, service: &'a ServiceConfigId) -> BoxFuture<'a, Result<()>> {
        async move {
            self.send_json::<()>(
                reqwest::Method::POST,
                &format!("api/v2/service/{}", service),
                None,
            )
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Option<ServiceRecord>>> {
        self.fetch_service(service).boxed()
    }

    fn find<'a>(
        &'a self,
        template: &'a ServiceTemplate,
    ) -> BoxFuture<'a, Result<Option<ServiceRecord>>> {
        self.find_service(template).boxed()
    }
}

impl StakingState for MiddlewareClient {
    fn get_requirement<'a>(
        &'a self,
        chain: Chain,
        program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<U256>>> {
        let requirement = self
            .programs
            .iter()
            .find(|p| p.chain == chain && &p.id == program)
            .map(|p| p.required_olas);
        async move { Ok(requirement) }.boxed()
    }

    fn get_slot_availability<'a>(
        &'a self,
        chain: Chain,
        program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<bool>>> {
        async move {
            let response: Option<StakingProgramResponse> = self
                .get_optional(&format!("api/v2/staking/{}/{}", chain, program))
                .await?;
            Ok(response
                .and_then(|r| r.available_slots)
                .map(|slots| slots > 0))
        }
        .boxed()
    }

    fn get_eligibility<'a>(
        &'a self,
        service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Eligibility>> {
        async move {
            let staking = self.service_staking(service).await?;
            Ok(Eligibility {
                evicted: staking.evicted,
                eligible_to_restake: staking.eligible_to_restake,
                currently_staked: staking.currently_staked,
            })
        }
        .boxed()
    }
}
