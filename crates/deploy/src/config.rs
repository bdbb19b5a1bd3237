//! Client configuration.
//!
//! The configuration is a TOML file (`Stakepilot.toml`) merged over built-in defaults,
//! with `STAKEPILOT_`-prefixed environment variables taking precedence. Per-chain RPC
//! endpoints can additionally be overridden with the conventional `<CHAIN>_RPC`
//! variables (e.g. `GNOSIS_RPC`).

use std::{path::Path, time::Duration};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    AgentConfig, AgentType, Chain, MechType, OperatingThreshold, ServiceTemplate, StakingProgram,
    StakingProgramId, TokenSymbol, amount::parse_amount,
};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Stakepilot.toml";

/// Prefix of environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "STAKEPILOT_";

/// Default address of the operate middleware.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// RPC endpoint and token addresses of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain: Chain,
    pub rpc_url: Url,
    /// Address of the OLAS ERC-20 contract.
    pub olas_token: Address,
}

/// Top-level configuration of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Base URL of the operate middleware.
    pub backend_url: Url,
    /// Timeout applied to every HTTP and RPC request.
    pub request_timeout_secs: u64,
    /// Interval of the background pollers.
    pub poll_interval_secs: u64,
    /// How long the "deployed" status stays visible after a successful start.
    pub status_clear_delay_secs: u64,
    /// How many times a freshly created Safe is looked up before giving up.
    pub safe_confirmation_attempts: usize,
    pub chains: Vec<ChainSettings>,
    pub agents: Vec<AgentConfig>,
    pub staking_programs: Vec<StakingProgram>,
    #[serde(default)]
    pub service_templates: Vec<ServiceTemplate>,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            backend_url: Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid"),
            request_timeout_secs: 30,
            poll_interval_secs: 15,
            status_clear_delay_secs: 5,
            safe_confirmation_attempts: 10,
            chains: default_chains(),
            agents: default_agents(),
            staking_programs: default_staking_programs(),
            service_templates: Vec::new(),
        }
    }
}

impl PilotConfig {
    /// Load the configuration, merging an optional file and the environment over the defaults.
    ///
    /// `path` may point to the file itself or to a directory containing [`CONFIG_FILENAME`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(PilotConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Configuration file or directory not found: {}", path.display());
            }
            let config_path = if path.is_dir() {
                path.join(CONFIG_FILENAME)
            } else {
                path.to_path_buf()
            };
            figment = figment.merge(Toml::file(&config_path));
            tracing::debug!(path = %config_path.display(), "Merging configuration file");
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Reject configurations that would make the catalog ambiguous.
    fn validate(&self) -> Result<()> {
        for (i, settings) in self.chains.iter().enumerate() {
            if self.chains[..i].iter().any(|s| s.chain == settings.chain) {
                anyhow::bail!("Chain '{}' is configured more than once", settings.chain);
            }
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if self.agents[..i].iter().any(|a| a.agent_type == agent.agent_type) {
                anyhow::bail!("Agent '{}' is configured more than once", agent.agent_type);
            }
        }
        for (i, program) in self.staking_programs.iter().enumerate() {
            if self.staking_programs[..i]
                .iter()
                .any(|p| p.chain == program.chain && p.id == program.id)
            {
                anyhow::bail!(
                    "Staking program '{}' on {} is configured more than once",
                    program.id,
                    program.chain
                );
            }
        }
        for template in &self.service_templates {
            if let Some(agent) = self
                .agent(template.agent_type)
                .filter(|agent| agent.home_chain != template.home_chain)
            {
                anyhow::bail!(
                    "Service template '{}' runs on {}, but agent '{}' has home chain {}",
                    template.name,
                    template.home_chain,
                    agent.agent_type,
                    agent.home_chain
                );
            }
        }
        Ok(())
    }

    pub fn agent(&self, agent_type: AgentType) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.agent_type == agent_type)
    }

    pub fn staking_program(&self, chain: Chain, id: &StakingProgramId) -> Option<&StakingProgram> {
        self.staking_programs
            .iter()
            .find(|p| p.chain == chain && &p.id == id)
    }

    pub fn service_template(&self, agent_type: AgentType) -> Option<&ServiceTemplate> {
        self.service_templates
            .iter()
            .find(|t| t.agent_type == agent_type)
    }

    pub fn chain_settings(&self, chain: Chain) -> Option<&ChainSettings> {
        self.chains.iter().find(|s| s.chain == chain)
    }

    /// The RPC endpoint of a chain: the `<CHAIN>_RPC` variable when set, otherwise the
    /// configured URL, otherwise the chain's public endpoint.
    pub fn rpc_url(&self, chain: Chain) -> Result<Url> {
        if let Ok(url) = std::env::var(chain.rpc_env_var()) {
            return Url::parse(&url)
                .with_context(|| format!("Invalid URL in {}: {}", chain.rpc_env_var(), url));
        }
        match self.chain_settings(chain) {
            Some(settings) => Ok(settings.rpc_url.clone()),
            None => Url::parse(chain.public_rpc()).context("Invalid public RPC URL"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn status_clear_delay(&self) -> Duration {
        Duration::from_secs(self.status_clear_delay_secs)
    }
}

fn default_chains() -> Vec<ChainSettings> {
    [
        (Chain::Ethereum, address!("0001A500A6B18995B03f44bb040A5fFc28E45CB0")),
        (Chain::Gnosis, address!("cE11e14225575945b8E6Dc0D4F2dD4C570f79d9f")),
        (Chain::Base, address!("54330d28ca3357F294334BDC454a032e7f353416")),
        (Chain::Optimism, address!("FC2E6e6BCbd49ccf3A5f029c79984372DcBFE527")),
        (Chain::Mode, address!("cfD1D50ce23C46D3Cf6407487B2F8934e96DC8f9")),
        (Chain::Celo, address!("aCFfAe8e57Ec6E394Eb1b41939A8CF7892DbDc51")),
    ]
    .into_iter()
    .filter_map(|(chain, olas_token)| {
        Url::parse(chain.public_rpc())
            .ok()
            .map(|rpc_url| ChainSettings {
                chain,
                rpc_url,
                olas_token,
            })
    })
    .collect()
}

fn threshold(symbol: TokenSymbol, amount: &str) -> Vec<OperatingThreshold> {
    parse_amount(amount)
        .map(|amount| vec![OperatingThreshold { symbol, amount }])
        .unwrap_or_default()
}

fn default_agents() -> Vec<AgentConfig> {
    [
        (AgentType::PredictTrader, Chain::Gnosis, "1.5"),
        (AgentType::Supafund, Chain::Gnosis, "1.5"),
        (AgentType::AgentsFun, Chain::Base, "0.005"),
        (AgentType::AgentsFunCelo, Chain::Celo, "1.5"),
        (AgentType::Modius, Chain::Mode, "0.005"),
        (AgentType::Optimus, Chain::Optimism, "0.005"),
    ]
    .into_iter()
    .map(|(agent_type, home_chain, gas)| AgentConfig {
        agent_type,
        home_chain,
        master_safe_thresholds: threshold(home_chain.native_token(), gas),
    })
    .collect()
}

fn default_staking_programs() -> Vec<StakingProgram> {
    [
        ("pearl_beta", Chain::Gnosis, "40", MechType::Legacy),
        ("pearl_beta_mech_marketplace", Chain::Gnosis, "40", MechType::Marketplace),
        ("agents_fun_1", Chain::Base, "50", MechType::Legacy),
        ("modius_alpha", Chain::Mode, "40", MechType::Legacy),
        ("optimus_alpha", Chain::Optimism, "40", MechType::Legacy),
        ("meme_celo_alpha_2", Chain::Celo, "100", MechType::Legacy),
    ]
    .into_iter()
    .filter_map(|(id, chain, required, mech_type)| {
        parse_amount(required).ok().map(|required_olas| StakingProgram {
            id: StakingProgramId::new(id),
            chain,
            required_olas,
            mech_type,
        })
    })
    .collect()
}
