//! Agent kinds, service templates and staking programs.

use alloy_core::primitives::U256;
use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::{Chain, TokenSymbol, amount::token_amount};

/// The kind of autonomous agent a service runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum AgentType {
    #[serde(rename = "trader")]
    #[strum(serialize = "trader")]
    PredictTrader,
    #[serde(rename = "memeooorr")]
    #[strum(serialize = "memeooorr")]
    AgentsFun,
    #[serde(rename = "agents-fun-celo")]
    #[strum(serialize = "agents-fun-celo")]
    AgentsFunCelo,
    #[serde(rename = "modius")]
    #[strum(serialize = "modius")]
    Modius,
    #[serde(rename = "optimus")]
    #[strum(serialize = "optimus")]
    Optimus,
    #[serde(rename = "supafund")]
    #[strum(serialize = "supafund")]
    Supafund,
}

/// Identifier of a staking program (e.g. `pearl_beta`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, Display, From)]
#[serde(transparent)]
pub struct StakingProgramId(String);

impl StakingProgramId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for StakingProgramId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How a staking program routes mech requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechType {
    #[default]
    Legacy,
    Marketplace,
}

/// Reference data for one staking program on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingProgram {
    pub id: StakingProgramId,
    pub chain: Chain,
    /// Staked OLAS (bond + deposit) the service must hold.
    #[serde(with = "token_amount")]
    pub required_olas: U256,
    #[serde(default)]
    pub mech_type: MechType,
}

impl StakingProgram {
    pub fn uses_marketplace(&self) -> bool {
        self.mech_type == MechType::Marketplace
    }
}

/// The template a service is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub agent_type: AgentType,
    pub name: String,
    /// Content hash of the agent package. A service whose hash differs is updated
    /// before it is started.
    pub hash: String,
    #[serde(default)]
    pub description: String,
    pub home_chain: Chain,
}

/// Minimum native balance the master Safe must hold for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingThreshold {
    pub symbol: TokenSymbol,
    #[serde(with = "token_amount")]
    pub amount: U256,
}

/// Per-agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_type: AgentType,
    pub home_chain: Chain,
    /// Master Safe thresholds, one per token symbol.
    #[serde(default)]
    pub master_safe_thresholds: Vec<OperatingThreshold>,
}

impl AgentConfig {
    /// The native-gas threshold of the master Safe on the home chain, if configured.
    pub fn master_safe_gas_threshold(&self) -> Option<U256> {
        let native = self.home_chain.native_token();
        self.master_safe_thresholds
            .iter()
            .find(|threshold| threshold.symbol == native)
            .map(|threshold| threshold.amount)
    }
}
