//! stakepilot-deploy - Activation library for Pearl staking agents.
//!
//! This crate decides whether a selected agent can be started and drives its activation:
//! it ensures a master Safe on the agent's home chain, creates or updates the agent's
//! service, starts it, and resynchronizes the cached service, staking and balance state.

mod agent;
pub use agent::{
    AgentConfig, AgentType, MechType, OperatingThreshold, ServiceTemplate, StakingProgram,
    StakingProgramId,
};

mod amount;
pub use amount::{TOKEN_DECIMALS, format_amount, parse_amount, token_amount};

mod balances;
pub use balances::RpcBalanceSource;

mod builder;
pub use builder::OrchestratorBuilder;

mod chain;
pub use chain::{Chain, TokenSymbol};

mod config;
pub use config::{CONFIG_FILENAME, ChainSettings, DEFAULT_BACKEND_URL, ENV_PREFIX, PilotConfig};

pub mod error;
pub use error::{
    ActivationError, BackupSignerError, ConfigurationError, ProvisioningError, RegistryError,
    ResyncError,
};

mod middleware;
pub use middleware::MiddlewareClient;

mod orchestrator;
pub use orchestrator::{DeploymentOrchestrator, OverrideStatus, Outcome, RunPhase};

pub mod poller;
pub use poller::{Poller, Pollers, PollingPause};

pub mod readiness;
pub use readiness::{Readiness, ReadinessInputs, assess, evaluate};

pub mod rpc;

pub mod safe;
pub use safe::{Confirmation, SafeProvisioning, backup_signer, ensure_home_safe};

pub mod snapshot;
pub use snapshot::{BalanceSnapshot, ServiceSnapshot, StakingSnapshot, WalletBalance, WalletRole};

pub mod traits;
pub use traits::{
    BalanceSource, Collaborators, Eligibility, LogUi, MasterSafe, OperatorUi, Page,
    ServiceConfigId, ServiceRecord, ServiceRegistry, StakedBalance, StakingState, TokenBalance,
    WalletStore,
};
