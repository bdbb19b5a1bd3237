//! Collaborator interfaces consumed by the readiness evaluator and the orchestrator.
//!
//! Every external system (middleware, chain RPC, operator UI) is reached through one of
//! these traits. They are object safe so the orchestrator can hold them as
//! `Arc<dyn ...>` and tests can swap in in-memory fakes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stakepilot_deploy::{Collaborators, LogUi, MiddlewareClient, PilotConfig, RpcBalanceSource};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = PilotConfig::default();
//! let middleware = MiddlewareClient::new(&config)?;
//! let collaborators = Collaborators {
//!     balances: Arc::new(RpcBalanceSource::new(&config, middleware.clone())?),
//!     staking: Arc::new(middleware.clone()),
//!     wallets: Arc::new(middleware.clone()),
//!     registry: Arc::new(middleware),
//!     ui: Arc::new(LogUi),
//! };
//! # Ok(())
//! # }
//! ```

mod balance;
mod registry;
mod staking;
mod ui;
mod wallet;

use std::sync::Arc;

pub use balance::{BalanceSource, StakedBalance, TokenBalance};
pub use registry::{ServiceConfigId, ServiceRecord, ServiceRegistry};
pub use staking::{Eligibility, StakingState};
pub use ui::{LogUi, OperatorUi, Page};
pub use wallet::{MasterSafe, WalletStore};

/// The full set of collaborators an orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub balances: Arc<dyn BalanceSource>,
    pub staking: Arc<dyn StakingState>,
    pub wallets: Arc<dyn WalletStore>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub ui: Arc<dyn OperatorUi>,
}
