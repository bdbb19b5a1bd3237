//! Typed errors surfaced by the orchestrator.

use std::collections::BTreeSet;

use alloy_core::primitives::Address;
use thiserror::Error;

use crate::{AgentType, Chain, StakingProgramId};

/// Boxed source error carried by the typed variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Something the operator must configure before an activation can run.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("No master wallet found")]
    MissingWallet,

    #[error("Staking program ID required")]
    MissingStakingProgram,

    #[error("Staking program '{program}' is not available on {chain}")]
    UnknownStakingProgram {
        program: StakingProgramId,
        chain: Chain,
    },

    #[error("Service template not found for {0}")]
    MissingServiceTemplate(AgentType),

    #[error("Agent '{0}' is not configured")]
    UnknownAgent(AgentType),

    #[error("Service template of {agent} runs on {template_chain}, but the agent's home chain is {agent_chain}")]
    TemplateChainMismatch {
        agent: AgentType,
        agent_chain: Chain,
        template_chain: Chain,
    },
}

/// The backup signer of a new Safe could not be derived from the existing Safes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackupSignerError {
    #[error("No backup signers found")]
    NoBackupSigner,

    #[error("Multiple backup signers found: {candidates:?}")]
    InconsistentBackupSigner { candidates: BTreeSet<Address> },
}

impl BackupSignerError {
    /// Message shown to the operator alongside the redirect to the settings page.
    pub fn operator_message(&self) -> &'static str {
        match self {
            BackupSignerError::NoBackupSigner => {
                "A backup signer is required to create a new safe on the home chain. Please add a backup signer."
            }
            BackupSignerError::InconsistentBackupSigner { .. } => {
                "The same backup signer address must be used on all chains. Please remove any extra backup signers."
            }
        }
    }
}

/// The home-chain Safe could not be ensured.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    BackupSigner(#[from] BackupSignerError),

    #[error("Failed to list master Safes")]
    ListSafes(#[source] BoxError),

    #[error("Failed to create Safe on {chain}")]
    CreateSafe {
        chain: Chain,
        #[source]
        source: BoxError,
    },

    #[error("Safe on {chain} was not confirmed")]
    Unconfirmed {
        chain: Chain,
        #[source]
        source: BoxError,
    },
}

/// A service registry call failed.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to fetch service")]
    Get(#[source] BoxError),

    #[error("Failed to create service")]
    Create(#[source] BoxError),

    #[error("Failed to update service")]
    Update(#[source] BoxError),

    #[error("Failed to start service")]
    Start(#[source] BoxError),
}

/// Refreshing state after a successful start failed. Never fatal to a run.
#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("Failed to refresh service status")]
    Services(#[source] BoxError),

    #[error("Failed to refresh staking details")]
    Staking(#[source] BoxError),

    #[error("Failed to refresh balances")]
    Balances(#[source] BoxError),
}

/// Why an activation did not complete.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to read the master wallet")]
    WalletStore(#[source] BoxError),

    #[error("An activation is already in progress")]
    AlreadyRunning,
}

impl ActivationError {
    /// The backup signer problem behind this error, if any.
    pub fn backup_signer(&self) -> Option<&BackupSignerError> {
        match self {
            ActivationError::Provisioning(ProvisioningError::BackupSigner(err)) => Some(err),
            _ => None,
        }
    }
}
