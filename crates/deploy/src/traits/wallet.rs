//! Master wallet storage.

use std::collections::BTreeSet;

use alloy_core::primitives::Address;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::Chain;

/// A master Safe multisig. At most one exists per chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterSafe {
    pub chain: Chain,
    pub address: Address,
    pub owners: BTreeSet<Address>,
}

/// Supplies the master EOA and master Safes, and creates Safes.
pub trait WalletStore: Send + Sync {
    /// The operator's master EOA, if one was created.
    fn get_eoa(&self) -> BoxFuture<'_, Result<Option<Address>>>;

    /// Every master Safe with its owner set.
    fn list_safes(&self) -> BoxFuture<'_, Result<Vec<MasterSafe>>>;

    /// Create a master Safe on `chain` owned by the EOA and `backup_owner`.
    fn create_safe(&self, chain: Chain, backup_owner: Address) -> BoxFuture<'_, Result<()>>;

    /// Replace the backup owner of the master Safe on `chain`.
    fn update_safe_backup_owner(
        &self,
        chain: Chain,
        backup_owner: Address,
    ) -> BoxFuture<'_, Result<()>>;
}
