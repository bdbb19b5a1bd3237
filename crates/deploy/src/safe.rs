//! Master Safe provisioning on the agent's home chain.
//!
//! A new Safe is owned by the master EOA plus one backup signer. The backup signer is
//! derived from the Safes that already exist on other chains: it must be the single
//! non-EOA owner shared by all of them.

use std::{collections::BTreeSet, time::Duration};

use alloy_core::primitives::Address;
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};

use crate::{
    Chain,
    error::{BackupSignerError, ProvisioningError},
    traits::{MasterSafe, WalletStore},
};

/// Result of [`ensure_home_safe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeProvisioning {
    /// A Safe already existed on the home chain; nothing was done.
    AlreadyExists { address: Address },
    /// A Safe was created and confirmed.
    Created {
        address: Address,
        backup_owner: Address,
    },
}

/// How a freshly created Safe is waited for.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    /// Maximum number of additional lookups after the first one.
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
        }
    }
}

/// Owners of Safes on chains other than `home_chain`, without the master EOA.
pub fn backup_signer_candidates(
    safes: &[MasterSafe],
    eoa: Option<Address>,
    home_chain: Chain,
) -> BTreeSet<Address> {
    let mut candidates: BTreeSet<Address> = safes
        .iter()
        .filter(|safe| safe.chain != home_chain)
        .flat_map(|safe| safe.owners.iter().copied())
        .collect();

    if let Some(eoa) = eoa {
        candidates.remove(&eoa);
    }

    candidates
}

/// The single backup signer to use for a new Safe on `home_chain`.
pub fn backup_signer(
    safes: &[MasterSafe],
    eoa: Option<Address>,
    home_chain: Chain,
) -> Result<Address, BackupSignerError> {
    let candidates = backup_signer_candidates(safes, eoa, home_chain);

    let mut iter = candidates.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Err(BackupSignerError::NoBackupSigner),
        (Some(signer), None) => Ok(*signer),
        (Some(_), Some(_)) => Err(BackupSignerError::InconsistentBackupSigner { candidates }),
    }
}

/// Make sure a master Safe exists on `home_chain`, creating one if needed.
///
/// When the Safe already exists no external call is made. Otherwise the backup signer is
/// derived from `safes`, the Safe is created through `wallets`, and the Safe list is
/// polled until the new Safe shows up.
pub async fn ensure_home_safe(
    wallets: &dyn WalletStore,
    safes: &[MasterSafe],
    eoa: Option<Address>,
    home_chain: Chain,
    confirmation: Confirmation,
) -> Result<SafeProvisioning, ProvisioningError> {
    if let Some(existing) = safes.iter().find(|safe| safe.chain == home_chain) {
        tracing::debug!(chain = %home_chain, address = %existing.address, "Master Safe already exists");
        return Ok(SafeProvisioning::AlreadyExists {
            address: existing.address,
        });
    }

    let backup_owner = backup_signer(safes, eoa, home_chain)?;

    tracing::info!(
        chain = %home_chain,
        backup_owner = %backup_owner,
        "Creating master Safe on home chain..."
    );

    wallets
        .create_safe(home_chain, backup_owner)
        .await
        .map_err(|e| ProvisioningError::CreateSafe {
            chain: home_chain,
            source: e.into(),
        })?;

    let address = wait_for_safe(wallets, home_chain, confirmation)
        .await
        .map_err(|e| ProvisioningError::Unconfirmed {
            chain: home_chain,
            source: e.into(),
        })?;

    tracing::info!(chain = %home_chain, address = %address, "Master Safe created");

    Ok(SafeProvisioning::Created {
        address,
        backup_owner,
    })
}

/// Poll the Safe list until a Safe on `chain` is visible.
async fn wait_for_safe(
    wallets: &dyn WalletStore,
    chain: Chain,
    confirmation: Confirmation,
) -> anyhow::Result<Address> {
    let lookup = || async {
        let safes = wallets.list_safes().await?;
        safes
            .into_iter()
            .find(|safe| safe.chain == chain)
            .map(|safe| safe.address)
            .with_context(|| format!("Safe on {} is not visible yet", chain))
    };

    lookup
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(confirmation.min_delay)
                .with_max_delay(confirmation.max_delay)
                .with_max_times(confirmation.max_attempts),
        )
        .notify(|err, after| {
            tracing::trace!(error = %err, retry_in = ?after, "Safe not confirmed yet, retrying...");
        })
        .await
}
