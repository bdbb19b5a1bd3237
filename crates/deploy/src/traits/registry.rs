//! Service registry and control.

use alloy_core::primitives::Address;
use anyhow::Result;
use derive_more::{Deref, Display, From};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{Chain, ServiceTemplate, StakingProgramId};

/// Middleware identifier of a service configuration (e.g. `sc-3f1c...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, Display, From)]
#[serde(transparent)]
pub struct ServiceConfigId(String);

impl ServiceConfigId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for ServiceConfigId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The registry's view of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub config_id: ServiceConfigId,
    pub hash: String,
    pub home_chain: Chain,
    /// Whether the agent deployment is running.
    pub running: bool,
    /// Service Safe on the home chain, once minted.
    pub safe: Option<Address>,
}

/// Creates, updates, starts and reports services.
pub trait ServiceRegistry: Send + Sync {
    /// Create a service from a template without deploying it.
    fn create<'a>(
        &'a self,
        template: &'a ServiceTemplate,
        program: &'a StakingProgramId,
        use_marketplace: bool,
    ) -> BoxFuture<'a, Result<ServiceRecord>>;

    /// Update the content hash of a service in place.
    fn update<'a>(&'a self, service: &'a ServiceConfigId, hash: &'a str)
    -> BoxFuture<'a, Result<()>>;

    /// Start the agent deployment of a service.
    fn start<'a>(&'a self, service: &'a ServiceConfigId) -> BoxFuture<'a, Result<()>>;

    /// The current record of a service, `None` if the registry does not know it.
    fn get<'a>(&'a self, service: &'a ServiceConfigId)
    -> BoxFuture<'a, Result<Option<ServiceRecord>>>;

    /// The service previously created from `template`, if any.
    fn find<'a>(&'a self, template: &'a ServiceTemplate)
    -> BoxFuture<'a, Result<Option<ServiceRecord>>>;
}
