//! Deployment orchestration: Safe provisioning, service creation and start, resync.
//!
//! A run moves through [`RunPhase`]s strictly in sequence:
//!
//! ```text
//! Idle -> Provisioning -> ActivatingService -> Syncing -> Settled(success) -> Idle
//!                    \______________________/
//!                               `-> Settled(failure) -> Idle
//! ```
//!
//! For the whole run the three pollers are paused and the [`OverrideStatus`] reads
//! "deploying". Both are held by drop guards, so every exit path (including a dropped
//! future) resumes the pollers and clears the status.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::Address;
use tokio::sync::{Mutex, watch};

use crate::{
    AgentConfig, PilotConfig, ServiceTemplate, StakingProgram, StakingProgramId,
    error::{ActivationError, ConfigurationError, ProvisioningError, RegistryError, ResyncError},
    poller::Pollers,
    readiness::{Readiness, ReadinessInputs, assess},
    safe::{Confirmation, SafeProvisioning, ensure_home_safe},
    traits::{Collaborators, OperatorUi, Page, ServiceConfigId, ServiceRecord},
};

/// Transient status shown by presentation layers, independent of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OverrideStatus {
    #[default]
    None,
    Deploying,
    Deployed,
}

/// How a settled run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Phase of the orchestrator's state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Idle,
    Provisioning,
    ActivatingService,
    Syncing,
    Settled(Outcome),
}

/// Drives the activation of one selected agent.
pub struct DeploymentOrchestrator {
    pub(crate) config: Arc<PilotConfig>,
    pub(crate) agent: AgentConfig,
    pub(crate) staking_program: Option<StakingProgramId>,
    pub(crate) initially_funded: bool,
    pub(crate) selected_service: watch::Sender<Option<ServiceConfigId>>,
    pub(crate) collaborators: Collaborators,
    pub(crate) pollers: Pollers,
    pub(crate) status: watch::Sender<OverrideStatus>,
    pub(crate) phase: watch::Sender<RunPhase>,
    pub(crate) run_lock: Mutex<()>,
    pub(crate) confirmation: Confirmation,
    pub(crate) status_clear_delay: Duration,
}

impl DeploymentOrchestrator {
    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn pollers(&self) -> &Pollers {
        &self.pollers
    }

    /// The service the orchestrator acts on; set once a service is found or created.
    pub fn selected_service(&self) -> Option<ServiceConfigId> {
        self.selected_service.borrow().clone()
    }

    pub fn status(&self) -> OverrideStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<OverrideStatus> {
        self.status.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Inputs of the readiness evaluator, built from the pollers' latest snapshots.
    pub fn readiness_inputs(&self) -> ReadinessInputs {
        ReadinessInputs {
            home_chain: self.agent.home_chain,
            service: self.pollers.services.latest(),
            balances: self.pollers.balances.latest(),
            staking: self.pollers.staking.latest(),
            initially_funded: self.initially_funded,
            gas_threshold: self.agent.master_safe_gas_threshold(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        assess(&self.readiness_inputs())
    }

    /// Whether the agent can be activated right now.
    pub fn is_ready(&self) -> bool {
        self.readiness().is_deployable()
    }

    /// Label of the activation trigger.
    pub fn activate_label(&self) -> &'static str {
        let has_service = self
            .pollers
            .services
            .latest()
            .is_some_and(|snapshot| snapshot.record.is_some());
        if has_service {
            "Start agent"
        } else {
            "Start agent & stake"
        }
    }

    /// Select the agent's existing service in the registry when none is selected yet.
    ///
    /// Returns the selected service, `None` when the agent has no service.
    pub async fn discover_service(&self) -> Result<Option<ServiceConfigId>, ActivationError> {
        if let Some(id) = self.selected_service() {
            return Ok(Some(id));
        }
        let Some(template) = self.config.service_template(self.agent.agent_type) else {
            return Ok(None);
        };
        Ok(self
            .find_service(template)
            .await?
            .map(|record| record.config_id))
    }

    async fn find_service(
        &self,
        template: &ServiceTemplate,
    ) -> Result<Option<ServiceRecord>, RegistryError> {
        let found = self
            .collaborators
            .registry
            .find(template)
            .await
            .map_err(|e| RegistryError::Get(e.into()))?;
        if let Some(record) = &found {
            tracing::info!(service = %record.config_id, template = %template.name, "Found existing service");
            self.selected_service
                .send_replace(Some(record.config_id.clone()));
        }
        Ok(found)
    }

    fn ui(&self) -> &dyn OperatorUi {
        self.collaborators.ui.as_ref()
    }

    fn selected_program(&self) -> Result<&StakingProgram, ConfigurationError> {
        let id = self
            .staking_program
            .as_ref()
            .ok_or(ConfigurationError::MissingStakingProgram)?;
        let chain = self.agent.home_chain;
        self.config
            .staking_program(chain, id)
            .ok_or_else(|| ConfigurationError::UnknownStakingProgram {
                program: id.clone(),
                chain,
            })
    }

    /// Activate the selected agent.
    ///
    /// Expected to be called only while [`is_ready`](Self::is_ready) holds. On failure
    /// the registry is left as it was before the failing step, the pollers are resumed
    /// and the status is back to [`OverrideStatus::None`].
    pub async fn activate(&self) -> Result<(), ActivationError> {
        let Ok(_run) = self.run_lock.try_lock() else {
            return Err(ActivationError::AlreadyRunning);
        };

        let program = self.selected_program()?;
        let pause = self.pollers.pause_all();
        let eoa = self
            .collaborators
            .wallets
            .get_eoa()
            .await
            .map_err(|e| ActivationError::WalletStore(e.into()))?
            .ok_or(ConfigurationError::MissingWallet)?;

        tracing::info!(
            agent = %self.agent.agent_type,
            chain = %self.agent.home_chain,
            staking_program = %program.id,
            "Activating agent..."
        );

        let status = StatusGuard::deploying(&self.status);
        let phase = PhaseGuard::new(&self.phase);

        if let Err(err) = self.deploy_and_start(eoa, program, &phase).await {
            tracing::error!(error = %err, "Error during start");
            phase.set(RunPhase::Settled(Outcome::Failure));
            drop(status);
            drop(pause);
            self.ui()
                .notify("An error occurred while starting. Please try again.");
            return Err(err);
        }

        phase.set(RunPhase::Syncing);
        if let Err(err) = self.resync().await {
            tracing::warn!(error = %err, "Failed to update states");
            self.ui().notify("Failed to update state.");
        }

        status.set(OverrideStatus::Deployed);
        drop(pause);
        phase.set(RunPhase::Settled(Outcome::Success));
        tracing::info!(agent = %self.agent.agent_type, "Agent started");

        tokio::time::sleep(self.status_clear_delay).await;
        drop(status);

        Ok(())
    }

    async fn deploy_and_start(
        &self,
        eoa: Address,
        program: &StakingProgram,
        phase: &PhaseGuard<'_>,
    ) -> Result<(), ActivationError> {
        phase.set(RunPhase::Provisioning);
        self.provision(eoa).await?;

        phase.set(RunPhase::ActivatingService);
        let agent_type = self.agent.agent_type;
        let template = self
            .config
            .service_template(agent_type)
            .ok_or(ConfigurationError::MissingServiceTemplate(agent_type))?;
        if template.home_chain != self.agent.home_chain {
            return Err(ConfigurationError::TemplateChainMismatch {
                agent: agent_type,
                agent_chain: self.agent.home_chain,
                template_chain: template.home_chain,
            }
            .into());
        }

        let registry = &self.collaborators.registry;
        let current = match self.selected_service() {
            Some(id) => registry
                .get(&id)
                .await
                .map_err(|e| RegistryError::Get(e.into()))?,
            None => self.find_service(template).await?,
        };

        let service_id = match current {
            None => {
                tracing::info!(template = %template.name, "Creating service...");
                let record = registry
                    .create(template, &program.id, program.uses_marketplace())
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to create service");
                        self.ui().notify("Failed to create service.");
                        RegistryError::Create(e.into())
                    })?;
                self.selected_service
                    .send_replace(Some(record.config_id.clone()));
                record.config_id
            }
            Some(record) => {
                if record.hash != template.hash {
                    tracing::info!(
                        service = %record.config_id,
                        from = %record.hash,
                        to = %template.hash,
                        "Updating service hash..."
                    );
                    registry
                        .update(&record.config_id, &template.hash)
                        .await
                        .map_err(|e| RegistryError::Update(e.into()))?;
                }
                record.config_id
            }
        };

        tracing::info!(service = %service_id, "Starting service...");
        registry.start(&service_id).await.map_err(|e| {
            tracing::error!(error = %e, "Error while starting the service");
            self.ui().notify("Failed to start service.");
            RegistryError::Start(e.into())
        })?;

        Ok(())
    }

    async fn provision(&self, eoa: Address) -> Result<SafeProvisioning, ActivationError> {
        let wallets = self.collaborators.wallets.as_ref();
        let safes = wallets
            .list_safes()
            .await
            .map_err(|e| ProvisioningError::ListSafes(e.into()))?;

        match ensure_home_safe(
            wallets,
            &safes,
            Some(eoa),
            self.agent.home_chain,
            self.confirmation,
        )
        .await
        {
            Ok(provisioning) => Ok(provisioning),
            Err(ProvisioningError::BackupSigner(err)) => {
                self.ui().notify(err.operator_message());
                self.ui().navigate(Page::Settings);
                Err(ProvisioningError::BackupSigner(err).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Refresh service status, staking details and balances, in that order.
    async fn resync(&self) -> Result<(), ResyncError> {
        self.pollers
            .services
            .refresh()
            .await
            .map_err(|e| ResyncError::Services(e.into()))?;
        self.pollers
            .staking
            .refresh()
            .await
            .map_err(|e| ResyncError::Staking(e.into()))?;
        self.pollers
            .balances
            .refresh()
            .await
            .map_err(|e| ResyncError::Balances(e.into()))?;
        Ok(())
    }
}

/// Holds the override status while a run is in flight; resets it to none on drop.
struct StatusGuard<'a> {
    status: &'a watch::Sender<OverrideStatus>,
}

impl<'a> StatusGuard<'a> {
    fn deploying(status: &'a watch::Sender<OverrideStatus>) -> Self {
        status.send_replace(OverrideStatus::Deploying);
        Self { status }
    }

    fn set(&self, value: OverrideStatus) {
        self.status.send_replace(value);
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.status.send_replace(OverrideStatus::None);
    }
}

/// Tracks the run phase; returns to idle on drop.
struct PhaseGuard<'a> {
    phase: &'a watch::Sender<RunPhase>,
}

impl<'a> PhaseGuard<'a> {
    fn new(phase: &'a watch::Sender<RunPhase>) -> Self {
        Self { phase }
    }

    fn set(&self, value: RunPhase) {
        tracing::debug!(phase = ?value, "Run phase");
        self.phase.send_replace(value);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(RunPhase::Idle);
    }
}
