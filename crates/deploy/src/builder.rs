//! Builder module for creating a [`DeploymentOrchestrator`].
//!
//! The [`OrchestratorBuilder`] resolves the selected agent against the configuration
//! and wires the three pollers to the collaborators.

use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::sync::{Mutex, watch};

use crate::{
    AgentType, DeploymentOrchestrator, PilotConfig, StakingProgramId,
    error::ConfigurationError,
    orchestrator::{OverrideStatus, RunPhase},
    poller::{Poller, Pollers},
    safe::Confirmation,
    snapshot::{fetch_balances, fetch_service, fetch_staking},
    traits::{Collaborators, ServiceConfigId},
};

/// Builder for creating a [`DeploymentOrchestrator`].
///
/// # Example
///
/// ```no_run
/// use stakepilot_deploy::{AgentType, Collaborators, OrchestratorBuilder, PilotConfig};
///
/// # fn example(collaborators: Collaborators) -> anyhow::Result<()> {
/// let orchestrator = OrchestratorBuilder::new(PilotConfig::default(), AgentType::PredictTrader)
///     .staking_program("pearl_beta")
///     .initially_funded(false)
///     .build(collaborators)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorBuilder {
    config: PilotConfig,
    agent_type: AgentType,
    staking_program: Option<StakingProgramId>,
    service: Option<ServiceConfigId>,
    initially_funded: bool,
    status_clear_delay: Option<Duration>,
    confirmation: Option<Confirmation>,
}

impl OrchestratorBuilder {
    /// Create a new [`OrchestratorBuilder`] for the given agent.
    pub fn new(config: PilotConfig, agent_type: AgentType) -> Self {
        Self {
            config,
            agent_type,
            staking_program: None,
            service: None,
            initially_funded: false,
            status_clear_delay: None,
            confirmation: None,
        }
    }

    /// Set the staking program the service is created in.
    pub fn staking_program(mut self, id: impl Into<StakingProgramId>) -> Self {
        self.staking_program = Some(id.into());
        self
    }

    /// Select an existing service. Without one, activation creates a new service.
    pub fn service(mut self, id: impl Into<ServiceConfigId>) -> Self {
        self.service = Some(id.into());
        self
    }

    /// Mark the agent as funded through the initial funding flow.
    pub fn initially_funded(mut self, initially_funded: bool) -> Self {
        self.initially_funded = initially_funded;
        self
    }

    /// Override how long the "deployed" status stays visible.
    ///
    /// Defaults to the configured `status_clear_delay_secs`.
    pub fn status_clear_delay(mut self, delay: Duration) -> Self {
        self.status_clear_delay = Some(delay);
        self
    }

    /// Override how a freshly created Safe is waited for.
    pub fn confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    /// Build the [`DeploymentOrchestrator`].
    ///
    /// Fails when the agent type has no entry in the configuration. A missing staking
    /// program is only reported when an activation is attempted.
    pub fn build(
        self,
        collaborators: Collaborators,
    ) -> Result<DeploymentOrchestrator, ConfigurationError> {
        let agent = self
            .config
            .agent(self.agent_type)
            .cloned()
            .ok_or(ConfigurationError::UnknownAgent(self.agent_type))?;

        let (selected_service, _) = watch::channel(self.service);
        let pollers = build_pollers(
            &collaborators,
            agent.home_chain,
            self.staking_program.clone(),
            selected_service.subscribe(),
        );

        let status_clear_delay = self
            .status_clear_delay
            .unwrap_or_else(|| self.config.status_clear_delay());
        let confirmation = self.confirmation.unwrap_or_else(|| Confirmation {
            max_attempts: self.config.safe_confirmation_attempts,
            ..Default::default()
        });

        tracing::debug!(
            agent = %agent.agent_type,
            chain = %agent.home_chain,
            staking_program = ?self.staking_program,
            initially_funded = self.initially_funded,
            "Building deployment orchestrator..."
        );

        let (status, _) = watch::channel(OverrideStatus::None);
        let (phase, _) = watch::channel(RunPhase::Idle);

        Ok(DeploymentOrchestrator {
            config: Arc::new(self.config),
            agent,
            staking_program: self.staking_program,
            initially_funded: self.initially_funded,
            selected_service,
            collaborators,
            pollers,
            status,
            phase,
            run_lock: Mutex::new(()),
            confirmation,
            status_clear_delay,
        })
    }
}

/// Wire one poller per snapshot. Each fetch reads the selected service at call time.
fn build_pollers(
    collaborators: &Collaborators,
    home_chain: crate::Chain,
    program: Option<StakingProgramId>,
    selected: watch::Receiver<Option<ServiceConfigId>>,
) -> Pollers {
    let services = {
        let registry = Arc::clone(&collaborators.registry);
        let selected = selected.clone();
        Poller::new("services", move || {
            let registry = Arc::clone(&registry);
            let selected = selected.borrow().clone();
            async move { fetch_service(registry.as_ref(), selected.as_ref()).await }.boxed()
        })
    };

    let staking = {
        let staking = Arc::clone(&collaborators.staking);
        let selected = selected.clone();
        Poller::new("staking", move || {
            let staking = Arc::clone(&staking);
            let program = program.clone();
            let selected = selected.borrow().clone();
            async move {
                fetch_staking(
                    staking.as_ref(),
                    home_chain,
                    program.as_ref(),
                    selected.as_ref(),
                )
                .await
            }
            .boxed()
        })
    };

    let balances = {
        let balances = Arc::clone(&collaborators.balances);
        let wallets = Arc::clone(&collaborators.wallets);
        let registry = Arc::clone(&collaborators.registry);
        Poller::new("balances", move || {
            let balances = Arc::clone(&balances);
            let wallets = Arc::clone(&wallets);
            let registry = Arc::clone(&registry);
            let selected = selected.borrow().clone();
            async move {
                fetch_balances(
                    balances.as_ref(),
                    wallets.as_ref(),
                    registry.as_ref(),
                    selected.as_ref(),
                )
                .await
            }
            .boxed()
        })
    };

    Pollers {
        services,
        balances,
        staking,
    }
}
