//! Integration tests for stakepilot-deploy.
//!
//! These tests drive full activations against in-memory collaborators. No middleware or
//! chain RPC is needed.
//! Run with: cargo test --test orchestrator_test

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, U256};
use anyhow::Result;
use futures::{
    FutureExt,
    future::{BoxFuture, ready},
};
use stakepilot_deploy::{
    ActivationError, AgentType, BackupSignerError, BalanceSource, Chain, Collaborators,
    Confirmation, ConfigurationError, DeploymentOrchestrator, Eligibility, MasterSafe,
    OperatorUi, OrchestratorBuilder, OverrideStatus, Page, PilotConfig, Pollers,
    ProvisioningError, Readiness, RegistryError, RunPhase, ServiceConfigId, ServiceRecord,
    ServiceRegistry, ServiceTemplate, StakedBalance, StakingProgramId, StakingState,
    TokenBalance, TokenSymbol, WalletStore, parse_amount,
};
use tokio::{
    sync::{Notify, watch},
    time::timeout,
};

const EOA: u8 = 0xe0;
const BACKUP_X: u8 = 0x0a;
const BACKUP_Y: u8 = 0x0b;
const HOME_SAFE: u8 = 0x5a;
const SERVICE_SAFE: u8 = 0x5e;

const TEMPLATE_HASH: &str = "bafybeinewtemplatehash";
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Route library logs to the test output. Safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn olas(amount: &str) -> U256 {
    parse_amount(amount).unwrap()
}

fn safe(chain: Chain, address: u8, owners: &[u8]) -> MasterSafe {
    MasterSafe {
        chain,
        address: addr(address),
        owners: owners.iter().copied().map(addr).collect(),
    }
}

#[derive(Default)]
struct FakeWallets {
    eoa: Option<Address>,
    safes: Mutex<Vec<MasterSafe>>,
    created: Mutex<Vec<(Chain, Address)>>,
    fail_create: bool,
    pollers: Mutex<Option<Pollers>>,
    eoa_reads: Mutex<Vec<bool>>,
}

impl FakeWallets {
    fn with_safes(safes: Vec<MasterSafe>) -> Self {
        Self {
            eoa: Some(addr(EOA)),
            safes: Mutex::new(safes),
            ..Default::default()
        }
    }

    fn created(&self) -> Vec<(Chain, Address)> {
        self.created.lock().unwrap().clone()
    }

    /// Record whether the pollers are paused whenever the EOA is read.
    fn observe(&self, orchestrator: &DeploymentOrchestrator) {
        *self.pollers.lock().unwrap() = Some(orchestrator.pollers().clone());
    }

    fn eoa_reads(&self) -> Vec<bool> {
        self.eoa_reads.lock().unwrap().clone()
    }
}

impl WalletStore for FakeWallets {
    fn get_eoa(&self) -> BoxFuture<'_, Result<Option<Address>>> {
        if let Some(pollers) = self.pollers.lock().unwrap().as_ref() {
            self.eoa_reads.lock().unwrap().push(pollers.all_paused());
        }
        ready(Ok(self.eoa)).boxed()
    }

    fn list_safes(&self) -> BoxFuture<'_, Result<Vec<MasterSafe>>> {
        ready(Ok(self.safes.lock().unwrap().clone())).boxed()
    }

    fn create_safe(&self, chain: Chain, backup_owner: Address) -> BoxFuture<'_, Result<()>> {
        let result = if self.fail_create {
            Err(anyhow::anyhow!("Safe creation reverted"))
        } else {
            self.created.lock().unwrap().push((chain, backup_owner));
            self.safes.lock().unwrap().push(MasterSafe {
                chain,
                address: addr(HOME_SAFE),
                owners: self.eoa.into_iter().chain([backup_owner]).collect(),
            });
            Ok(())
        };
        ready(result).boxed()
    }

    fn update_safe_backup_owner(
        &self,
        _chain: Chain,
        _backup_owner: Address,
    ) -> BoxFuture<'_, Result<()>> {
        ready(Ok(())).boxed()
    }
}

#[derive(Default)]
struct FakeRegistry {
    services: Mutex<Vec<ServiceRecord>>,
    calls: Mutex<Vec<&'static str>>,
    fail_create: bool,
    fail_start: bool,
    start_gate: Option<Arc<Notify>>,
    observers: Mutex<Option<(watch::Receiver<OverrideStatus>, Pollers)>>,
    observed: Mutex<Vec<(OverrideStatus, bool)>>,
    lookups: AtomicUsize,
}

impl FakeRegistry {
    /// Record the override status and the pollers' pause state whenever `start` runs.
    fn observe(&self, orchestrator: &DeploymentOrchestrator) {
        *self.observers.lock().unwrap() =
            Some((orchestrator.subscribe_status(), orchestrator.pollers().clone()));
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn observed(&self) -> Vec<(OverrideStatus, bool)> {
        self.observed.lock().unwrap().clone()
    }

    fn services(&self) -> Vec<ServiceRecord> {
        self.services.lock().unwrap().clone()
    }
}

impl ServiceRegistry for FakeRegistry {
    fn create<'a>(
        &'a self,
        template: &'a ServiceTemplate,
        _program: &'a StakingProgramId,
        _use_marketplace: bool,
    ) -> BoxFuture<'a, Result<ServiceRecord>> {
        self.calls.lock().unwrap().push("create");
        let result = if self.fail_create {
            Err(anyhow::anyhow!("middleware returned 500"))
        } else {
            let mut services = self.services.lock().unwrap();
            let record = ServiceRecord {
                config_id: ServiceConfigId::new(format!("sc-{}", services.len() + 1)),
                hash: template.hash.clone(),
                home_chain: template.home_chain,
                running: false,
                safe: Some(addr(SERVICE_SAFE)),
            };
            services.push(record.clone());
            Ok(record)
        };
        ready(result).boxed()
    }

    fn update<'a>(
        &'a self,
        service: &'a ServiceConfigId,
        hash: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.calls.lock().unwrap().push("update");
        let mut services = self.services.lock().unwrap();
        let result = match services.iter_mut().find(|r| &r.config_id == service) {
            Some(record) => {
                record.hash = hash.to_string();
                Ok(())
            }
            None => Err(anyhow::anyhow!("unknown service {}", service)),
        };
        ready(result).boxed()
    }

    fn start<'a>(&'a self, service: &'a ServiceConfigId) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(gate) = &self.start_gate {
                gate.notified().await;
            }
            self.calls.lock().unwrap().push("start");
            if let Some((status, pollers)) = self.observers.lock().unwrap().as_ref() {
                self.observed
                    .lock()
                    .unwrap()
                    .push((*status.borrow(), pollers.all_paused()));
            }
            if self.fail_start {
                anyhow::bail!("deployment failed to build");
            }
            let mut services = self.services.lock().unwrap();
            let record = services
                .iter_mut()
                .find(|r| &r.config_id == service)
                .ok_or_else(|| anyhow::anyhow!("unknown service {}", service))?;
            record.running = true;
            Ok(())
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Option<ServiceRecord>>> {
        let record = self
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|r| &r.config_id == service)
            .cloned();
        ready(Ok(record)).boxed()
    }

    fn find<'a>(
        &'a self,
        template: &'a ServiceTemplate,
    ) -> BoxFuture<'a, Result<Option<ServiceRecord>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let record = self
            .services
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.home_chain == template.home_chain)
            .cloned();
        ready(Ok(record)).boxed()
    }
}

struct FakeStaking {
    requirement: Option<U256>,
    slots: Option<bool>,
    eligibility: Eligibility,
    slot_fetches: AtomicUsize,
}

impl Default for FakeStaking {
    fn default() -> Self {
        Self {
            requirement: Some(olas("500")),
            slots: Some(true),
            eligibility: Eligibility::default(),
            slot_fetches: AtomicUsize::new(0),
        }
    }
}

impl StakingState for FakeStaking {
    fn get_requirement<'a>(
        &'a self,
        _chain: Chain,
        _program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<U256>>> {
        ready(Ok(self.requirement)).boxed()
    }

    fn get_slot_availability<'a>(
        &'a self,
        _chain: Chain,
        _program: &'a StakingProgramId,
    ) -> BoxFuture<'a, Result<Option<bool>>> {
        self.slot_fetches.fetch_add(1, Ordering::SeqCst);
        ready(Ok(self.slots)).boxed()
    }

    fn get_eligibility<'a>(
        &'a self,
        _service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Eligibility>> {
        ready(Ok(self.eligibility)).boxed()
    }
}

#[derive(Default)]
struct FakeBalances {
    balances: Vec<(Address, Chain, Vec<TokenBalance>)>,
    staked: Vec<StakedBalance>,
    fail: AtomicBool,
}

impl BalanceSource for FakeBalances {
    fn get_balances(
        &self,
        wallet: Address,
        chain: Chain,
    ) -> BoxFuture<'_, Result<Vec<TokenBalance>>> {
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("RPC endpoint unreachable"))
        } else {
            Ok(self
                .balances
                .iter()
                .find(|(address, c, _)| *address == wallet && *c == chain)
                .map(|(_, _, tokens)| tokens.clone())
                .unwrap_or_default())
        };
        ready(result).boxed()
    }

    fn get_staked_balances<'a>(
        &'a self,
        _service: &'a ServiceConfigId,
    ) -> BoxFuture<'a, Result<Vec<StakedBalance>>> {
        ready(Ok(self.staked.clone())).boxed()
    }
}

#[derive(Default)]
struct RecordingUi {
    notes: Mutex<Vec<String>>,
    pages: Mutex<Vec<Page>>,
}

impl OperatorUi for RecordingUi {
    fn notify(&self, message: &str) {
        self.notes.lock().unwrap().push(message.to_string());
    }

    fn navigate(&self, page: Page) {
        self.pages.lock().unwrap().push(page);
    }
}

/// Test setup holding every fake collaborator.
struct Harness {
    wallets: Arc<FakeWallets>,
    registry: Arc<FakeRegistry>,
    staking: Arc<FakeStaking>,
    balances: Arc<FakeBalances>,
    ui: Arc<RecordingUi>,
}

impl Harness {
    fn new(wallets: FakeWallets, registry: FakeRegistry) -> Self {
        Self::with_balances(wallets, registry, FakeBalances::default())
    }

    fn with_balances(wallets: FakeWallets, registry: FakeRegistry, balances: FakeBalances) -> Self {
        Self {
            wallets: Arc::new(wallets),
            registry: Arc::new(registry),
            staking: Arc::new(FakeStaking::default()),
            balances: Arc::new(balances),
            ui: Arc::new(RecordingUi::default()),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            balances: self.balances.clone(),
            staking: self.staking.clone(),
            wallets: self.wallets.clone(),
            registry: self.registry.clone(),
            ui: self.ui.clone(),
        }
    }

    fn builder(&self, config: PilotConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, AgentType::PredictTrader)
            .staking_program("pearl_beta")
            .status_clear_delay(Duration::from_millis(50))
            .confirmation(Confirmation {
                max_attempts: 2,
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            })
    }

    fn orchestrator(&self) -> DeploymentOrchestrator {
        self.builder(test_config())
            .build(self.collaborators())
            .expect("trader is configured")
    }

    fn notes(&self) -> Vec<String> {
        self.ui.notes.lock().unwrap().clone()
    }

    fn pages(&self) -> Vec<Page> {
        self.ui.pages.lock().unwrap().clone()
    }
}

fn test_config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.service_templates.push(ServiceTemplate {
        agent_type: AgentType::PredictTrader,
        name: "Trader Agent".to_string(),
        hash: TEMPLATE_HASH.to_string(),
        description: "Prediction market trader".to_string(),
        home_chain: Chain::Gnosis,
    });
    config
}

fn existing_service(hash: &str) -> ServiceRecord {
    ServiceRecord {
        config_id: ServiceConfigId::new("sc-7"),
        hash: hash.to_string(),
        home_chain: Chain::Gnosis,
        running: false,
        safe: Some(addr(SERVICE_SAFE)),
    }
}

fn assert_rolled_back(orchestrator: &DeploymentOrchestrator) {
    assert!(
        !orchestrator.pollers().any_paused(),
        "pollers must be resumed after a failed run"
    );
    assert_eq!(orchestrator.status(), OverrideStatus::None);
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
}

/// No home Safe, one Safe on another chain owned by {EOA, X}: the new Safe gets X.
#[tokio::test]
async fn test_scenario_a_creates_home_safe_with_backup_signer() {
    init_tracing();
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Base, 0x01, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
    );
    let orchestrator = harness.orchestrator();

    orchestrator.activate().await.unwrap();

    assert_eq!(harness.wallets.created(), vec![(Chain::Gnosis, addr(BACKUP_X))]);
    assert_eq!(harness.registry.calls(), vec!["create", "start"]);
    assert_eq!(
        orchestrator.selected_service(),
        Some(ServiceConfigId::new("sc-1"))
    );
    assert_eq!(orchestrator.status(), OverrideStatus::None);
    assert!(harness.notes().is_empty());
}

/// Safes on other chains owned by {EOA, X} and {EOA, Y}: no Safe is created.
#[tokio::test]
async fn test_scenario_b_inconsistent_backup_signers() {
    init_tracing();
    let harness = Harness::new(
        FakeWallets::with_safes(vec![
            safe(Chain::Base, 0x01, &[EOA, BACKUP_X]),
            safe(Chain::Mode, 0x02, &[EOA, BACKUP_Y]),
        ]),
        FakeRegistry::default(),
    );
    let orchestrator = harness.orchestrator();

    let err = orchestrator.activate().await.unwrap_err();

    assert_eq!(
        err.backup_signer(),
        Some(&BackupSignerError::InconsistentBackupSigner {
            candidates: [addr(BACKUP_X), addr(BACKUP_Y)].into_iter().collect(),
        })
    );
    assert!(harness.wallets.created().is_empty());
    assert!(harness.registry.calls().is_empty());
    assert_eq!(harness.pages(), vec![Page::Settings]);
    assert_eq!(
        harness.notes(),
        vec![
            "The same backup signer address must be used on all chains. Please remove any extra backup signers.".to_string(),
            "An error occurred while starting. Please try again.".to_string(),
        ]
    );
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_no_backup_signer_redirects_to_settings() {
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Base, 0x01, &[EOA])]),
        FakeRegistry::default(),
    );
    let orchestrator = harness.orchestrator();

    let err = orchestrator.activate().await.unwrap_err();

    assert_eq!(err.backup_signer(), Some(&BackupSignerError::NoBackupSigner));
    assert!(harness.wallets.created().is_empty());
    assert_eq!(harness.pages(), vec![Page::Settings]);
    assert_rolled_back(&orchestrator);
}

/// Unstaked first deployment funded from the master Safe, then a full activation.
#[tokio::test]
async fn test_scenario_c_first_deployment_end_to_end() {
    init_tracing();
    let balances = FakeBalances {
        balances: vec![(
            addr(HOME_SAFE),
            Chain::Gnosis,
            vec![
                TokenBalance {
                    symbol: TokenSymbol::Xdai,
                    amount: olas("2"),
                },
                TokenBalance {
                    symbol: TokenSymbol::Olas,
                    amount: olas("1000"),
                },
            ],
        )],
        ..Default::default()
    };
    let harness = Harness::with_balances(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
        balances,
    );
    let orchestrator = Arc::new(harness.orchestrator());
    harness.registry.observe(&orchestrator);

    assert_eq!(orchestrator.readiness(), Readiness::Loading);
    orchestrator.pollers().refresh_all().await.unwrap();
    assert_eq!(
        orchestrator.readiness(),
        Readiness::FirstDeployment {
            olas: olas("1000"),
            required: olas("500"),
            gas: olas("2"),
            threshold: olas("1.5"),
        }
    );
    assert!(orchestrator.is_ready());
    assert_eq!(orchestrator.activate_label(), "Start agent & stake");
    assert_eq!(orchestrator.status(), OverrideStatus::None);

    let mut status = orchestrator.subscribe_status();
    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.activate().await }
    });

    timeout(
        TEST_TIMEOUT,
        status.wait_for(|s| *s == OverrideStatus::Deployed),
    )
    .await
    .expect("status never reached deployed")
    .expect("status channel closed");

    run.await.unwrap().unwrap();

    assert_eq!(orchestrator.status(), OverrideStatus::None);
    assert_eq!(
        harness.registry.observed(),
        vec![(OverrideStatus::Deploying, true)]
    );
    assert!(harness.wallets.created().is_empty());
    assert_eq!(harness.registry.calls(), vec!["create", "start"]);

    let services = harness.registry.services();
    assert_eq!(services.len(), 1);
    assert!(services[0].running);
    assert_eq!(services[0].hash, TEMPLATE_HASH);

    // Resync picked up the new service.
    assert_eq!(orchestrator.readiness(), Readiness::ServiceRunning);
    assert_eq!(orchestrator.activate_label(), "Start agent");
    assert!(!orchestrator.pollers().any_paused());
}

#[tokio::test]
async fn test_existing_safe_and_service_are_reused() {
    let registry = FakeRegistry {
        services: Mutex::new(vec![existing_service("bafybeioldhash")]),
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = harness
        .builder(test_config())
        .service("sc-7")
        .build(harness.collaborators())
        .unwrap();

    orchestrator.activate().await.unwrap();

    assert!(harness.wallets.created().is_empty());
    assert_eq!(harness.registry.calls(), vec!["update", "start"]);
    let services = harness.registry.services();
    assert_eq!(services[0].hash, TEMPLATE_HASH);
    assert!(services[0].running);
}

#[tokio::test]
async fn test_rollback_after_safe_creation_failure() {
    let wallets = FakeWallets {
        fail_create: true,
        ..FakeWallets::with_safes(vec![safe(Chain::Base, 0x01, &[EOA, BACKUP_X])])
    };
    let harness = Harness::new(wallets, FakeRegistry::default());
    let orchestrator = harness.orchestrator();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Provisioning(ProvisioningError::CreateSafe {
            chain: Chain::Gnosis,
            ..
        })
    ));
    assert!(harness.registry.calls().is_empty());
    assert_eq!(
        harness.notes(),
        vec!["An error occurred while starting. Please try again.".to_string()]
    );
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_rollback_after_service_creation_failure() {
    let registry = FakeRegistry {
        fail_create: true,
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = harness.orchestrator();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Registry(RegistryError::Create(_))
    ));
    assert_eq!(harness.registry.calls(), vec!["create"]);
    assert!(harness.registry.services().is_empty());
    assert_eq!(orchestrator.selected_service(), None);
    assert_eq!(
        harness.notes(),
        vec![
            "Failed to create service.".to_string(),
            "An error occurred while starting. Please try again.".to_string(),
        ]
    );
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_rollback_after_start_failure() {
    init_tracing();
    let registry = FakeRegistry {
        fail_start: true,
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = harness.orchestrator();
    harness.registry.observe(&orchestrator);

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Registry(RegistryError::Start(_))
    ));
    assert_eq!(
        harness.registry.observed(),
        vec![(OverrideStatus::Deploying, true)]
    );
    assert!(!harness.registry.services()[0].running);
    assert_eq!(
        harness.notes(),
        vec![
            "Failed to start service.".to_string(),
            "An error occurred while starting. Please try again.".to_string(),
        ]
    );
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_missing_template_fails_after_provisioning() {
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
    );
    let orchestrator = harness
        .builder(PilotConfig::default())
        .build(harness.collaborators())
        .unwrap();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Configuration(ConfigurationError::MissingServiceTemplate(
            AgentType::PredictTrader
        ))
    ));
    assert!(harness.registry.calls().is_empty());
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_missing_wallet_resumes_pollers() {
    let harness = Harness::new(FakeWallets::default(), FakeRegistry::default());
    let orchestrator = harness.orchestrator();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Configuration(ConfigurationError::MissingWallet)
    ));
    assert!(harness.notes().is_empty());
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_missing_staking_program() {
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA])]),
        FakeRegistry::default(),
    );
    let orchestrator = OrchestratorBuilder::new(test_config(), AgentType::PredictTrader)
        .build(harness.collaborators())
        .unwrap();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Configuration(ConfigurationError::MissingStakingProgram)
    ));
    assert_rolled_back(&orchestrator);
}

#[tokio::test]
async fn test_resync_failure_is_not_fatal() {
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
    );
    harness.balances.fail.store(true, Ordering::SeqCst);
    let orchestrator = harness.orchestrator();

    orchestrator.activate().await.unwrap();

    assert_eq!(harness.notes(), vec!["Failed to update state.".to_string()]);
    assert!(harness.registry.services()[0].running);
    assert!(orchestrator.pollers().services.latest().is_some());
    assert!(orchestrator.pollers().balances.latest().is_none());
    assert_eq!(orchestrator.status(), OverrideStatus::None);
    assert!(!orchestrator.pollers().any_paused());
}

#[tokio::test]
async fn test_concurrent_activation_is_rejected() {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let registry = FakeRegistry {
        start_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = Arc::new(harness.orchestrator());

    let mut phase = orchestrator.subscribe_phase();
    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.activate().await }
    });

    timeout(
        TEST_TIMEOUT,
        phase.wait_for(|p| *p == RunPhase::ActivatingService),
    )
    .await
    .expect("run never reached service activation")
    .expect("phase channel closed");

    let second = orchestrator.activate().await;
    assert!(matches!(second, Err(ActivationError::AlreadyRunning)));

    gate.notify_one();
    run.await.unwrap().unwrap();

    assert_eq!(harness.registry.calls(), vec!["create", "start"]);
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
}

/// A second start without a selected service reuses the agent's service.
#[tokio::test]
async fn test_existing_service_is_discovered() {
    init_tracing();
    let registry = FakeRegistry {
        services: Mutex::new(vec![existing_service("bafybeioldhash")]),
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = harness.orchestrator();

    assert_eq!(
        orchestrator.discover_service().await.unwrap(),
        Some(ServiceConfigId::new("sc-7"))
    );
    orchestrator.pollers().refresh_all().await.unwrap();
    assert_eq!(orchestrator.activate_label(), "Start agent");

    orchestrator.activate().await.unwrap();

    assert_eq!(harness.registry.calls(), vec!["update", "start"]);
    let services = harness.registry.services();
    assert_eq!(services.len(), 1);
    assert!(services[0].running);
}

#[tokio::test]
async fn test_activate_looks_up_service_before_creating() {
    let registry = FakeRegistry {
        services: Mutex::new(vec![existing_service(TEMPLATE_HASH)]),
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = harness.orchestrator();

    orchestrator.activate().await.unwrap();

    assert_eq!(harness.registry.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(harness.registry.calls(), vec!["start"]);
    assert_eq!(
        orchestrator.selected_service(),
        Some(ServiceConfigId::new("sc-7"))
    );
}

#[tokio::test]
async fn test_wallet_is_read_with_pollers_paused() {
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
    );
    let orchestrator = harness.orchestrator();
    harness.wallets.observe(&orchestrator);

    orchestrator.activate().await.unwrap();

    assert_eq!(harness.wallets.eoa_reads(), vec![true]);
}

#[tokio::test]
async fn test_template_on_other_chain_is_rejected() {
    let mut config = PilotConfig::default();
    config.service_templates.push(ServiceTemplate {
        agent_type: AgentType::PredictTrader,
        name: "Trader Agent".to_string(),
        hash: TEMPLATE_HASH.to_string(),
        description: String::new(),
        home_chain: Chain::Base,
    });
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        FakeRegistry::default(),
    );
    let orchestrator = harness
        .builder(config)
        .build(harness.collaborators())
        .unwrap();

    let err = orchestrator.activate().await.unwrap_err();

    assert!(matches!(
        err,
        ActivationError::Configuration(ConfigurationError::TemplateChainMismatch {
            agent_chain: Chain::Gnosis,
            template_chain: Chain::Base,
            ..
        })
    ));
    assert!(harness.registry.calls().is_empty());
    assert_rolled_back(&orchestrator);
}

/// Background pollers stop fetching while an activation is in flight.
#[tokio::test]
async fn test_background_polling_stops_during_activation() {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let registry = FakeRegistry {
        start_gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let harness = Harness::new(
        FakeWallets::with_safes(vec![safe(Chain::Gnosis, HOME_SAFE, &[EOA, BACKUP_X])]),
        registry,
    );
    let orchestrator = Arc::new(harness.orchestrator());
    let fetches = || harness.staking.slot_fetches.load(Ordering::SeqCst);

    let polling = orchestrator
        .pollers()
        .spawn_all(Duration::from_millis(5));
    timeout(TEST_TIMEOUT, async {
        while fetches() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pollers never fetched");

    let mut phase = orchestrator.subscribe_phase();
    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.activate().await }
    });
    timeout(
        TEST_TIMEOUT,
        phase.wait_for(|p| *p == RunPhase::ActivatingService),
    )
    .await
    .expect("run never reached service activation")
    .expect("phase channel closed");

    let paused_at = fetches();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetches(), paused_at);
    assert!(orchestrator.pollers().all_paused());

    gate.notify_one();
    run.await.unwrap().unwrap();

    let settled_at = fetches();
    assert!(settled_at > paused_at, "resync refreshes staking");
    timeout(TEST_TIMEOUT, async {
        while fetches() == settled_at {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pollers never resumed");

    for handle in polling {
        handle.abort();
    }
}
