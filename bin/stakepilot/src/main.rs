//! stakepilot is a CLI tool to check and start Pearl staking agents.

mod cli;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, ConfigCommand, SafeCommand};
use stakepilot_deploy::{
    CONFIG_FILENAME, Collaborators, Confirmation, DeploymentOrchestrator, LogUi,
    MiddlewareClient, OrchestratorBuilder, PilotConfig, ProvisioningError, RpcBalanceSource,
    SafeProvisioning, WalletStore, ensure_home_safe, format_amount,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match &cli.command {
        Command::Config(ConfigCommand::Init { force }) => init_config(cli.config.as_deref(), *force),
        command => run(&cli, command).await,
    }
}

async fn run(cli: &Cli, command: &Command) -> Result<()> {
    let config = PilotConfig::load(cli.config.as_deref())?;
    let middleware = MiddlewareClient::new(&config)?;

    tracing::debug!(backend_url = %config.backend_url, "Waiting for the middleware...");
    middleware
        .wait_until_ready(config.request_timeout())
        .await
        .context("Middleware is not reachable")?;

    match command {
        Command::Status => {
            let orchestrator = build_orchestrator(cli, config, middleware)?;
            refresh(&orchestrator).await?;
            print_status(&orchestrator);
        }
        Command::Start => {
            let poll_interval = config.poll_interval();
            let orchestrator = build_orchestrator(cli, config, middleware)?;
            refresh(&orchestrator).await?;

            let readiness = orchestrator.readiness();
            if !readiness.is_deployable() {
                anyhow::bail!("Agent is not ready to start: {}", readiness);
            }

            tracing::info!(
                agent = %cli.agent,
                action = orchestrator.activate_label(),
                "Starting agent..."
            );
            let polling = orchestrator.pollers().spawn_all(poll_interval);
            let result = orchestrator.activate().await;
            for handle in polling {
                handle.abort();
            }
            result?;

            if let Some(service) = orchestrator.selected_service() {
                tracing::info!(service = %service, "Agent is running");
            }
        }
        Command::Safe(SafeCommand::Ensure) => {
            let agent = config
                .agent(cli.agent)
                .with_context(|| format!("Agent '{}' is not configured", cli.agent))?;
            let eoa = middleware
                .get_eoa()
                .await?
                .context("No master wallet found")?;
            let safes = middleware.list_safes().await?;
            let confirmation = Confirmation {
                max_attempts: config.safe_confirmation_attempts,
                ..Default::default()
            };

            let provisioning =
                match ensure_home_safe(&middleware, &safes, Some(eoa), agent.home_chain, confirmation)
                    .await
                {
                    Ok(provisioning) => provisioning,
                    Err(ProvisioningError::BackupSigner(err)) => {
                        tracing::error!("{}", err.operator_message());
                        return Err(err.into());
                    }
                    Err(err) => return Err(err.into()),
                };

            match provisioning {
                SafeProvisioning::AlreadyExists { address } => {
                    tracing::info!(chain = %agent.home_chain, address = %address, "Master Safe already exists");
                }
                SafeProvisioning::Created {
                    address,
                    backup_owner,
                } => {
                    tracing::info!(
                        chain = %agent.home_chain,
                        address = %address,
                        backup_owner = %backup_owner,
                        "Master Safe created"
                    );
                }
            }
        }
        Command::Safe(SafeCommand::SetBackup { address, chain }) => {
            let chain = match chain {
                Some(chain) => *chain,
                None => {
                    config
                        .agent(cli.agent)
                        .with_context(|| format!("Agent '{}' is not configured", cli.agent))?
                        .home_chain
                }
            };
            middleware
                .update_safe_backup_owner(chain, *address)
                .await?;
            tracing::info!(chain = %chain, backup_owner = %address, "Backup owner updated");
        }
        Command::Config(ConfigCommand::Init { force }) => {
            init_config(cli.config.as_deref(), *force)?;
        }
    }

    Ok(())
}

/// Write the default configuration next to `path`, or in the current directory.
fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
        Some(path) => path.to_path_buf(),
        None => Path::new(CONFIG_FILENAME).to_path_buf(),
    };

    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at {}. Use --force to overwrite it.",
            path.display()
        );
    }

    PilotConfig::default().save_to_file(&path)
}

fn build_orchestrator(
    cli: &Cli,
    config: PilotConfig,
    middleware: MiddlewareClient,
) -> Result<DeploymentOrchestrator> {
    let balances = RpcBalanceSource::new(&config, middleware.clone())?;
    let collaborators = Collaborators {
        balances: Arc::new(balances),
        staking: Arc::new(middleware.clone()),
        wallets: Arc::new(middleware.clone()),
        registry: Arc::new(middleware),
        ui: Arc::new(LogUi),
    };

    let mut builder =
        OrchestratorBuilder::new(config, cli.agent).initially_funded(cli.initially_funded);
    if let Some(program) = &cli.staking_program {
        builder = builder.staking_program(program.as_str());
    }
    if let Some(service) = &cli.service {
        builder = builder.service(service.as_str());
    }

    Ok(builder.build(collaborators)?)
}

/// Pick up the agent's existing service, then fetch every snapshot once.
async fn refresh(orchestrator: &DeploymentOrchestrator) -> Result<()> {
    if let Some(service) = orchestrator
        .discover_service()
        .await
        .context("Failed to look up the agent's service")?
    {
        tracing::debug!(service = %service, "Using existing service");
    }
    orchestrator
        .pollers()
        .refresh_all()
        .await
        .context("Failed to fetch agent state")
}

fn print_status(orchestrator: &DeploymentOrchestrator) {
    let agent = orchestrator.agent();
    let readiness = orchestrator.readiness();

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["Agent", "Home chain", "Service", "Ready", "Reason"]);
    summary.add_row(vec![
        agent.agent_type.to_string(),
        agent.home_chain.to_string(),
        orchestrator
            .selected_service()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        if readiness.is_deployable() { "yes" } else { "no" }.to_string(),
        readiness.to_string(),
    ]);
    println!("{summary}");

    if let Some(balances) = orchestrator.pollers().balances.latest() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Wallet", "Chain", "Address", "Token", "Balance"]);
        for wallet in &balances.wallets {
            table.add_row(vec![
                format!("{:?}", wallet.role),
                wallet.chain.to_string(),
                wallet.address.to_string(),
                wallet.symbol.to_string(),
                format_amount(wallet.amount),
            ]);
        }
        for staked in &balances.staked {
            table.add_row(vec![
                "Staked".to_string(),
                staked.chain.to_string(),
                "-".to_string(),
                "OLAS".to_string(),
                format_amount(staked.total()),
            ]);
        }
        println!("{table}");
    }
}
