use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::io::BufReader;

use nocom::cli::Cli;
use nocom::config::{friendly_io_error_message, Config, Profile};
use nocom::kernel::load_core;
use nocom::lifecycle::{
    forward_os_signals, install_panic_hook, shutdown_channel, Exit, Orchestrator,
    OrchestratorSettings,
};
use nocom::logging::{self, Logger, LoggerSettings};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit = match run(cli).await {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("{:#}", e);
            Exit::LoadFailed
        }
    };
    std::process::exit(exit.code());
}

async fn run(cli: Cli) -> Result<Exit> {
    let Some(core_dir) = cli.existing_core_dir().cloned() else {
        match &cli.core_dir {
            Some(dir) => eprintln!("Core directory {} does not exist", dir.display()),
            None => eprintln!("No core directory given (use --core-dir or NOCOM_CORE_DIR)"),
        }
        return Ok(Exit::MissingCore);
    };

    // Profile layout must exist before the logger claims a file name
    let profile = Profile::from_arg(cli.user_data_dir.as_deref())
        .context("Failed to resolve user data directory")?;
    profile
        .ensure_directories()
        .map_err(|e| anyhow!(friendly_io_error_message(&e, "Failed to create user data directory")))?;
    let config = Config::load(&profile)?;

    let mut settings = LoggerSettings::new(profile.logs_dir());
    settings.console_level = cli.console_level(&config);
    settings.file_level = cli.file_level(&config);
    settings.compaction_interval = config.compaction_interval();
    let logger = Arc::new(Logger::new(settings));

    logging::init_tracing(Arc::clone(&logger))?;
    install_panic_hook(Arc::clone(&logger));
    tracing::debug!("Logging to: {}", logger.active_file().display());

    let core = match load_core(&core_dir, profile.root(), logger.emitters(), config.stop_grace()) {
        Ok(core) => core,
        Err(e) => {
            eprintln!("An exception has occurred while trying to load NOCOM_BOT core.");
            eprintln!("{}", e);
            logger.flush().await;
            return Ok(Exit::LoadFailed);
        }
    };

    let (trigger_tx, trigger_rx) = shutdown_channel();
    let _signal_task = forward_os_signals(trigger_tx).context("Failed to install signal handlers")?;

    let mut orchestrator = Orchestrator::new(
        core,
        Arc::clone(&logger),
        OrchestratorSettings {
            start_failure_delay: config.start_failure_delay(),
        },
    );
    if std::io::stdin().is_terminal() {
        orchestrator =
            orchestrator.with_prompt_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    }

    let exit = orchestrator.run(trigger_rx).await;
    logger.flush().await;
    Ok(exit)
}
