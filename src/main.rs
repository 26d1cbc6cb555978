use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info, warn};
use panel_menu::{
    config::AppConfig,
    input::{
        EdgeSender, console,
        debounce::RateLimiter,
        dispatcher::{HoldTimings, InputDispatcher},
    },
    menu::{Moment, Navigator, NavigatorSettings, NavigatorState},
    runtime::{
        CommandBridge, Controller, LogDisplay, PanelInfo, RenderScheduler, RunOutcome, TelemetryCache, supervisor,
    },
    services::{
        command_source::{MarkerCommandSource, SpoolCommandSource},
        installer::Installer,
        release::GithubReleaseSource,
        state_store::{PersistedState, StateStore},
    },
    system_adapter::{ShellSystemAdapter, SystemAdapter},
};
use std::{io::Write, os::unix::process::CommandExt, sync::Arc};
use tokio::{
    signal::unix::{Signal, SignalKind, signal},
    sync::mpsc,
    task::JoinSet,
};

const EDGE_QUEUE: usize = 64;
const BUTTON_QUEUE: usize = 32;

enum ShutdownReason {
    Restart,
    Shutdown,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Restart => write!(f, "restarting panel"),
            ShutdownReason::Shutdown => write!(f, "shutting down"),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize()?;

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let config = AppConfig::get();
    let adapter = Arc::new(ShellSystemAdapter::new(
        config.system.clone(),
        config.paths.clock_config_file.clone(),
    ));

    while let ShutdownReason::Restart = run_until_shutdown(adapter.clone(), &mut sigterm).await? {
        // only returns if exec failed
        let e = exec_self();
        warn!("{e:#}, restarting in process");
    }

    Ok(())
}

fn initialize() -> Result<()> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));

    AppConfig::load().context("failed to load configuration")?;

    Ok(())
}

/// Replace this process with a fresh instance of the same binary
fn exec_self() -> anyhow::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return anyhow::Error::new(e).context("failed to locate current executable"),
    };

    info!("exec {exe:?}");
    let e = std::process::Command::new(&exe).args(std::env::args_os().skip(1)).exec();
    anyhow::Error::new(e).context(format!("failed to exec {exe:?}"))
}

/// Bring services and network in line with the persisted state
fn reconcile(tasks: &mut JoinSet<()>, adapter: Arc<ShellSystemAdapter>, committed: &PersistedState) {
    let (service, network) = (committed.service, committed.network);

    tasks.spawn(async move {
        if let Err(e) = adapter.activate_service(service).await {
            warn!("failed to activate service {service} at startup: {e:#}");
        }
        if let Err(e) = adapter.switch_network(network).await {
            warn!("failed to switch network to {network} at startup: {e:#}");
        }
        info!("startup reconciliation done");
    });
}

async fn run_until_shutdown(adapter: Arc<ShellSystemAdapter>, sigterm: &mut Signal) -> Result<ShutdownReason> {
    info!("starting panel");

    let config = AppConfig::get();
    let panel = &config.panel;
    let mut tasks = JoinSet::new();

    let store = StateStore::new(&config.paths.state_file);
    info!("state file {:?}", store.path());
    let committed = store.load();
    reconcile(&mut tasks, adapter.clone(), &committed);

    let settings = NavigatorSettings::from_config(panel);
    let info = PanelInfo::new(&config.system, settings.current_version.clone());
    let moment = Moment::now();
    let state = NavigatorState::new(committed, moment.instant, moment.local);

    let source = GithubReleaseSource::new(&config.update).context("failed to create release source")?;
    let installer = Installer::new(source, &config.update, &config.paths);
    let controller = Controller::new(Navigator::new(settings), state, adapter.clone(), installer, store);

    // buttons: edge producers -> dispatcher -> controller
    let (edge_tx, edge_rx) = mpsc::channel(EDGE_QUEUE);
    let (button_tx, button_rx) = mpsc::channel(BUTTON_QUEUE);
    let edges = EdgeSender::new(edge_tx);
    let dispatcher = InputDispatcher::new(
        RateLimiter::new(panel.debounce),
        HoldTimings {
            hold: panel.hold,
            repeat: panel.hold_repeat,
        },
    );
    tasks.spawn(dispatcher.run(edge_rx, button_tx));
    if panel.console_input {
        tasks.spawn(console::run(edges.clone(), panel.hold));
    }

    // remote commands: transport -> bridge -> controller
    let (command_tx, command_rx) = mpsc::channel(config.commands.queue_capacity);
    match &config.paths.command_spool_dir {
        Some(dir) => {
            let source = SpoolCommandSource::new(dir).context("failed to open command spool")?;
            tasks.spawn(CommandBridge::new(source, config.commands.poll_interval).run(command_tx));
        }
        None => {
            let source = MarkerCommandSource::new(&config.paths.command_payload, &config.paths.command_marker);
            tasks.spawn(CommandBridge::new(source, config.commands.poll_interval).run(command_tx));
        }
    }

    let telemetry = TelemetryCache::new();
    let render = RenderScheduler::new(
        LogDisplay::default(),
        controller.subscribe(),
        telemetry.subscribe(),
        info,
        panel.render_tick,
        panel.render_min_interval,
    );
    tasks.spawn(telemetry.run(
        adapter.clone(),
        controller.subscribe(),
        panel.telemetry_max_age,
        panel.telemetry_timeout,
    ));
    tasks.spawn(render.run(controller.render_requests()));
    tasks.spawn(supervisor::run(
        controller.subscribe(),
        controller.events(),
        panel.supervisor_tick,
        panel.idle_timeout,
    ));

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
            ShutdownReason::Shutdown
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
            ShutdownReason::Shutdown
        },
        outcome = controller.run(button_rx, command_rx) => match outcome {
            RunOutcome::Restart => ShutdownReason::Restart,
            RunOutcome::Shutdown => ShutdownReason::Shutdown,
        },
    };

    info!("{reason}");

    drop(edges);
    tasks.shutdown().await;

    if matches!(reason, ShutdownReason::Shutdown) {
        info!("shutdown complete");
    }

    Ok(reason)
}
