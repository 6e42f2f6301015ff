//! The scheduler daemon: a single cooperative-tick loop that owns the
//! Manager. Kept synchronous (no tokio runtime here) — the only
//! asynchronous process in this system is the control plane, spawned below
//! as a genuine sibling OS process so HTTP handling can never stall a tick.

use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stoplight::capacity::Capacity;
use stoplight::job::DockerRuntime;
use stoplight::mailbox::Mailbox;
use stoplight::manager::Manager;
use stoplight::queue::{Command, CommandQueue};

mod cli;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, request_shutdown as usize);
        libc::signal(libc::SIGINT, request_shutdown as usize);
    }
}

fn init_logging(verbose: &clap_verbosity_flag::Verbosity) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let data_dir = stoplight::paths::get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    let appender = tracing_appender::rolling::never(&data_dir, "stoplightd.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(appender);

    let level = verbose.tracing_level_filter();
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking_appender).with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            level.into_level().unwrap_or(tracing::Level::INFO),
        ))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(guard)
}

fn main() -> anyhow::Result<()> {
    let args = cli::StoplightD::parse();
    let _log_guard = init_logging(&args.verbose)?;
    install_signal_handlers();

    let config = stoplight::config::load_config(args.config.as_ref())?;

    let capacity = Capacity::probe_with_gpu_tool(&config.daemon.gpu_tool)?;
    let runtime_dir = stoplight::paths::get_runtime_dir()?;
    std::fs::create_dir_all(&runtime_dir)?;

    let queue = CommandQueue::open(&stoplight::paths::get_command_queue_dir()?)?;
    let mailbox = Mailbox::open(&stoplight::paths::get_mailbox_path()?, stoplight::paths::MAILBOX_SEMAPHORE)?;
    let runtime = DockerRuntime::discover()?;

    let mut manager = Manager::new(capacity, runtime, mailbox);

    let server_binary = args
        .server_binary
        .or_else(|| std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("stoplight-serverd"))))
        .ok_or_else(|| anyhow::anyhow!("could not determine stoplight-serverd binary location"))?;
    tracing::info!(binary = %server_binary.display(), "starting control plane");
    let mut server_command = std::process::Command::new(&server_binary);
    if let Some(config_path) = &args.config {
        server_command.arg("--config").arg(config_path);
    }
    let mut server_process = server_command
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn control plane '{}': {e}", server_binary.display()))?;

    let tick_interval = Duration::from_secs(config.daemon.tick_interval_secs);
    tracing::info!(interval_secs = config.daemon.tick_interval_secs, "scheduler tick loop starting");

    loop {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested, terminating running jobs");
            manager.terminate_all();
            let _ = server_process.kill();
            let _ = server_process.wait();
            break;
        }

        match queue.drain() {
            Ok(commands) => {
                for command in commands {
                    match command {
                        Command::AddJob { job } => manager.add_job(job),
                        Command::CancelJob { id } => {
                            tracing::warn!(%id, "CancelJob is not yet implemented, ignoring");
                        }
                        Command::Shutdown {} => SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst),
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to drain command queue"),
        }

        if let Err(e) = manager.update() {
            tracing::error!(error = %e, "scheduler tick failed");
        }

        std::thread::sleep(tick_interval);
    }

    tracing::info!("scheduler daemon exiting");
    Ok(())
}
