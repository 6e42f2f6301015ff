use clap::Parser;
mod cli;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::ServerCli::parse();

    let default_directive = args.verbose.tracing_level_filter().to_string();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = stoplight::config::load_config(args.config.as_ref())?;

    let runtime_dir = stoplight::paths::get_runtime_dir()?;
    std::fs::create_dir_all(&runtime_dir)?;
    let queue = stoplight::queue::CommandQueue::open(&stoplight::paths::get_command_queue_dir()?)?;
    let mailbox = stoplight::mailbox::Mailbox::open(
        &stoplight::paths::get_mailbox_path()?,
        stoplight::paths::MAILBOX_SEMAPHORE,
    )?;

    server::run(config, queue, mailbox).await
}
