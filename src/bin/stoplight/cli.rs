use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "stoplight", author, version = stoplight::version(), about = "Interact with the stoplight daemon")]
pub struct StoplightCli {
    /// Add a new job with this directory.
    #[arg(short, long, value_name = "DIR")]
    pub add_job: Option<std::path::PathBuf>,

    /// Get a brief status report from the daemon.
    #[arg(short, long)]
    pub status: bool,

    /// Base URL of the control-plane daemon.
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub url: String,
}
