use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "stoplightd", author, version = stoplight::version(), about = "Stoplight scheduler daemon")]
pub struct StoplightD {
    /// The configuration file to use
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the stoplight-serverd binary to spawn. Defaults to a sibling
    /// binary next to this one.
    #[arg(long)]
    pub server_binary: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}
