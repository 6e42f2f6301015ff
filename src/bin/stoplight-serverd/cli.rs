use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "stoplight-serverd", author, version = stoplight::version(), about = "Stoplight control-plane HTTP server")]
pub struct ServerCli {
    /// The configuration file to use
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}
