use clap::Parser;

mod cli;
mod client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::StoplightCli::parse();
    let client = client::Client::new(args.url);

    let exit_code = if let Some(job_dir) = args.add_job {
        client.add_job(&job_dir).await?
    } else if args.status {
        client.status().await?
    } else {
        eprintln!("Nothing to do: pass --add_job <dir> or --status.");
        1
    };

    std::process::exit(exit_code);
}
