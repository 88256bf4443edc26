// enjoy: roll out trained RL agents and report their returns

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use zoo_enjoy::{Args, HttpModelHub};

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Err(err) = args.validate() {
        err.exit();
    }
    init_tracing(args.verbose)?;

    let hub = HttpModelHub::new(args.hub_endpoint.as_str());
    let report = zoo_enjoy::run(&args, &hub).await?;
    if report.interrupted {
        tracing::warn!("evaluation interrupted, remaining runs skipped");
    }
    Ok(())
}
