use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use tunnel_core::{FileKeyProvider, expand_alias, new_tunnel};
use warren_cli::{
    aliases,
    cli::{AliasCommand, Cli, Command, StartArgs},
    init_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => start(args).await,
        Command::Alias { command } => alias(command),
    }
}

async fn start(args: StartArgs) -> Result<()> {
    let base = match &args.alias {
        Some(name) => Some(aliases::load(name)?),
        None => None,
    };
    let record = args.into_record(base);
    init_tracing(record.verbose);

    if record.server.is_empty() {
        bail!("a server address is required; pass --server or --alias");
    }
    if record.detach {
        warn!("detached mode is not supported; running in the foreground");
    }
    if !record.ssh_agent.is_empty() {
        warn!("ssh agent authentication is not supported; using the configured key instead");
    }

    let secrets = FileKeyProvider::default();
    let expanded = expand_alias(&record, &secrets).context("error processing server options")?;
    info!(server = %expanded.server, "server resolved");

    let tunnel = new_tunnel(expanded.server, expanded.channels, expanded.settings)?;
    tunnel.listen().await?;
    for endpoint in tunnel.local_endpoints().await {
        info!(local = %endpoint, "tunnel listener bound");
    }

    let handle = tunnel.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting the tunnel down");
            handle.stop();
        }
    });

    tunnel.start().await?;
    Ok(())
}

fn alias(command: AliasCommand) -> Result<()> {
    init_tracing(false);
    match command {
        AliasCommand::Save { name, args } => {
            if args.alias.is_some() {
                bail!("--alias cannot be used while saving an alias");
            }
            let record = args.into_record(None);
            if record.server.is_empty() {
                bail!("a server address is required to save an alias");
            }
            aliases::save(&name, &record)?;
            info!(alias = %name, "alias saved");
        }
        AliasCommand::Remove { name } => {
            aliases::remove(&name)?;
            info!(alias = %name, "alias removed");
        }
        AliasCommand::List => {
            for name in aliases::list()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}
