use anyhow::Result;
use clap::Parser;
use scribe::cli::ScribedArgs;
use scribe::daemon::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scribe=info".parse()?),
        )
        .init();

    let args = ScribedArgs::parse();
    let socket_path = args.socket.unwrap_or_else(scribe::config::socket_path);

    let daemon = Daemon::new(socket_path);
    daemon.run().await?;
    Ok(())
}
