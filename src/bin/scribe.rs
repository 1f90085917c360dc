use anyhow::Result;
use clap::Parser;
use scribe::cli::ScribeArgs;
use scribe::wrapper::{self, WrapperConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("scribe=info".parse()?),
        )
        .init();

    let args = ScribeArgs::parse();
    let socket_path = args.socket.unwrap_or_else(scribe::config::socket_path);

    let cfg = WrapperConfig {
        shell: args.shell,
        title: args.title,
        collab: args.collab,
        buffer_size: args.buffer_size,
        socket_path,
    };

    let code = wrapper::run(cfg)?;
    std::process::exit(code);
}
