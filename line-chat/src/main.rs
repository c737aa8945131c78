use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::BufReader, net::TcpListener};
use tracing::warn;

use line_chat::{
    cli::{self, Cli, ClientArgs, Command, ServerArgs},
    client,
    event_log::EventLog,
    server::{Server, ServerConfig},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    // Prompts and the client's chat input share one buffered stdin.
    let mut stdin = BufReader::new(tokio::io::stdin());
    match cli.command {
        Command::Server(args) => run_server(args, &mut stdin).await?,
        Command::Client(args) => run_client(args, &mut stdin).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs, stdin: &mut BufReader<tokio::io::Stdin>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let port = cli::resolve_port(args.port, "Enter a port number: ", stdin, &mut stdout).await?;

    let event_log = match EventLog::open(&args.log_file) {
        Ok(log) => log,
        Err(err) => {
            warn!(path = %args.log_file.display(), ?err, "unable to begin logging");
            EventLog::disabled()
        }
    };

    let listener = TcpListener::bind((args.bind.as_str(), port))
        .await
        .with_context(|| format!("failed to listen on {}:{port}", args.bind))?;
    let server = Server::new(
        listener,
        ServerConfig {
            event_log: event_log.clone(),
            max_connections: args.max_connections,
            prefix_usernames: args.prefix_usernames,
        },
    );
    let addr = server.local_addr()?;
    event_log.record(format!("Server is listening on {addr}"));

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_client(args: ClientArgs, stdin: &mut BufReader<tokio::io::Stdin>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let host = cli::resolve_host(args.host, stdin, &mut stdout).await?;
    let port = cli::resolve_port(args.port, "Enter port: ", stdin, &mut stdout).await?;

    client::run(&host, port, stdin).await
}
