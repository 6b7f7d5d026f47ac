//! minechat: terminal client for two-channel minechat servers.
//!
//!   minechat register <name>   create an account, token saved to access_token.txt
//!   minechat chat              join the chat (stdin → messages, chat → stdout)
//!   minechat chat --read-only  just listen
//!
//! Logs go to stderr. `RUST_LOG` and `--debug` control verbosity,
//! `MINECHAT_LOG_JSON=1` switches to JSON lines.

mod config;
mod ui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use minechat_sdk::auth;
use minechat_sdk::channel::Channel;
use minechat_sdk::client;
use minechat_sdk::connect::{self, TcpConnector};
use minechat_sdk::event::ChannelKind;
use tracing_subscriber::EnvFilter;

use config::{ChatArgs, Cli, Command, RegisterArgs};

fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("minechat_sdk={level},minechat={level}")))?;
    let json_logs = std::env::var("MINECHAT_LOG_JSON").unwrap_or_default() == "1";
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        match cli.command {
            Command::Chat(args) => chat(args).await,
            Command::Register(args) => register(args).await,
        }
    });
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_background();
    result
}

async fn chat(args: ChatArgs) -> Result<()> {
    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            if let Some(minechat_sdk::Error::TokenNotFound { .. }) = e.downcast_ref() {
                eprintln!("No account token found. Run `minechat register <name>` first.");
            }
            return Err(e);
        }
    };
    tracing::info!(
        host = %config.session.host,
        read_port = config.session.read_port,
        send_port = config.session.send_port,
        authenticated = config.session.token.is_some(),
        "starting chat"
    );

    let (handle, events, task) = client::connect(config);

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
        }
        stopper.shutdown();
    });

    let display = tokio::spawn(ui::display(events));
    let _listening = if args.read_only {
        Some(handle)
    } else {
        tokio::spawn(ui::input(handle));
        None
    };

    let result = task.await.context("client task failed")?;
    // The event stream ends with the client; let the last lines print.
    display.await.ok();

    match result {
        Ok(()) => Ok(()),
        Err(minechat_sdk::Error::InvalidToken) => bail!(
            "the server rejected the token from {}; check it or run `minechat register <name>`",
            args.server.token_file.display()
        ),
        Err(e) => Err(e.into()),
    }
}

async fn register(args: RegisterArgs) -> Result<()> {
    let path = &args.server.token_file;
    if path.exists() && !args.force {
        bail!(
            "{} already exists, pass --force to replace it",
            path.display()
        );
    }

    tracing::info!(host = %args.server.host, port = args.server.send_port, "registering");
    let Channel {
        mut reader,
        mut writer,
        ..
    } = connect::open(
        &TcpConnector,
        &args.server.host,
        args.server.send_port,
        &Default::default(),
        ChannelKind::Send,
    )
    .await;

    let registration = auth::register(&mut reader, &mut writer, &args.name)
        .await
        .context("registration failed")?;
    writer.close().await;

    tokio::fs::write(path, format!("{}\n", registration.account_hash))
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!(
        "Registered as {}. Token saved to {}.",
        registration.nickname,
        path.display()
    );
    Ok(())
}
