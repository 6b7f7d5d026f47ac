//! Read-only listener: prints the chat and every connection state change.
//!
//! Usage:
//!   cargo run --example listen -- --host minechat.dvmn.org --port 5000
//!
//! No token is needed: the send channel is still opened but never written
//! to, so only broadcast traffic feeds the watchdog. Stop with Ctrl-C.

use std::time::Duration;

use clap::Parser;
use minechat_sdk::client::{self, ClientConfig};
use minechat_sdk::event::Event;
use minechat_sdk::supervisor::SessionConfig;

#[derive(Parser)]
#[command(name = "listen", about = "Print a minechat server's broadcast")]
struct Args {
    #[arg(long, default_value = "minechat.dvmn.org")]
    host: String,
    #[arg(long, default_value_t = 5000)]
    port: u16,
    #[arg(long, default_value_t = 5050)]
    send_port: u16,
    /// Watchdog timeout in seconds
    #[arg(long, default_value_t = 10)]
    watchdog: u64,
}

#[tokio::main]
async fn main() -> Result<(), minechat_sdk::Error> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = ClientConfig {
        session: SessionConfig {
            host: args.host,
            read_port: args.port,
            send_port: args.send_port,
            watchdog_timeout: Duration::from_secs(args.watchdog),
            ..Default::default()
        },
        history: None,
    };
    let (handle, mut events, task) = client::connect(config);

    let stopper = handle.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stopper.shutdown();
    });

    while let Some(event) = events.recv().await {
        match event {
            Event::Message(line) => println!("{line}"),
            Event::Status { channel, state } => eprintln!("-- {channel}: {state}"),
            Event::NicknameReceived(nick) => eprintln!("-- logged in as {nick}"),
        }
    }
    drop(handle);
    task.await.map_err(|_| minechat_sdk::Error::Closed)?
}
