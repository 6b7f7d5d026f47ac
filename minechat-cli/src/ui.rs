//! Plain terminal front end.
//!
//! Chat lines go to stdout, connection status to stderr, and every line typed
//! on stdin is sent as one message. End of input closes the client.

use std::io::Write;

use chrono::Local;
use minechat_sdk::client::ClientHandle;
use minechat_sdk::event::{ChannelKind, ConnectionState, Event};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Render one event.
pub fn render(event: &Event, out: &mut impl Write, status: &mut impl Write) -> std::io::Result<()> {
    match event {
        Event::Message(line) => writeln!(out, "{line}"),
        Event::Status { channel, state } => {
            let what = match channel {
                ChannelKind::Read => "reading",
                ChannelKind::Send => "sending",
            };
            let how = match state {
                ConnectionState::Initiated => "connecting…",
                ConnectionState::Established => "connected",
                ConnectionState::Closed => "closed",
            };
            writeln!(status, "[{}] {what}: {how}", stamp())
        }
        Event::NicknameReceived(nick) => writeln!(status, "[{}] logged in as {nick}", stamp()),
    }
}

/// Print events until the client drops its end of the stream.
pub async fn display(mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        if let Err(e) = render(&event, &mut stdout.lock(), &mut stderr.lock()) {
            tracing::warn!(error = %e, "terminal write failed");
            return;
        }
    }
}

/// Forward stdin lines to the client. Returns at end of input or once the
/// client is gone.
pub async fn input(handle: ClientHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if handle.send(line).is_err() {
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!("end of input");
                handle.shutdown();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                handle.shutdown();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(event: Event) -> (String, String) {
        let (mut out, mut status) = (Vec::new(), Vec::new());
        render(&event, &mut out, &mut status).unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(status).unwrap())
    }

    #[test]
    fn messages_go_to_stdout_verbatim() {
        let (out, status) = rendered(Event::Message("Max: hi".into()));
        assert_eq!(out, "Max: hi\n");
        assert!(status.is_empty());
    }

    #[test]
    fn status_goes_to_stderr() {
        let (out, status) = rendered(Event::Status {
            channel: ChannelKind::Send,
            state: ConnectionState::Closed,
        });
        assert!(out.is_empty());
        assert!(status.ends_with("sending: closed\n"), "{status}");

        let (_, status) = rendered(Event::NicknameReceived("Max".into()));
        assert!(status.ends_with("logged in as Max\n"), "{status}");
    }
}
