//! Reader loop: broadcast channel → display and history.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::channel::LineReader;
use crate::error::CycleError;
use crate::event::Event;
use crate::watchdog::{LivenessKind, LivenessSender};

/// Where inbound lines go.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub display: mpsc::UnboundedSender<Event>,
    pub history: Option<mpsc::UnboundedSender<String>>,
}

impl Inbound {
    /// Hand a line to both sinks. Fails only if the display is gone, which
    /// means the user has quit; a gone history sink is ignored.
    pub fn deliver(&self, line: String) -> Result<(), CycleError> {
        if let Some(history) = &self.history {
            let _ = history.send(line.clone());
        }
        self.display
            .send(Event::Message(line))
            .map_err(|_| CycleError::Shutdown)
    }
}

/// Forward every line from `reader` until the channel fails. Has no timeout
/// of its own; judging silence is the watchdog's job.
pub async fn run<R>(
    mut reader: LineReader<R>,
    inbound: Inbound,
    liveness: LivenessSender,
) -> Result<(), CycleError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let line = reader.read_line().await?;
        inbound.deliver(line)?;
        liveness.notify(LivenessKind::MessageReceived);
    }
}
