//! Line framing for the chat wire protocol.
//!
//! Application messages end with a blank line (`text\n\n`), handshake and
//! control lines with a single `\n`. The lone `\n` doubles as the keep-alive
//! probe.

/// Frame sent by the keep-alive probe.
pub const PROBE: &str = "\n";

/// Strip line terminators from inside `text` and trim the ends. A payload
/// may not carry a raw terminator: the server would read it as the end of
/// the message.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Frame an outgoing chat message. Returns `None` when nothing is left after
/// sanitizing; empty input is never sent.
pub fn encode_message(text: &str) -> Option<String> {
    let text = sanitize(text);
    if text.is_empty() {
        None
    } else {
        Some(format!("{text}\n\n"))
    }
}

/// Frame a handshake/control line. An empty line is the probe frame.
pub fn encode_line(text: &str) -> String {
    format!("{}\n", text.trim_end_matches(['\r', '\n']))
}

/// Turn a raw line off the wire into text. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}
