use tor_line::unstuff_data_line;

use crate::error::ControlError;
use crate::model::{EventRecord, ReplyGroup, ReplyLine};

/// Either output of feeding a line into a [`ReplyParser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUnit {
    Reply(ReplyGroup),
    Event(EventRecord),
}

#[derive(Debug)]
struct PendingData {
    status: u16,
    message: String,
    lines: Vec<Vec<u8>>,
}

/// Consumes a sequence of control-protocol lines (already split on CRLF/LF by
/// the transport) and assembles [`ReplyGroup`]s and [`EventRecord`]s.
///
/// One parser instance is owned per connection; it is stateful across calls
/// because a `+`-data block or a multi-line (`-`) group spans several lines.
#[derive(Debug, Default)]
pub struct ReplyParser {
    lines: Vec<ReplyLine>,
    pending_data: Option<PendingData>,
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its line terminator). Returns `Ok(None)` while
    /// a group or data block is still being assembled, `Ok(Some(unit))` when
    /// a full unit is ready, and `Err` on a malformed line — the caller must
    /// treat this as fatal to the connection (see [`ControlError::is_fatal_to_connection`]).
    pub fn feed_line(&mut self, raw: &[u8]) -> Result<Option<ParsedUnit>, ControlError> {
        if let Some(collecting) = &mut self.pending_data {
            if raw == b"." {
                let data = collecting.lines.join(&b'\n');
                let status = collecting.status;
                let message = std::mem::take(&mut collecting.message);
                self.pending_data = None;
                self.lines.push(ReplyLine {
                    status,
                    message,
                    data: Some(data),
                });
                return Ok(None);
            }
            collecting.lines.push(unstuff_data_line(raw).to_vec());
            return Ok(None);
        }

        let (status, sep, message) = split_status_line(raw)?;

        match sep {
            b'-' => {
                self.lines.push(ReplyLine {
                    status,
                    message,
                    data: None,
                });
                Ok(None)
            }
            b'+' => {
                self.pending_data = Some(PendingData {
                    status,
                    message,
                    lines: Vec::new(),
                });
                Ok(None)
            }
            b' ' => {
                self.lines.push(ReplyLine {
                    status,
                    message,
                    data: None,
                });
                let lines = std::mem::take(&mut self.lines);
                if status == 650 {
                    Ok(Some(ParsedUnit::Event(build_event(lines)?)))
                } else {
                    Ok(Some(ParsedUnit::Reply(ReplyGroup { lines })))
                }
            }
            other => Err(ControlError::protocol(format!(
                "unrecognized reply separator byte {other:#x}"
            ))),
        }
    }
}

fn split_status_line(raw: &[u8]) -> Result<(u16, u8, String), ControlError> {
    if raw.len() < 4 {
        return Err(ControlError::protocol(format!(
            "line too short to contain a status code: {:?}",
            String::from_utf8_lossy(raw)
        )));
    }
    if !raw[0..3].iter().all(u8::is_ascii_digit) {
        return Err(ControlError::protocol(format!(
            "non-numeric status code: {:?}",
            String::from_utf8_lossy(&raw[0..3])
        )));
    }
    let status: u16 = std::str::from_utf8(&raw[0..3])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ControlError::protocol("status code out of range"))?;
    let sep = raw[3];
    let message = String::from_utf8_lossy(&raw[4..]).into_owned();
    Ok((status, sep, message))
}

fn build_event(lines: Vec<ReplyLine>) -> Result<EventRecord, ControlError> {
    let first = lines
        .first()
        .ok_or_else(|| ControlError::protocol("empty event line group"))?;
    let (keyword, rest) = match first.message.split_once(' ') {
        Some((k, r)) => (k.to_string(), r.to_string()),
        None => (first.message.clone(), String::new()),
    };
    let mut message = rest;
    let mut data: Option<Vec<u8>> = first.data.clone();
    for line in lines.iter().skip(1) {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(&line.message);
        if let Some(extra) = &line.data {
            let buf = data.get_or_insert_with(Vec::new);
            if !buf.is_empty() {
                buf.push(b'\n');
            }
            buf.extend_from_slice(extra);
        }
    }
    Ok(EventRecord {
        keyword,
        message,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_ok_reply() {
        let mut parser = ReplyParser::new();
        let unit = parser.feed_line(b"250 OK").unwrap();
        match unit {
            Some(ParsedUnit::Reply(group)) => {
                assert_eq!(group.status(), 250);
                assert_eq!(group.final_message(), "OK");
                assert!(group.is_success());
            }
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn multiline_reply_accumulates_until_final() {
        let mut parser = ReplyParser::new();
        assert_eq!(parser.feed_line(b"250-VERSION=1").unwrap(), None);
        assert_eq!(parser.feed_line(b"250-FOO=bar").unwrap(), None);
        let unit = parser.feed_line(b"250 OK").unwrap().unwrap();
        match unit {
            ParsedUnit::Reply(group) => {
                assert_eq!(group.lines.len(), 3);
                assert_eq!(group.status(), 250);
            }
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn data_block_is_unstuffed() {
        let mut parser = ReplyParser::new();
        assert_eq!(parser.feed_line(b"250+DESC=").unwrap(), None);
        assert_eq!(parser.feed_line(b"line one").unwrap(), None);
        assert_eq!(parser.feed_line(b"..stuffed").unwrap(), None);
        let unit = parser.feed_line(b".").unwrap();
        assert_eq!(unit, None);
        let unit = parser.feed_line(b"250 OK").unwrap().unwrap();
        match unit {
            ParsedUnit::Reply(group) => {
                let data = group.lines[0].data.as_ref().unwrap();
                assert_eq!(data, b"line one\n.stuffed");
            }
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn event_record_extracts_keyword() {
        let mut parser = ReplyParser::new();
        let unit = parser
            .feed_line(b"650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=10")
            .unwrap()
            .unwrap();
        match unit {
            ParsedUnit::Event(event) => {
                assert_eq!(event.keyword, "STATUS_CLIENT");
                assert_eq!(event.message, "NOTICE BOOTSTRAP PROGRESS=10");
            }
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[test]
    fn malformed_status_is_protocol_error() {
        let mut parser = ReplyParser::new();
        assert!(parser.feed_line(b"xyz broken").is_err());
    }
}
