//! Pure, version-sensitive parsing of tor's stdout/stderr log lines.
//!
//! tor does not version its log text, so these are substring/token matches
//! rather than a grammar; an unrecognized "listener"/"Bootstrapped" line is
//! reported as `None` rather than treated as an error (see the Open
//! Questions note this is grounded on).

use tor_ctl::ListenerKind;

/// The classification C9 assigns to one stdout/stderr line before it's
/// published as a [`tor_ctl::LogLine`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Classifies one line of tor's **stdout**. `[notice]` lines are downgraded
/// to `Debug` because the same information is duplicated via control-port
/// events.
pub fn classify_stdout_line(line: &str) -> LogSeverity {
    if line.contains(" [err] ") {
        LogSeverity::Error
    } else if line.contains(" [warn] ") {
        LogSeverity::Warn
    } else if line.contains(" [notice] ") {
        LogSeverity::Debug
    } else {
        LogSeverity::Info
    }
}

/// Every **stderr** line is an error, per §4.9.
pub fn classify_stderr_line(_line: &str) -> LogSeverity {
    LogSeverity::Error
}

/// Extracts `N` from a line containing `Bootstrapped N%`, the form tor uses
/// in its notice-level startup progress lines. Returns `None` for anything
/// else, including a malformed or out-of-range percentage, so callers can
/// skip unrecognized notices rather than fail hard.
pub fn parse_bootstrap_percent(line: &str) -> Option<u8> {
    const MARKER: &str = "Bootstrapped ";
    let idx = line.find(MARKER)?;
    let rest = &line[idx + MARKER.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if !rest[digits.len()..].starts_with('%') {
        return None;
    }
    let pct: u32 = digits.parse().ok()?;
    if pct > 100 {
        return None;
    }
    Some(pct as u8)
}

/// One "a listener opened/closed" notice, as parsed from tor's stdout.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ListenerNotice {
    Opened { kind: ListenerKind, address: String },
    Closing { kind: ListenerKind, address: String },
}

fn listener_kind_from_token(token: &str) -> Option<ListenerKind> {
    match token {
        "Socks" => Some(ListenerKind::Socks),
        "Control" => Some(ListenerKind::Control),
        "DNS" => Some(ListenerKind::Dns),
        "HTTPTunnel" | "HTTP" => Some(ListenerKind::HttpTunnel),
        "Transparent" | "Natd" => Some(ListenerKind::Transparent),
        _ => None,
    }
}

/// Parses tor's "Opened X listener ... on ADDR" / "Closing ... X listener on
/// ADDR" notice lines. The listener type token is the word immediately
/// preceding "listener" rather than the one following "Opened"/"Closing",
/// since tor interleaves qualifiers between the two
/// (e.g. "Closing no-longer-configured Socks listener on ...").
pub fn parse_listener_notice(line: &str) -> Option<ListenerNotice> {
    let listener_idx = line.find("listener")?;
    let before = &line[..listener_idx];
    let kind = listener_kind_from_token(before.split_whitespace().last()?)?;
    let after = &line[listener_idx..];
    let on_idx = after.find(" on ")?;
    let address = after[on_idx + " on ".len()..].trim();
    if address.is_empty() {
        return None;
    }
    let address = address.to_string();

    let opened_idx = line.find("Opened");
    let closing_idx = line.find("Closing");
    match (opened_idx, closing_idx) {
        (Some(o), Some(c)) if c < o => Some(ListenerNotice::Closing { kind, address }),
        (Some(_), _) => Some(ListenerNotice::Opened { kind, address }),
        (None, Some(_)) => Some(ListenerNotice::Closing { kind, address }),
        (None, None) => None,
    }
}
