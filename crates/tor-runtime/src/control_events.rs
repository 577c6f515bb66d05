//! Pure parsing of the control-port events the state machine (C8) needs,
//! per §4.8's input list: `STATUS_CLIENT`'s `BOOTSTRAP` notices and
//! `NETWORK_LIVENESS`. tor emits these over the control port in addition to
//! (not instead of) the stdout notice lines [`crate::log_classify`] already
//! parses, so both routes feed the same [`crate::state::StateMachine`]
//! methods and rely on their own idempotence (a repeated or
//! already-applied bootstrap percentage or network state is a no-op there).

use tor_ctl::auth::parse_keyword_value;
use tor_ctl::{EventRecord, NetworkState};

/// Extracts `N` from a `STATUS_CLIENT ... BOOTSTRAP PROGRESS=N ...` event.
pub fn bootstrap_from_status_client(event: &EventRecord) -> Option<u8> {
    if event.keyword != "STATUS_CLIENT" || !event.message.contains("BOOTSTRAP") {
        return None;
    }
    let value = parse_keyword_value(&event.message, "PROGRESS")?;
    value.parse().ok()
}

/// Reads a `NETWORK_LIVENESS UP`/`NETWORK_LIVENESS DOWN` event.
pub fn network_state_from_liveness(event: &EventRecord) -> Option<NetworkState> {
    if event.keyword != "NETWORK_LIVENESS" {
        return None;
    }
    match event.message.trim() {
        "UP" => Some(NetworkState::Enabled),
        "DOWN" => Some(NetworkState::Disabled),
        _ => None,
    }
}
