//! Gateway close codes.
//!
//! Each known code says whether the session survives the disconnect. A
//! resumable close keeps the session record so the next connection can send
//! RESUME; anything else forces a fresh IDENTIFY.

/// Reason reported for codes missing from [`CLOSE_CODES`].
pub const UNKNOWN_REASON: &str = "unknown close code";

/// Code reported when the socket is lost without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// One entry of the close-code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode {
    pub code: u16,
    pub resumable: bool,
    pub reason: &'static str,
}

const fn entry(code: u16, resumable: bool, reason: &'static str) -> CloseCode {
    CloseCode {
        code,
        resumable,
        reason,
    }
}

/// Known close codes.
pub const CLOSE_CODES: &[CloseCode] = &[
    entry(1000, false, "normal closure"),
    entry(1001, false, "going away"),
    entry(ABNORMAL_CLOSURE, true, "connection lost"),
    entry(4000, true, "unknown error"),
    entry(4001, true, "unknown opcode"),
    entry(4002, true, "decode error"),
    entry(4003, true, "not authenticated"),
    entry(4004, false, "authentication failed"),
    entry(4005, true, "already authenticated"),
    entry(4007, false, "invalid sequence"),
    entry(4008, true, "rate limited"),
    entry(4009, false, "session timed out"),
    entry(4010, false, "invalid shard"),
    entry(4011, false, "sharding required"),
    entry(4012, false, "invalid API version"),
    entry(4013, false, "invalid intents"),
    entry(4014, false, "disallowed intents"),
];

/// Outcome of classifying a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseClassification {
    pub code: Option<u16>,
    pub resumable: bool,
    pub reason: &'static str,
}

/// Look up a close code. `None` means the socket dropped without a close
/// frame and is treated as an abnormal closure.
pub fn classify(code: Option<u16>) -> CloseClassification {
    let lookup = code.unwrap_or(ABNORMAL_CLOSURE);
    match CLOSE_CODES.iter().find(|c| c.code == lookup) {
        Some(known) => CloseClassification {
            code,
            resumable: known.resumable,
            reason: known.reason,
        },
        None => CloseClassification {
            code,
            resumable: false,
            reason: UNKNOWN_REASON,
        },
    }
}
