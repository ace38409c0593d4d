//! Wire protocol for biometric panels.
//!
//! Panels speak a binary command/response dialect over a persistent TCP
//! session on port 4370. Every frame carries a fixed little-endian header
//! followed by a command-specific payload:
//!
//! ```text
//! [command: u16][reply_id: u16][session_id: u32][length: u32][payload...]
//! ```
//!
//! `length` counts the payload plus eight header bytes, a quirk of the
//! vendor firmware that the codec hides from callers. Replies echo the
//! `reply_id` of the command they answer; asynchronous notifications
//! (match results, heartbeats) use reply id 0 and a dedicated code range.

pub mod codec;
pub mod commands;
pub mod events;
pub mod frame;
pub mod requests;
pub mod responses;

pub use codec::ZkCodec;
pub use commands::{CommandCode, EventCode, FrameClass, ReplyCode, classify};
pub use events::InboundEvent;
pub use frame::ZkFrame;
pub use requests::ZkRequest;
pub use responses::{
    AttendanceRecord, CaptureReply, VerifyOutcome, ensure_ok, parse_attendance, parse_verify,
    session_id,
};
