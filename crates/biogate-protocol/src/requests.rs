//! Typed outbound commands and their payload encodings.

use crate::commands::CommandCode;
use crate::frame::ZkFrame;
use bytes::BufMut;

/// A command the coordinator can send to a panel.
///
/// Each variant knows its wire payload; the session supplies the reply id
/// and session id when the request is framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZkRequest {
    Connect,
    Exit,
    GetTemplates,
    EnrollBegin { user_id: u32, finger_index: u8 },
    EnrollCapture,
    EnrollCancel,
    Verify { user_id: u32 },
    GetAttendance { limit: u32 },
    DeleteTemplate { user_id: u32, finger_index: u8 },
    OpenDoor { relay_port: u8, duration_secs: u32 },
}

impl ZkRequest {
    #[must_use]
    pub fn command(&self) -> CommandCode {
        match self {
            ZkRequest::Connect => CommandCode::Connect,
            ZkRequest::Exit => CommandCode::Exit,
            ZkRequest::GetTemplates => CommandCode::GetTemplates,
            ZkRequest::EnrollBegin { .. } => CommandCode::EnrollBegin,
            ZkRequest::EnrollCapture => CommandCode::EnrollCapture,
            ZkRequest::EnrollCancel => CommandCode::EnrollCancel,
            ZkRequest::Verify { .. } => CommandCode::Verify,
            ZkRequest::GetAttendance { .. } => CommandCode::GetAttendance,
            ZkRequest::DeleteTemplate { .. } => CommandCode::DeleteTemplate,
            ZkRequest::OpenDoor { .. } => CommandCode::OpenDoor,
        }
    }

    /// Encode the command payload.
    ///
    /// Identifier pairs are sent as two little-endian `u32` words even for
    /// byte-sized values, matching the panel firmware's fixed field widths.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            ZkRequest::Connect
            | ZkRequest::Exit
            | ZkRequest::GetTemplates
            | ZkRequest::EnrollCapture
            | ZkRequest::EnrollCancel => {}
            ZkRequest::EnrollBegin {
                user_id,
                finger_index,
            }
            | ZkRequest::DeleteTemplate {
                user_id,
                finger_index,
            } => {
                buf.put_u32_le(*user_id);
                buf.put_u32_le(u32::from(*finger_index));
            }
            ZkRequest::Verify { user_id } => {
                buf.put_u32_le(*user_id);
            }
            ZkRequest::GetAttendance { limit } => {
                buf.put_u32_le(*limit);
            }
            ZkRequest::OpenDoor {
                relay_port,
                duration_secs,
            } => {
                buf.put_u32_le(u32::from(*relay_port));
                buf.put_u32_le(*duration_secs);
            }
        }
        buf
    }

    /// Frame this request for transmission.
    #[must_use]
    pub fn into_frame(self, reply_id: u16, session_id: u32) -> ZkFrame {
        ZkFrame::new(
            self.command().to_u16(),
            reply_id,
            session_id,
            self.payload(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_connect_has_empty_payload() {
        assert!(ZkRequest::Connect.payload().is_empty());
    }

    #[test]
    fn test_enroll_begin_payload() {
        let payload = ZkRequest::EnrollBegin {
            user_id: 42,
            finger_index: 3,
        }
        .payload();
        assert_eq!(payload.len(), 8);
        assert_eq!(&payload[0..4], &42u32.to_le_bytes());
        assert_eq!(&payload[4..8], &3u32.to_le_bytes());
    }

    #[test]
    fn test_open_door_payload() {
        let payload = ZkRequest::OpenDoor {
            relay_port: 1,
            duration_secs: 5,
        }
        .payload();
        assert_eq!(&payload[0..4], &1u32.to_le_bytes());
        assert_eq!(&payload[4..8], &5u32.to_le_bytes());
    }

    #[rstest]
    #[case(ZkRequest::Connect, 1000)]
    #[case(ZkRequest::Verify { user_id: 1 }, 10)]
    #[case(ZkRequest::DeleteTemplate { user_id: 1, finger_index: 0 }, 19)]
    fn test_into_frame_carries_command(#[case] request: ZkRequest, #[case] code: u16) {
        let frame = request.into_frame(5, 99);
        assert_eq!(frame.command, code);
        assert_eq!(frame.reply_id, 5);
        assert_eq!(frame.session_id, 99);
    }
}
