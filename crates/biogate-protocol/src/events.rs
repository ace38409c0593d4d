//! Typed inbound notifications.

use crate::commands::{EventCode, FrameClass, classify};
use crate::frame::ZkFrame;
use biogate_core::{Error, Result, TemplateId};
use bytes::Buf;

/// Asynchronous notification pushed by a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Keep-alive; refreshes the device's last-seen timestamp.
    Heartbeat,
    /// A finger touched the sensor.
    FingerDown,
    /// The sensor matched an on-device template.
    Match {
        template_id: TemplateId,
        /// Match score 0-100 as reported by the sensor.
        score: u8,
    },
    /// A finger was presented but matched nothing on-device.
    NoMatch,
}

impl InboundEvent {
    /// Decode a notification frame.
    ///
    /// # Errors
    /// Returns `Error::Protocol` for frames outside the event code range or
    /// with malformed payloads.
    pub fn from_frame(frame: &ZkFrame) -> Result<Self> {
        let FrameClass::Event(code) = classify(frame.command) else {
            return Err(Error::protocol(format!(
                "Frame {} is not a notification",
                frame.command
            )));
        };

        match code {
            EventCode::Heartbeat => Ok(InboundEvent::Heartbeat),
            EventCode::FingerDown => Ok(InboundEvent::FingerDown),
            EventCode::NoMatch => Ok(InboundEvent::NoMatch),
            EventCode::Match => {
                let mut payload = frame.payload.as_slice();
                if payload.len() < 8 {
                    return Err(Error::protocol(format!(
                        "Match event payload too short: {} bytes",
                        payload.len()
                    )));
                }
                let template_id = TemplateId::new(payload.get_u32_le());
                let score_raw = payload.get_u32_le();
                let score = u8::try_from(score_raw.min(100)).unwrap_or(100);
                Ok(InboundEvent::Match { template_id, score })
            }
        }
    }

    /// Encode as a frame, used by the panel emulator and tests.
    #[must_use]
    pub fn to_frame(&self, session_id: u32) -> ZkFrame {
        use bytes::BufMut;
        let (code, payload) = match self {
            InboundEvent::Heartbeat => (EventCode::Heartbeat, Vec::new()),
            InboundEvent::FingerDown => (EventCode::FingerDown, Vec::new()),
            InboundEvent::NoMatch => (EventCode::NoMatch, Vec::new()),
            InboundEvent::Match { template_id, score } => {
                let mut buf = Vec::with_capacity(8);
                buf.put_u32_le(template_id.as_u32());
                buf.put_u32_le(u32::from(*score));
                (EventCode::Match, buf)
            }
        };
        // Notifications always carry reply id 0.
        ZkFrame::new(code.to_u16(), 0, session_id, payload)
    }
}
