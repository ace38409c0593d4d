//! Command, reply and notification code spaces.
//!
//! The dialect splits the 16-bit code space in three: commands the
//! coordinator sends (mixed low values plus 1000/1001 for session control),
//! replies the panel sends back (2000 range), and unsolicited notifications
//! the panel pushes (500 range).

use biogate_core::{Error, Result};

/// Outbound command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandCode {
    /// Open a session; the reply header carries the session id.
    Connect = 1000,
    /// Close the session gracefully.
    Exit = 1001,
    /// List templates held in the panel's local store.
    GetTemplates = 8,
    /// Start an enrollment for (user, finger).
    EnrollBegin = 9,
    /// Trigger an identification pass on the sensor.
    Verify = 10,
    /// Request the next capture of an enrollment in progress.
    EnrollCapture = 11,
    /// Abort an enrollment and discard the partial capture.
    EnrollCancel = 12,
    /// Read the panel's attendance log.
    GetAttendance = 13,
    /// Remove a template from the panel store.
    DeleteTemplate = 19,
    /// Pulse a relay output for a number of seconds.
    OpenDoor = 66,
}

impl CommandCode {
    /// Decode a wire value.
    ///
    /// # Errors
    /// Returns `Error::Protocol` for codes outside the command space.
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            1000 => Ok(CommandCode::Connect),
            1001 => Ok(CommandCode::Exit),
            8 => Ok(CommandCode::GetTemplates),
            9 => Ok(CommandCode::EnrollBegin),
            10 => Ok(CommandCode::Verify),
            11 => Ok(CommandCode::EnrollCapture),
            12 => Ok(CommandCode::EnrollCancel),
            13 => Ok(CommandCode::GetAttendance),
            19 => Ok(CommandCode::DeleteTemplate),
            66 => Ok(CommandCode::OpenDoor),
            _ => Err(Error::protocol(format!("Unknown command code: {value}"))),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Reply codes a panel sends in response to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ReplyCode {
    Ok = 2000,
    Error = 2001,
    /// The request referenced an identity the panel does not hold.
    Unauth = 2002,
}

impl ReplyCode {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            2000 => Ok(ReplyCode::Ok),
            2001 => Ok(ReplyCode::Error),
            2002 => Ok(ReplyCode::Unauth),
            _ => Err(Error::protocol(format!("Unknown reply code: {value}"))),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Unsolicited notification codes pushed by a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventCode {
    Heartbeat = 500,
    /// The sensor matched a stored template; payload carries its id.
    Match = 501,
    /// A finger was presented but matched nothing on-device.
    NoMatch = 502,
    /// A finger touched the sensor; capture is underway.
    FingerDown = 503,
}

impl EventCode {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            500 => Ok(EventCode::Heartbeat),
            501 => Ok(EventCode::Match),
            502 => Ok(EventCode::NoMatch),
            503 => Ok(EventCode::FingerDown),
            _ => Err(Error::protocol(format!("Unknown event code: {value}"))),
        }
    }

    #[inline]
    #[must_use]
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Classification of a frame by its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Command(CommandCode),
    Reply(ReplyCode),
    Event(EventCode),
    /// A code this implementation does not know. Kept rather than rejected
    /// so a session can log and skip frames from newer firmware.
    Unknown(u16),
}

/// Classify a raw code into command, reply or event space.
#[must_use]
pub fn classify(code: u16) -> FrameClass {
    if let Ok(reply) = ReplyCode::from_u16(code) {
        return FrameClass::Reply(reply);
    }
    if let Ok(event) = EventCode::from_u16(code) {
        return FrameClass::Event(event);
    }
    if let Ok(command) = CommandCode::from_u16(code) {
        return FrameClass::Command(command);
    }
    FrameClass::Unknown(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1000, CommandCode::Connect)]
    #[case(9, CommandCode::EnrollBegin)]
    #[case(66, CommandCode::OpenDoor)]
    fn test_command_roundtrip(#[case] raw: u16, #[case] expected: CommandCode) {
        assert_eq!(CommandCode::from_u16(raw).unwrap(), expected);
        assert_eq!(expected.to_u16(), raw);
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(CommandCode::from_u16(9999).is_err());
    }

    #[rstest]
    #[case(2000, FrameClass::Reply(ReplyCode::Ok))]
    #[case(501, FrameClass::Event(EventCode::Match))]
    #[case(66, FrameClass::Command(CommandCode::OpenDoor))]
    #[case(777, FrameClass::Unknown(777))]
    fn test_classify(#[case] raw: u16, #[case] expected: FrameClass) {
        assert_eq!(classify(raw), expected);
    }
}
