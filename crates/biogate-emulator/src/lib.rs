//! In-process panel emulator.
//!
//! Speaks the panel wire dialect over real TCP so the transport, directory
//! and engine can be exercised end to end without hardware. Tests script
//! the emulator through [`EmulatorHandle`]: queue enrollment captures, push
//! match notifications, fail the door, or drop every connection to test
//! reconnection.
//!
//! The emulator is deliberately permissive about sequencing; it answers
//! whatever command arrives. Protocol conformance is the codec's and the
//! session actor's business, tested separately.

mod panel;

pub use panel::{EmulatorHandle, PanelEmulator};
