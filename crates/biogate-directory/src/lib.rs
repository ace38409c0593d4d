//! Fingerprint directory: authoritative identity resolution.
//!
//! The directory owns the mapping from a panel's on-device template id to a
//! user, and orchestrates enrollment across the directory and the panel's
//! local store. Panels hold a cache of this state; when the two disagree,
//! the directory wins and [`FingerprintDirectory::audit_panel`] reports the
//! drift.
//!
//! Locking is per record: the outer maps are only locked for lookups and
//! structural changes, every record sits behind its own lock, and the hot
//! `resolve` path never blocks on an unrelated record's write.

mod directory;

pub use directory::{FingerprintDirectory, PanelAudit};
