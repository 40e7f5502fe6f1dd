//! Chain stages owned by this crate.
//!
//! The sync hub and session layer stages live in their own crates; the
//! four stages here cover error recovery, response shaping, authentication,
//! and request validation.

pub mod auth;
pub mod recovery;
pub mod shaper;
pub mod validation;
