//! # Fleet Testkit - Test Infrastructure
//!
//! Mock handlers for the control plane's external collaborators and shared
//! fixtures, so tests never reach a real agent, client or database.
//!
//! ```toml
//! [dev-dependencies]
//! fleet-testkit = { path = "../fleet-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod mock_effects;

pub use mock_effects::{RecordingRemoteAgent, RecordingSession, StaticAuthorization};
