//! # Engine Testing Utils
//!
//! Shared testing utilities for the analysis engine workspace.
//!
//! ## Features
//!
//! - **Mock Executors**: scripted, blocking, cancel-ignoring, panicking and
//!   thread-stalling task executors that record every call
//! - **Test Data Builders**: task specs, task records and worker handles
//! - **Integration Test Helpers**: fast-timing configs and status polling
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! engine-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the helpers in your tests:
//!
//! ```rust
//! use engine_testing_utils::{ScriptedExecutor, TaskSpecBuilder, TestEnv};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
