//! Cross-module tests for the gateway
//!
//! Unit tests live next to each module; these exercise the pieces together
//! and the HTTP backends against mock servers.

pub mod local_mock_tests;
