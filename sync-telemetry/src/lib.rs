//! Tracing initialization shared by the binaries and tests of the workspace.

pub mod tracing;
