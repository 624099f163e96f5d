//! imgrelay CLI - rewrite, classify and relay container images.

pub mod commands;
pub mod output;
