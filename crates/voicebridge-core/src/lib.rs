//! Core types, config, errors, and call model for the voice gateway.

pub mod call;
pub mod config;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod registry;
