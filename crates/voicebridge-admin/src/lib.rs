//! HTTP admin surface for the voice gateway: call inspection, a synchronous
//! text-message probe into the turn engine, and forced call teardown.

pub mod http;

pub use http::{serve, AdminState};
