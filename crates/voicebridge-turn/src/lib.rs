//! The per-turn engine: producer (LLM -> sentences), consumer (sentences ->
//! audio), and the orchestrator that races them against an interruption
//! signal.

pub mod interrupt;
pub mod pipeline;

pub use interrupt::Interrupt;
pub use pipeline::{run_turn, AudioItem, TurnOutcome};
