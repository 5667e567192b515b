//! Deterministic execution layer for liquid-handling robots.
//!
//! Jobs arrive as a typed intermediate representation ([`ir::IrJob`]), are
//! checked against a [`capabilities::CapabilityRegistry`] and a virtual
//! [`deck::DeckState`], gated by a [`policy::RiskPolicy`], lowered to Tecan
//! Gemini worklist records and dry-run on a copy of the deck. The
//! [`orchestrator::JobManager`] owns the queue and the job lifecycle.

pub mod capabilities;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod deck;
pub mod error;
pub mod ir;
pub mod orchestrator;
pub mod policy;
pub mod precondition;
pub mod preflight;
pub mod simulator;
pub mod state_machine;
pub mod ui;
pub mod worklist;
