//! Approval workflow engine for multi-tenant CRM records.
//!
//! An approval "decision" gates a business entity (an opportunity, a
//! discount, a contract) behind an ordered chain of role-approved steps
//! resolved from per-tenant policy. The engine owns the full lifecycle:
//! submission, approve/reject/delegate/cancel transitions, SLA tracking with
//! scheduled escalation, append-only history and audit, notification fanout,
//! and assist-only reviewer summaries.

pub mod advisor;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod policy;
pub mod store;

pub use engine::{DecisionEngine, EngineConfig, SubmitOutcome, SubmitRequest};
pub use errors::{EngineError, TransitionError};
