//! Tenant Identity Reconciliation & Quarantine Engine
//!
//! Guarantees that every tenant-scoped record in the store is attributable to
//! exactly one tenant. Records whose owner can be derived from related
//! entities are repaired in place; records whose owner cannot be determined
//! are parked under a reserved, inactive "quarantine" tenant where they stay
//! visible and actionable until an operator disposes of them.
//!
//! The engine is exposed over an administrative REST surface (see
//! [`api::create_admin_router`]) consisting of:
//!
//! - a read-only scan + integrity report to understand the blast radius,
//! - an apply-mode backfill pass gated behind an environment allow-flag and
//!   an explicit confirmation header,
//! - a quarantine browser with assign / archive / delete dispositions, each
//!   gated and audited individually.
//!
//! All destructive or bulk-mutating actions pass through the [`safety`]
//! guard chain, and every successful mutation appends exactly one event to
//! the append-only audit stream.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod recon;
pub mod safety;

pub use config::{DatabaseConfig, SafetyFlags};
pub use error::{EngineError, EngineResult};
