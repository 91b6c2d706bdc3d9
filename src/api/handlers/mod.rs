//! Route handlers. Each one resolves the shared
//! [`AuthOrchestrator`](crate::orchestrator::AuthOrchestrator) from an `Extension`.

pub mod auth;
pub mod health;
pub mod modules;
