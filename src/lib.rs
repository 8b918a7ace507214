// === Public Modules (The Canonical Paths) ===
pub mod agent;
pub mod env;
pub mod error;
pub mod eval;
pub mod live;
pub mod numeric;
pub mod observation;
pub mod qp;
pub mod search;

// === Facades (Re-exporting internals) ===
pub use crate::error::{OlpsError, OlpsResult};
