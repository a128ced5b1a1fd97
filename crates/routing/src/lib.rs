//! Per-group message routing.
//!
//! Each configured group resolves to either a direct backend API call or a
//! drive-the-UI session on a shared AI surface. The router owns that
//! dispatch: API routes run lock-free and in parallel, surface routes
//! serialize through the global surface lock.

mod error;
mod router;

pub use {
    error::{Error, Result},
    router::Router,
};
