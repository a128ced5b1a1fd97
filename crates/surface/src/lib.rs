//! The shared UI surface: driver seam, global lock, and reply stabilizer.
//!
//! Everything that touches the browser-automation sidecar lives here. The
//! surface is a single physical resource (one browser, one focused tab), so
//! all UI work is serialized through [`SurfaceLock`]; direct API backends
//! never touch this crate.

pub mod driver;
pub mod error;
pub mod lock;
pub mod stabilize;

pub use {
    driver::{SidecarDriver, SurfaceDriver},
    error::{Error, Result},
    lock::{SurfaceGuard, SurfaceLock},
    stabilize::{StabilizeOptions, await_reply, clean_reply_text},
};
