//! The main loop: poll the chat surface, fan out reply tasks, supervise
//! them, and keep the temp stores tidy.

mod inflight;
mod supervisor;

pub use {
    inflight::{InFlight, InFlightGuard},
    supervisor::Supervisor,
};
