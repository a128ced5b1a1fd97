//! Image pipeline: temp store for downloaded images and best-effort
//! compression toward a size budget.

mod compress;
mod store;

pub use {compress::compress_to_budget, store::MediaStore};
