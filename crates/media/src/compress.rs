//! Best-effort image compression toward a size budget.
//!
//! Ladder: re-encode as JPEG stepping quality down from 85 to a floor of
//! 30, then shrink dimensions by 10% per round until the budget is met or
//! the image gets implausibly small. Never produces a file larger than the
//! input, and never fails: any decode or encode problem falls back to the
//! original path.

use std::path::{Path, PathBuf};

use {
    image::{DynamicImage, codecs::jpeg::JpegEncoder, imageops::FilterType},
    tracing::{debug, warn},
};

const QUALITY_START: u8 = 85;
const QUALITY_FLOOR: u8 = 30;
const QUALITY_STEP: u8 = 5;
const SCALE_NUMERATOR: u32 = 9;
const MIN_DIMENSION: u32 = 64;

/// Compress the image at `src` to at most `max_bytes`, writing the result
/// next to the original with a `.jpg` extension.
///
/// Returns the path to the smallest rendition achieved; if `src` already
/// fits the budget, or compression cannot help, `src` itself is returned.
/// This function does CPU-bound work; call it from a blocking context.
#[must_use]
pub fn compress_to_budget(src: &Path, max_bytes: u64) -> PathBuf {
    let original_size = match std::fs::metadata(src) {
        Ok(m) => m.len(),
        Err(e) => {
            warn!(path = %src.display(), error = %e, "cannot stat image, leaving as-is");
            return src.to_path_buf();
        },
    };
    if original_size <= max_bytes {
        return src.to_path_buf();
    }

    let mut img = match image::open(src) {
        Ok(img) => img,
        Err(e) => {
            warn!(path = %src.display(), error = %e, "cannot decode image, leaving as-is");
            return src.to_path_buf();
        },
    };

    let mut best: Option<Vec<u8>> = None;
    let mut quality = QUALITY_START;

    loop {
        if let Some(encoded) = encode_jpeg(&img, quality) {
            let len = encoded.len() as u64;
            // Track the smallest rendition even if it misses the budget.
            let improved = len < original_size
                && best.as_ref().is_none_or(|b| encoded.len() < b.len());
            if improved {
                let fits = len <= max_bytes;
                best = Some(encoded);
                if fits {
                    break;
                }
            }
        }

        if quality > QUALITY_FLOOR {
            quality = quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
            continue;
        }

        // Quality exhausted: shrink dimensions 10% and restart the ladder.
        let (w, h) = (img.width(), img.height());
        let (nw, nh) = (w * SCALE_NUMERATOR / 10, h * SCALE_NUMERATOR / 10);
        if nw < MIN_DIMENSION || nh < MIN_DIMENSION {
            break;
        }
        img = img.resize_exact(nw, nh, FilterType::Lanczos3);
        quality = QUALITY_START;
    }

    let Some(bytes) = best else {
        debug!(path = %src.display(), "compression did not help, keeping original");
        return src.to_path_buf();
    };

    let dest = src.with_extension("jpg");
    match std::fs::write(&dest, &bytes) {
        Ok(()) => {
            debug!(
                path = %dest.display(),
                from = original_size,
                to = bytes.len(),
                "compressed image"
            );
            dest
        },
        Err(e) => {
            warn!(path = %dest.display(), error = %e, "cannot write compressed image");
            src.to_path_buf()
        },
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    // JPEG has no alpha channel.
    img.to_rgb8().write_with_encoder(encoder).ok()?;
    Some(buf)
}
