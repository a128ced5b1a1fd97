use sha2::{Digest, Sha256};

/// Fingerprint of message content: SHA-256 over the trimmed, lowercased
/// text, as lowercase hex.
///
/// Normalization makes retries that differ only in surrounding whitespace
/// or letter case hash identically. Image messages pass their source
/// reference (data URL or saved path) through the same function.
pub fn fingerprint(content: &str) -> String {
    let normalized = content.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
