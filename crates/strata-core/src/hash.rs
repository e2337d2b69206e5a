//! Content addressing.
//!
//! Every entity kind hashes its defining fields with SHA-256. The parent id is
//! part of member and method hashes, so the same name and summary under two
//! different parents yield two different hashes. Each field is prefixed with
//! its byte length, so no choice of field contents can shift a boundary.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
///
/// # Examples
///
/// ```
/// use strata_core::hash::sha256_hex;
///
/// let h = sha256_hex("abc");
/// assert_eq!(h.len(), 64);
/// assert_eq!(h, sha256_hex("abc"));
/// ```
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over length-prefixed `fields`.
fn digest_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Hash of a file: its relative path and full content.
///
/// # Examples
///
/// ```
/// use strata_core::hash::file_hash;
///
/// assert_eq!(file_hash("a.py", "x = 1"), file_hash("a.py", "x = 1"));
/// assert_ne!(file_hash("a.py", "x = 1"), file_hash("b.py", "x = 1"));
/// ```
pub fn file_hash(path: &str, content: &str) -> String {
    digest_fields(&[path, content])
}

/// Hash of a structural member, scoped to its file.
pub fn member_hash(file_id: &str, name: &str, summary: &str) -> String {
    digest_fields(&[file_id, name, summary])
}

/// Hash of a method, scoped to its member.
pub fn method_hash(member_id: &str, name: &str, summary: &str) -> String {
    digest_fields(&[member_id, name, summary])
}

/// Cache key for embedding text. Surrounding whitespace does not change the key.
///
/// # Examples
///
/// ```
/// use strata_core::hash::text_hash;
///
/// assert_eq!(text_hash("  find users \n"), text_hash("find users"));
/// ```
pub fn text_hash(text: &str) -> String {
    sha256_hex(text.trim())
}
