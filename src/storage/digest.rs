use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Folder-safe token identifying a normalized address.
///
/// SHA-256 over the address bytes, URL-safe base64 without padding. Stored
/// mail is located through this token, so the algorithm must not change.
pub fn digest_address(normalized: &str) -> String {
    let hash = Sha256::digest(normalized.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
