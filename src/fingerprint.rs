use sha2::{Digest, Sha256};

/// SHA-256 of `text`, lowercase hex, 64 characters.
pub fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive a v5-shaped UUID from a content hash: first 32 hex chars, version
/// nibble forced to `5`, variant nibble forced to `8`.
pub fn hash_to_uuid(hex_hash: &str) -> String {
    derive_uuid(hex_hash, '5')
}

/// Same transform as `hash_to_uuid` but forces version `4`. Used only for
/// metadata point identities in backends that require UUID primary keys.
pub fn namespace_uuid(name: &str) -> String {
    derive_uuid(&hash(name), '4')
}

fn derive_uuid(hex_hash: &str, version: char) -> String {
    let mut chars: Vec<char> = hex_hash.chars().take(32).collect();
    while chars.len() < 32 {
        chars.push('0');
    }
    chars[12] = version;
    chars[16] = '8';

    let s: String = chars.into_iter().collect();
    format!(
        "{}-{}-{}-{}-{}",
        &s[0..8],
        &s[8..12],
        &s[12..16],
        &s[16..20],
        &s[20..32]
    )
}
