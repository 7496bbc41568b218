//! CK-011: BLAKE3 hashing for manifests, prompts, and generated files.

use crate::core::types::GeneratedFile;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Hash a chunk's file payload: path and content hash per file, in order.
pub fn payload_hash(files: &[GeneratedFile]) -> String {
    let parts: Vec<String> = files
        .iter()
        .flat_map(|f| [f.path.clone(), hash_string(&f.content)])
        .collect();
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    composite_hash(&refs)
}
