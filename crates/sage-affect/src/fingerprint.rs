//! Text normalization and cache fingerprinting.

/// Normalize raw text for classification and caching: trim, lowercase,
/// collapse internal whitespace runs to single spaces.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_space = false;
        }
    }
    out
}

/// Cache key for a normalized text, salted with a coarse user fingerprint
/// so two users never share a cached result when a user id is supplied.
pub fn fingerprint(normalized: &str, user_id: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Some(user) = user_id {
        let salt = blake3::hash(user.as_bytes());
        hasher.update(&salt.as_bytes()[..8]);
    }
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_hex().to_string()
}
