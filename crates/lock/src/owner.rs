//! Instance identity: `hostname-random8`.
//!
//! Every process replica must derive a distinct owner string so that two
//! replicas racing for the same key never appear to be the same owner.

use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a fresh owner identity for this process.
pub fn generate_owner() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}-{}", random_suffix(8))
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_are_distinct_across_calls() {
        let a = generate_owner();
        let b = generate_owner();
        assert_ne!(a, b);
    }

    #[test]
    fn owner_carries_the_hostname_prefix() {
        let owner = generate_owner();
        assert!(owner.contains('-'));
    }
}
