//! Opaque, type-prefixed entity IDs (spec §3, §9: "≥12-character random
//! strings, prefixed by entity type").

use rand::Rng;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_RANDOM_LEN: usize = 24;

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_RANDOM_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Mint a new ID of the form `<prefix>_<random>`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", random_suffix())
}

pub fn assistant_id() -> String {
    new_id("asst")
}

pub fn thread_id() -> String {
    new_id("thread")
}

pub fn message_id() -> String {
    new_id("msg")
}

pub fn run_id() -> String {
    new_id("run")
}

pub fn file_id() -> String {
    new_id("file")
}

/// Mint a tool-call ID, used by provider adapters when the upstream does not
/// supply one (spec §4.3: `call_<random-12>`).
pub fn call_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| {
            let idx = rng.gen_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect();
    format!("call_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_expected_prefix() {
        assert!(assistant_id().starts_with("asst_"));
        assert!(thread_id().starts_with("thread_"));
        assert!(message_id().starts_with("msg_"));
        assert!(run_id().starts_with("run_"));
        assert!(file_id().starts_with("file_"));
        assert!(call_id().starts_with("call_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id("x");
        let b = new_id("x");
        assert_ne!(a, b);
    }

    #[test]
    fn call_id_minimum_length() {
        let id = call_id();
        let suffix = id.strip_prefix("call_").unwrap();
        assert!(suffix.len() >= 12);
    }
}
