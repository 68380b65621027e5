//! Completion idempotency keys
//!
//! The key is derived only from (progress id, lesson id), so every retry of
//! the same completion produces the same key regardless of timestamps or
//! dashed names. Transactional write backends cap keys at 36 characters.

use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Maximum key length accepted by the storage layer
pub const MAX_KEY_LEN: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for recording `lesson_id` as completed on `progress_id`
    pub fn for_completion(progress_id: Uuid, lesson_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(progress_id.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(lesson_id.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..MAX_KEY_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(
            IdempotencyKey::for_completion(id, "step-27"),
            IdempotencyKey::for_completion(id, "step-27")
        );
    }

    #[test]
    fn test_key_length_bound() {
        let key = IdempotencyKey::for_completion(Uuid::new_v4(), &"x".repeat(500));
        assert_eq!(key.as_str().len(), MAX_KEY_LEN);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_scoped_to_progress_and_lesson() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = IdempotencyKey::for_completion(a, "step-27");

        assert_ne!(base, IdempotencyKey::for_completion(b, "step-27"));
        assert_ne!(base, IdempotencyKey::for_completion(a, "step-28"));
    }

    #[test]
    fn test_key_matches_sha256_of_joined_input() {
        let id = Uuid::nil();
        let expected = format!(
            "{:x}",
            Sha256::digest(format!("{}:{}", id, "step-27").as_bytes())
        );
        assert_eq!(
            IdempotencyKey::for_completion(id, "step-27").as_str(),
            &expected[..MAX_KEY_LEN]
        );
    }
}
