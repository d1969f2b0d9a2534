//! Document identifier generation.

use uuid::Uuid;

/// Returns a fresh random identifier: a v4 UUID in its 32-character simple
/// form.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates identifiers until `is_taken` accepts one.
pub fn generate_unique_id(mut is_taken: impl FnMut(&str) -> bool) -> String {
    loop {
        let id = new_id();
        if !is_taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_simple_uuids() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn retries_until_free() {
        let mut calls = 0;
        let id = generate_unique_id(|_| {
            calls += 1;
            calls < 3
        });
        assert_eq!(calls, 3);
        assert_eq!(id.len(), 32);
    }
}
