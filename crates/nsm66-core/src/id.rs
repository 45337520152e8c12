//! Client-ID generation.
//!
//! Client IDs have the form `n` followed by four uppercase ASCII
//! letters, e.g. `nWXYZ`. Uniqueness is enforced against the caller's
//! current record set by retrying on collision. With 26^4 possible IDs
//! the space can in theory be exhausted, which would loop forever; that
//! case is documented rather than defended against.

use rand::Rng;

/// Length of a client ID, including the leading `n`.
pub const ID_LEN: usize = 5;

/// Returns `true` if `s` matches the `n[A-Z]{4}` template.
#[must_use]
pub fn is_client_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == ID_LEN
        && bytes[0] == b'n'
        && bytes[1..].iter().all(u8::is_ascii_uppercase)
}

/// Generate a fresh client ID that `is_taken` rejects no collision for.
pub fn generate_client_id<F>(is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut rng = rand::thread_rng();
    loop {
        let mut id = String::with_capacity(ID_LEN);
        id.push('n');
        for _ in 0..4 {
            id.push(rng.gen_range(b'A'..=b'Z') as char);
        }
        if !is_taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_match_template() {
        for _ in 0..100 {
            let id = generate_client_id(|_| false);
            assert!(is_client_id(&id), "bad id: {id}");
        }
    }

    #[test]
    fn validation_rejects_malformed_ids() {
        assert!(is_client_id("nWXYZ"));
        assert!(!is_client_id("nwxyz"));
        assert!(!is_client_id("xWXYZ"));
        assert!(!is_client_id("nWXY"));
        assert!(!is_client_id("nWXYZA"));
        assert!(!is_client_id("n1234"));
        assert!(!is_client_id(""));
    }

    #[test]
    fn generation_retries_on_collision() {
        // Reject everything except one specific ID; generation must
        // eventually land on it.
        let id = generate_client_id(|candidate| candidate != "nAAAA");
        assert_eq!(id, "nAAAA");
    }
}
