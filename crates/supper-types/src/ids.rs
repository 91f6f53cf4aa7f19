use rand::TryRngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of any entity or message identifier.
pub const MAX_ID_LENGTH: usize = 32;

#[derive(Debug, Error)]
#[error("entropy source unavailable: {0}")]
pub struct EntropyError(String);

/// Generates a new identifier.
///
/// Identifiers are UUIDv7 values rendered as 32 lowercase hex characters:
/// the leading 48 bits are the creation millisecond, so identifiers sort
/// lexicographically by creation time, and the random tail keeps replicas
/// from colliding without coordination.
pub fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Probes the operating system's entropy source. The server refuses to
/// start when this fails.
pub fn ensure_entropy() -> Result<(), EntropyError> {
    let mut probe = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut probe)
        .map_err(|e| EntropyError(e.to_string()))?;
    if probe.iter().all(|b| *b == 0) {
        return Err(EntropyError("source returned only zero bytes".into()));
    }
    Ok(())
}

/// Cheap syntactic check applied to identifiers arriving in paths and bodies.
pub fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_url_safe_and_bounded() {
        let id = new_id();
        assert_eq!(id.len(), MAX_ID_LENGTH);
        assert!(is_well_formed(&id));
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = new_id();
        std::thread::sleep(std::time::Duration::from_millis(3));
        let second = new_id();
        assert!(first < second);
    }

    #[test]
    fn ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn entropy_probe_succeeds() {
        ensure_entropy().unwrap();
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("has space"));
        assert!(!is_well_formed(&"a".repeat(33)));
        assert!(is_well_formed("abc_DEF-123"));
    }
}
