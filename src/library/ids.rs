//! Translation from provider string ids to stable local numeric ids.

/// Maps a provider's opaque string id to a local `i64` id.
///
/// Ids that parse as base-10 integers keep their numeric value; anything
/// else maps to the first eight bytes of its MD5 digest, big-endian. The
/// mapping is pure and stable across runs, which is what lets repeated
/// syncs reuse artist/album identities even though rows are physically
/// recreated each run.
///
/// Known limitations, accepted rather than papered over: two distinct
/// provider ids can collide on the same hash value, and two different
/// providers could derive the same numeric id for unrelated entities.
/// Collisions are not detected here.
pub fn translate(provider_id: &str) -> i64 {
    if let Ok(numeric) = provider_id.parse::<i64>() {
        return numeric;
    }
    let digest = md5::compute(provider_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.0[..8]);
    i64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::translate;

    #[test]
    fn test_numeric_ids_keep_their_value() {
        assert_eq!(translate("42"), 42);
        assert_eq!(translate("0"), 0);
        assert_eq!(translate("-7"), -7);
        assert_eq!(translate("9223372036854775807"), i64::MAX);
    }

    #[test]
    fn test_non_numeric_ids_hash_deterministically() {
        let first = translate("studio-xyz");
        let second = translate("studio-xyz");
        assert_eq!(first, second);
        let digest = md5::compute("studio-xyz".as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.0[..8]);
        assert_eq!(first, i64::from_be_bytes(prefix));
    }

    #[test]
    fn test_distinct_ids_map_to_distinct_values() {
        // Not guaranteed in general, but these must differ for the catalogs
        // the engine actually sees.
        assert_ne!(translate("al-1"), translate("al-2"));
        assert_ne!(translate("al-1"), translate("ar-1"));
    }

    #[test]
    fn test_overflowing_numeric_string_falls_back_to_hash() {
        // One digit past i64::MAX no longer parses, so it takes the hash
        // path instead of saturating.
        let id = "92233720368547758070";
        assert_eq!(translate(id), translate(id));
        assert_ne!(translate(id), i64::MAX);
    }
}
