//! DJB2 name hashing
//!
//! Group and file names are never stored in the cache, only their hash. The
//! hash is the classic `hash * 31 + c` recurrence over UTF-16 code units,
//! truncated to a signed 32-bit integer.

/// Hash a name the way the client does.
pub fn djb2(name: &str) -> i32 {
    name.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name() {
        assert_eq!(djb2(""), 0);
    }

    #[test]
    fn test_known_values() {
        assert_eq!(djb2("a"), 97);
        assert_eq!(djb2("ab"), 97 * 31 + 98);
        assert_eq!(djb2("hello"), 99_162_322);
    }

    #[test]
    fn test_wraps_to_negative() {
        // Long names overflow 32 bits; the result must wrap, not saturate
        let hash = djb2("this name is long enough to overflow the accumulator");
        let expected = "this name is long enough to overflow the accumulator"
            .bytes()
            .fold(0i64, |h, b| (h * 31 + i64::from(b)) & 0xFFFF_FFFF);
        assert_eq!(hash, expected as u32 as i32);
    }

    #[test]
    fn test_case_sensitive() {
        assert_ne!(djb2("Logo"), djb2("logo"));
    }
}
