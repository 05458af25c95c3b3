//! Deterministic vector-store point identifiers.
//!
//! The vector store constrains id syntax, so file ids are never used raw.
//! A point id is the MD5 digest of the file id laid out as a UUID:
//!
//! ```text
//! md5("A") = 7fc56270e7a70fa81a5935b72eacbe29
//! point    = 7fc56270-e7a7-0fa8-1a59-35b72eacbe29
//! ```
//!
//! The mapping is a pure function of the file id, so it is stable across
//! restarts and processes, and collision-free as long as file ids are unique.

use uuid::Uuid;

/// Point id for a file id.
///
/// # Example
///
/// ```
/// use viss_core::point_id::point_id;
///
/// let id = point_id("A");
/// assert_eq!(id.to_string(), "7fc56270-e7a7-0fa8-1a59-35b72eacbe29");
/// ```
pub fn point_id(file_id: &str) -> Uuid {
    let digest = md5::compute(file_id.as_bytes());
    Uuid::from_bytes(digest.0)
}

/// Point id in canonical `8-4-4-4-12` lowercase form.
pub fn point_id_string(file_id: &str) -> String {
    point_id(file_id).hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_matches_md5_hex() {
        let hex = format!("{:x}", md5::compute("file-123"));
        let id = point_id_string("file-123");
        assert_eq!(id.replace('-', ""), hex);
    }

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(point_id("abc"), point_id("abc"));
        assert_ne!(point_id("abc"), point_id("abd"));
    }

    #[test]
    fn test_point_id_canonical_format() {
        let id = point_id_string("some/file.png");
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_point_id_known_value() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(
            point_id_string(""),
            "d41d8cd9-8f00-b204-e980-0998ecf8427e"
        );
    }
}
