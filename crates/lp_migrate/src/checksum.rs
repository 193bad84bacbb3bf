use sha2::{Digest, Sha256};

/// Canonicalize SQL text before hashing: normalize line endings and strip
/// trailing whitespace per line, so a migration file re-saved with
/// different line endings or trailing blanks doesn't spuriously drift.
pub fn canonicalize(sql: &str) -> String {
    sql.replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Hex-encoded SHA-256 digest of the canonicalized SQL.
pub fn checksum(sql: &str) -> String {
    let canonical = canonicalize(sql);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sql_hashes_identically() {
        assert_eq!(checksum("SELECT 1;"), checksum("SELECT 1;"));
    }

    #[test]
    fn trailing_whitespace_and_line_endings_are_ignored() {
        let a = "CREATE TABLE t (x int);\n";
        let b = "CREATE TABLE t (x int);  \r\n";
        assert_eq!(checksum(a), checksum(b));
    }

    #[test]
    fn different_sql_hashes_differently() {
        assert_ne!(checksum("SELECT 1;"), checksum("SELECT 2;"));
    }
}
