use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

const MAX_SLUG_LEN: usize = 50;
const RESERVED_SLUGS: &[&str] = &["main", "public", "postgres", "information_schema"];

static NON_SLUG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z0-9]+").unwrap());

pub fn is_reserved(slug: &str) -> bool {
    RESERVED_SLUGS.contains(&slug)
}

/// Derive a candidate slug from a human name, lowercase,
/// collapse any run of non-`[a-z0-9]` into a single `-`, trim leading and
/// trailing `-`, truncate to 50 chars, and fall back to a random suffix if
/// the result is empty or reserved.
///
/// Does not resolve collisions against existing slugs — combine with
/// `dedupe_slug`.
pub fn derive_slug(name: &str) -> String {
    let lower = name.to_lowercase();
    let collapsed = NON_SLUG_CHARS.replace_all(&lower, "-");
    let mut slug = collapsed.trim_matches('-').to_string();
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_matches('-').to_string();

    if slug.is_empty() || is_reserved(&slug) {
        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..6];
        if slug.is_empty() {
            format!("branch-{suffix}")
        } else {
            format!("{slug}-{suffix}")
        }
    } else {
        slug
    }
}

/// Append `-<n>` (`n` starting at 2) until `candidate` no longer collides,
/// e.g. `feature-x` -> `feature-x-2`.
pub fn dedupe_slug(candidate: &str, exists: impl Fn(&str) -> bool) -> String {
    if !exists(candidate) {
        return candidate.to_string();
    }
    let mut n = 2;
    loop {
        let next = format!("{candidate}-{n}");
        if !exists(&next) {
            return next;
        }
        n += 1;
    }
}

/// Physical schema name for a slug: `<prefix><slug>` with every
/// non-alphanumeric character replaced by `_`.
pub fn schema_name(prefix: &str, slug: &str) -> String {
    let physical: String = slug
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}{physical}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_kebab_case_slug() {
        assert_eq!(derive_slug("Feature X"), "feature-x");
    }

    #[test]
    fn collapses_runs_of_non_alphanumeric() {
        assert_eq!(derive_slug("  Hello___World!! "), "hello-world");
    }

    #[test]
    fn truncates_to_fifty_chars() {
        let long_name = "a".repeat(80);
        assert_eq!(derive_slug(&long_name).len(), 50);
    }

    #[test]
    fn reserved_name_gets_random_suffix() {
        let slug = derive_slug("main");
        assert_ne!(slug, "main");
        assert!(slug.starts_with("main-"));
    }

    #[test]
    fn dedupe_appends_numeric_suffix_on_collision() {
        let taken = ["feature-x"];
        let slug = dedupe_slug("feature-x", |s| taken.contains(&s));
        assert_eq!(slug, "feature-x-2");
    }

    #[test]
    fn dedupe_skips_to_next_free_number() {
        let taken = ["feature-x", "feature-x-2"];
        let slug = dedupe_slug("feature-x", |s| taken.contains(&s));
        assert_eq!(slug, "feature-x-3");
    }

    #[test]
    fn schema_name_uses_underscore_separator() {
        assert_eq!(schema_name("branch_", "feature-x"), "branch_feature_x");
    }
}
