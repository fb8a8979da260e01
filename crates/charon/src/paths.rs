//! Canonicalisation of virtual paths and their mapping onto zip entry names.
//!
//! A virtual path is a UTF-8 string beginning with `/`. The same namespace
//! addresses both archive resources and metadata: anything under
//! [`METADATA_PREFIX`] is metadata, anything under [`RELS_PREFIX`] belongs to
//! the relationships subtree and is managed by the container itself.

use regex::Regex;

use crate::error::{Error, Result};

/// Entries under this prefix address metadata, not file bytes.
pub const METADATA_PREFIX: &str = "/metadata";

/// The relationships subtree. Never writable through the public stream API.
pub const RELS_PREFIX: &str = "/_rels";

/// An ordered list of alias rewrite rules.
///
/// Declaration order is semantically significant: each rule is applied in
/// turn, and an earlier rewrite can keep a later, shorter pattern from
/// matching (`/preview/default` must fire before `/preview`).
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    rules: Vec<(Regex, String)>,
}

impl AliasTable {
    /// Compiles a table from `(pattern, replacement)` pairs. A pattern that
    /// begins with `/` is anchored at the start of the path.
    ///
    /// Panics on an invalid pattern; tables are built from compile-time
    /// profile constants.
    pub fn new(rules: &[(&str, &str)]) -> Self {
        let rules = rules
            .iter()
            .map(|(pattern, replacement)| {
                let anchored = if pattern.starts_with('/') {
                    format!("^{}", pattern)
                } else {
                    (*pattern).to_string()
                };
                let regex = Regex::new(&anchored)
                    .unwrap_or_else(|err| panic!("invalid alias pattern {:?}: {}", pattern, err));
                (regex, (*replacement).to_string())
            })
            .collect();
        AliasTable { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrites `path` through every rule in declaration order. Each rule
    /// replaces its first match.
    fn apply(&self, path: String) -> String {
        let mut path = path;
        for (regex, replacement) in &self.rules {
            if let std::borrow::Cow::Owned(rewritten) = regex.replace(&path, replacement.as_str()) {
                path = rewritten;
            }
        }
        path
    }
}

/// Dereferences aliases and ensures the leading slash, so that virtual paths
/// may be referenced with or without it.
pub fn canonicalize(path: &str, aliases: &AliasTable) -> String {
    aliases.apply(ensure_leading_slash(path))
}

pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Converts a resource name inside the zip to a virtual path.
pub fn zip_name_to_virtual(zip_name: &str) -> String {
    ensure_leading_slash(zip_name)
}

/// Converts a virtual path to the relative entry name zip APIs expect.
/// Together with [`zip_name_to_virtual`] this is a lossless bijection.
pub fn virtual_to_zip_name(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Validates a canonical metadata key: keys never end in `/` and empty
/// segments are disallowed.
pub fn validate_metadata_key(key: &str) -> Result<()> {
    if key.ends_with('/') {
        return Err(Error::InvalidMetadata(format!(
            "metadata key {:?} ends in a slash",
            key
        )));
    }
    if key.contains("//") || key.is_empty() {
        return Err(Error::InvalidMetadata(format!(
            "metadata key {:?} contains an empty segment",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn ufp_aliases() -> AliasTable {
        AliasTable::new(&[
            ("/preview/default", "/Metadata/thumbnail.png"),
            ("/preview", "/Metadata/thumbnail.png"),
            ("/toolpath/default", "/3D/model.gcode"),
            ("/toolpath", "/3D/model.gcode"),
        ])
    }

    #[test]
    fn canonicalize_prepends_slash() {
        let aliases = AliasTable::default();
        assert_eq!("/a/b", canonicalize("a/b", &aliases));
        assert_eq!("/a/b", canonicalize("/a/b", &aliases));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let aliases = ufp_aliases();
        for path in ["/toolpath", "toolpath/default", "/preview/32x32", "/other"] {
            let once = canonicalize(path, &aliases);
            assert_eq!(once, canonicalize(&once, &aliases));
        }
    }

    #[test]
    fn alias_order_is_significant() {
        let aliases = ufp_aliases();
        assert_eq!("/3D/model.gcode", canonicalize("/toolpath/default", &aliases));
        assert_eq!("/3D/model.gcode", canonicalize("/toolpath", &aliases));
        assert_eq!(
            "/Metadata/thumbnail.png/300x300",
            canonicalize("/preview/300x300", &aliases)
        );
    }

    #[test]
    fn anchored_patterns_only_match_the_start() {
        let aliases = AliasTable::new(&[("/materials", "/files/resources/materials")]);
        assert_eq!("/other/materials", canonicalize("/other/materials", &aliases));
    }

    #[test]
    fn zip_name_bijection_is_lossless() {
        for name in ["a/b.txt", "Metadata/thumbnail.png", "[Content_Types].xml"] {
            let virtual_path = zip_name_to_virtual(name);
            assert_eq!(name, virtual_to_zip_name(&virtual_path));
        }
    }

    #[test]
    fn metadata_key_validation() {
        assert!(validate_metadata_key("/print/time").is_ok());
        assert!(validate_metadata_key("/print/").is_err());
        assert!(validate_metadata_key("/print//time").is_err());
        assert!(validate_metadata_key("").is_err());
    }
}
