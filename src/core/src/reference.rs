//! Distribution package names.
//!
//! Parses image references like `registry.internal:5000/model-abc/app:v1` into
//! structured components. Unlike a pull client, no default registry or tag is
//! filled in: the textual form `[domain/]path(:tag|@digest)` and the structured
//! form convert into each other without loss.

use std::fmt;
use std::str::FromStr;

use crate::error::{MirrorError, Result};

/// Tag or content digest part of a package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageReference {
    /// Tag (e.g., "latest", "v0.1.0")
    Tag(String),
    /// Digest (e.g., "sha256:abc123...")
    Digest(String),
}

impl PackageReference {
    /// The value as used in a registry URL (`/manifests/<reference>`).
    pub fn as_str(&self) -> &str {
        match self {
            PackageReference::Tag(tag) => tag,
            PackageReference::Digest(digest) => digest,
        }
    }
}

/// Parsed distribution package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DistributionPackageName {
    /// Registry hostname with optional port (e.g., "ghcr.io", "localhost:5000")
    pub domain: Option<String>,
    /// Repository path (e.g., "model-abc/app")
    pub path: String,
    pub reference: PackageReference,
}

impl DistributionPackageName {
    /// Build from parts, rejecting combinations whose textual form would not
    /// parse back to the same parts.
    pub fn new(
        domain: Option<String>,
        path: impl Into<String>,
        reference: PackageReference,
    ) -> Result<Self> {
        let name = Self {
            domain,
            path: path.into(),
            reference,
        };
        name.validate()?;
        Ok(name)
    }

    /// Parse the textual form.
    ///
    /// Supports formats:
    /// - `app:v1`
    /// - `model-abc/app:v1`
    /// - `registry.internal/model-abc/app:v1`
    /// - `localhost:5000/model-abc/app@sha256:abc...`
    pub fn split(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(invalid(name, "empty package name"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid(name, "package name contains whitespace"));
        }

        // Digest first (@ separator)
        let (name_part, reference) = if let Some(at_pos) = name.rfind('@') {
            let digest = &name[at_pos + 1..];
            (&name[..at_pos], PackageReference::Digest(digest.to_string()))
        } else {
            // Tag is the last colon after the last slash
            let search_from = name.rfind('/').map(|p| p + 1).unwrap_or(0);
            match name[search_from..].rfind(':') {
                Some(colon_pos) => {
                    let colon_pos = search_from + colon_pos;
                    (
                        &name[..colon_pos],
                        PackageReference::Tag(name[colon_pos + 1..].to_string()),
                    )
                }
                None => return Err(invalid(name, "expected a :tag or @digest suffix")),
            }
        };

        let (domain, path) = match name_part.find('/') {
            Some(slash_pos) if looks_like_domain(&name_part[..slash_pos]) => (
                Some(name_part[..slash_pos].to_string()),
                name_part[slash_pos + 1..].to_string(),
            ),
            _ => (None, name_part.to_string()),
        };

        let parsed = Self {
            domain,
            path,
            reference,
        };
        parsed.validate().map_err(|_| invalid(name, "malformed component"))?;
        Ok(parsed)
    }

    /// Render the textual form. Inverse of [`DistributionPackageName::split`].
    pub fn join(&self) -> String {
        let mut s = String::new();
        if let Some(ref domain) = self.domain {
            s.push_str(domain);
            s.push('/');
        }
        s.push_str(&self.path);
        match &self.reference {
            PackageReference::Tag(tag) => {
                s.push(':');
                s.push_str(tag);
            }
            PackageReference::Digest(digest) => {
                s.push('@');
                s.push_str(digest);
            }
        }
        s
    }

    /// Copy of this name with the first path segment replaced, used to retarget
    /// an image from the source model's repository to the mirrored model's.
    pub fn rebase(&self, domain: Option<String>, first_segment: &str) -> Result<Self> {
        let rest = self.path.split_once('/').map(|(_, rest)| rest);
        let path = match rest {
            Some(rest) => format!("{first_segment}/{rest}"),
            None => first_segment.to_string(),
        };
        Self::new(domain, path, self.reference.clone())
    }

    fn validate(&self) -> Result<()> {
        if let Some(ref domain) = self.domain {
            if !looks_like_domain(domain) || domain.contains('/') || domain.contains('@') {
                return Err(invalid(domain, "invalid domain"));
            }
        }

        if self.path.is_empty() {
            return Err(invalid(&self.path, "empty repository path"));
        }
        let mut segments = self.path.split('/');
        if self.domain.is_none() {
            if let Some(first) = self.path.split('/').next() {
                // Would be read back as a domain
                if self.path.contains('/') && looks_like_domain(first) {
                    return Err(invalid(&self.path, "path starts with a domain-like segment"));
                }
            }
        }
        if !segments.all(valid_path_segment) {
            return Err(invalid(&self.path, "invalid repository path"));
        }

        match &self.reference {
            PackageReference::Tag(tag) => {
                if !valid_tag(tag) {
                    return Err(invalid(tag, "invalid tag"));
                }
            }
            PackageReference::Digest(digest) => {
                if !valid_digest(digest) {
                    return Err(invalid(digest, "invalid digest, expected algorithm:hex"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(value: &str, reason: &str) -> MirrorError {
    MirrorError::bad_request(format!(
        "Invalid distribution package name '{value}': {reason}"
    ))
}

/// A first component is a registry domain if it contains a dot or a port
/// colon, or is "localhost".
fn looks_like_domain(component: &str) -> bool {
    !component.is_empty()
        && (component.contains('.') || component.contains(':') || component == "localhost")
}

fn valid_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        && segment
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
}

fn valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !tag.starts_with(|c: char| c == '.' || c == '-')
}

fn valid_digest(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((algorithm, hex)) => {
            !algorithm.is_empty()
                && algorithm
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

impl fmt::Display for DistributionPackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

impl FromStr for DistributionPackageName {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::split(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    fn tag(t: &str) -> PackageReference {
        PackageReference::Tag(t.to_string())
    }

    fn digest(d: &str) -> PackageReference {
        PackageReference::Digest(d.to_string())
    }

    fn table() -> Vec<(String, Option<&'static str>, &'static str, PackageReference)> {
        vec![
            ("app:latest".to_string(), None, "app", tag("latest")),
            ("app:1".to_string(), None, "app", tag("1")),
            ("model-abc/app:v1.0".to_string(), None, "model-abc/app", tag("v1.0")),
            ("model-abc/sub/app:v1".to_string(), None, "model-abc/sub/app", tag("v1")),
            ("ghcr.io/org/app:v0.1.0".to_string(), Some("ghcr.io"), "org/app", tag("v0.1.0")),
            ("localhost/app:test".to_string(), Some("localhost"), "app", tag("test")),
            (
                "localhost:5000/model-abc/app:1.2.3".to_string(),
                Some("localhost:5000"),
                "model-abc/app",
                tag("1.2.3"),
            ),
            (
                "registry.internal:8443/a/b/c:rc_1".to_string(),
                Some("registry.internal:8443"),
                "a/b/c",
                tag("rc_1"),
            ),
            (format!("app@{DIGEST}"), None, "app", digest(DIGEST)),
            (format!("model-abc/app@{DIGEST}"), None, "model-abc/app", digest(DIGEST)),
            (
                format!("ghcr.io/org/app@{DIGEST}"),
                Some("ghcr.io"),
                "org/app",
                digest(DIGEST),
            ),
            (
                format!("localhost:5000/org/app@{DIGEST}"),
                Some("localhost:5000"),
                "org/app",
                digest(DIGEST),
            ),
        ]
    }

    #[test]
    fn test_split_table() {
        for (text, domain, path, reference) in table() {
            let parsed = DistributionPackageName::split(&text).unwrap();
            assert_eq!(parsed.domain.as_deref(), domain, "domain of {text}");
            assert_eq!(parsed.path, path, "path of {text}");
            assert_eq!(parsed.reference, reference, "reference of {text}");
        }
    }

    #[test]
    fn test_join_split_inverse() {
        for (text, domain, path, reference) in table() {
            // join(split(x)) == x
            assert_eq!(DistributionPackageName::split(&text).unwrap().join(), text);

            // split(join(y)) == y
            let structured =
                DistributionPackageName::new(domain.map(String::from), path, reference).unwrap();
            assert_eq!(
                DistributionPackageName::split(&structured.join()).unwrap(),
                structured
            );
        }
    }

    #[test]
    fn test_split_rejects_missing_reference() {
        assert!(DistributionPackageName::split("model-abc/app").is_err());
        assert!(DistributionPackageName::split("localhost:5000/app").is_err());
    }

    #[test]
    fn test_split_rejects_malformed() {
        for bad in [
            "",
            " app:v1",
            "app:",
            "app@sha256",
            "app@sha256:",
            "app@sha256:xyz",
            ":v1",
            "Model/App:v1",
            "a//b:v1",
            "app:-bad",
            "ghcr.io/:v1",
        ] {
            assert!(DistributionPackageName::split(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_new_rejects_ambiguous_path() {
        // Without a domain, a domain-like first segment would not round-trip
        let result = DistributionPackageName::new(None, "ghcr.io/org/app", tag("v1"));
        assert!(result.is_err());

        let result = DistributionPackageName::new(Some("not a domain".into()), "app", tag("v1"));
        assert!(result.is_err());
    }

    #[test]
    fn test_rebase() {
        let name = DistributionPackageName::split("source.example/source-model/app:v1").unwrap();
        let rebased = name
            .rebase(Some("dest.example:5000".to_string()), "mirrored-model")
            .unwrap();
        assert_eq!(rebased.join(), "dest.example:5000/mirrored-model/app:v1");
    }

    #[test]
    fn test_display_and_from_str() {
        let name: DistributionPackageName = "localhost:5000/m/app:v2".parse().unwrap();
        assert_eq!(format!("{name}"), "localhost:5000/m/app:v2");
        assert_eq!(name.reference.as_str(), "v2");
    }
}
