//! URL helpers for deciding whether a URL names a website or a page.

use url::{ParseError, Url};

use crate::types::SubjectKind;

/// Returns `scheme://host` for `raw`, with a leading `www.` removed.
///
/// Ports, paths, queries and fragments are dropped.
///
/// # Errors
///
/// Returns a [`ParseError`] if `raw` is not an absolute URL with a host.
pub fn site_root(raw: &str) -> Result<String, ParseError> {
    let parsed = Url::parse(raw)?;
    let host = parsed.host_str().ok_or(ParseError::EmptyHost)?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    Ok(format!("{}://{}", parsed.scheme(), host))
}

/// Strips a single trailing `/`.
#[must_use]
pub fn trim_trailing_slash(raw: &str) -> &str {
    raw.strip_suffix('/').unwrap_or(raw)
}

/// Classifies `raw` as a [`SubjectKind::Website`] when it has no path beyond
/// `/`, no query and no fragment; otherwise it is a [`SubjectKind::Page`].
///
/// # Errors
///
/// Returns a [`ParseError`] if `raw` is not an absolute URL with a host.
pub fn subject_kind(raw: &str) -> Result<SubjectKind, ParseError> {
    let parsed = Url::parse(raw)?;
    if parsed.host_str().is_none() {
        return Err(ParseError::EmptyHost);
    }
    let bare = matches!(parsed.path(), "" | "/")
        && parsed.query().is_none()
        && parsed.fragment().is_none();
    Ok(if bare {
        SubjectKind::Website
    } else {
        SubjectKind::Page
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_root_strips_www_and_path() {
        assert_eq!(
            site_root("https://www.example.com/news/1?x=2").unwrap(),
            "https://example.com"
        );
        assert_eq!(site_root("http://example.com").unwrap(), "http://example.com");
    }

    #[test]
    fn site_root_drops_port() {
        assert_eq!(
            site_root("http://localhost:8080/a").unwrap(),
            "http://localhost"
        );
    }

    #[test]
    fn site_root_rejects_relative_and_hostless() {
        assert!(site_root("/just/a/path").is_err());
        assert!(site_root("mailto:someone@example.com").is_err());
    }

    #[test]
    fn trim_trailing_slash_strips_one() {
        assert_eq!(trim_trailing_slash("https://a.io/"), "https://a.io");
        assert_eq!(trim_trailing_slash("https://a.io"), "https://a.io");
        assert_eq!(trim_trailing_slash("https://a.io//"), "https://a.io/");
    }

    #[test]
    fn subject_kind_distinguishes_root_from_page() {
        assert_eq!(subject_kind("https://example.com").unwrap(), SubjectKind::Website);
        assert_eq!(subject_kind("https://example.com/").unwrap(), SubjectKind::Website);
        assert_eq!(subject_kind("https://example.com/a").unwrap(), SubjectKind::Page);
        assert_eq!(subject_kind("https://example.com/?q=1").unwrap(), SubjectKind::Page);
        assert!(subject_kind("nonsense").is_err());
    }
}
