//! Resolution of scraped links against the page they were found on.

use reqwest::Url;

/// Turns a link into an absolute URL.
///
/// Links with a scheme are returned unchanged, root-relative links are joined to
/// the base's origin, `www.` links get an `https://` prefix and anything else is
/// appended to the base verbatim. The result is not validated; malformed output
/// is dropped later by [`is_on_site`].
pub fn normalize_url(link: &str, base: &str) -> String {
    let link = link.trim();
    if has_scheme(link) {
        link.to_string()
    } else if link.starts_with('/') {
        format!("{}{link}", origin(base))
    } else if link.starts_with("www.") {
        format!("https://{link}")
    } else {
        format!("{base}{link}")
    }
}

/// Whether a normalized link belongs to the crawled site.
pub fn is_on_site(url: &str, domain: &str) -> bool {
    url.contains(domain)
}

fn has_scheme(link: &str) -> bool {
    match link.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn origin(base: &str) -> String {
    match Url::parse(base) {
        Ok(url) if url.has_host() => url.origin().ascii_serialization(),
        _ => base.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.is/a/";

    #[test]
    fn relative_link_is_appended_to_base() {
        assert_eq!(normalize_url("page.html", BASE), "https://example.is/a/page.html");
    }

    #[test]
    fn root_relative_link_uses_origin() {
        assert_eq!(normalize_url("/x", BASE), "https://example.is/x");
        assert_eq!(
            normalize_url("/thingmenn/?id=1", "http://127.0.0.1:8080/deep/path"),
            "http://127.0.0.1:8080/thingmenn/?id=1"
        );
    }

    #[test]
    fn www_link_gets_https() {
        assert_eq!(normalize_url("www.foo.is", BASE), "https://www.foo.is");
    }

    #[test]
    fn absolute_links_are_untouched() {
        assert_eq!(normalize_url("https://www.althingi.is/", BASE), "https://www.althingi.is/");
        assert_eq!(normalize_url("mailto:a@althingi.is", BASE), "mailto:a@althingi.is");
    }

    #[test]
    fn garbage_base_never_panics() {
        assert_eq!(normalize_url("/x", "not a url/"), "not a url/x");
        assert!(!is_on_site(&normalize_url("/x", "not a url/"), "althingi.is"));
    }
}
