//! Public URLs of stored uploads and "search by image URL" deep links for
//! providers that only accept a publicly reachable image.

use std::collections::BTreeMap;

/// Route under which uploads are served.
pub const UPLOADS_ROUTE: &str = "/uploads";

/// Builds the provider → deep link map for a public image URL.
///
/// Produces `google`, `yandex` and `bing_web`, each embedding the
/// percent-encoded URL. An empty URL yields an empty map.
pub fn build_search_links(public_url: &str) -> BTreeMap<&'static str, String> {
    let mut links = BTreeMap::new();
    if public_url.is_empty() {
        return links;
    }

    let encoded = urlencoding::encode(public_url);
    links.insert(
        "google",
        format!("https://www.google.com/searchbyimage?image_url={encoded}"),
    );
    links.insert(
        "yandex",
        format!("https://yandex.com/images/search?rpt=imageview&img_url={encoded}"),
    );
    links.insert(
        "bing_web",
        format!("https://www.bing.com/images/search?q=imgurl:{encoded}&view=detailv2"),
    );

    links
}

/// Resolves the absolute URL of a stored upload.
///
/// A configured external base URL takes precedence; otherwise the origin the
/// current request was addressed to is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicUrlResolver {
    base_url: Option<String>,
}

impl PublicUrlResolver {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }

    /// `request_origin` is `scheme://host[:port]` as seen by the client.
    pub fn resolve(&self, request_origin: &str, filename: &str) -> String {
        let origin = self.base_url.as_deref().unwrap_or(request_origin);

        format!(
            "{}{}/{}",
            origin.trim_end_matches('/'),
            UPLOADS_ROUTE,
            filename
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::links::{PublicUrlResolver, build_search_links};

    #[test]
    fn test_search_links() {
        let links = build_search_links("https://x/u/a.jpg");
        let encoded = "https%3A%2F%2Fx%2Fu%2Fa.jpg";

        assert_eq!(
            vec!["bing_web", "google", "yandex"],
            links.keys().copied().collect::<Vec<_>>()
        );
        for link in links.values() {
            assert!(link.contains(encoded), "{link}");
        }
        assert_eq!(
            "https://www.google.com/searchbyimage?image_url=https%3A%2F%2Fx%2Fu%2Fa.jpg",
            links["google"]
        );
    }

    #[test]
    fn test_search_links_empty() {
        assert!(build_search_links("").is_empty());
    }

    #[test]
    fn test_resolve_with_base_url() {
        let resolver = PublicUrlResolver::new(Some("https://photos.example.com/".to_string()));

        assert_eq!(
            "https://photos.example.com/uploads/1_a.png",
            resolver.resolve("http://10.0.0.5:5000", "1_a.png")
        );
    }

    #[test]
    fn test_resolve_from_request() {
        let resolver = PublicUrlResolver::default();

        assert_eq!(
            "http://localhost:5000/uploads/1_a.png",
            resolver.resolve("http://localhost:5000", "1_a.png")
        );
    }
}
