//! Rewriting of mirror-host image URLs onto same-origin proxy paths.
//!
//! Browsers refuse to load the upstream image hosts directly (hotlink
//! protection and missing CORS headers), so descriptors are rewritten to
//! point at a reverse proxy on the page's own origin. The proxy itself
//! lives in the server crate; this module only computes the path.

use std::borrow::Cow;

use url::Url;

/// Same-origin prefix the pixiv proxy endpoint is mounted on.
pub const PIXIV_PROXY_PREFIX: &str = "/api/image-proxy/pixiv";

/// Same-origin prefix the generic image proxy endpoint is mounted on.
pub const GENERIC_PROXY_PREFIX: &str = "/api/image-proxy";

/// Mirror domains serving pixiv images. The full path on these hosts is
/// meaningful and must be preserved by the rewrite.
pub const PIXIV_MIRROR_HOSTS: &[&str] = &["i.pixiv.re", "i.pixiv.cat", "i.pximg.net"];

/// Image hosting domains where only the final path segment identifies
/// the resource.
pub const GENERIC_IMAGE_HOSTS: &[&str] = &["i.imgur.com", "imgur.com"];

/// Maps an externally-hosted image URL to an equivalent same-origin path.
///
/// Same-origin paths and `data:` URLs pass through untouched, as does
/// anything that fails to parse or whose host is not recognized; an
/// unrecognized host will visibly fail to load cross-origin rather than
/// being guessed at. The function is idempotent: rewritten URLs begin
/// with `/` and are returned unchanged on a second pass.
pub fn resolve_proxy_url(original: &str) -> Cow<'_, str> {
    if original.starts_with('/') || original.starts_with("data:") {
        return Cow::Borrowed(original);
    }

    let Ok(url) = Url::parse(original) else {
        return Cow::Borrowed(original);
    };
    let Some(host) = url.host_str() else {
        return Cow::Borrowed(original);
    };

    if PIXIV_MIRROR_HOSTS.contains(&host) {
        return Cow::Owned(with_query(
            format!("{PIXIV_PROXY_PREFIX}{}", url.path()),
            url.query(),
        ));
    }

    if GENERIC_IMAGE_HOSTS.contains(&host) {
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty());
        return match segment {
            Some(segment) => Cow::Owned(with_query(
                format!("{GENERIC_PROXY_PREFIX}/{segment}"),
                url.query(),
            )),
            None => Cow::Borrowed(original),
        };
    }

    Cow::Borrowed(original)
}

fn with_query(path: String, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixiv_mirror_keeps_full_path() {
        let resolved = resolve_proxy_url(
            "https://i.pixiv.re/img-master/img/2024/06/30/08/47/53/120104287_p1_master1200.jpg",
        );
        assert_eq!(
            resolved,
            "/api/image-proxy/pixiv/img-master/img/2024/06/30/08/47/53/120104287_p1_master1200.jpg"
        );
    }

    #[test]
    fn test_all_pixiv_mirrors_rewrite() {
        for host in PIXIV_MIRROR_HOSTS {
            let url = format!("https://{host}/img/a.jpg");
            let resolved = resolve_proxy_url(&url);
            assert_eq!(resolved, "/api/image-proxy/pixiv/img/a.jpg");
        }
    }

    #[test]
    fn test_generic_host_keeps_last_segment() {
        let resolved = resolve_proxy_url("https://i.imgur.com/gallery/AbCd123.jpg");
        assert_eq!(resolved, "/api/image-proxy/AbCd123.jpg");
    }

    #[test]
    fn test_query_string_is_preserved() {
        assert_eq!(
            resolve_proxy_url("https://i.pixiv.re/img/a.jpg?size=large&v=2"),
            "/api/image-proxy/pixiv/img/a.jpg?size=large&v=2"
        );
        assert_eq!(
            resolve_proxy_url("https://i.imgur.com/AbCd123.jpg?w=640"),
            "/api/image-proxy/AbCd123.jpg?w=640"
        );
    }

    #[test]
    fn test_same_origin_and_data_pass_through() {
        for input in [
            "/api/image-proxy/pixiv/img/a.jpg",
            "/assets/card.png",
            "data:image/svg+xml;base64,Zm9v",
        ] {
            assert!(matches!(resolve_proxy_url(input), Cow::Borrowed(s) if s == input));
        }
    }

    #[test]
    fn test_unrecognized_host_passes_through() {
        let input = "https://cdn.example.com/img/a.jpg";
        assert_eq!(resolve_proxy_url(input), input);
    }

    #[test]
    fn test_unparseable_input_passes_through() {
        for input in ["not a url at all", "https://", ""] {
            assert_eq!(resolve_proxy_url(input), input);
        }
    }

    #[test]
    fn test_host_root_without_segment_passes_through() {
        let input = "https://i.imgur.com/";
        assert_eq!(resolve_proxy_url(input), input);
    }

    #[test]
    fn test_idempotence() {
        let inputs = [
            "https://i.pixiv.re/img-master/img/2024/06/30/120104287_p1_master1200.jpg",
            "https://i.pixiv.cat/img/a.jpg?x=1",
            "https://i.imgur.com/AbCd123.jpg",
            "https://cdn.example.com/img/a.jpg",
            "data:image/svg+xml;base64,Zm9v",
            "/already/local.png",
            "garbage input",
        ];
        for input in inputs {
            let once = resolve_proxy_url(input).into_owned();
            let twice = resolve_proxy_url(&once).into_owned();
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }
}
