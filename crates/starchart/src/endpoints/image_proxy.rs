use axum::extract::{Path, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use url::Url;

use starchart_service::config::ProxyConfig;
use starchart_service::metric;

use crate::service::RequestService;

/// Pixiv's CDN rejects requests without a browser-looking user agent.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// The referer pixiv hosts require for image fetches.
const PIXIV_REFERER: &str = "https://www.pixiv.net/";

const X_PROXY_BY: HeaderName = HeaderName::from_static("x-proxy-by");

/// Forwards an image request to the pixiv mirror.
///
/// The mirror does not carry every rendition. When a `_master1200.jpg`
/// path fails, the un-suffixed original filename is tried on the mirror,
/// and for `img-master` paths the `img-original` rendition on the pixiv
/// origin after that. Only then does the upstream failure surface, as a
/// plain-text body with the upstream status.
pub async fn proxy_pixiv_image(
    State(service): State<RequestService>,
    Path(path): Path<String>,
) -> Response {
    let config = &service.config().proxy;
    let client = service.proxy_client();

    tracing::debug!("Proxying pixiv image `{path}`");
    metric!(counter("proxy.request") += 1, "host" => "pixiv");

    let failure = match fetch_image(client, &join(&config.pixiv_mirror, &path), true).await {
        Ok(upstream) => return image_response(config, upstream).await,
        Err(failure) => failure,
    };

    if let Some(stem) = path.strip_suffix("_master1200.jpg") {
        let original_name = format!("{stem}.jpg");
        tracing::debug!("Retrying pixiv image as `{original_name}`");
        if let Ok(upstream) =
            fetch_image(client, &join(&config.pixiv_mirror, &original_name), true).await
        {
            return image_response(config, upstream).await;
        }

        if let Some(origin_path) = original_name.strip_prefix("img-master/") {
            let origin_path = format!("img-original/{origin_path}");
            tracing::debug!("Retrying pixiv image on the origin as `{origin_path}`");
            if let Ok(upstream) =
                fetch_image(client, &join(&config.pximg_origin, &origin_path), true).await
            {
                return image_response(config, upstream).await;
            }
        }
    }

    metric!(counter("proxy.failure") += 1, "host" => "pixiv");
    failure.into_text_response(&path)
}

/// Forwards an image request to the generic image host.
pub async fn proxy_generic_image(
    State(service): State<RequestService>,
    Path(path): Path<String>,
) -> Response {
    let config = &service.config().proxy;

    tracing::debug!("Proxying image `{path}`");
    metric!(counter("proxy.request") += 1, "host" => "generic");

    match fetch_image(
        service.proxy_client(),
        &join(&config.generic_host, &path),
        false,
    )
    .await
    {
        Ok(upstream) => image_response(config, upstream).await,
        Err(failure) => {
            metric!(counter("proxy.failure") += 1, "host" => "generic");
            failure.into_text_response(&path)
        }
    }
}

#[derive(Debug)]
enum ProxyFailure {
    Status(StatusCode),
    Transport(String),
}

impl ProxyFailure {
    fn into_text_response(self, path: &str) -> Response {
        let (status, detail) = match self {
            ProxyFailure::Status(status) => (status, status.to_string()),
            ProxyFailure::Transport(detail) => (StatusCode::BAD_GATEWAY, detail),
        };
        tracing::warn!("image fetch for `{path}` failed: {detail}");

        (
            status,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            format!("image fetch failed: {detail}, path: {path}"),
        )
            .into_response()
    }
}

async fn fetch_image(
    client: &reqwest::Client,
    url: &str,
    pixiv: bool,
) -> Result<reqwest::Response, ProxyFailure> {
    let mut request = client.get(url).header(header::USER_AGENT, BROWSER_USER_AGENT);
    if pixiv {
        request = request.header(header::REFERER, PIXIV_REFERER);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => Ok(response),
        Ok(response) => Err(ProxyFailure::Status(
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
        )),
        Err(error) => Err(ProxyFailure::Transport(error.to_string())),
    }
}

async fn image_response(config: &ProxyConfig, upstream: reqwest::Response) -> Response {
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_owned();

    match upstream.bytes().await {
        Ok(bytes) => {
            let max_age = config.image_max_age.as_secs();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (
                        header::CACHE_CONTROL,
                        format!("public, max-age={max_age}"),
                    ),
                    (X_PROXY_BY, "Star-Chart-Image-Proxy".to_owned()),
                ],
                bytes,
            )
                .into_response()
        }
        Err(error) => ProxyFailure::Transport(error.to_string()).into_text_response("<body>"),
    }
}

fn join(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
