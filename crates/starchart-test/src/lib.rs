//! Helpers for testing the starchart service and web server.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`ListingMock`] or [`ImageHost`], make sure that the mock is held until all
//!    requests to it have been made. If it is dropped, the port closes and all connections
//!    to it will fail. To avoid this, assign it to a variable:
//!    `let mock = ListingMock::new(...)`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the starchart crates and mutes
///    all other logs (such as axum or hyper).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("starchart_service=trace,starchart=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Spawns the given router on an ephemeral localhost port.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        format!(
            "http://localhost:{}/{}",
            self.port(),
            path.trim_start_matches('/')
        )
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One scripted reply of a [`ListingMock`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    body: String,
}

impl MockResponse {
    /// A `200` reply carrying the given JSON value.
    pub fn json(value: serde_json::Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: value.to_string(),
        }
    }

    /// An empty reply with the given status code.
    pub fn status(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            body: String::new(),
        }
    }

    /// A `200` reply whose body is not JSON at all.
    pub fn garbage() -> Self {
        Self {
            status: StatusCode::OK,
            body: "<!doctype html><html>upstream gateway error</html>".into(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    scripts: Mutex<VecDeque<MockResponse>>,
    hits: AtomicUsize,
}

/// A mock of the upstream listing endpoint.
///
/// Serves the scripted responses in order; the last one repeats once the
/// script runs out. Every request is counted, which lets tests assert how
/// often the client actually went upstream.
#[derive(Debug)]
pub struct ListingMock {
    server: Server,
    state: Arc<MockState>,
}

impl ListingMock {
    /// Spawns a listing mock serving `responses` in order.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty(), "a mock needs at least one response");
        let state = Arc::new(MockState {
            scripts: Mutex::new(responses.into()),
            hits: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/listing", post(serve_scripted))
            .with_state(state.clone());

        Self {
            server: Server::with_router(router),
            state,
        }
    }

    /// The URL clients should POST their listing requests to.
    pub fn url(&self) -> String {
        self.server.url("listing")
    }

    /// How many listing requests have reached this mock.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::Relaxed)
    }
}

async fn serve_scripted(State(state): State<Arc<MockState>>) -> Response {
    state.hits.fetch_add(1, Ordering::Relaxed);

    let mut scripts = state.scripts.lock().unwrap();
    let reply = if scripts.len() > 1 {
        scripts.pop_front().unwrap()
    } else {
        scripts.front().cloned().unwrap()
    };

    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

/// A successful listing response where every record carries a single
/// `regular` rendition of the given URL.
pub fn listing_records(urls: &[&str]) -> serde_json::Value {
    let data: Vec<_> = urls
        .iter()
        .map(|url| {
            serde_json::json!({
                "urlsList": [{ "url": url, "urlSize": "regular" }],
                "xCreateDate": 1719731273000i64,
            })
        })
        .collect();

    serde_json::json!({ "success": true, "data": data })
}

/// A well-formed soft-failure envelope, as produced by a relaying upstream.
pub fn soft_failure(message: &str) -> serde_json::Value {
    serde_json::json!({ "success": false, "message": message, "fallback": true })
}

/// A mock image host serving fixed bytes for known paths and plain-text
/// `404`s for everything else.
#[derive(Debug)]
pub struct ImageHost {
    server: Server,
    hits: Arc<AtomicUsize>,
}

impl ImageHost {
    /// Spawns an image host serving the given `(path, bytes)` pairs.
    pub fn new(files: &[(&str, &[u8])]) -> Self {
        let files: HashMap<String, Vec<u8>> = files
            .iter()
            .map(|(path, bytes)| (path.trim_start_matches('/').to_owned(), bytes.to_vec()))
            .collect();
        let hits = Arc::new(AtomicUsize::new(0));

        let router = Router::new()
            .route("/{*path}", get(serve_image))
            .with_state((Arc::new(files), hits.clone()));

        Self {
            server: Server::with_router(router),
            hits,
        }
    }

    /// Base URL of this host, with a trailing slash.
    pub fn base_url(&self) -> String {
        self.server.url("")
    }

    /// How many image requests have reached this host.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

type ImageHostState = (Arc<HashMap<String, Vec<u8>>>, Arc<AtomicUsize>);

async fn serve_image(
    State((files, hits)): State<ImageHostState>,
    Path(path): Path<String>,
) -> Response {
    hits.fetch_add(1, Ordering::Relaxed);

    match files.get(path.trim_start_matches('/')) {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/jpeg")],
            bytes.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no such image").into_response(),
    }
}
