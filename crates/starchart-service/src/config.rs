use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: match env::var("STATSD_SERVER") {
                Ok(metrics_statsd) => Some(metrics_statsd),
                Err(_) => None,
            },
            prefix: "starchart".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of the upstream listing client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// The upstream listing endpoint.
    pub listing_url: Url,

    /// The upstream's own maximum batch size.
    ///
    /// The client always requests this many records per call to keep the
    /// number of upstream calls down, no matter how few a caller needs.
    pub max_batch_size: usize,

    /// Minimum time between two upstream listing requests.
    ///
    /// Callers arriving before the floor has elapsed are held back until
    /// it is satisfied.
    #[serde(with = "humantime_serde")]
    pub min_request_interval: Duration,

    /// The timeout for establishing an upstream connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Size tags requested from the upstream.
    pub size_list: Vec<String>,

    /// Content rating filter forwarded to the upstream, if set.
    pub r18_type: Option<u8>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://api.mossia.top/duckMo/x"
                .parse()
                .expect("static url must parse"),
            max_batch_size: 20,
            min_request_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            size_list: vec!["regular".into(), "original".into()],
            r18_type: None,
        }
    }
}

/// Fine-tuning of the in-memory image cache.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of descriptors kept in memory. Oldest entries are
    /// evicted first on overflow.
    pub max_size: usize,

    /// Time after the last refill at which the whole cache is considered
    /// stale and cleared.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Upstream hosts the image proxy endpoints forward to.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// The pixiv mirror the pixiv proxy endpoint forwards to.
    pub pixiv_mirror: Url,

    /// The pixiv origin used as a second chance for `img-master` paths.
    pub pximg_origin: Url,

    /// The host the generic image proxy endpoint forwards to.
    pub generic_host: Url,

    /// How long proxied images may be cached by clients and CDNs.
    #[serde(with = "humantime_serde")]
    pub image_max_age: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            pixiv_mirror: "https://i.pixiv.re/".parse().expect("static url must parse"),
            pximg_origin: "https://i.pximg.net/".parse().expect("static url must parse"),
            generic_host: "https://i.imgur.com/".parse().expect("static url must parse"),
            image_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Top-level service configuration, loaded from YAML.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The upstream listing client.
    pub upstream: UpstreamConfig,

    /// The in-memory image cache.
    pub cache: CacheConfig,

    /// The image proxy endpoints.
    pub proxy: ProxyConfig,

    /// How many descriptors the images endpoint samples when the caller
    /// does not say.
    pub default_sample_count: usize,

    /// Upper bound on the sample size a single call may request.
    pub max_sample_count: usize,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:3042".to_owned()
    } else {
        "127.0.0.1:3042".to_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            proxy: ProxyConfig::default(),
            default_sample_count: 13,
            max_sample_count: 50,
        }
    }
}

impl Config {
    /// Loads the config from a YAML file, or the defaults without one.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
