use std::time::Duration;

use anyhow::{bail, Context};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::OutsideSnapshot;

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,dew_point_2m";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    latitude: u64,
    longitude: u64,
    timezone: String,
}

impl CacheKey {
    fn new(latitude: f64, longitude: f64, timezone: &str) -> Self {
        Self {
            latitude: latitude.to_bits(),
            longitude: longitude.to_bits(),
            timezone: timezone.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    time: Option<String>,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    dew_point_2m: Option<f64>,
}

/// Weather client with a time-to-live cache of successful lookups.
///
/// Construct once and share by reference; the cache is safe for concurrent
/// callers and coalesces simultaneous lookups of the same key.
#[derive(Clone)]
pub struct OutsideProvider {
    client: Client,
    base_url: String,
    cache: Cache<CacheKey, OutsideSnapshot>,
}

impl OutsideProvider {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(OPEN_METEO_URL, CACHE_TTL)
    }

    pub fn with_base_url(base_url: impl Into<String>, ttl: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to build weather client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            cache: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        })
    }

    /// Current conditions, or `None` when the source is unavailable. Only
    /// successful lookups are cached.
    pub async fn fetch_outside(
        &self,
        latitude: f64,
        longitude: f64,
        timezone: &str,
    ) -> Option<OutsideSnapshot> {
        let key = CacheKey::new(latitude, longitude, timezone);
        self.cache
            .optionally_get_with(key, async {
                match self.request(latitude, longitude, timezone).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "outside conditions unavailable");
                        None
                    }
                }
            })
            .await
    }

    async fn request(&self, latitude: f64, longitude: f64, timezone: &str) -> anyhow::Result<OutsideSnapshot> {
        debug!(latitude, longitude, timezone, "fetching outside conditions");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("timezone", timezone.to_string()),
            ])
            .send()
            .await
            .context("weather request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("weather source returned {status}");
        }

        let body: ForecastResponse = response
            .json()
            .await
            .context("weather response was not valid JSON")?;
        parse_current(body)
    }
}

fn parse_current(body: ForecastResponse) -> anyhow::Result<OutsideSnapshot> {
    let current = body.current.context("weather response has no current block")?;
    let snapshot = OutsideSnapshot {
        time: current.time,
        temp_c: current.temperature_2m,
        rh: current.relative_humidity_2m,
        dew_point_c: current.dew_point_2m,
    };
    if snapshot.is_empty() {
        bail!("weather response has an empty current block");
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const OK_BODY: &str = r#"{"latitude":-37.8,"current":{"time":"2026-05-01T12:30","temperature_2m":14.2,"relative_humidity_2m":71,"dew_point_2m":9.1}}"#;

    /// Serves `status` and `body` to every connection, counting requests.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/v1/forecast"), hits)
    }

    #[tokio::test]
    async fn successful_lookups_are_cached() {
        let (url, hits) = serve("200 OK", OK_BODY).await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();

        let first = provider.fetch_outside(-37.813, 144.985, "Australia/Melbourne").await;
        let second = provider.fetch_outside(-37.813, 144.985, "Australia/Melbourne").await;

        let snapshot = first.unwrap();
        assert_eq!(snapshot.time.as_deref(), Some("2026-05-01T12:30"));
        assert_eq!(snapshot.temp_c, Some(14.2));
        assert_eq!(snapshot.rh, Some(71.0));
        assert_eq!(snapshot.dew_point_c, Some(9.1));
        assert_eq!(second, Some(snapshot));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_entries_expire_after_the_ttl() {
        let (url, hits) = serve("200 OK", OK_BODY).await;
        let provider = OutsideProvider::with_base_url(url, Duration::from_millis(200)).unwrap();

        assert!(provider.fetch_outside(1.0, 2.0, "UTC").await.is_some());
        assert!(provider.fetch_outside(1.0, 2.0, "UTC").await.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(provider.fetch_outside(1.0, 2.0, "UTC").await.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_share_one_fetch() {
        let (url, hits) = serve("200 OK", OK_BODY).await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.fetch_outside(1.0, 2.0, "UTC").await })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert!(results[0].is_some());
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_is_keyed_by_reference_point() {
        let (url, hits) = serve("200 OK", OK_BODY).await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();

        provider.fetch_outside(-37.813, 144.985, "Australia/Melbourne").await;
        provider.fetch_outside(-33.87, 151.21, "Australia/Sydney").await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_errors_yield_none_and_are_not_cached() {
        let (url, hits) = serve("503 Service Unavailable", "{}").await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();

        assert_eq!(provider.fetch_outside(1.0, 2.0, "UTC").await, None);
        assert_eq!(provider.fetch_outside(1.0, 2.0, "UTC").await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_current_block_yields_none() {
        let (url, _) = serve("200 OK", r#"{"latitude":1.0}"#).await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();
        assert_eq!(provider.fetch_outside(1.0, 2.0, "UTC").await, None);
    }

    #[tokio::test]
    async fn malformed_payload_yields_none() {
        let (url, _) = serve("200 OK", "not json").await;
        let provider = OutsideProvider::with_base_url(url, CACHE_TTL).unwrap();
        assert_eq!(provider.fetch_outside(1.0, 2.0, "UTC").await, None);
    }

    #[tokio::test]
    async fn unreachable_source_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let provider =
            OutsideProvider::with_base_url(format!("http://{addr}/v1/forecast"), CACHE_TTL).unwrap();
        assert_eq!(provider.fetch_outside(1.0, 2.0, "UTC").await, None);
    }

    #[test]
    fn empty_current_block_is_rejected() {
        let body: ForecastResponse = serde_json::from_str(r#"{"current":{}}"#).unwrap();
        assert!(parse_current(body).is_err());
    }
}
