use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::RemoteError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

type HmacSha256 = Hmac<Sha256>;

/// The two object operations the reconciler needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self) -> Result<Option<Vec<u8>>, RemoteError>;

    async fn put(&self, body: Vec<u8>, content_type: &str) -> Result<(), RemoteError>;

    /// Where the object lives, for log messages.
    fn describe(&self) -> String;
}

/// S3 path-style client signed with AWS Signature Version 4.
pub struct SpacesStore {
    client: Client,
    config: StorageConfig,
}

impl SpacesStore {
    /// Returns `Ok(None)` when sync is not configured.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, RemoteError> {
        if !config.sync_enabled() {
            return Ok(None);
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CONNECT_TIMEOUT + READ_TIMEOUT)
            .user_agent(concat!("env-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Some(Self {
            client,
            config: config.clone(),
        }))
    }

    fn object_url(&self) -> Result<reqwest::Url, RemoteError> {
        let raw = format!(
            "{}/{}/{}",
            self.config.endpoint_url(),
            uri_encode(&self.config.bucket, true),
            uri_encode(self.config.object_key.trim_start_matches('/'), false),
        );
        reqwest::Url::parse(&raw).map_err(|err| RemoteError::Request(format!("{raw}: {err}")))
    }

    fn signed_request(
        &self,
        method: Method,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        let url = self.object_url()?;
        let host = host_header(&url)?;
        let payload_hash = hex::encode(Sha256::digest(&body));
        let signer = SigV4 {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
        };
        let signed = signer.sign(method.as_str(), url.path(), &host, &payload_hash, now)?;

        Ok(self
            .client
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header(reqwest::header::AUTHORIZATION, signed.authorization)
            .body(body))
    }
}

#[async_trait]
impl ObjectStore for SpacesStore {
    async fn get(&self) -> Result<Option<Vec<u8>>, RemoteError> {
        let response = self
            .signed_request(Method::GET, Vec::new(), Utc::now())?
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(object = %self.describe(), "remote log does not exist yet");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, body: Vec<u8>, content_type: &str) -> Result<(), RemoteError> {
        let response = self
            .signed_request(Method::PUT, body, Utc::now())?
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        debug!(object = %self.describe(), "uploaded remote log");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.config.bucket, self.config.object_key)
    }
}

fn host_header(url: &reqwest::Url) -> Result<String, RemoteError> {
    let host = url
        .host_str()
        .ok_or_else(|| RemoteError::Request(format!("no host in {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Pulls the `<Code>` element out of an S3 XML error body.
fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let code = body
        .split_once("<Code>")
        .and_then(|(_, rest)| rest.split_once("</Code>"))
        .map(|(code, _)| code.to_string())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    RemoteError::Status {
        status: status.as_u16(),
        code,
    }
}

struct SigV4<'a> {
    access_key_id: &'a str,
    secret_access_key: &'a str,
    region: &'a str,
}

struct Signed {
    amz_date: String,
    authorization: String,
}

impl SigV4<'_> {
    const SERVICE: &'static str = "s3";
    const SIGNED_HEADERS: &'static str = "host;x-amz-content-sha256;x-amz-date";

    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        host: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Signed, RemoteError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{}/aws4_request", self.region, Self::SERVICE);

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{}\n{payload_hash}",
            Self::SIGNED_HEADERS
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date.as_bytes(),
        )?;
        for part in [self.region, Self::SERVICE, "aws4_request"] {
            key = hmac_sha256(&key, part.as_bytes())?;
        }
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        Ok(Signed {
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
                self.access_key_id,
                Self::SIGNED_HEADERS
            ),
            amz_date,
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RemoteError::Request(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 3986 encoding as S3 expects it; `/` is kept unless `encode_slash`.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
