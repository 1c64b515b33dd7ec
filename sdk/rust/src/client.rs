use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::{Client, Method, Response};
use sha2::Sha256;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The four auth headers for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub app_key: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("X-AppKey", &self.app_key),
            ("X-Timestamp", &self.timestamp),
            ("X-Nonce", &self.nonce),
            ("X-Signature", &self.signature),
        ]
    }
}

/// Base64 HMAC-SHA256 of `data` keyed by `secret`.
pub fn sign(secret: &str, data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Host as sent in the `Host` header: port only when it is not the default.
fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn decode_query(raw: Option<&str>) -> String {
    raw.map(|q| percent_decode_str(&q.replace('+', " ")).decode_utf8_lossy().into_owned())
        .unwrap_or_default()
}

/// Sign a request to `url` with an explicit timestamp and nonce.
pub fn signed_headers(
    app_key: &str,
    secret_key: &str,
    method: &Method,
    url: &Url,
    body: &[u8],
    timestamp: i64,
    nonce: &str,
) -> SignedHeaders {
    let timestamp = timestamp.to_string();
    let canonical = [
        method.as_str(),
        &host_header(url),
        &decode_path(url.path()),
        &decode_query(url.query()),
        &timestamp,
        nonce,
        &String::from_utf8_lossy(body),
    ]
    .join("\n");

    SignedHeaders {
        app_key: app_key.to_string(),
        signature: sign(secret_key, &canonical),
        timestamp,
        nonce: nonce.to_string(),
    }
}

/// HTTP client that signs every request it sends through the gateway.
#[derive(Clone)]
pub struct SignedClient {
    client: Client,
    base_url: Url,
    app_key: String,
    secret_key: String,
}

impl SignedClient {
    pub fn new(base_url: &str, app_key: &str, secret_key: &str) -> Result<Self, SdkError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            app_key: app_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// Headers for a request signed now with a fresh nonce.
    pub fn sign_request(&self, method: &Method, url: &Url, body: &[u8]) -> SignedHeaders {
        let nonce = Uuid::new_v4().simple().to_string();
        signed_headers(
            &self.app_key,
            &self.secret_key,
            method,
            url,
            body,
            chrono::Utc::now().timestamp(),
            &nonce,
        )
    }

    /// Send `method` to `path_and_query` (relative to the base URL) with `body`.
    pub async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, SdkError> {
        let url = self.base_url.join(path_and_query)?;
        let body = body.into();
        let signed = self.sign_request(&method, &url, &body);

        let mut request = self.client.request(method, url);
        for (name, value) in signed.pairs() {
            request = request.header(name, value);
        }
        Ok(request.body(body).send().await?)
    }

    pub async fn get(&self, path_and_query: &str) -> Result<Response, SdkError> {
        self.send(Method::GET, path_and_query, Vec::new()).await
    }

    pub async fn post(&self, path_and_query: &str, body: impl Into<Vec<u8>>) -> Result<Response, SdkError> {
        self.send(Method::POST, path_and_query, body).await
    }
}
