//! Request signing: canonical string and HMAC-SHA256.
//!
//! ```text
//! METHOD \n HOST \n PATH \n DECODED_QUERY \n TIMESTAMP \n NONCE \n BODY
//! ```
//! signed with the client's secretKey, encoded as standard base64. PATH is
//! percent-decoded; the query is form-decoded once.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const X_APP_KEY: &str = "x-appkey";
pub const X_TIMESTAMP: &str = "x-timestamp";
pub const X_NONCE: &str = "x-nonce";
pub const X_SIGNATURE: &str = "x-signature";

type HmacSha256 = Hmac<Sha256>;

/// Form-url decoding of the raw query: `+` becomes a space, `%XX` sequences
/// are decoded as UTF-8. Absent query decodes to the empty string.
pub fn decode_query(raw: Option<&str>) -> String {
    match raw {
        Some(q) => percent_decode_str(&q.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned(),
        None => String::new(),
    }
}

/// Percent-decoded request path. `+` is kept as is.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Inputs of the canonical string, borrowed from the request.
#[derive(Debug, Clone, Copy)]
pub struct SigningInput<'a> {
    pub method: &'a str,
    pub host: &'a str,
    /// Already decoded, see [`decode_path`].
    pub path: &'a str,
    /// Already decoded, see [`decode_query`].
    pub query: &'a str,
    pub timestamp: &'a str,
    pub nonce: &'a str,
    pub body: &'a [u8],
}

impl SigningInput<'_> {
    pub fn canonical_string(&self) -> String {
        let body = String::from_utf8_lossy(self.body);
        [
            self.method,
            self.host,
            self.path,
            self.query,
            self.timestamp,
            self.nonce,
            body.as_ref(),
        ]
        .join("\n")
    }
}

/// Base64 HMAC-SHA256 of `data` keyed by `secret`.
pub fn sign(secret: &str, data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of the expected signature with the presented one.
pub fn verify(secret: &str, data: &str, presented: &str) -> bool {
    let expected = sign(secret, data);
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
