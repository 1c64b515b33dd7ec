//! Client SDK for the route gateway.
//!
//! [`SignedClient`] adds the `X-AppKey`, `X-Timestamp`, `X-Nonce` and
//! `X-Signature` headers the gateway's auth gate expects.

mod client;

pub use client::{sign, signed_headers, SdkError, SignedClient, SignedHeaders};
