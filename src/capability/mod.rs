//! Capability subsystem: the predicate and filter kinds this binary supports.
//!
//! # Data Flow
//! ```text
//! Process start:
//!     predicates::register + filters::register
//!     → RegistryBuilder (one factory per kind)
//!     → CapabilityRegistry (frozen, shared via Arc)
//!
//! Consumers:
//!     → routes::validator (name checks on save / reconcile)
//!     → routing::RouteTable (build predicates & filters per route)
//!     → admin /capabilities (catalogue listing)
//! ```
//!
//! # Design Decisions
//! - Registry is built once and never mutated; the capability set is fixed
//!   per deployed binary
//! - Kinds register themselves through a plain function, no runtime discovery
//! - Validation only needs names; argument problems surface when a route is
//!   compiled into the live table and only affect that route

pub mod filters;
pub mod predicates;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{request::Parts, HeaderMap, Method, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub use registry::{CapabilityRegistry, RegistryBuilder};

/// Arguments of a predicate or filter as stored in a route definition.
pub type Args = BTreeMap<String, String>;

/// Declared argument of a predicate or filter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: &'static str,
    pub required: bool,
}

impl ArgSpec {
    pub const fn required(name: &'static str, kind: &'static str) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: &'static str) -> Self {
        Self { name, kind, required: false }
    }
}

/// Catalogue entry describing one predicate or filter kind.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    pub name: String,
    pub implementation: String,
    pub args: Vec<ArgInfo>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArgInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Failure to turn a definition into a live predicate or filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("{kind}: missing argument '{arg}'")]
    MissingArg { kind: &'static str, arg: &'static str },

    #[error("{kind}: invalid argument '{arg}': {reason}")]
    InvalidArg {
        kind: &'static str,
        arg: &'static str,
        reason: String,
    },
}

/// Condition evaluated against an incoming request.
pub trait RoutePredicate: Send + Sync + fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Parts) -> bool;
}

/// Transformation applied on the way to the upstream and back.
pub trait RouteFilter: Send + Sync + fmt::Debug {
    fn on_request(&self, exchange: &mut Exchange);

    fn on_response(&self, _headers: &mut HeaderMap) {}
}

/// A predicate kind; builds configured predicates from route arguments.
pub trait PredicateFactory: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn args(&self) -> &'static [ArgSpec];
    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError>;
}

/// A filter kind; builds configured filters from route arguments.
pub trait FilterFactory: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn args(&self) -> &'static [ArgSpec];
    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError>;
}

/// A filter's decision to answer the request itself instead of forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

/// Mutable view of a request while filters run, before it is forwarded.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Upstream the request will be sent to; filters may redirect it.
    pub upstream: Url,
    /// Peer address of the connection, when the listener records it.
    pub peer_ip: Option<IpAddr>,
    /// Set by a filter to stop the chain; the request is not forwarded.
    pub rejection: Option<Rejection>,
}

impl Exchange {
    pub fn new(parts: &Parts, upstream: Url) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            upstream,
            peer_ip: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
            rejection: None,
        }
    }

    pub fn reject(&mut self, status: StatusCode, message: impl Into<String>) {
        self.rejection = Some(Rejection {
            status,
            message: message.into(),
        });
    }

    /// Absolute URL of the upstream request: upstream origin + current path and query.
    pub fn target_url(&self) -> String {
        let mut target = format!("{}://", self.upstream.scheme());
        if let Some(host) = self.upstream.host_str() {
            target.push_str(host);
        }
        if let Some(port) = self.upstream.port() {
            target.push_str(&format!(":{}", port));
        }
        target.push_str(&self.path);
        if let Some(query) = &self.query {
            target.push('?');
            target.push_str(query);
        }
        target
    }
}

/// Reads arguments by declared name, falling back to the positional
/// `_genkey_<n>` form produced by shortcut route notation.
pub(crate) struct ArgReader<'a> {
    kind: &'static str,
    args: &'a Args,
}

impl<'a> ArgReader<'a> {
    pub(crate) fn new(kind: &'static str, args: &'a Args) -> Self {
        Self { kind, args }
    }

    pub(crate) fn optional(&self, position: usize, name: &'static str) -> Option<&'a str> {
        self.args
            .get(name)
            .or_else(|| self.args.get(&format!("_genkey_{}", position)))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn required(&self, position: usize, name: &'static str) -> Result<&'a str, BuildError> {
        self.optional(position, name).ok_or(BuildError::MissingArg {
            kind: self.kind,
            arg: name,
        })
    }

    pub(crate) fn invalid(&self, arg: &'static str, reason: impl fmt::Display) -> BuildError {
        BuildError::InvalidArg {
            kind: self.kind,
            arg,
            reason: reason.to_string(),
        }
    }
}

/// Split a comma separated argument into trimmed, non-empty items.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_reader_falls_back_to_shortcut_keys() {
        let mut args = Args::new();
        args.insert("_genkey_0".into(), "/api/**".into());
        args.insert("value".into(), "  ".into());

        let reader = ArgReader::new("Path", &args);
        assert_eq!(reader.required(0, "patterns").unwrap(), "/api/**");
        assert_eq!(reader.optional(1, "value"), None);
        assert_eq!(
            reader.required(1, "value"),
            Err(BuildError::MissingArg { kind: "Path", arg: "value" })
        );
    }

    #[test]
    fn test_target_url_keeps_upstream_origin_only() {
        let parts = axum::http::Request::builder()
            .uri("http://gateway.local/orders/7?expand=items")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let exchange = Exchange::new(&parts, Url::parse("http://10.0.0.5:9000/ignored").unwrap());
        assert_eq!(exchange.target_url(), "http://10.0.0.5:9000/orders/7?expand=items");
    }
}
