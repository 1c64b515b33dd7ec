//! Built-in route filters.
//!
//! Request filters mutate the [`Exchange`] before forwarding; response filters
//! only touch headers. Header names and values are parsed when the filter is
//! built so a bad argument disables the route instead of failing requests.

use std::collections::BTreeMap;
use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::Utc;
use url::Url;

use crate::capability::{
    split_list, ArgReader, ArgSpec, Args, BuildError, Exchange, FilterFactory, RegistryBuilder,
    RouteFilter,
};

/// Header stamped by `AddTimestamp`.
pub const X_REQUEST_TIMESTAMP: &str = "x-request-timestamp";

pub(crate) fn register(builder: &mut RegistryBuilder) {
    builder
        .filter(AddRequestHeaderFactory)
        .filter(RemoveRequestHeaderFactory)
        .filter(AddResponseHeaderFactory)
        .filter(StripPrefixFactory)
        .filter(PrefixPathFactory)
        .filter(SetPathFactory)
        .filter(AddTimestampFactory)
        .filter(CanaryRoutingFactory)
        .filter(ApiVersioningFactory)
        .filter(SecurityHeadersFactory)
        .filter(IpWhiteBlackListFactory);
}

fn header_name(reader: &ArgReader<'_>, position: usize, arg: &'static str) -> Result<HeaderName, BuildError> {
    HeaderName::from_bytes(reader.required(position, arg)?.as_bytes()).map_err(|e| reader.invalid(arg, e))
}

fn header_value(reader: &ArgReader<'_>, position: usize, arg: &'static str) -> Result<HeaderValue, BuildError> {
    HeaderValue::from_str(reader.required(position, arg)?).map_err(|e| reader.invalid(arg, e))
}

// ---------------------------------------------------------------------------
// Header manipulation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AddRequestHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl RouteFilter for AddRequestHeader {
    fn on_request(&self, exchange: &mut Exchange) {
        exchange.headers.append(self.name.clone(), self.value.clone());
    }
}

pub struct AddRequestHeaderFactory;

impl FilterFactory for AddRequestHeaderFactory {
    fn name(&self) -> &'static str {
        "AddRequestHeader"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("name", "String"),
            ArgSpec::required("value", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        Ok(Box::new(AddRequestHeader {
            name: header_name(&reader, 0, "name")?,
            value: header_value(&reader, 1, "value")?,
        }))
    }
}

#[derive(Debug)]
pub struct RemoveRequestHeader {
    name: HeaderName,
}

impl RouteFilter for RemoveRequestHeader {
    fn on_request(&self, exchange: &mut Exchange) {
        exchange.headers.remove(&self.name);
    }
}

pub struct RemoveRequestHeaderFactory;

impl FilterFactory for RemoveRequestHeaderFactory {
    fn name(&self) -> &'static str {
        "RemoveRequestHeader"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("name", "String")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        Ok(Box::new(RemoveRequestHeader {
            name: header_name(&reader, 0, "name")?,
        }))
    }
}

#[derive(Debug)]
pub struct AddResponseHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl RouteFilter for AddResponseHeader {
    fn on_request(&self, _exchange: &mut Exchange) {}

    fn on_response(&self, headers: &mut HeaderMap) {
        headers.append(self.name.clone(), self.value.clone());
    }
}

pub struct AddResponseHeaderFactory;

impl FilterFactory for AddResponseHeaderFactory {
    fn name(&self) -> &'static str {
        "AddResponseHeader"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("name", "String"),
            ArgSpec::required("value", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        Ok(Box::new(AddResponseHeader {
            name: header_name(&reader, 0, "name")?,
            value: header_value(&reader, 1, "value")?,
        }))
    }
}

// ---------------------------------------------------------------------------
// Path rewriting
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StripPrefix {
    parts: usize,
}

impl RouteFilter for StripPrefix {
    fn on_request(&self, exchange: &mut Exchange) {
        let trailing = exchange.path.len() > 1 && exchange.path.ends_with('/');
        let rest: Vec<&str> = exchange
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.parts)
            .collect();
        let mut path = format!("/{}", rest.join("/"));
        if trailing && !rest.is_empty() {
            path.push('/');
        }
        exchange.path = path;
    }
}

pub struct StripPrefixFactory;

impl FilterFactory for StripPrefixFactory {
    fn name(&self) -> &'static str {
        "StripPrefix"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("parts", "int")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let parts = reader
            .required(0, "parts")?
            .parse::<usize>()
            .map_err(|e| reader.invalid("parts", e))?;
        Ok(Box::new(StripPrefix { parts }))
    }
}

#[derive(Debug)]
pub struct PrefixPath {
    prefix: String,
}

impl RouteFilter for PrefixPath {
    fn on_request(&self, exchange: &mut Exchange) {
        exchange.path = format!("{}{}", self.prefix, exchange.path);
    }
}

pub struct PrefixPathFactory;

impl FilterFactory for PrefixPathFactory {
    fn name(&self) -> &'static str {
        "PrefixPath"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("prefix", "String")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let prefix = reader.required(0, "prefix")?;
        if !prefix.starts_with('/') {
            return Err(reader.invalid("prefix", "must start with '/'"));
        }
        Ok(Box::new(PrefixPath {
            prefix: prefix.trim_end_matches('/').to_string(),
        }))
    }
}

/// Replaces the whole path; the query string is kept.
#[derive(Debug)]
pub struct SetPath {
    template: String,
}

impl RouteFilter for SetPath {
    fn on_request(&self, exchange: &mut Exchange) {
        exchange.path = self.template.clone();
    }
}

pub struct SetPathFactory;

impl FilterFactory for SetPathFactory {
    fn name(&self) -> &'static str {
        "SetPath"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("template", "String")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let template = reader.required(0, "template")?;
        if !template.starts_with('/') {
            return Err(reader.invalid("template", "must start with '/'"));
        }
        Ok(Box::new(SetPath {
            template: template.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// AddTimestamp
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AddTimestamp;

impl RouteFilter for AddTimestamp {
    fn on_request(&self, exchange: &mut Exchange) {
        let millis = Utc::now().timestamp_millis();
        exchange
            .headers
            .insert(HeaderName::from_static(X_REQUEST_TIMESTAMP), HeaderValue::from(millis));
    }
}

pub struct AddTimestampFactory;

impl FilterFactory for AddTimestampFactory {
    fn name(&self) -> &'static str {
        "AddTimestamp"
    }

    fn args(&self) -> &'static [ArgSpec] {
        &[]
    }

    fn build(&self, _args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        Ok(Box::new(AddTimestamp))
    }
}

// ---------------------------------------------------------------------------
// CanaryRouting
// ---------------------------------------------------------------------------

/// Sends requests carrying `header_name: header_value` to `canary` instead of
/// the route's own upstream. Path and query are preserved.
#[derive(Debug)]
pub struct CanaryRouting {
    header_name: HeaderName,
    header_value: String,
    canary: Url,
}

impl RouteFilter for CanaryRouting {
    fn on_request(&self, exchange: &mut Exchange) {
        let hit = exchange
            .headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == self.header_value)
            .unwrap_or(false);
        if hit {
            tracing::debug!(
                header = %self.header_name,
                from = %exchange.upstream,
                to = %self.canary,
                "Canary routing triggered"
            );
            exchange.upstream = self.canary.clone();
        }
    }
}

pub struct CanaryRoutingFactory;

impl FilterFactory for CanaryRoutingFactory {
    fn name(&self) -> &'static str {
        "CanaryRouting"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("headerName", "String"),
            ArgSpec::required("headerValue", "String"),
            ArgSpec::required("canaryUri", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let header_name = header_name(&reader, 0, "headerName")?;
        let header_value = reader.required(1, "headerValue")?.to_string();
        let canary = Url::parse(reader.required(2, "canaryUri")?)
            .map_err(|e| reader.invalid("canaryUri", e))?;
        Ok(Box::new(CanaryRouting {
            header_name,
            header_value,
            canary,
        }))
    }
}

// ---------------------------------------------------------------------------
// ApiVersioning
// ---------------------------------------------------------------------------

/// Picks a backend by API version. The version comes from a `/v<N>` path
/// segment (removed before forwarding) when `usePathPrefix` is set, otherwise
/// from a request header. Backend paths are prepended to the request path.
#[derive(Debug)]
pub struct ApiVersioning {
    use_path_prefix: bool,
    header: HeaderName,
    backends: BTreeMap<String, Url>,
    default_backend: Option<Url>,
}

/// Remove the first `v<digits>` segment. Returns the version and the rest.
fn take_version_segment(path: &str) -> Option<(String, String)> {
    let mut segments: Vec<&str> = path.split('/').collect();
    let index = segments
        .iter()
        .position(|s| s.len() > 1 && s.starts_with('v') && s[1..].bytes().all(|b| b.is_ascii_digit()))?;
    let version = segments.remove(index).to_string();
    let rest = segments.join("/");
    Some((version, if rest.is_empty() { "/".to_string() } else { rest }))
}

impl RouteFilter for ApiVersioning {
    fn on_request(&self, exchange: &mut Exchange) {
        let mut version = None;
        if self.use_path_prefix {
            if let Some((v, rest)) = take_version_segment(&exchange.path) {
                version = Some(v);
                exchange.path = rest;
            }
        }
        if version.is_none() {
            version = exchange
                .headers
                .get(&self.header)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }

        let backend = version
            .as_deref()
            .and_then(|v| self.backends.get(v))
            .or(self.default_backend.as_ref());
        match backend {
            Some(backend) => {
                let base = backend.path().trim_end_matches('/');
                exchange.path = format!("{}{}", base, exchange.path);
                exchange.upstream = backend.clone();
                tracing::debug!(version = ?version, to = %backend, "API version routed");
            }
            None => {
                tracing::warn!(version = ?version, "No backend for API version and no default configured");
            }
        }
    }
}

pub struct ApiVersioningFactory;

impl ApiVersioningFactory {
    const BACKEND_PREFIX: &'static str = "versionBackends.";

    /// `v1=http://a,v2=http://b` under `versionBackends`, plus any
    /// `versionBackends.<version>` keys.
    fn backends(reader: &ArgReader<'_>, args: &Args) -> Result<BTreeMap<String, Url>, BuildError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(list) = reader.optional(2, "versionBackends") {
            for entry in split_list(list) {
                let (version, uri) = entry.split_once('=').ok_or_else(|| {
                    reader.invalid("versionBackends", format!("expected version=uri, got '{}'", entry))
                })?;
                pairs.push((version.trim().to_string(), uri.trim().to_string()));
            }
        }
        for (key, uri) in args {
            if let Some(version) = key.strip_prefix(Self::BACKEND_PREFIX) {
                pairs.push((version.to_string(), uri.trim().to_string()));
            }
        }

        pairs
            .into_iter()
            .map(|(version, uri)| {
                let url = Url::parse(&uri).map_err(|e| reader.invalid("versionBackends", e))?;
                Ok((version, url))
            })
            .collect()
    }
}

impl FilterFactory for ApiVersioningFactory {
    fn name(&self) -> &'static str {
        "ApiVersioning"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::optional("usePathPrefix", "boolean"),
            ArgSpec::optional("versionHeaderName", "String"),
            ArgSpec::optional("versionBackends", "Map<String,String>"),
            ArgSpec::optional("defaultBackend", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let use_path_prefix = match reader.optional(0, "usePathPrefix") {
            None => false,
            Some(v) => v.parse::<bool>().map_err(|e| reader.invalid("usePathPrefix", e))?,
        };
        let header = reader.optional(1, "versionHeaderName").unwrap_or("X-Api-Version");
        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| reader.invalid("versionHeaderName", e))?;
        let default_backend = reader
            .optional(3, "defaultBackend")
            .map(Url::parse)
            .transpose()
            .map_err(|e| reader.invalid("defaultBackend", e))?;

        Ok(Box::new(ApiVersioning {
            use_path_prefix,
            header,
            backends: Self::backends(&reader, args)?,
            default_backend,
        }))
    }
}

// ---------------------------------------------------------------------------
// SecurityHeaders
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SecurityHeaders {
    csp: HeaderValue,
}

impl SecurityHeaders {
    fn content_security_policy(allowed: &[String]) -> String {
        if allowed.is_empty() {
            return "default-src 'self'; script-src 'self'; style-src 'self'; img-src 'self'; connect-src 'self'"
                .to_string();
        }
        let domains = allowed.join(" ");
        let mut csp = String::from("default-src 'self'");
        for directive in ["script-src", "style-src", "img-src", "connect-src"] {
            csp.push_str(&format!("; {} 'self' {}", directive, domains));
        }
        csp
    }
}

impl RouteFilter for SecurityHeaders {
    fn on_request(&self, _exchange: &mut Exchange) {}

    fn on_response(&self, headers: &mut HeaderMap) {
        headers.append("content-security-policy", self.csp.clone());
        headers.append("x-content-type-options", HeaderValue::from_static("nosniff"));
        headers.append("x-xss-protection", HeaderValue::from_static("1; mode=block"));
        headers.append("x-frame-options", HeaderValue::from_static("DENY"));
        headers.append(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
}

pub struct SecurityHeadersFactory;

impl FilterFactory for SecurityHeadersFactory {
    fn name(&self) -> &'static str {
        "SecurityHeaders"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::optional("allowedDomains", "List<String>")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let allowed = reader.optional(0, "allowedDomains").map(split_list).unwrap_or_default();
        let csp = HeaderValue::from_str(&SecurityHeaders::content_security_policy(&allowed))
            .map_err(|e| reader.invalid("allowedDomains", e))?;
        Ok(Box::new(SecurityHeaders { csp }))
    }
}

// ---------------------------------------------------------------------------
// IpWhiteBlackList
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListMode {
    Whitelist,
    Blacklist,
}

/// Admits or refuses callers by address with a 403. The address is the first
/// `X-Forwarded-For` entry when present, otherwise the connection peer.
#[derive(Debug)]
pub struct IpWhiteBlackList {
    mode: ListMode,
    whitelist: Vec<IpAddr>,
    blacklist: Vec<IpAddr>,
}

fn client_ip(exchange: &Exchange) -> Option<IpAddr> {
    let forwarded = exchange
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"));
    match forwarded {
        Some(ip) => ip.parse().ok(),
        None => exchange.peer_ip,
    }
}

impl RouteFilter for IpWhiteBlackList {
    fn on_request(&self, exchange: &mut Exchange) {
        let ip = client_ip(exchange);
        let listed = |list: &[IpAddr]| ip.map(|ip| list.contains(&ip)).unwrap_or(false);
        match self.mode {
            ListMode::Whitelist if !listed(&self.whitelist) => {
                tracing::info!(client_ip = ?ip, "Caller not in whitelist");
                exchange.reject(StatusCode::FORBIDDEN, "IP not in whitelist");
            }
            ListMode::Blacklist if listed(&self.blacklist) => {
                tracing::info!(client_ip = ?ip, "Caller in blacklist");
                exchange.reject(StatusCode::FORBIDDEN, "IP in blacklist");
            }
            _ => {}
        }
    }
}

pub struct IpWhiteBlackListFactory;

impl IpWhiteBlackListFactory {
    fn addresses(reader: &ArgReader<'_>, position: usize, arg: &'static str) -> Result<Vec<IpAddr>, BuildError> {
        reader
            .optional(position, arg)
            .map(split_list)
            .unwrap_or_default()
            .iter()
            .map(|ip| ip.parse().map_err(|e| reader.invalid(arg, e)))
            .collect()
    }
}

impl FilterFactory for IpWhiteBlackListFactory {
    fn name(&self) -> &'static str {
        "IpWhiteBlackList"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("mode", "String"),
            ArgSpec::optional("whiteList", "List<String>"),
            ArgSpec::optional("blackList", "List<String>"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let mode = match reader.required(0, "mode")?.to_ascii_lowercase().as_str() {
            "whitelist" => ListMode::Whitelist,
            "blacklist" => ListMode::Blacklist,
            other => return Err(reader.invalid("mode", format!("expected whitelist or blacklist, got '{}'", other))),
        };
        Ok(Box::new(IpWhiteBlackList {
            mode,
            whitelist: Self::addresses(&reader, 1, "whiteList")?,
            blacklist: Self::addresses(&reader, 2, "blackList")?,
        }))
    }
}
