//! Built-in route predicates.
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec), port ignored
//! - Path matching is case-sensitive, segment based (`*` one segment,
//!   trailing `/**` any suffix, `{name}` one segment)
//! - Multiple patterns in one predicate are OR-ed; predicates of a route are AND-ed
//! - No regex to keep matching linear in the path length

use axum::http::{header, request::Parts, HeaderName, Method};
use chrono::{DateTime, Utc};

use crate::capability::{
    split_list, ArgReader, ArgSpec, Args, BuildError, PredicateFactory, RegistryBuilder,
    RoutePredicate,
};

pub(crate) fn register(builder: &mut RegistryBuilder) {
    builder
        .predicate(PathFactory)
        .predicate(HostFactory)
        .predicate(MethodFactory)
        .predicate(HeaderFactory)
        .predicate(QueryFactory)
        .predicate(AfterFactory)
        .predicate(BeforeFactory);
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// Compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<Segment>,
    any_suffix: bool,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let mut parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let any_suffix = parts.last() == Some(&"**");
        if any_suffix {
            parts.pop();
        }
        let segments = parts
            .into_iter()
            .map(|s| {
                if s == "*" || (s.starts_with('{') && s.ends_with('}')) {
                    Segment::Any
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { segments, any_suffix }
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() < self.segments.len() {
            return false;
        }
        if !self.any_suffix && parts.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(parts).all(|(seg, part)| match seg {
            Segment::Any => true,
            Segment::Literal(lit) => lit == part,
        })
    }
}

#[derive(Debug)]
pub struct PathPredicate {
    patterns: Vec<PathPattern>,
}

impl RoutePredicate for PathPredicate {
    fn matches(&self, req: &Parts) -> bool {
        let path = req.uri.path();
        self.patterns.iter().any(|p| p.matches(path))
    }
}

pub struct PathFactory;

impl PredicateFactory for PathFactory {
    fn name(&self) -> &'static str {
        "Path"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("patterns", "List<String>")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let raw = split_list(reader.required(0, "patterns")?);
        if let Some(bad) = raw.iter().find(|p| !p.starts_with('/')) {
            return Err(reader.invalid("patterns", format!("'{}' must start with '/'", bad)));
        }
        Ok(Box::new(PathPredicate {
            patterns: raw.iter().map(|p| PathPattern::parse(p)).collect(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Host of the request with any port stripped, lowercased.
pub(crate) fn request_host(req: &Parts) -> Option<String> {
    let raw = req
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri.authority().map(|a| a.as_str().to_string()))?;
    let host = match raw.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => raw.as_str(),
    };
    Some(host.to_lowercase())
}

#[derive(Debug)]
pub struct HostPredicate {
    patterns: Vec<String>,
}

impl HostPredicate {
    fn host_matches(pattern: &str, host: &str) -> bool {
        match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .and_then(|label| label.strip_suffix('.'))
                .map(|label| !label.is_empty() && !label.contains('.'))
                .unwrap_or(false),
            None => pattern == host,
        }
    }
}

impl RoutePredicate for HostPredicate {
    fn matches(&self, req: &Parts) -> bool {
        match request_host(req) {
            Some(host) => self.patterns.iter().any(|p| Self::host_matches(p, &host)),
            None => false,
        }
    }
}

pub struct HostFactory;

impl PredicateFactory for HostFactory {
    fn name(&self) -> &'static str {
        "Host"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("patterns", "List<String>")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let patterns = split_list(reader.required(0, "patterns")?)
            .into_iter()
            .map(|p| p.to_lowercase())
            .collect();
        Ok(Box::new(HostPredicate { patterns }))
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MethodPredicate {
    methods: Vec<Method>,
}

impl RoutePredicate for MethodPredicate {
    fn matches(&self, req: &Parts) -> bool {
        self.methods.contains(&req.method)
    }
}

pub struct MethodFactory;

impl PredicateFactory for MethodFactory {
    fn name(&self) -> &'static str {
        "Method"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("methods", "List<HttpMethod>")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let methods = split_list(reader.required(0, "methods")?)
            .into_iter()
            .map(|m| {
                Method::from_bytes(m.to_uppercase().as_bytes())
                    .map_err(|e| reader.invalid("methods", e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(MethodPredicate { methods }))
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HeaderPredicate {
    name: HeaderName,
    value: Option<String>,
}

impl RoutePredicate for HeaderPredicate {
    fn matches(&self, req: &Parts) -> bool {
        let mut values = req.headers.get_all(&self.name).iter();
        match &self.value {
            None => values.next().is_some(),
            Some(expected) => values.any(|v| v.to_str().map(|v| v == expected).unwrap_or(false)),
        }
    }
}

pub struct HeaderFactory;

impl PredicateFactory for HeaderFactory {
    fn name(&self) -> &'static str {
        "Header"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("header", "String"),
            ArgSpec::optional("value", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        let name = HeaderName::from_bytes(reader.required(0, "header")?.as_bytes())
            .map_err(|e| reader.invalid("header", e))?;
        Ok(Box::new(HeaderPredicate {
            name,
            value: reader.optional(1, "value").map(str::to_string),
        }))
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct QueryPredicate {
    param: String,
    value: Option<String>,
}

impl RoutePredicate for QueryPredicate {
    fn matches(&self, req: &Parts) -> bool {
        let Some(query) = req.uri.query() else {
            return false;
        };
        url::form_urlencoded::parse(query.as_bytes()).any(|(k, v)| {
            k == self.param.as_str() && self.value.as_deref().map_or(true, |expected| v == expected)
        })
    }
}

pub struct QueryFactory;

impl PredicateFactory for QueryFactory {
    fn name(&self) -> &'static str {
        "Query"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[
            ArgSpec::required("param", "String"),
            ArgSpec::optional("value", "String"),
        ];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let reader = ArgReader::new(self.name(), args);
        Ok(Box::new(QueryPredicate {
            param: reader.required(0, "param")?.to_string(),
            value: reader.optional(1, "value").map(str::to_string),
        }))
    }
}

// ---------------------------------------------------------------------------
// After / Before
// ---------------------------------------------------------------------------

fn parse_instant(reader: &ArgReader<'_>) -> Result<DateTime<Utc>, BuildError> {
    let raw = reader.required(0, "datetime")?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| reader.invalid("datetime", e))
}

#[derive(Debug)]
pub struct AfterPredicate {
    instant: DateTime<Utc>,
}

impl RoutePredicate for AfterPredicate {
    fn matches(&self, _req: &Parts) -> bool {
        Utc::now() > self.instant
    }
}

pub struct AfterFactory;

impl PredicateFactory for AfterFactory {
    fn name(&self) -> &'static str {
        "After"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("datetime", "ZonedDateTime")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let instant = parse_instant(&ArgReader::new(self.name(), args))?;
        Ok(Box::new(AfterPredicate { instant }))
    }
}

#[derive(Debug)]
pub struct BeforePredicate {
    instant: DateTime<Utc>,
}

impl RoutePredicate for BeforePredicate {
    fn matches(&self, _req: &Parts) -> bool {
        Utc::now() < self.instant
    }
}

pub struct BeforeFactory;

impl PredicateFactory for BeforeFactory {
    fn name(&self) -> &'static str {
        "Before"
    }

    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: &[ArgSpec] = &[ArgSpec::required("datetime", "ZonedDateTime")];
        ARGS
    }

    fn build(&self, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let instant = parse_instant(&ArgReader::new(self.name(), args))?;
        Ok(Box::new(BeforePredicate { instant }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(method: &str, uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn args(pairs: &[(&str, &str)]) -> Args {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_path_patterns() {
        let p = PathPattern::parse("/api/**");
        assert!(p.matches("/api"));
        assert!(p.matches("/api/v1/users"));
        assert!(!p.matches("/apix"));

        let p = PathPattern::parse("/users/{id}");
        assert!(p.matches("/users/42"));
        assert!(!p.matches("/users/42/orders"));
        assert!(!p.matches("/users"));

        let p = PathPattern::parse("/a/*/c");
        assert!(p.matches("/a/b/c"));
        assert!(!p.matches("/a/b/d"));
    }

    #[test]
    fn test_path_predicate_ors_patterns() {
        let predicate = PathFactory
            .build(&args(&[("patterns", "/orders/**, /carts/*")]))
            .unwrap();
        assert!(predicate.matches(&parts("GET", "/orders/1/items", &[])));
        assert!(predicate.matches(&parts("GET", "/carts/9", &[])));
        assert!(!predicate.matches(&parts("GET", "/users/1", &[])));
    }

    #[test]
    fn test_path_requires_leading_slash() {
        let err = PathFactory.build(&args(&[("patterns", "api/**")])).unwrap_err();
        assert!(matches!(err, BuildError::InvalidArg { arg: "patterns", .. }));
    }

    #[test]
    fn test_host_matcher() {
        let predicate = HostFactory
            .build(&args(&[("patterns", "example.com,*.api.example.com")]))
            .unwrap();

        assert!(predicate.matches(&parts("GET", "/", &[("Host", "EXAMPLE.COM")])));
        assert!(predicate.matches(&parts("GET", "/", &[("Host", "eu.api.example.com:8443")])));
        assert!(!predicate.matches(&parts("GET", "/", &[("Host", "api.example.com")])));
        assert!(!predicate.matches(&parts("GET", "/", &[("Host", "a.b.api.example.com")])));
        assert!(!predicate.matches(&parts("GET", "/", &[("Host", "other.com")])));
    }

    #[test]
    fn test_method_header_query() {
        let method = MethodFactory.build(&args(&[("methods", "get,post")])).unwrap();
        assert!(method.matches(&parts("POST", "/", &[])));
        assert!(!method.matches(&parts("DELETE", "/", &[])));

        let header = HeaderFactory
            .build(&args(&[("header", "X-Tenant-ID"), ("value", "acme")]))
            .unwrap();
        assert!(header.matches(&parts("GET", "/", &[("x-tenant-id", "acme")])));
        assert!(!header.matches(&parts("GET", "/", &[("x-tenant-id", "other")])));

        let query = QueryFactory.build(&args(&[("_genkey_0", "debug")])).unwrap();
        assert!(query.matches(&parts("GET", "/x?debug=", &[])));
        assert!(!query.matches(&parts("GET", "/x?verbose=1", &[])));
        assert!(!query.matches(&parts("GET", "/x", &[])));
    }

    #[test]
    fn test_after_and_before() {
        let past = args(&[("datetime", "2000-01-01T00:00:00Z")]);
        let req = parts("GET", "/", &[]);
        assert!(AfterFactory.build(&past).unwrap().matches(&req));
        assert!(!BeforeFactory.build(&past).unwrap().matches(&req));

        let bad = args(&[("datetime", "yesterday")]);
        assert!(AfterFactory.build(&bad).is_err());
    }
}
