//! Predicates deciding which destinations may receive credentials
//!
//! These compose with the combinators in [`predicates::prelude`], for example
//! `HttpsOnly.and(ExactHostMatch::new("api.example.com"))`.

use std::fmt;

use predicates::{reflection, Predicate};
use reqwest::Request;

/// Builds the reflection case reported when a predicate disagrees with `expected`
fn mismatch<'a, P>(
    predicate: &'a P,
    expected: bool,
    actual: bool,
    product: &'static str,
    observed: impl Into<String>,
) -> Option<reflection::Case<'a>>
where
    P: reflection::PredicateReflection,
{
    (actual != expected).then(|| {
        reflection::Case::new(Some(predicate), actual)
            .add_product(reflection::Product::new(product, observed.into()))
    })
}

/// Only disclose credentials to requests sent over HTTPS
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "scheme", req.url().scheme())
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only disclose credentials to requests sent to exactly this host
///
/// The port is not considered.
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Allows requests to `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Allows requests to the host of `url`
    ///
    /// Returns `None` if `url` has no host.
    pub fn of(url: &url::Url) -> Option<Self> {
        url.host_str().map(Self::new)
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(self.host.as_str())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(
            self,
            expected,
            self.eval(req),
            "host",
            req.url().host_str().unwrap_or("<no host>"),
        )
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}

#[cfg(test)]
mod tests {
    use predicates::prelude::*;

    use super::*;

    fn request(url: &str) -> Request {
        Request::new(reqwest::Method::GET, url.parse().unwrap())
    }

    mod https_only {
        use super::*;

        #[test]
        fn matches_when_request_has_https_scheme() {
            let result = HttpsOnly.find_case(true, &request("https://api.example.com/users"));
            assert!(result.is_none());
        }

        #[test]
        fn reports_scheme_when_request_has_http_scheme() {
            let req = request("http://api.example.com/users");
            let case = HttpsOnly.find_case(true, &req).unwrap();
            let product = case.products().next().unwrap();
            assert!(!case.result());
            assert_eq!(product.name(), "scheme");
            assert_eq!(product.value().to_string(), "http");
        }
    }

    mod exact_host_match {
        use super::*;

        #[test]
        fn matches_when_request_has_same_host() {
            let predicate = ExactHostMatch::new("api.example.com");
            assert!(predicate.eval(&request("https://api.example.com:8443/users")));
        }

        #[test]
        fn does_not_match_subdomains() {
            let predicate = ExactHostMatch::new("example.com");
            assert!(!predicate.eval(&request("https://api.example.com/users")));
        }

        #[test]
        fn can_be_taken_from_a_base_url() {
            let base = url::Url::parse("https://api.example.com/v1/").unwrap();
            let predicate = ExactHostMatch::of(&base).unwrap();
            assert!(predicate.eval(&request("https://api.example.com/users")));
        }
    }

    #[test]
    fn predicates_compose() {
        let predicate = HttpsOnly.and(ExactHostMatch::new("api.example.com"));
        assert!(predicate.eval(&request("https://api.example.com/users")));
        assert!(!predicate.eval(&request("http://api.example.com/users")));
        assert!(!predicate.eval(&request("https://evil.example.net/users")));
    }
}
