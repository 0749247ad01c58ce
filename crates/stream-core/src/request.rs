//! Wire text for the initial streaming request.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::{Scheme, StreamConfig},
    error::{StreamError, StreamErrorCategory},
};

/// HTTP method of the streaming request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Methods that announce their body with content headers.
    fn sends_content_headers(&self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported request method '{other}'")),
        }
    }
}

/// Produces the `Authorization` header value for a request.
///
/// Implementations receive the method and the full request URL and own the
/// credentials; the returned string is sent verbatim.
pub trait RequestSigner: Send + Sync {
    fn authorization(&self, method: RequestMethod, url: &str) -> Result<String, StreamError>;
}

/// Signer returning a pre-computed header value.
#[derive(Clone)]
pub struct StaticAuthorization {
    value: String,
}

impl StaticAuthorization {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// `Bearer <token>` authorization.
    pub fn bearer(token: &str) -> Self {
        Self::new(format!("Bearer {token}"))
    }
}

impl fmt::Debug for StaticAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthorization")
            .field("value", &"<redacted>")
            .finish()
    }
}

impl RequestSigner for StaticAuthorization {
    fn authorization(&self, _method: RequestMethod, _url: &str) -> Result<String, StreamError> {
        if self.value.trim().is_empty() {
            return Err(StreamError::new(
                StreamErrorCategory::Config,
                "empty_authorization",
                "authorization value is empty",
            ));
        }
        Ok(self.value.clone())
    }
}

impl<S: RequestSigner + ?Sized> RequestSigner for Arc<S> {
    fn authorization(&self, method: RequestMethod, url: &str) -> Result<String, StreamError> {
        (**self).authorization(method, url)
    }
}

/// Request line inputs derived from the stream configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBuilder {
    method: RequestMethod,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    query: String,
    body: Option<String>,
    content_type: String,
    user_agent: Option<String>,
}

impl RequestBuilder {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            method: config.method,
            scheme: config.scheme,
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            query: config.query.clone(),
            body: config.body.clone(),
            content_type: config.content_type.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Path plus the query string for GET, bare path otherwise.
    pub fn request_uri(&self) -> String {
        if self.method == RequestMethod::Get && !self.query.is_empty() {
            format!("{}?{}", self.path, self.query)
        } else {
            self.path.clone()
        }
    }

    /// Full URL handed to the signer.
    pub fn request_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.scheme.as_str(),
            self.host_header(),
            self.request_uri()
        )
    }

    /// Body for non-GET methods: the explicit body, else the query parameters.
    pub fn body(&self) -> &str {
        if self.method == RequestMethod::Get {
            return "";
        }
        self.body.as_deref().unwrap_or(&self.query)
    }

    /// Host header value; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Render the request text with an already computed authorization value.
    pub fn render(&self, authorization: &str) -> String {
        let body = self.body();
        let mut lines = vec![
            format!("{} {} HTTP/1.1", self.method, self.request_uri()),
            format!("Host: {}", self.host_header()),
            "Accept: */*".to_owned(),
        ];
        if let Some(user_agent) = &self.user_agent {
            lines.push(format!("User-Agent: {user_agent}"));
        }
        lines.push(format!("Authorization: {authorization}"));
        if self.method.sends_content_headers() {
            lines.push(format!("Content-Type: {}", self.content_type));
            lines.push(format!("Content-Length: {}", body.len()));
        }

        let mut request = lines.join("\r\n");
        request.push_str("\r\n\r\n");
        request.push_str(body);
        request
    }

    /// Ask the signer for an authorization value and render the request bytes.
    pub fn build(&self, signer: &dyn RequestSigner) -> Result<Vec<u8>, StreamError> {
        let authorization = signer.authorization(self.method, &self.request_url())?;
        if authorization.chars().any(char::is_control) {
            return Err(StreamError::new(
                StreamErrorCategory::Config,
                "invalid_authorization",
                "authorization value contains control characters",
            ));
        }
        Ok(self.render(&authorization).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(method: RequestMethod) -> StreamConfig {
        StreamConfig {
            host: "stream.example.com".to_owned(),
            method,
            path: "/1.1/statuses/filter.json".to_owned(),
            query: "track=football".to_owned(),
            ..StreamConfig::default()
        }
    }

    #[test]
    fn get_appends_query_and_has_no_body() {
        let builder = RequestBuilder::from_config(&config(RequestMethod::Get));
        assert_eq!(
            builder.render("OAuth abc"),
            "GET /1.1/statuses/filter.json?track=football HTTP/1.1\r\n\
             Host: stream.example.com\r\n\
             Accept: */*\r\n\
             Authorization: OAuth abc\r\n\r\n"
        );
    }

    #[test]
    fn get_without_query_uses_bare_path() {
        let mut cfg = config(RequestMethod::Get);
        cfg.query = String::new();
        assert_eq!(
            RequestBuilder::from_config(&cfg).request_uri(),
            "/1.1/statuses/filter.json"
        );
    }

    #[test]
    fn post_sends_query_as_body_with_content_headers() {
        let mut cfg = config(RequestMethod::Post);
        cfg.user_agent = Some("stream-tail/0.1".to_owned());
        let builder = RequestBuilder::from_config(&cfg);
        assert_eq!(builder.request_uri(), "/1.1/statuses/filter.json");
        assert_eq!(
            builder.render("OAuth abc"),
            "POST /1.1/statuses/filter.json HTTP/1.1\r\n\
             Host: stream.example.com\r\n\
             Accept: */*\r\n\
             User-Agent: stream-tail/0.1\r\n\
             Authorization: OAuth abc\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 14\r\n\r\n\
             track=football"
        );
    }

    #[test]
    fn explicit_body_wins_over_query() {
        let mut cfg = config(RequestMethod::Put);
        cfg.body = Some("follow=12".to_owned());
        let builder = RequestBuilder::from_config(&cfg);
        assert_eq!(builder.body(), "follow=12");
        assert!(builder.render("x").ends_with("Content-Length: 9\r\n\r\nfollow=12"));
    }

    #[test]
    fn delete_carries_body_without_content_headers() {
        let builder = RequestBuilder::from_config(&config(RequestMethod::Delete));
        let text = builder.render("x");
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\ntrack=football"));
    }

    #[test]
    fn url_for_signer_includes_scheme_and_non_default_port() {
        let mut cfg = config(RequestMethod::Get);
        assert_eq!(
            RequestBuilder::from_config(&cfg).request_url(),
            "https://stream.example.com/1.1/statuses/filter.json?track=football"
        );

        cfg.scheme = Scheme::Http;
        cfg.port = 8080;
        assert_eq!(
            RequestBuilder::from_config(&cfg).request_url(),
            "http://stream.example.com:8080/1.1/statuses/filter.json?track=football"
        );
    }

    #[test]
    fn build_passes_method_and_url_to_signer() {
        struct Echo;
        impl RequestSigner for Echo {
            fn authorization(
                &self,
                method: RequestMethod,
                url: &str,
            ) -> Result<String, StreamError> {
                Ok(format!("{method} {url}"))
            }
        }

        let bytes = RequestBuilder::from_config(&config(RequestMethod::Get))
            .build(&Echo)
            .expect("echo signer never fails");
        let text = String::from_utf8(bytes).expect("request is ascii");
        assert!(text.contains(
            "Authorization: GET https://stream.example.com/1.1/statuses/filter.json?track=football\r\n"
        ));
    }

    #[test]
    fn empty_static_authorization_is_a_config_error() {
        let err = StaticAuthorization::new("  ")
            .authorization(RequestMethod::Get, "https://example.com/")
            .expect_err("empty value must be rejected");
        assert_eq!(err.category, StreamErrorCategory::Config);
    }

    #[test]
    fn authorization_cannot_inject_header_lines() {
        let err = RequestBuilder::from_config(&config(RequestMethod::Get))
            .build(&StaticAuthorization::bearer("token\r\nX-Injected: 1"))
            .expect_err("CRLF in authorization must be rejected");
        assert_eq!(err.category, StreamErrorCategory::Config);
        assert_eq!(err.code, "invalid_authorization");
    }

    #[test]
    fn parses_methods_case_insensitively() {
        assert_eq!("post".parse::<RequestMethod>(), Ok(RequestMethod::Post));
        assert!("PATCH".parse::<RequestMethod>().is_err());
    }
}
