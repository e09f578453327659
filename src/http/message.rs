//! Proxied HTTP message
//!
//! A request as the proxy read it off the wire, plus the response once one
//! exists (either synthesized by the guard or received from upstream).

use std::collections::HashMap;
use url::Url;

use crate::error::RequestError;

const HTML_CONTENT_TYPE: &str = "text/html";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Request/response pair flowing through the proxy
#[derive(Debug, Clone)]
pub struct HttpMessage {
    /// HTTP method
    pub method: String,

    /// Absolute request URL
    pub url: String,

    /// Request headers (keys lowercased)
    pub headers: HashMap<String, String>,

    /// Request body
    pub body: Option<Vec<u8>>,

    /// Response, if one has been produced
    pub response: Option<ResponsePart>,
}

/// Response half of a message
#[derive(Debug, Clone)]
pub struct ResponsePart {
    /// Status code
    pub status: u16,

    /// Status text (e.g., "OK")
    pub status_text: String,

    /// Response headers (keys lowercased)
    pub headers: HashMap<String, String>,

    /// Response body
    pub body: Vec<u8>,

    /// Whether the guard produced this response instead of the origin server
    pub synthetic: bool,
}

impl ResponsePart {
    /// Serialize status line, headers and body for the client socket
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        let mut keys: Vec<&String> = self.headers.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("{}: {}\r\n", key, self.headers[key]));
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

impl HttpMessage {
    /// Create a new request message
    pub fn new_request(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            response: None,
        }
    }

    /// Add or update a request header
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_lowercase(), value.to_string());
    }

    /// Builder-style header setter
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Builder-style body setter
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.as_bytes().to_vec());
        self
    }

    /// Get a request header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Destination host of the request, as written in the URL
    pub fn host_name(&self) -> Result<String, RequestError> {
        let url = Url::parse(&self.url).map_err(|_| RequestError::InvalidUrl(self.url.clone()))?;
        url.host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| RequestError::MissingHost(self.url.clone()))
    }

    /// Whether the client asked for an HTML document
    pub fn accepts_html(&self) -> bool {
        self.header("accept")
            .map(|accept| accept.contains(HTML_CONTENT_TYPE))
            .unwrap_or(false)
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// Decoded url-encoded form fields, in submission order
    ///
    /// Bodies with a non-form content type yield no fields.
    pub fn form_params(&self) -> Result<Vec<(String, String)>, RequestError> {
        if let Some(content_type) = self.header("content-type") {
            if !content_type.to_lowercase().contains(FORM_CONTENT_TYPE) {
                return Ok(Vec::new());
            }
        }

        let body = match &self.body {
            Some(body) if !body.is_empty() => body,
            _ => return Ok(Vec::new()),
        };

        if std::str::from_utf8(body).is_err() {
            return Err(RequestError::InvalidForm("body is not UTF-8".into()));
        }

        Ok(url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect())
    }

    /// Replace the response with a guard-generated HTML page
    ///
    /// Content-Length is computed from the final body.
    pub fn set_html_response(&mut self, body: Option<String>) {
        let body = body.unwrap_or_default().into_bytes();

        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        headers.insert("content-language".to_string(), "en".to_string());
        headers.insert("referrer-policy".to_string(), "no-referrer".to_string());
        headers.insert("cache-control".to_string(), "no-store".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());

        self.response = Some(ResponsePart {
            status: 200,
            status_text: "OK".to_string(),
            headers,
            body,
            synthetic: true,
        });
    }

    /// Record the status of an upstream response
    pub fn set_upstream_status(&mut self, status: u16, status_text: &str) {
        self.response = Some(ResponsePart {
            status,
            status_text: status_text.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            synthetic: false,
        });
    }
}

/// Extract the host from a header value such as `Origin` or `Referer`
///
/// Values without a scheme (`www.example.com/page`) are read as http URLs.
pub fn host_from_uri(value: &str) -> Result<String, RequestError> {
    let trimmed = value.trim();
    let parsed = Url::parse(trimmed).or_else(|_| Url::parse(&format!("http://{}", trimmed)));

    match parsed {
        Ok(url) => url
            .host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| RequestError::MissingHost(trimmed.to_string())),
        Err(_) => Err(RequestError::InvalidUrl(trimmed.to_string())),
    }
}
