//! Connection scope: the framework-supplied metadata bag.

use std::collections::HashMap;

/// The kind of connection a scope describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Websocket,
    Http,
}

/// Metadata describing one connection, handed to the consumer by the host
/// framework. The runtime never interprets it; middleware and user handlers
/// do.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub path: String,
    pub path_params: HashMap<String, String>,
    pub query_string: Vec<u8>,
    /// Raw header pairs in arrival order
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub user: Option<String>,
    pub cookies: HashMap<String, String>,
}

impl Scope {
    pub fn new(kind: ScopeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            path_params: HashMap::new(),
            query_string: Vec::new(),
            headers: Vec::new(),
            user: None,
            cookies: HashMap::new(),
        }
    }

    /// A WebSocket scope for `path`.
    pub fn websocket(path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Websocket, path)
    }

    /// An HTTP scope for `path`.
    pub fn http(path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Http, path)
    }

    pub fn with_query_string(mut self, query_string: impl Into<Vec<u8>>) -> Self {
        self.query_string = query_string.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// First header value under `name`, compared ASCII case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, value)| value.as_slice())
    }
}
