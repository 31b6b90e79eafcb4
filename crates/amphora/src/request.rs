//! HTTP request adapter and superglobal population.
//!
//! The core does not speak HTTP; a frontend hands it a `Request` and the
//! tables here turn it into `_GET`/`_POST`/`_COOKIE`/`_REQUEST`/`_SERVER`.
//! Population order follows the `variables_order` setting: each letter of
//! `EGPCS` triggers one table, and G/P additionally merge into `_REQUEST`.

use std::{rc::Rc, time::UNIX_EPOCH};

use crate::{
    array::{Array, Key},
    global::Global,
    value::{Str, Value},
};

/// One inbound request, as seen by the interpreter.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    /// Request target: path plus optional `?query`.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// First header with the given (case-insensitive) name.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn query_string(&self) -> &str {
        match self.uri.split_once('?') {
            Some((_, query)) => query,
            None => "",
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }
}

fn str_key(name: &str) -> Key {
    Key::from_str_key(Rc::new(Str::from(name)))
}

/// Builds all superglobal tables on the Global per `variables_order`.
pub(crate) fn populate_superglobals(global: &mut Global) {
    let order = global.get_config("variables_order", "EGPCS").to_owned();

    let mut get = Array::new();
    let mut post = Array::new();
    let mut cookie = Array::new();
    let mut request = Array::new();
    let mut server = Array::new();
    let mut env = Array::new();
    let files = Array::new();

    for letter in order.chars() {
        match letter.to_ascii_uppercase() {
            'E' => env = global.environ().clone(),
            'G' => {
                if let Some(req) = global.request() {
                    get = parse_query(req.query_string());
                    request.merge(&get);
                }
            }
            'P' => {
                if let Some(req) = global.request()
                    && req.method.eq_ignore_ascii_case("POST")
                {
                    let form = req
                        .header_value("content-type")
                        .is_none_or(|ct| ct.starts_with("application/x-www-form-urlencoded"));
                    if form {
                        let body = String::from_utf8_lossy(&req.body).into_owned();
                        post = parse_query(&body);
                        request.merge(&post);
                    }
                }
            }
            'C' => {
                if let Some(cookies) = global.request().and_then(|r| r.header_value("cookie")) {
                    cookie = parse_cookies(cookies);
                }
            }
            'S' => {
                let start = global.start_system_time();
                if let Ok(since_epoch) = start.duration_since(UNIX_EPOCH) {
                    server.set(str_key("REQUEST_TIME"), Value::Int(since_epoch.as_secs() as i64));
                    server.set(
                        str_key("REQUEST_TIME_FLOAT"),
                        Value::Float(since_epoch.as_secs_f64()),
                    );
                }
                if let Some(req) = global.request() {
                    server.set(str_key("REQUEST_METHOD"), Value::string(req.method.as_str()));
                    server.set(str_key("REQUEST_URI"), Value::string(req.uri.as_str()));
                    server.set(str_key("QUERY_STRING"), Value::string(req.query_string()));
                    server.set(str_key("SCRIPT_NAME"), Value::string(req.path()));
                    // headers surface as HTTP_* variables
                    for (name, value) in &req.headers {
                        let mangled = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
                        server.set(str_key(&mangled), Value::string(value.as_str()));
                    }
                }
            }
            _ => {}
        }
    }

    global.set_superglobal("_GET", Value::Array(get));
    global.set_superglobal("_POST", Value::Array(post));
    global.set_superglobal("_COOKIE", Value::Array(cookie));
    global.set_superglobal("_REQUEST", Value::Array(request));
    global.set_superglobal("_SERVER", Value::Array(server));
    global.set_superglobal("_ENV", Value::Array(env));
    global.set_superglobal("_FILES", Value::Array(files));
    // _SESSION is only set once a session subsystem initializes one
}

/// Parses a query string / urlencoded form body into an array.
///
/// Supports plain `k=v` pairs, bare-append `k[]=v`, and one level of
/// sub-keys `k[sub]=v`.
#[must_use]
pub fn parse_query(query: &str) -> Array {
    let mut out = Array::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = String::from_utf8_lossy(&percent_decode(raw_key.as_bytes())).into_owned();
        let value = Value::String(Rc::new(Str::from_bytes(percent_decode(raw_value.as_bytes()))));

        if let Some((name, bracket)) = key.split_once('[') {
            let Some(sub) = bracket.strip_suffix(']') else {
                out.set(str_key(&key), value);
                continue;
            };
            let slot = out.get_or_insert_null(str_key(name));
            if !matches!(slot, Value::Array(_)) {
                *slot = Value::Array(Array::new());
            }
            if let Value::Array(inner) = slot {
                if sub.is_empty() {
                    inner.append(value);
                } else {
                    inner.set(str_key(sub), value);
                }
            }
        } else {
            out.set(str_key(&key), value);
        }
    }
    out
}

/// Parses a `Cookie:` header value.
#[must_use]
pub fn parse_cookies(header: &str) -> Array {
    let mut out = Array::new();
    for part in header.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, value) = match part.split_once('=') {
            Some((n, v)) => (n, v),
            None => (part, ""),
        };
        out.set(
            str_key(name.trim()),
            Value::String(Rc::new(Str::from_bytes(percent_decode(value.as_bytes())))),
        );
    }
    out
}

/// URL percent-decoding; `+` decodes to a space.
#[must_use]
fn percent_decode(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                match (hi, lo) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi * 16 + lo) as u8);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_with_brackets() {
        let parsed = parse_query("a=1&b%5B%5D=x&b[]=y&c[k]=v&flag");
        assert_eq!(parsed.len(), 4);
        assert!(matches!(parsed.get(&str_key("a")), Some(Value::String(s)) if s.as_bytes() == b"1"));
        let Some(Value::Array(b)) = parsed.get(&str_key("b")) else {
            panic!("b should be an array");
        };
        assert_eq!(b.len(), 2);
        let Some(Value::Array(c)) = parsed.get(&str_key("c")) else {
            panic!("c should be an array");
        };
        assert!(matches!(c.get(&str_key("k")), Some(Value::String(s)) if s.as_bytes() == b"v"));
        assert!(matches!(parsed.get(&str_key("flag")), Some(Value::String(s)) if s.is_empty()));
    }

    #[test]
    fn percent_and_plus_decoding() {
        let parsed = parse_query("name=a%20b+c%2B");
        let Some(Value::String(s)) = parsed.get(&str_key("name")) else {
            panic!("expected string");
        };
        assert_eq!(s.as_bytes(), b"a b c+");
    }

    #[test]
    fn cookie_header_parsing() {
        let parsed = parse_cookies("session=abc123; theme=dark");
        assert!(matches!(parsed.get(&str_key("session")), Some(Value::String(s)) if s.as_bytes() == b"abc123"));
        assert!(matches!(parsed.get(&str_key("theme")), Some(Value::String(s)) if s.as_bytes() == b"dark"));
    }
}
