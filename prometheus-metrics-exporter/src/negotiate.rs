//! Response format selection from the HTTP `Accept` header.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::encode::{FamilyEncoder, ProtobufEncoder, TextEncoder};

/// Quality assumed for media ranges without a `q` parameter.
const DEFAULT_QUALITY: f64 = 0.01;

const PROTOBUF_PROTO: &str = "io.prometheus.client.MetricFamily";
const PROTOBUF_ENCODING: &str = "delimited";

/// Exposition format of a scrape response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Protobuf,
}

impl ResponseFormat {
    /// Pick the response format for an `Accept` header value.
    ///
    /// Protobuf is chosen only when its best quality is strictly greater than
    /// the best quality of plain text.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ResponseFormat::Text;
        };

        let mut q_text = 0.0_f64;
        let mut q_protobuf = 0.0_f64;

        for token in accept.split(',') {
            let Some(range) = MediaRange::parse(token) else {
                trace!(token, "Ignoring unparseable media range");
                continue;
            };
            let quality = match range.quality() {
                Ok(q) => q,
                Err(raw) => {
                    debug!(token, q = raw, "Ignoring media range with invalid quality");
                    continue;
                }
            };

            if range.is_text() {
                q_text = q_text.max(quality);
            } else if range.is_protobuf() {
                q_protobuf = q_protobuf.max(quality);
            }
        }

        let format = if q_protobuf > q_text {
            ResponseFormat::Protobuf
        } else {
            ResponseFormat::Text
        };
        trace!(accept, content_type = format.content_type(), "Chosen response format");
        format
    }

    /// Value of the `Content-Type` response header.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseFormat::Text => "text/plain; version=0.0.4; charset=utf-8",
            ResponseFormat::Protobuf => {
                "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited"
            }
        }
    }

    /// A fresh encoder for this format.
    pub fn encoder(&self) -> Box<dyn FamilyEncoder + Send> {
        match self {
            ResponseFormat::Text => Box::new(TextEncoder),
            ResponseFormat::Protobuf => Box::new(ProtobufEncoder),
        }
    }
}

/// One `type/subtype; name=value` element of an `Accept` header.
#[derive(Debug)]
struct MediaRange {
    primary: String,
    sub: String,
    params: HashMap<String, String>,
}

impl MediaRange {
    fn parse(token: &str) -> Option<Self> {
        let mut parts = token.split(';');
        let (primary, sub) = parts.next()?.trim().split_once('/')?;
        let (primary, sub) = (primary.trim(), sub.trim());
        if !is_token(primary) || !is_token(sub) {
            return None;
        }

        let mut params = HashMap::new();
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (name, value) = param.split_once('=')?;
            let name = name.trim();
            if !is_token(name) {
                return None;
            }
            params.insert(name.to_ascii_lowercase(), unquote(value.trim())?);
        }

        Some(Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params,
        })
    }

    /// The `q` parameter, [`DEFAULT_QUALITY`] when absent. An unparseable
    /// value is returned as the error.
    fn quality(&self) -> Result<f64, &str> {
        match self.params.get("q") {
            None => Ok(DEFAULT_QUALITY),
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| raw.as_str()),
        }
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn is_text(&self) -> bool {
        self.primary == "text" && matches!(self.sub.as_str(), "plain" | "*")
    }

    fn is_protobuf(&self) -> bool {
        self.primary == "application"
            && matches!(self.sub.as_str(), "vnd.google.protobuf" | "octet-stream")
            && self.param("encoding") == Some(PROTOBUF_ENCODING)
            && self.param("proto") == Some(PROTOBUF_PROTO)
    }
}

/// RFC 2045 token: no controls, spaces or tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii() && !c.is_ascii_control() && !" ()<>@,;:\\\"/[]?=".contains(c)
        })
}

fn unquote(value: &str) -> Option<String> {
    match value.strip_prefix('"') {
        Some(rest) => Some(rest.strip_suffix('"')?.replace("\\\"", "\"")),
        None if is_token(value) => Some(value.to_string()),
        None => None,
    }
}
