//! Request-semantics validation applied to a fully decoded header list
//! before a stream is handed to the application handler (spec §4.3). Every
//! violation here is a `Stream` error, not a `Connection` error -- the
//! stream is reset but the connection keeps running (testable in isolation,
//! per spec §4.3's closing paragraph).

use crate::error::ProtocolError;
use crate::types::{ErrorCode, HeaderList, StreamId};

const CONNECTION_SPECIFIC: &[&str] =
    &["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade"];

fn stream_err(id: StreamId, msg: impl Into<std::borrow::Cow<'static, str>>) -> ProtocolError {
    ProtocolError::stream(id, ErrorCode::ProtocolError, msg)
}

/// Runs the full rule set of spec §4.3 over a decoded request header list.
/// Names are assumed already-lowercased by the HPACK layer for non-pseudo
/// headers (spec §4.2); pseudo-header names are matched case-sensitively.
pub fn validate_request(id: StreamId, headers: &HeaderList) -> Result<(), ProtocolError> {
    let mut seen_regular = false;
    let mut method = None;
    let mut scheme = None;
    let mut path = None;
    let mut authority = None;
    let mut host = None;
    let mut protocol = None;
    let mut content_lengths: Vec<&str> = Vec::new();
    let mut te = None;

    for (name, value) in headers {
        if name.starts_with(':') {
            // Rule 1: all pseudo-headers precede regular headers.
            if seen_regular {
                return Err(stream_err(id, "pseudo-header after regular header"));
            }
            match name.as_str() {
                ":method" => {
                    if method.replace(value.as_str()).is_some() {
                        return Err(stream_err(id, "duplicate :method"));
                    }
                }
                ":scheme" => {
                    if scheme.replace(value.as_str()).is_some() {
                        return Err(stream_err(id, "duplicate :scheme"));
                    }
                }
                ":path" => {
                    if path.replace(value.as_str()).is_some() {
                        return Err(stream_err(id, "duplicate :path"));
                    }
                }
                ":authority" => {
                    if authority.replace(value.as_str()).is_some() {
                        return Err(stream_err(id, "duplicate :authority"));
                    }
                }
                ":protocol" => {
                    if protocol.replace(value.as_str()).is_some() {
                        return Err(stream_err(id, "duplicate :protocol"));
                    }
                }
                // Rule 4: no response pseudo-headers in a request.
                ":status" => return Err(stream_err(id, "response pseudo-header in request")),
                _ => return Err(stream_err(id, format!("unknown pseudo-header {name}"))),
            }
        } else {
            seen_regular = true;
            if CONNECTION_SPECIFIC.contains(&name.as_str()) {
                return Err(stream_err(id, format!("connection-specific header {name}")));
            }
            if name == "te" {
                te = Some(value.as_str());
            }
            if name == "host" {
                host = Some(value.as_str());
            }
            if name == "content-length" {
                content_lengths.push(value.as_str());
            }
        }
    }

    let method = method.ok_or_else(|| stream_err(id, "missing :method"))?;
    scheme.ok_or_else(|| stream_err(id, "missing :scheme"))?;
    let path = path.ok_or_else(|| stream_err(id, "missing :path"))?;
    authority.ok_or_else(|| stream_err(id, "missing :authority"))?;

    if method != "CONNECT" && path.is_empty() {
        return Err(stream_err(id, "empty :path"));
    }

    // Rule 5: :protocol only with extended CONNECT.
    if protocol.is_some() && method != "CONNECT" {
        return Err(stream_err(id, ":protocol without CONNECT"));
    }

    // Rule 7: te must be absent or exactly "trailers".
    if let Some(te) = te {
        if te != "trailers" {
            return Err(stream_err(id, "te header must be \"trailers\""));
        }
    }

    // Rule 8: :authority and host must match byte-for-byte if both present.
    if let (Some(a), Some(h)) = (authority, host) {
        if a != h {
            return Err(stream_err(id, ":authority and host disagree"));
        }
    }

    // Rule 9: all content-length values must parse and agree.
    if !content_lengths.is_empty() {
        let mut parsed = content_lengths.iter().map(|v| v.parse::<u64>());
        let first = parsed.next().unwrap().map_err(|_| stream_err(id, "invalid content-length"))?;
        for other in parsed {
            let other = other.map_err(|_| stream_err(id, "invalid content-length"))?;
            if other != first {
                return Err(stream_err(id, "conflicting content-length values"));
            }
        }
    }

    Ok(())
}

/// Parses the single, already-validated `content-length` header (if any)
/// into its declared byte count, for the accounting described in spec §3.
#[must_use]
pub fn declared_content_length(headers: &HeaderList) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderList {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn accepts_a_well_formed_get() {
        let h = headers(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
        ]);
        assert!(validate_request(1, &h).is_ok());
    }

    #[test]
    fn rejects_uppercase_would_have_been_caught_upstream_but_connection_header_is_rejected_here() {
        let h = headers(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            ("connection", "keep-alive"),
        ]);
        assert!(validate_request(1, &h).is_err());
    }

    #[test]
    fn rejects_mismatched_content_length() {
        let h = headers(&[
            (":method", "POST"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            ("content-length", "10"),
            ("content-length", "20"),
        ]);
        assert!(validate_request(1, &h).is_err());
    }

    #[test]
    fn rejects_authority_host_mismatch() {
        let h = headers(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "a.example.com"),
            ("host", "b.example.com"),
        ]);
        assert!(validate_request(1, &h).is_err());
    }

    #[test]
    fn te_other_than_trailers_is_rejected() {
        let h = headers(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.com"),
            ("te", "gzip"),
        ]);
        assert!(validate_request(1, &h).is_err());
    }

    #[test]
    fn connect_allows_empty_path_and_protocol() {
        let h = headers(&[
            (":method", "CONNECT"),
            (":authority", "example.com:443"),
            (":scheme", ""),
            (":path", ""),
            (":protocol", "websocket"),
        ]);
        assert!(validate_request(1, &h).is_ok());
    }
}
