//! CGI-style parameter parsing.
//!
//! Decodes the query string, url-encoded bodies, and multipart/form-data
//! bodies (with file parts) into the request's parameter map. Parsing
//! happens once, at the controller, before any session is involved: a
//! malformed or oversized body is reported inline to the client and never
//! creates or touches a session.

use crate::config::Configuration;
use crate::error::ParseError;
use crate::http::request::{Request, UploadedFile};
use crate::http::types::Method;

/// Parses query string and body parameters into the request.
///
/// Body size above `max_request_size` is an error. Accumulated upload bytes
/// above `max_form_data_size` are not: the uploads are discarded and the
/// request is flagged so the application can report a too-large post.
pub fn parse_request(request: &mut Request, config: &Configuration) -> Result<(), ParseError> {
    if request.body().len() > config.max_request_size {
        return Err(ParseError::BodyTooLarge {
            size: request.body().len(),
            max: config.max_request_size,
        });
    }

    let query = request.query().to_owned();
    parse_pairs(&query, "query string", request)?;

    if request.method() != &Method::Post || request.body().is_empty() {
        return Ok(());
    }

    let content_type = request
        .header_value("Content-Type")
        .unwrap_or("application/x-www-form-urlencoded")
        .to_owned();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let body = String::from_utf8(request.body().to_vec())
            .map_err(|_| ParseError::ContentType("non-utf8 urlencoded body".to_owned()))?;
        parse_pairs(&body, "request body", request)
    } else if let Some(boundary) = multipart_boundary(&content_type) {
        parse_multipart(&boundary, config, request)
    } else if content_type.starts_with("text/plain") {
        // Browsers may post signal bodies as text/plain on beacon paths.
        Ok(())
    } else {
        Err(ParseError::ContentType(content_type))
    }
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let rest = content_type.strip_prefix("multipart/form-data")?;
    rest.split(';')
        .map(str::trim)
        .find_map(|attr| attr.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_owned())
}

fn parse_pairs(
    encoded: &str,
    location: &'static str,
    request: &mut Request,
) -> Result<(), ParseError> {
    for pair in encoded.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.split_once('=') {
            Some((n, v)) => (n, v),
            None => (pair, ""),
        };
        let name = url_decode(name, location)?;
        let value = url_decode(value, location)?;
        request.insert_parameter(name, value);
    }
    Ok(())
}

/// Decodes a percent-encoded component, mapping `+` to space.
pub fn url_decode(encoded: &str, location: &'static str) -> Result<String, ParseError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or(ParseError::Escape(location))?;
                let hex = std::str::from_utf8(hex).map_err(|_| ParseError::Escape(location))?;
                let value =
                    u8::from_str_radix(hex, 16).map_err(|_| ParseError::Escape(location))?;
                out.push(value);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::Escape(location))
}

fn parse_multipart(
    boundary: &str,
    config: &Configuration,
    request: &mut Request,
) -> Result<(), ParseError> {
    let delimiter = format!("--{boundary}");
    let body = request.body().to_vec();
    let text_sections = split_parts(&body, delimiter.as_bytes())?;

    let mut upload_bytes = 0usize;
    let mut exceeded = 0usize;

    for part in text_sections {
        let (headers, payload) = split_part_headers(part)?;
        let disposition = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("Content-Disposition"))
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| ParseError::Multipart("part without Content-Disposition".into()))?;

        let name = disposition_attr(disposition, "name")
            .ok_or_else(|| ParseError::Multipart("part without a field name".into()))?;
        let filename = disposition_attr(disposition, "filename");

        if let Some(filename) = filename {
            upload_bytes += payload.len();
            if upload_bytes > config.max_form_data_size {
                exceeded = upload_bytes - config.max_form_data_size;
                continue;
            }
            let content_type = headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("Content-Type"))
                .map_or_else(
                    || "application/octet-stream".to_owned(),
                    |(_, v)| v.clone(),
                );
            request.insert_upload(
                name,
                UploadedFile {
                    client_filename: filename,
                    content_type,
                    data: payload.to_vec(),
                },
            );
        } else {
            let value = String::from_utf8(payload.to_vec())
                .map_err(|_| ParseError::Multipart("non-utf8 form field".into()))?;
            request.insert_parameter(name, value);
        }
    }

    if exceeded > 0 {
        request.set_post_data_exceeded(exceeded);
    }
    Ok(())
}

/// Splits a multipart body into its parts, excluding preamble and epilogue.
fn split_parts<'a>(body: &'a [u8], delimiter: &[u8]) -> Result<Vec<&'a [u8]>, ParseError> {
    let mut parts = Vec::new();
    let mut rest = body;

    // Skip the preamble up to the first delimiter.
    let first = find(rest, delimiter)
        .ok_or_else(|| ParseError::Multipart("missing opening boundary".into()))?;
    rest = &rest[first + delimiter.len()..];

    loop {
        rest = strip_crlf(rest);
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let end = find(rest, delimiter)
            .ok_or_else(|| ParseError::Multipart("missing closing boundary".into()))?;
        let mut part = &rest[..end];
        // The CRLF before the delimiter belongs to the boundary.
        if part.ends_with(b"\r\n") {
            part = &part[..part.len() - 2];
        }
        parts.push(part);
        rest = &rest[end + delimiter.len()..];
    }
}

fn strip_crlf(data: &[u8]) -> &[u8] {
    data.strip_prefix(b"\r\n").unwrap_or(data)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_part_headers(part: &[u8]) -> Result<(Vec<(String, String)>, &[u8]), ParseError> {
    let split = find(part, b"\r\n\r\n")
        .ok_or_else(|| ParseError::Multipart("part without header terminator".into()))?;
    let header_block = std::str::from_utf8(&part[..split])
        .map_err(|_| ParseError::Multipart("non-utf8 part headers".into()))?;
    let payload = &part[split + 4..];

    let mut headers = Vec::new();
    for line in header_block.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::Multipart(format!("malformed part header: {line}")))?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }
    Ok((headers, payload))
}

fn disposition_attr(disposition: &str, attr: &str) -> Option<String> {
    disposition.split(';').map(str::trim).find_map(|piece| {
        piece
            .strip_prefix(attr)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.trim_matches('"').to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(request: &mut Request) -> Result<(), ParseError> {
        parse_request(request, &Configuration::default())
    }

    #[test]
    fn query_parameters_decode() {
        let mut req = Request::builder(Method::Get, "/app")
            .query("wtd=abc&signal=s12&msg=hello+world%21&flag")
            .build();
        parse(&mut req).expect("parse");
        assert_eq!(req.parameter("wtd"), Some("abc"));
        assert_eq!(req.parameter("signal"), Some("s12"));
        assert_eq!(req.parameter("msg"), Some("hello world!"));
        assert_eq!(req.parameter("flag"), Some(""));
    }

    #[test]
    fn repeated_parameters_accumulate() {
        let mut req = Request::builder(Method::Get, "/app")
            .query("sel=1&sel=2&sel=3")
            .build();
        parse(&mut req).expect("parse");
        assert_eq!(req.parameter_values("sel"), &["1", "2", "3"]);
        assert_eq!(req.parameter("sel"), Some("1"));
    }

    #[test]
    fn urlencoded_body_merges_with_query() {
        let mut req = Request::builder(Method::Post, "/app")
            .query("wtd=abc")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("signal=s3&ackId=17".as_bytes().to_vec())
            .build();
        parse(&mut req).expect("parse");
        assert_eq!(req.parameter("wtd"), Some("abc"));
        assert_eq!(req.parameter("signal"), Some("s3"));
        assert_eq!(req.parameter("ackId"), Some("17"));
    }

    #[test]
    fn truncated_escape_is_rejected() {
        let mut req = Request::builder(Method::Get, "/app").query("a=%4").build();
        let err = parse(&mut req).unwrap_err();
        assert_eq!(err, ParseError::Escape("query string"));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let config = Configuration::default().max_request_size(8);
        let mut req = Request::builder(Method::Post, "/app")
            .body(vec![b'x'; 64])
            .build();
        let err = parse_request(&mut req, &config).unwrap_err();
        assert!(matches!(err, ParseError::BodyTooLarge { size: 64, max: 8 }));
    }

    fn multipart_body(boundary: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"signal\"\r\n\r\n\
                 s7\r\n\
                 --{boundary}\r\n\
                 Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
                 Content-Type: text/plain\r\n\r\n\
                 line one\r\nline two\r\n\
                 --{boundary}--\r\n"
            )
            .as_bytes(),
        );
        body
    }

    #[test]
    fn multipart_fields_and_files() {
        let mut req = Request::builder(Method::Post, "/app")
            .header("Content-Type", "multipart/form-data; boundary=XbOuNdX")
            .body(multipart_body("XbOuNdX"))
            .build();
        parse(&mut req).expect("parse");
        assert_eq!(req.parameter("signal"), Some("s7"));
        let files = req.uploaded_files("upload");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].client_filename, "notes.txt");
        assert_eq!(files[0].content_type, "text/plain");
        assert_eq!(files[0].data, b"line one\r\nline two");
        assert_eq!(req.post_data_exceeded(), 0);
    }

    #[test]
    fn oversized_form_data_flags_not_fails() {
        let mut config = Configuration::default();
        config.max_form_data_size = 4;
        let mut req = Request::builder(Method::Post, "/app")
            .header("Content-Type", "multipart/form-data; boundary=XbOuNdX")
            .body(multipart_body("XbOuNdX"))
            .build();
        parse_request(&mut req, &config).expect("flagged, not failed");
        assert!(req.post_data_exceeded() > 0);
        assert!(req.uploaded_files("upload").is_empty());
        // Plain fields still decoded.
        assert_eq!(req.parameter("signal"), Some("s7"));
    }

    #[test]
    fn malformed_multipart_is_rejected() {
        let mut req = Request::builder(Method::Post, "/app")
            .header("Content-Type", "multipart/form-data; boundary=XbOuNdX")
            .body(b"--XbOuNdX\r\ngarbage without terminator".to_vec())
            .build();
        let err = parse(&mut req).unwrap_err();
        assert!(matches!(err, ParseError::Multipart(_)));
    }
}
