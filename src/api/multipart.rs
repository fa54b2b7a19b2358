//! Minimal `multipart/form-data` extraction for single-file uploads.

use anyhow::{anyhow, Result};

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Upload {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type, if that is what it is.
pub(crate) fn boundary(content_type: &str) -> Option<String> {
    let mut params = split_params(content_type).into_iter();
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty())
}

/// Body of the part named `field`.
pub(crate) fn extract_file(body: &[u8], boundary: &str, field: &str) -> Result<Upload> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let separator = format!("\r\n--{}", boundary).into_bytes();

    let mut pos = find(body, &delimiter).ok_or_else(|| anyhow!("multipart boundary not found"))?;
    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            break;
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let headers_len = find(&body[pos..], b"\r\n\r\n")
            .ok_or_else(|| anyhow!("multipart part headers not terminated"))?;
        let headers = String::from_utf8_lossy(&body[pos..pos + headers_len]);
        let content_start = pos + headers_len + 4;
        let content_len = find(&body[content_start..], &separator)
            .ok_or_else(|| anyhow!("multipart part not terminated"))?;
        let content = &body[content_start..content_start + content_len];

        if let Some((name, filename)) = disposition(&headers) {
            if name == field {
                return Ok(Upload {
                    filename,
                    data: content.to_vec(),
                });
            }
        }
        // Step past the CRLF so `pos` sits on the next delimiter.
        pos = content_start + content_len + 2;
    }
    Err(anyhow!("multipart field '{}' missing", field))
}

/// `(name, filename)` from a part's `Content-Disposition` header.
fn disposition(headers: &str) -> Option<(String, Option<String>)> {
    let line = headers.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;
    let mut name = None;
    let mut filename = None;
    for param in split_params(line).into_iter().skip(1) {
        if let Some((key, value)) = param.split_once('=') {
            let value = unquote(value.trim()).to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(value),
                "filename" => filename = Some(value),
                _ => {}
            }
        }
    }
    name.map(|name| (name, filename))
}

/// Split header parameters on `;`, leaving separators inside quoted strings alone.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            let disposition = match filename {
                Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
                None => format!("form-data; name=\"{}\"", name),
            };
            body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    #[test]
    fn boundary_is_parsed_from_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            boundary("Multipart/Form-Data; charset=utf-8; boundary=\"x y\"").as_deref(),
            Some("x y")
        );
        assert_eq!(boundary("image/png"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn extracts_named_file_part() -> Result<()> {
        let payload: &[u8] = b"\x89PNG\r\n--not-a-boundary\r\n\x00\x01";
        let body = form(
            "XyZ",
            &[
                ("note", None, b"hello"),
                ("file", Some("site.png"), payload),
            ],
        );
        let upload = extract_file(&body, "XyZ", "file")?;
        assert_eq!(upload.filename.as_deref(), Some("site.png"));
        assert_eq!(upload.data, payload);
        Ok(())
    }

    #[test]
    fn quoted_parameters_keep_separators() {
        let headers = "Content-Disposition: form-data; name=\"file\"; filename=\"a;b=c.png\"\r\nContent-Type: image/png";
        assert_eq!(
            disposition(headers),
            Some(("file".to_string(), Some("a;b=c.png".to_string())))
        );
        assert_eq!(
            boundary("multipart/form-data; boundary=\"x;y\"").as_deref(),
            Some("x;y")
        );
        assert_eq!(split_params(r#"a; b="c\";d"; e"#), vec!["a", " b=\"c\\\";d\"", " e"]);
    }

    #[test]
    fn missing_field_is_an_error() {
        let body = form("b", &[("other", Some("a.jpg"), b"data")]);
        assert!(extract_file(&body, "b", "file").is_err());
        assert!(extract_file(b"garbage", "b", "file").is_err());
    }
}
