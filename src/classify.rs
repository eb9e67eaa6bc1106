//! XML-CLI envelope handling and device error classification.
//!
//! The device always answers with something; absence of an error marker is
//! the success signal. [`classify_reply`] turns the raw text of one exchange
//! into `Ok` or exactly one typed failure, with structured errors taking
//! precedence over plain CLI error lines, which take precedence over
//! invalid-input markers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::XrError;

/// Opening of every request envelope.
pub const REQUEST_PREFIX: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><Request MajorVersion="1" MinorVersion="0">"#;
pub const REQUEST_SUFFIX: &str = "</Request>";

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid classifier regex {pattern}: {err}"),
    }
}

static ERROR_COUNT: Lazy<Regex> =
    Lazy::new(|| re(r#"<ResultSummary\b[^>]*\bErrorCount="(\d+)""#));
static ERROR_ELEMENT: Lazy<Regex> =
    Lazy::new(|| re(r#"<[A-Za-z][\w:.-]*\s[^>]*\bErrorCode="([^"]*)"[^>]*>"#));
static ERROR_MSG: Lazy<Regex> = Lazy::new(|| re(r#"\bErrorMsg="([^"]*)""#));
static CLI_ERROR: Lazy<Regex> = Lazy::new(|| re(r"ERROR: (0x[0-9a-fA-F]+)[ \t]*([^\r\n]*)"));
static INVALID_INPUT: Lazy<Regex> = Lazy::new(|| re(r"Invalid input detected"));
static CLI_PAYLOAD: Lazy<Regex> = Lazy::new(|| {
    re(r"(?s)<CLI>\s*<(?:Exec|Configuration)(?:\s[^>]*[^/])?>(.*?)</(?:Exec|Configuration)>")
});
static CLI_EMPTY: Lazy<Regex> = Lazy::new(|| re(r"<CLI>\s*<(?:Exec|Configuration)\b[^>]*/>"));
static ITERATOR_ID: Lazy<Regex> = Lazy::new(|| re(r#"\bIteratorID="([^"]+)""#));

/// Wraps a command body in the XML-CLI request envelope.
pub fn wrap_request(command: &str) -> String {
    format!("{REQUEST_PREFIX}{command}{REQUEST_SUFFIX}")
}

/// Request body running `command` in exec mode.
pub fn exec_command(command: &str) -> String {
    format!("<CLI><Exec>{}</Exec></CLI>", escape_xml(command))
}

/// Request body feeding `text` to the configuration target buffer.
pub fn config_command(text: &str) -> String {
    format!("<CLI><Configuration>{}</Configuration></CLI>", escape_xml(text))
}

/// Request body fetching the next chunk of an iterated reply.
pub fn get_next(iterator_id: &str) -> String {
    format!(r#"<GetNext IteratorID="{}"/>"#, escape_xml(iterator_id))
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape_xml(text: &str) -> String {
    // &amp; last so "&amp;lt;" decodes to "&lt;".
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

/// Drops the echoed request line from raw exchange output.
pub fn strip_echo(raw: &str) -> &str {
    match raw.find(REQUEST_SUFFIX) {
        Some(pos) => &raw[pos + REQUEST_SUFFIX.len()..],
        None => raw,
    }
}

/// The `<Response ...>...</Response>` part of raw exchange output, if any.
pub fn response_body(raw: &str) -> Option<&str> {
    let reply = strip_echo(raw);
    let start = reply.find("<Response")?;
    let body = &reply[start..];
    match body.find("</Response>") {
        Some(end) => Some(&body[..end + "</Response>".len()]),
        None => Some(body),
    }
}

/// Whether the reply part of `raw` has opened a `<Response>` that is not
/// closed yet. Error-looking text seen in that state is payload.
pub fn response_open(raw: &str) -> bool {
    let reply = strip_echo(raw);
    match reply.find("<Response") {
        Some(start) => !reply[start..].contains("</Response>"),
        None => false,
    }
}

/// Parses a plain `ERROR: 0x...` line into an [`XrError::XmlCli`].
pub fn parse_cli_error_line(text: &str) -> Option<XrError> {
    CLI_ERROR.captures(text).map(|caps| XrError::XmlCli {
        code: caps[1].to_string(),
        message: caps[0].trim_end().to_string(),
    })
}

fn structured_error(body: &str) -> Option<XrError> {
    let error_count = ERROR_COUNT
        .captures(body)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .unwrap_or(0);

    if let Some(caps) = ERROR_ELEMENT.captures(body) {
        let tag = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let message = ERROR_MSG
            .captures(tag)
            .map(|m| unescape_xml(&m[1]))
            .unwrap_or_default();
        return Some(XrError::XmlCli {
            code: unescape_xml(&caps[1]),
            message,
        });
    }

    if error_count > 0 {
        let message = ERROR_MSG
            .captures(body)
            .map(|m| unescape_xml(&m[1]))
            .unwrap_or_else(|| body.to_string());
        return Some(XrError::XmlCli {
            code: String::new(),
            message,
        });
    }
    None
}

/// Classifies the raw output of one exchange.
///
/// Returns `Ok(())` when no error marker is present.
pub fn classify_reply(raw: &str) -> Result<(), XrError> {
    let reply = strip_echo(raw);

    if let Some(body) = response_body(raw)
        && let Some(err) = structured_error(body)
    {
        return Err(err);
    }

    if let Some(err) = parse_cli_error_line(reply) {
        return Err(err);
    }

    if INVALID_INPUT.is_match(reply) {
        let message = cli_payload(raw).unwrap_or_else(|| reply.trim().to_string());
        return Err(XrError::InvalidInput(message.trim().to_string()));
    }

    Ok(())
}

/// Text content of the `<CLI><Exec>` or `<CLI><Configuration>` element, unescaped.
///
/// The payload is otherwise returned exactly as the device sent it.
pub fn cli_payload(raw: &str) -> Option<String> {
    let body = response_body(raw)?;
    if let Some(caps) = CLI_PAYLOAD.captures(body) {
        return Some(unescape_xml(&caps[1]));
    }
    if CLI_EMPTY.is_match(body) {
        return Some(String::new());
    }
    None
}

/// Iterator id announced by a partial reply.
pub fn iterator_id(raw: &str) -> Option<String> {
    let body = response_body(raw)?;
    let open_tag_end = body.find('>')?;
    ITERATOR_ID
        .captures(&body[..open_tag_end])
        .map(|caps| caps[1].to_string())
}
