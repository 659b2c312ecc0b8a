//! Probe output parsing
//!
//! The tool prints one JSON object per line. Lines that are not JSON objects
//! or carry no usable host are skipped.

use serde_json::{Map, Value};
use subdex_common::ProbeRecord;
use subdex_target_resolver::normalize;
use std::net::IpAddr;
use url::{Host, Url};

/// Parse every valid record in the tool's stdout.
pub fn parse_records(stdout: &str) -> Vec<ProbeRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(parse_record)
        .collect()
}

/// Parse one output line.
pub fn parse_record(line: &str) -> Option<ProbeRecord> {
    let Value::Object(mut map) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    let host = join_host(&mut map)?;
    let mut record = ProbeRecord::new(host);
    record.url = take_string(&mut map, &["url"]);
    record.status_code = take_u64(&mut map, &["status_code", "status-code"])
        .and_then(|c| u16::try_from(c).ok());
    record.title = take_string(&mut map, &["title"]);
    record.content_length = take_u64(&mut map, &["content_length", "content-length"]);
    record.webserver = take_string(&mut map, &["webserver"]);
    record.technologies = take_strings(&mut map, &["tech", "technologies"]);
    record.extra = map;
    Some(record)
}

// `input` is the hostname exactly as we handed it over. `host` is often the
// resolved address, which can never join the host set, so IP literals are
// skipped there.
fn join_host(map: &mut Map<String, Value>) -> Option<String> {
    if let Some(host) = map.get("input").and_then(Value::as_str).and_then(host_name) {
        map.remove("input");
        return Some(host);
    }
    if let Some(host) = map.get("host").and_then(Value::as_str).and_then(host_name) {
        map.remove("host");
        return Some(host);
    }
    map.get("url")
        .and_then(Value::as_str)
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| match u.host()? {
            Host::Domain(h) => normalize(h).ok(),
            Host::Ipv4(_) | Host::Ipv6(_) => None,
        })
}

fn host_name(raw: &str) -> Option<String> {
    let host = normalize(raw).ok()?;
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(host)
}

fn take_string(map: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.remove(*k) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn take_u64(map: &mut Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| map.remove(*k).and_then(|v| v.as_u64()))
}

fn take_strings(map: &mut Map<String, Value>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|k| match map.remove(*k) {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_line() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","url":"https://www.example.com","input":"WWW.example.com","host":"93.184.216.34","title":"Example","status_code":200,"content_length":1256,"tech":["Nginx","HSTS"],"webserver":"nginx"}"#;
        let r = parse_record(line).unwrap();
        assert_eq!(r.host, "www.example.com");
        assert_eq!(r.status_code, Some(200));
        assert_eq!(r.title.as_deref(), Some("Example"));
        assert_eq!(r.content_length, Some(1256));
        assert_eq!(r.technologies, vec!["Nginx", "HSTS"]);
        assert_eq!(r.webserver.as_deref(), Some("nginx"));
        assert_eq!(r.extra.get("host").and_then(Value::as_str), Some("93.184.216.34"));
        assert!(r.extra.contains_key("timestamp"));
    }

    #[test]
    fn falls_back_to_url_host() {
        let r = parse_record(r#"{"url":"http://api.example.com:8080/x","status-code":301}"#).unwrap();
        assert_eq!(r.host, "api.example.com");
        assert_eq!(r.status_code, Some(301));
    }

    #[test]
    fn resolved_address_is_not_a_join_host() {
        let line = r#"{"url":"https://www.example.com","host":"93.184.216.34","status_code":200}"#;
        let r = parse_record(line).unwrap();
        assert_eq!(r.host, "www.example.com");
        assert_eq!(r.extra.get("host").and_then(Value::as_str), Some("93.184.216.34"));

        assert!(parse_record(r#"{"host":"93.184.216.34","url":"http://10.0.0.1:8080"}"#).is_none());
    }

    #[test]
    fn skips_garbage_and_hostless_lines() {
        let out = "not json\n[1,2]\n{\"status_code\":200}\n\n{\"input\":\"a.example.com\"}\n{\"input\":\"b.exa";
        let records = parse_records(out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].host, "a.example.com");
    }
}
