use crate::{
    Header,
    SigV4Request,
};

/// Configuration for resolving the canonical `host` header value when the
/// gateway sits behind a proxy. Precedence, highest first:
/// `Forwarded: host="..."` -> configured `X-Forwarded-*` alias ->
/// `X-Forwarded-Host` (with `X-Forwarded-Port` applied if non-default) ->
/// literal `Host`.
#[derive(Debug, Clone, Default)]
pub struct HostPrecedence {
    /// Name of a configured alternate forwarded-host header, e.g.
    /// `X-Forwarded-For-Host`, checked before the standard `X-Forwarded-Host`.
    pub forwarded_host_alias: Option<String>,
    pub default_port: Option<u16>,
}

pub fn resolve_host(req: &SigV4Request) -> Option<String> {
    if let Some(forwarded) = find_header(&req.headers, "forwarded") {
        if let Some(host) = parse_forwarded_host(forwarded) {
            return Some(host);
        }
    }
    if let Some(alias) = &req.host_precedence.forwarded_host_alias {
        if let Some(value) = find_header(&req.headers, alias) {
            return Some(value.to_string());
        }
    }
    if let Some(host) = find_header(&req.headers, "x-forwarded-host") {
        let port = find_header(&req.headers, "x-forwarded-port");
        return Some(apply_port(host, port, req.host_precedence.default_port));
    }
    find_header(&req.headers, "host").map(|h| h.to_string())
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn parse_forwarded_host(value: &str) -> Option<String> {
    // `Forwarded: for=1.2.3.4;host="example.com";proto=https`
    value.split(';').find_map(|part| {
        let part = part.trim();
        let (key, val) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("host") {
            Some(val.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn apply_port(host: &str, port: Option<&str>, default_port: Option<u16>) -> String {
    let Some(port) = port else {
        return host.to_string();
    };
    if let Some(default_port) = default_port {
        if port == default_port.to_string() {
            return host.to_string();
        }
    }
    format!("{host}:{port}")
}
