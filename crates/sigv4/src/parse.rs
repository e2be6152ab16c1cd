use std::time::Duration;

use errors::ErrorMetadata;

use crate::SigV4Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthLocation {
    Header,
    PresignedQuery { expires_in: Duration },
}

#[derive(Debug, Clone)]
pub struct ParsedAuth {
    pub access_key_id: String,
    pub date_stamp: String,
    pub region: String,
    pub service: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
    pub long_date: String,
    pub location: AuthLocation,
}

pub fn parse_auth(req: &SigV4Request) -> anyhow::Result<ParsedAuth> {
    if let Some(header) = find_header(req, "authorization") {
        return parse_header_auth(req, header);
    }
    if find_query(req, "X-Amz-Signature").is_some() {
        return parse_presigned_auth(req);
    }
    anyhow::bail!(ErrorMetadata::invalid_signature(
        "request carries neither an Authorization header nor presigned query parameters",
    ));
}

fn parse_header_auth(req: &SigV4Request, header: &str) -> anyhow::Result<ParsedAuth> {
    let malformed = || ErrorMetadata::invalid_signature("malformed Authorization header");

    let header = header
        .strip_prefix("AWS4-HMAC-SHA256 ")
        .ok_or_else(malformed)?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in header.split(',') {
        let part = part.trim();
        let (key, value) = part.split_once('=').ok_or_else(malformed)?;
        match key.trim() {
            "Credential" => credential = Some(value.trim()),
            "SignedHeaders" => signed_headers = Some(value.trim()),
            "Signature" => signature = Some(value.trim()),
            _ => {},
        }
    }
    let credential = credential.ok_or_else(malformed)?;
    let signed_headers = signed_headers.ok_or_else(malformed)?;
    let signature = signature.ok_or_else(malformed)?;

    let (access_key_id, date_stamp, region, service) = parse_credential_scope(credential)?;
    let long_date = find_header(req, "x-amz-date")
        .or_else(|| find_header(req, "date"))
        .ok_or_else(|| ErrorMetadata::invalid_signature("missing X-Amz-Date header"))?
        .to_string();

    Ok(ParsedAuth {
        access_key_id,
        date_stamp,
        region,
        service,
        signed_headers: signed_headers.split(';').map(|s| s.to_string()).collect(),
        signature: signature.to_string(),
        long_date,
        location: AuthLocation::Header,
    })
}

fn parse_presigned_auth(req: &SigV4Request) -> anyhow::Result<ParsedAuth> {
    let malformed = || ErrorMetadata::invalid_signature("malformed presigned query parameters");

    let algorithm = find_query(req, "X-Amz-Algorithm").ok_or_else(malformed)?;
    if algorithm != "AWS4-HMAC-SHA256" {
        anyhow::bail!(malformed());
    }
    let credential = find_query(req, "X-Amz-Credential").ok_or_else(malformed)?;
    let signed_headers = find_query(req, "X-Amz-SignedHeaders").ok_or_else(malformed)?;
    let signature = find_query(req, "X-Amz-Signature").ok_or_else(malformed)?;
    let long_date = find_query(req, "X-Amz-Date").ok_or_else(malformed)?;
    let expires: u64 = find_query(req, "X-Amz-Expires")
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;

    let (access_key_id, date_stamp, region, service) = parse_credential_scope(credential)?;

    Ok(ParsedAuth {
        access_key_id,
        date_stamp,
        region,
        service,
        signed_headers: signed_headers.split(';').map(|s| s.to_string()).collect(),
        signature: signature.to_string(),
        long_date: long_date.to_string(),
        location: AuthLocation::PresignedQuery {
            expires_in: Duration::from_secs(expires),
        },
    })
}

fn parse_credential_scope(credential: &str) -> anyhow::Result<(String, String, String, String)> {
    let malformed = || ErrorMetadata::invalid_signature(format!("malformed credential scope '{credential}'"));
    let mut parts = credential.splitn(5, '/');
    let access_key_id = parts.next().ok_or_else(malformed)?.to_string();
    let date_stamp = parts.next().ok_or_else(malformed)?.to_string();
    let region = parts.next().ok_or_else(malformed)?.to_string();
    let service = parts.next().ok_or_else(malformed)?.to_string();
    let terminator = parts.next().ok_or_else(malformed)?;
    if terminator != "aws4_request" {
        anyhow::bail!(malformed());
    }
    Ok((access_key_id, date_stamp, region, service))
}

fn find_header<'a>(req: &'a SigV4Request, name: &str) -> Option<&'a str> {
    req.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn find_query<'a>(req: &'a SigV4Request, name: &str) -> Option<&'a str> {
    req.query_pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
