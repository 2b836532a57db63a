use log::warn;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

/// Headers that only describe a single hop. The relay re-frames every body, so
/// upstream framing headers must not reach the client either.
pub const EXCLUDED_HEADERS: [&str; 11] = [
  "host",
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailers",
  "transfer-encoding",
  "upgrade",
  "content-length",
  "content-encoding",
];

pub const DEFAULT_USER_AGENT: &str = "AI-Proxy-Service/1.0";
pub const PROXY_MARKER: &str = "AI-Proxy-Service";

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_PROXY_BY: HeaderName = HeaderName::from_static("x-proxy-by");

type HeaderPair<'a> = (&'a str, &'a [u8]);

/// What the proxy knows about the inbound connection.
pub struct ForwardingInfo<'a> {
  pub client_ip: &'a str,
  pub scheme: &'a str,
  pub host: &'a [u8],
}

pub fn is_excluded(excluded: &[&str], name: &str) -> bool {
  excluded.iter().any(|candidate| candidate.eq_ignore_ascii_case(name))
}

/// Headers for the upstream request: the inbound ones minus the excluded set,
/// plus forwarding metadata.
pub fn outbound_headers<'a, I>(inbound: I, excluded: &[&str], info: &ForwardingInfo<'_>) -> HeaderMap
where
  I: IntoIterator<Item = HeaderPair<'a>>,
{
  let mut headers = copy_allowed(inbound, excluded);

  set_header(&mut headers, X_FORWARDED_FOR, info.client_ip.as_bytes());
  set_header(&mut headers, X_FORWARDED_PROTO, info.scheme.as_bytes());
  set_header(&mut headers, X_FORWARDED_HOST, info.host);
  set_header(&mut headers, X_REAL_IP, info.client_ip.as_bytes());

  if !headers.contains_key(USER_AGENT) {
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
  }

  headers
}

/// Headers for the client: the upstream ones minus the excluded set, plus the
/// proxy marker.
pub fn response_headers(upstream: &HeaderMap, excluded: &[&str]) -> HeaderMap {
  let pairs = upstream
    .iter()
    .map(|(name, value)| (name.as_str(), value.as_bytes()));

  let mut headers = copy_allowed(pairs, excluded);
  headers.insert(X_PROXY_BY, HeaderValue::from_static(PROXY_MARKER));
  headers
}

fn copy_allowed<'a, I>(source: I, excluded: &[&str]) -> HeaderMap
where
  I: IntoIterator<Item = HeaderPair<'a>>,
{
  let mut headers = HeaderMap::new();

  for (name, value) in source {
    if is_excluded(excluded, name) {
      continue;
    }

    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value)) {
      (Ok(name), Ok(value)) => {
        headers.append(name, value);
      }
      _ => warn!("Dropping unrepresentable header '{}'", name),
    }
  }

  headers
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &[u8]) {
  let value = HeaderValue::from_bytes(value).unwrap_or_else(|_| {
    warn!("Invalid value for '{}', sending it empty", name);
    HeaderValue::from_static("")
  });

  headers.insert(name, value);
}
