use url::form_urlencoded;

type QueryPair = (String, String);

/// Joins the upstream base URL and the inbound path with exactly one slash and
/// appends the query, if any. Dot segments are left for the upstream to see.
pub fn build_target_url(base_url: &str, path: &str, query: &[QueryPair]) -> String {
  let base_url = base_url.trim_end_matches('/');
  let path = path.trim_start_matches('/');

  let mut url = if path.is_empty() {
    String::from(base_url)
  } else {
    format!("{}/{}", base_url, path)
  };

  if !query.is_empty() {
    let query_string = form_urlencoded::Serializer::new(String::new())
      .extend_pairs(query.iter())
      .finish();

    url.push('?');
    url.push_str(&query_string);
  }

  url
}

/// Decodes a raw query string into ordered pairs, keeping repeated keys.
pub fn parse_query(query_string: &str) -> Vec<QueryPair> {
  form_urlencoded::parse(query_string.as_bytes())
    .into_owned()
    .collect()
}
