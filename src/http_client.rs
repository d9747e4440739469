use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::warn;

use crate::error::Error;

pub static VERSION: &str = env!("CARGO_PKG_VERSION");
pub static CLIENT_NAME: &str = "hcs-purchase-records";

/// Client name and version, then `headers` on top.
///
/// An entry whose name or value is not a valid header is left out.
fn default_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut http_headers = header::HeaderMap::new();
    http_headers.insert("X-Client-Name", HeaderValue::from_static(CLIENT_NAME));
    http_headers.insert("X-Client-Version", HeaderValue::from_static(VERSION));

    for (key, value) in headers {
        match (
            HeaderName::try_from(key.as_str()),
            HeaderValue::from_str(value),
        ) {
            (Ok(header_name), Ok(header_value)) => {
                http_headers.insert(header_name, header_value);
            }
            _ => warn!(header = %key, "skipping invalid header"),
        }
    }
    http_headers
}

/// Build the HTTP client used against the mirror node.
pub fn create_client(timeout: Duration, headers: &HashMap<String, String>) -> Result<Client, Error> {
    Ok(Client::builder()
        .timeout(timeout)
        .default_headers(default_headers(headers))
        .build()?)
}

pub use create_client as HTTPClient;
