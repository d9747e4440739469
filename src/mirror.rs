use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use futures::TryFutureExt;
use reqwest::Url;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, InvalidMirrorUrl};
use crate::http_client::create_client;
use crate::ids::TopicId;
use crate::mirror_rpc::{Order, TopicMessagesResponse};
use crate::record::{decode_payload, filter_by_identity, DecodedMessage, FetchedRecord};

pub const TESTNET_MIRROR_URL: &str = "https://testnet.mirrornode.hedera.com/api/v1";
pub const MAINNET_MIRROR_URL: &str = "https://mainnet-public.mirrornode.hedera.com/api/v1";
pub const PREVIEWNET_MIRROR_URL: &str = "https://previewnet.mirrornode.hedera.com/api/v1";
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
/// Upper bound for the delay between two polls of [MirrorNode::wait_for_records]
pub const MAX_POLL_DELAY: Duration = Duration::from_secs(60);

/// Public mirror node of a named network
pub fn network_mirror_url(network: &str) -> Option<&'static str> {
    match network {
        "mainnet" => Some(MAINNET_MIRROR_URL),
        "testnet" => Some(TESTNET_MIRROR_URL),
        "previewnet" => Some(PREVIEWNET_MIRROR_URL),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Options {
    /// If true, using a non HTTPS mirror node will not throw an error
    pub allow_http: bool,
    /// Timeout in seconds (default: 10)
    pub timeout: u64,
    /// Additionnal headers to use while requesting the mirror node
    pub headers: HashMap<String, String>,
    /// Messages per page, at most 100 (default: 100)
    pub page_limit: u32,
    /// Sort order of the scan (default: ascending)
    pub order: Order,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            allow_http: false,
            timeout: 10,
            headers: Default::default(),
            page_limit: DEFAULT_PAGE_LIMIT,
            order: Order::Asc,
        }
    }
}

/// Read side of the consensus service.
///
/// The mirror node indexes topic messages some seconds after consensus and
/// serves them page by page; every page links to the next one until the
/// listing is exhausted.
#[derive(Debug)]
pub struct MirrorNode {
    client: reqwest::Client,
    base_url: Url,
    page_limit: u32,
    order: Order,
}

impl MirrorNode {
    /// # Instantiate a new [MirrorNode]
    ///
    /// `base_url` is the API root, e.g. [TESTNET_MIRROR_URL].
    ///
    /// ```rust
    /// use hcs_purchase_records::mirror::{MirrorNode, Options, TESTNET_MIRROR_URL};
    /// let mirror = MirrorNode::new(TESTNET_MIRROR_URL, Options::default());
    /// assert!(mirror.is_ok());
    /// ```
    pub fn new(base_url: &str, opts: Options) -> Result<Self, Error> {
        let base_url = Url::from_str(base_url)
            .map_err(|e| Error::InvalidMirror(InvalidMirrorUrl::InvalidUri(e.to_string())))?;
        let allow_http = opts.allow_http;
        match base_url.scheme() {
            "https" => {
                // good
            }
            "http" if allow_http => {
                // good
            }
            "http" if !allow_http => {
                return Err(Error::InvalidMirror(InvalidMirrorUrl::UnsecureHttpNotAllowed));
            }
            _ => {
                return Err(Error::InvalidMirror(InvalidMirrorUrl::NotHttpScheme));
            }
        };

        Ok(MirrorNode {
            client: create_client(Duration::from_secs(opts.timeout), &opts.headers)?,
            base_url,
            page_limit: opts.page_limit.clamp(1, DEFAULT_PAGE_LIMIT),
            order: opts.order,
        })
    }

    fn first_page_url(&self, topic_id: TopicId) -> Result<Url, Error> {
        let raw = format!(
            "{}/topics/{}/messages",
            self.base_url.as_str().trim_end_matches('/'),
            topic_id
        );
        let mut url = Url::from_str(&raw)
            .map_err(|e| Error::InvalidMirror(InvalidMirrorUrl::InvalidUri(e.to_string())))?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_limit.to_string())
            .append_pair("order", self.order.as_str());
        Ok(url)
    }

    /// `links.next` is a host relative path; absolute links are taken as is.
    fn resolve_next(&self, next: &str) -> Result<Url, Error> {
        self.base_url
            .join(next)
            .map_err(|e| Error::InvalidMirror(InvalidMirrorUrl::InvalidUri(e.to_string())))
    }

    /// # Fetch a single page of topic messages
    ///
    /// A non-success status is reported as [Error::HttpStatus].
    pub async fn get_topic_messages(&self, url: Url) -> Result<TopicMessagesResponse, Error> {
        let res = self
            .client
            .get(url.clone())
            .send()
            .map_err(Error::NetworkError)
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        res.json().map_err(Error::NetworkError).await
    }

    /// # Read every message of a topic
    ///
    /// Follows `links.next` until the listing ends and decodes each payload
    /// from base64 JSON. Payloads that do not decode are skipped with a
    /// warning. Any failed page fails the whole scan: no partial result is
    /// returned, the caller should retry the scan.
    pub async fn topic_messages(&self, topic_id: TopicId) -> Result<Vec<DecodedMessage>, Error> {
        let mut decoded = Vec::new();
        let mut processed = 0usize;
        let mut next_url = Some(self.first_page_url(topic_id)?);

        info!(topic = %topic_id, "starting mirror node query for all messages (using pagination)");

        while let Some(url) = next_url.take() {
            let page = self.get_topic_messages(url.clone()).await?;
            info!(
                "[pagination] fetched {} messages from {}",
                page.messages.len(),
                relative_path(&url)
            );

            for message in page.messages {
                processed += 1;
                match decode_payload(&message.message) {
                    Ok(payload) => decoded.push(DecodedMessage {
                        consensus_timestamp: message.consensus_timestamp,
                        sequence_number: message.sequence_number,
                        payload,
                    }),
                    Err(e) => warn!(
                        timestamp = %message.consensus_timestamp,
                        error = %e,
                        "[warning] failed to parse message content"
                    ),
                }
            }

            next_url = match page.links.next {
                Some(next) => Some(self.resolve_next(&next)?),
                None => None,
            };
        }

        info!(
            topic = %topic_id,
            processed,
            "completed query, total messages processed in topic: {}",
            processed
        );
        Ok(decoded)
    }

    /// # Read every purchase record of `identity` on a topic
    ///
    /// Full scan followed by [filter_by_identity]; an identity without
    /// records yields an empty list.
    pub async fn fetch_records_by_identity(
        &self,
        topic_id: TopicId,
        identity: &str,
    ) -> Result<Vec<FetchedRecord>, Error> {
        let messages = self.topic_messages(topic_id).await?;
        Ok(filter_by_identity(&messages, identity))
    }

    /// # Poll until `expected` records of `identity` are indexed
    ///
    /// Scans up to `max_attempts` times, doubling the delay between scans
    /// from `initial_delay` up to [MAX_POLL_DELAY]. Failed scans are retried.
    /// When the records never all show up the error comes with the records of
    /// the last successful scan, if any.
    pub async fn wait_for_records(
        &self,
        topic_id: TopicId,
        identity: &str,
        expected: usize,
        max_attempts: u32,
        initial_delay: Duration,
    ) -> Result<Vec<FetchedRecord>, (Error, Option<Vec<FetchedRecord>>)> {
        let mut delay = initial_delay;
        let mut last_records: Option<Vec<FetchedRecord>> = None;
        let mut last_error: Option<Error> = None;
        let attempts = max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.fetch_records_by_identity(topic_id, identity).await {
                Ok(records) if records.len() >= expected => return Ok(records),
                Ok(records) => {
                    debug!(
                        attempt,
                        found = records.len(),
                        expected,
                        "records not indexed yet"
                    );
                    last_records = Some(records);
                    last_error = None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "mirror node scan failed, will retry");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_POLL_DELAY);
            }
        }

        match (last_error, last_records) {
            (Some(e), None) => Err((e, None)),
            (_, records) => Err((
                Error::WaitRecordsTimeout {
                    expected,
                    found: records.as_ref().map_or(0, Vec::len),
                    attempts,
                },
                records,
            )),
        }
    }
}

fn relative_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod test {
    use base64::Engine;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::record::PurchaseRecord;

    const TOPIC: TopicId = TopicId::new(0, 0, 1001);
    const MESSAGES_PATH: &str = "/api/v1/topics/0.0.1001/messages";

    /// Matches the first page of a scan, the only request without a cursor.
    struct NoCursor;

    impl Match for NoCursor {
        fn matches(&self, request: &Request) -> bool {
            !request
                .url
                .query_pairs()
                .any(|(key, _)| key == "sequencenumber")
        }
    }

    fn encode(payload: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(payload)
    }

    fn entry(seq: u64, identity: &str) -> serde_json::Value {
        let record = PurchaseRecord::simulated(identity, seq, "2024-05-01");
        json!({
            "consensus_timestamp": format!("1700000000.{:09}", seq),
            "message": encode(&serde_json::to_string(&record).unwrap()),
            "sequence_number": seq,
            "topic_id": "0.0.1001"
        })
    }

    fn page(entries: Vec<serde_json::Value>, next: Option<&str>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "messages": entries,
            "links": {"next": next}
        }))
    }

    fn mirror(server: &MockServer, page_limit: u32) -> MirrorNode {
        MirrorNode::new(
            &format!("{}/api/v1", server.uri()),
            Options {
                allow_http: true,
                page_limit,
                ..Options::default()
            },
        )
        .unwrap()
    }

    fn cursor(after: u64) -> String {
        format!("{}?limit=2&order=asc&sequencenumber=gt:{}", MESSAGES_PATH, after)
    }

    #[test]
    fn named_networks_have_public_mirrors() {
        assert_eq!(network_mirror_url("testnet"), Some(TESTNET_MIRROR_URL));
        assert_eq!(network_mirror_url("mainnet"), Some(MAINNET_MIRROR_URL));
        assert_eq!(network_mirror_url("localnet"), None);
    }

    #[test]
    fn mirror_new() {
        assert!(MirrorNode::new("https://mirror/api/v1", Options::default()).is_ok());
        assert!(matches!(
            MirrorNode::new("http://mirror/api/v1", Options::default()).err(),
            Some(Error::InvalidMirror(InvalidMirrorUrl::UnsecureHttpNotAllowed))
        ));
        assert!(matches!(
            MirrorNode::new("ftp://mirror", Options::default()).err(),
            Some(Error::InvalidMirror(InvalidMirrorUrl::NotHttpScheme))
        ));
        assert!(matches!(
            MirrorNode::new("", Options::default()).err(),
            Some(Error::InvalidMirror(InvalidMirrorUrl::InvalidUri(_)))
        ));
        let http = MirrorNode::new(
            "http://mirror/api/v1",
            Options {
                allow_http: true,
                ..Options::default()
            },
        );
        assert!(http.is_ok());
    }

    #[test]
    fn builds_first_page_url() {
        let mirror = MirrorNode::new(
            "https://testnet.mirrornode.hedera.com/api/v1/",
            Options::default(),
        )
        .unwrap();
        assert_eq!(
            mirror.first_page_url(TOPIC).unwrap().as_str(),
            "https://testnet.mirrornode.hedera.com/api/v1/topics/0.0.1001/messages?limit=100&order=asc"
        );
        assert_eq!(
            mirror
                .resolve_next("/api/v1/topics/0.0.1001/messages?sequencenumber=gt:100")
                .unwrap()
                .as_str(),
            "https://testnet.mirrornode.hedera.com/api/v1/topics/0.0.1001/messages?sequencenumber=gt:100"
        );
    }

    #[tokio::test]
    async fn follows_every_page_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .and(query_param("limit", "2"))
            .and(query_param("order", "asc"))
            .and(NoCursor)
            .respond_with(page(vec![entry(1, "alice"), entry(2, "bob")], Some(&cursor(2))))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .and(query_param("sequencenumber", "gt:2"))
            .respond_with(page(vec![entry(3, "alice"), entry(4, "alice")], Some(&cursor(4))))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .and(query_param("sequencenumber", "gt:4"))
            .respond_with(page(vec![entry(5, "bob")], None))
            .expect(2)
            .mount(&server)
            .await;

        // two scans below, each visiting every page once
        let mirror = mirror(&server, 2);
        let messages = mirror.topic_messages(TOPIC).await.unwrap();
        assert_eq!(
            messages.iter().map(|m| m.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );

        let alice = mirror.fetch_records_by_identity(TOPIC, "alice").await.unwrap();
        assert_eq!(
            alice.iter().map(|r| r.sequence_number).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
    }

    #[tokio::test]
    async fn skips_malformed_entries() {
        let server = MockServer::start().await;
        let broken = json!({
            "consensus_timestamp": "1700000000.000000009",
            "message": encode("not json at all"),
            "sequence_number": 9
        });
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .respond_with(page(
                vec![entry(1, "alice"), broken, entry(2, "alice"), entry(3, "alice")],
                None,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mirror = mirror(&server, 100);
        let messages = mirror.topic_messages(TOPIC).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.sequence_number != 9));
    }

    #[tokio::test]
    async fn server_error_fails_the_scan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .and(NoCursor)
            .respond_with(page(vec![entry(1, "alice")], Some(&cursor(1))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .and(query_param("sequencenumber", "gt:1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mirror = mirror(&server, 2);
        let err = mirror
            .fetch_records_by_identity(TOPIC, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn unknown_identity_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .respond_with(page(vec![entry(1, "alice")], None))
            .mount(&server)
            .await;

        let records = mirror(&server, 100)
            .fetch_records_by_identity(TOPIC, "carol")
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn waits_until_records_are_indexed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .respond_with(page(vec![entry(1, "alice")], None))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .respond_with(page(vec![entry(1, "alice"), entry(2, "alice")], None))
            .mount(&server)
            .await;

        let records = mirror(&server, 100)
            .wait_for_records(TOPIC, "alice", 2, 5, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn wait_gives_up_with_last_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MESSAGES_PATH))
            .respond_with(page(vec![entry(1, "alice")], None))
            .expect(3)
            .mount(&server)
            .await;

        let (err, records) = mirror(&server, 100)
            .wait_for_records(TOPIC, "alice", 2, 3, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::WaitRecordsTimeout {
                expected: 2,
                found: 1,
                attempts: 3
            }
        ));
        assert_eq!(records.map(|r| r.len()), Some(1));
    }
}
