//! Mirror node REST API over a [LocalLedger].
//!
//! Serves `GET /api/v1/topics/{topic_id}/messages` with the public mirror
//! node's paging: `limit`, `order` and a `sequencenumber=gt:N` (or `lt:N`)
//! cursor, plus a `links.next` path while more messages remain.
use std::net::SocketAddr;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::Error;
use crate::ids::TopicId;
use crate::ledger::local::StoredMessage;
use crate::ledger::LocalLedger;
use crate::mirror_rpc::{ErrorResponse, Links, Order, TopicMessage, TopicMessagesResponse};

pub const API_PREFIX: &str = "/api/v1";
const DEFAULT_LIMIT: usize = 25;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
    order: Option<Order>,
    sequencenumber: Option<String>,
}

/// `sequencenumber` filter, e.g. `gt:10`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceFilter {
    Eq(u64),
    Gt(u64),
    Gte(u64),
    Lt(u64),
    Lte(u64),
}

impl SequenceFilter {
    fn accepts(&self, seq: u64) -> bool {
        match *self {
            SequenceFilter::Eq(n) => seq == n,
            SequenceFilter::Gt(n) => seq > n,
            SequenceFilter::Gte(n) => seq >= n,
            SequenceFilter::Lt(n) => seq < n,
            SequenceFilter::Lte(n) => seq <= n,
        }
    }
}

impl FromStr for SequenceFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (op, value) = s.split_once(':').unwrap_or(("eq", s));
        let n: u64 = value
            .parse()
            .map_err(|_| format!("Invalid parameter: sequencenumber {}", s))?;
        match op {
            "eq" => Ok(SequenceFilter::Eq(n)),
            "gt" => Ok(SequenceFilter::Gt(n)),
            "gte" => Ok(SequenceFilter::Gte(n)),
            "lt" => Ok(SequenceFilter::Lt(n)),
            "lte" => Ok(SequenceFilter::Lte(n)),
            _ => Err(format!("Invalid parameter: sequencenumber {}", s)),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

fn to_wire(message: &StoredMessage) -> TopicMessage {
    TopicMessage {
        consensus_timestamp: message.consensus_timestamp.to_string(),
        message: base64::engine::general_purpose::STANDARD.encode(&message.message),
        sequence_number: message.sequence_number,
        topic_id: Some(message.topic_id.to_string()),
        payer_account_id: Some(message.payer.to_string()),
        running_hash: None,
    }
}

async fn topic_messages(
    State(ledger): State<LocalLedger>,
    Path(topic_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Response {
    let topic_id = match TopicId::from_str(&topic_id) {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid parameter: topic.id {}", topic_id),
            )
        }
    };
    let filter = match query.sequencenumber.as_deref().map(SequenceFilter::from_str) {
        Some(Err(message)) => return error_response(StatusCode::BAD_REQUEST, message),
        Some(Ok(filter)) => Some(filter),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let order = query.order.unwrap_or_default();

    let Some(mut messages) = ledger.messages(topic_id) else {
        return error_response(StatusCode::NOT_FOUND, "Not found");
    };
    if let Some(filter) = filter {
        messages.retain(|m| filter.accepts(m.sequence_number));
    }
    if order == Order::Desc {
        messages.reverse();
    }

    let has_more = messages.len() > limit;
    messages.truncate(limit);
    let next = match messages.last() {
        Some(last) if has_more => {
            let op = match order {
                Order::Asc => "gt",
                Order::Desc => "lt",
            };
            Some(format!(
                "{}/topics/{}/messages?limit={}&order={}&sequencenumber={}:{}",
                API_PREFIX,
                topic_id,
                limit,
                order.as_str(),
                op,
                last.sequence_number
            ))
        }
        _ => None,
    };

    Json(TopicMessagesResponse {
        messages: messages.iter().map(to_wire).collect(),
        links: Links { next },
    })
    .into_response()
}

pub fn router(ledger: LocalLedger) -> Router {
    Router::new()
        .route(
            &format!("{}/topics/{{topic_id}}/messages", API_PREFIX),
            get(topic_messages),
        )
        .with_state(ledger)
}

/// Bind `addr` and serve the ledger's topics in the background.
///
/// Returns the bound address, useful when `addr` asks for port 0.
pub async fn serve(ledger: LocalLedger, addr: SocketAddr) -> Result<SocketAddr, Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(ledger);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!(error = %e, "local mirror node stopped");
        }
    });
    info!("local mirror node listening on http://{}{}", local_addr, API_PREFIX);
    Ok(local_addr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ids::AccountId;
    use crate::keys::PrivateKey;
    use crate::ledger::LedgerClient;
    use crate::mirror::{MirrorNode, Options};
    use crate::transaction::TopicMessageSubmission;

    #[test]
    fn parses_sequence_filters() {
        assert_eq!("gt:4".parse::<SequenceFilter>(), Ok(SequenceFilter::Gt(4)));
        assert_eq!("lte:2".parse::<SequenceFilter>(), Ok(SequenceFilter::Lte(2)));
        assert_eq!("7".parse::<SequenceFilter>(), Ok(SequenceFilter::Eq(7)));
        assert!("ne:1".parse::<SequenceFilter>().is_err());
        assert!("gt:x".parse::<SequenceFilter>().is_err());
    }

    async fn populated(count: u64) -> (LocalLedger, TopicId) {
        let ledger = LocalLedger::new(AccountId::new(0, 0, 2), PrivateKey::generate());
        let topic = ledger.create_topic(None).await.unwrap().topic_id().unwrap();
        for i in 1..=count {
            TopicMessageSubmission::new(topic, format!("{{\"n\":{}}}", i))
                .freeze_with(&ledger)
                .unwrap()
                .execute(&ledger)
                .await
                .unwrap()
                .validate()
                .unwrap();
        }
        (ledger, topic)
    }

    fn mirror_for(addr: SocketAddr, page_limit: u32, order: Order) -> MirrorNode {
        MirrorNode::new(
            &format!("http://{}{}", addr, API_PREFIX),
            Options {
                allow_http: true,
                page_limit,
                order,
                ..Options::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pages_through_a_topic() {
        let (ledger, topic) = populated(5).await;
        let addr = serve(ledger, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mirror = mirror_for(addr, 2, Order::Asc);

        let messages = mirror.topic_messages(topic).await.unwrap();
        assert_eq!(
            messages.iter().map(|m| m.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(messages[4].payload["n"], 5);
    }

    #[tokio::test]
    async fn pages_backwards() {
        let (ledger, topic) = populated(3).await;
        let addr = serve(ledger, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mirror = mirror_for(addr, 2, Order::Desc);

        let messages = mirror.topic_messages(topic).await.unwrap();
        assert_eq!(
            messages.iter().map(|m| m.sequence_number).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[tokio::test]
    async fn unknown_topic_is_not_found() {
        let ledger = LocalLedger::new(AccountId::new(0, 0, 2), PrivateKey::generate());
        let addr = serve(ledger, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mirror = mirror_for(addr, 100, Order::Asc);

        let err = mirror
            .topic_messages(TopicId::new(0, 0, 404))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn last_page_has_no_next_link() {
        let (ledger, topic) = populated(2).await;
        let addr = serve(ledger, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mirror = mirror_for(addr, 2, Order::Asc);

        let url = format!(
            "http://{}{}/topics/{}/messages?limit=2&order=asc",
            addr, API_PREFIX, topic
        );
        let page = mirror
            .get_topic_messages(url.parse().unwrap())
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.links.next, None);
    }
}
