//! Per-entity row templates and action bindings.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::collection::Entry;
use super::error::{RenderError, json_kind};
use super::gateway::ApiRequest;
use super::panel::{
    BulkActionSpec, EntityKind, PanelTemplate, RenderedRow, RowAction, RowActionKind,
};

pub const TOPIC_DELETE_PROMPT: &str =
    "Are you sure you want to delete this topic? This will remove all subscribers and child topics.";
pub const SUBSCRIBER_DELETE_PROMPT: &str = "Are you sure you want to delete this subscriber?";
pub const MAPPING_DELETE_PROMPT: &str = "Are you sure you want to delete this mapping?";
pub const RELAY_DELETE_PROMPT: &str = "Are you sure you want to delete this relay?";

pub const ADD_MAPPING_FAILED: &str = "The broker was unable to add the mapping, try again!";
pub const ADD_RELAY_FAILED: &str = "The broker was unable to add the relay, try again!";

#[derive(Debug, Deserialize)]
struct TopicRecord {
    #[serde(rename = "topicID", deserialize_with = "identifier")]
    topic_id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "fullTopicString", default)]
    full_topic_string: String,
    #[serde(default)]
    root: bool,
    #[serde(default)]
    leaf: bool,
}

#[derive(Debug, Deserialize)]
struct SubscriberRecord {
    #[serde(rename = "subscriberID", deserialize_with = "identifier")]
    subscriber_id: String,
    #[serde(rename = "originProtocol", default)]
    origin_protocol: String,
    #[serde(default)]
    host: Value,
    #[serde(default)]
    port: Value,
    #[serde(default)]
    topic: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolStatsRecord {
    protocol_server: String,
    #[serde(default)]
    total_messages_sent: u64,
    #[serde(default)]
    total_messages_received: u64,
    #[serde(default)]
    total_requests: u64,
    #[serde(default)]
    total_bad_requests: u64,
    #[serde(default)]
    total_errors: u64,
}

#[derive(Debug, Deserialize)]
struct ProtocolServerRecord {
    #[serde(default)]
    host: Value,
    #[serde(default)]
    port: Value,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Accepts string or numeric identifiers; blanks are rejected.
fn identifier<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) if !id.trim().is_empty() => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!(
            "identifier must be a non-empty string or number, got {}",
            json_kind(&other)
        ))),
    }
}

fn decode<T: DeserializeOwned>(kind: EntityKind, value: &Value) -> Result<T, RenderError> {
    T::deserialize(value).map_err(|err| RenderError::MalformedRecord {
        kind: kind.label(),
        reason: err.to_string(),
    })
}

/// Display text of a scalar cell; `null` renders blank.
pub fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn topic_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let topic: TopicRecord = decode(EntityKind::Topic, entry.value())?;
    Ok(vec![RenderedRow::keyed(
        topic.topic_id,
        vec![
            topic.name,
            topic.full_topic_string,
            topic.root.to_string(),
            topic.leaf.to_string(),
        ],
    )])
}

fn subscriber_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let subscriber: SubscriberRecord = decode(EntityKind::Subscriber, entry.value())?;
    Ok(vec![RenderedRow::keyed(
        subscriber.subscriber_id,
        vec![
            subscriber.origin_protocol,
            cell(&subscriber.host),
            cell(&subscriber.port),
            cell(&subscriber.topic),
        ],
    )])
}

fn topic_subscriber_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let subscriber: SubscriberRecord = decode(EntityKind::Subscriber, entry.value())?;
    Ok(vec![RenderedRow::plain(vec![
        subscriber.origin_protocol,
        cell(&subscriber.host),
        cell(&subscriber.port),
    ])])
}

/// `from -> [to, ...]` becomes one row per target. Deleting any of them
/// deletes every mapping of the source topic.
fn mapping_rows(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let from = entry.key().ok_or_else(|| RenderError::MalformedRecord {
        kind: EntityKind::Mapping.label(),
        reason: "mappings must be keyed by source topic".to_string(),
    })?;
    let targets = match entry.value() {
        Value::Array(targets) => targets.iter().map(cell).collect::<Vec<_>>(),
        Value::String(target) => vec![target.clone()],
        other => {
            return Err(RenderError::MalformedRecord {
                kind: EntityKind::Mapping.label(),
                reason: format!("targets of {from} are a {}", json_kind(other)),
            });
        }
    };
    Ok(targets
        .into_iter()
        .map(|to| {
            RenderedRow::keyed(format!("{from} -> {to}"), vec![from.to_string(), to])
                .with_target(from)
        })
        .collect())
}

fn relay_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let id = entry.key().ok_or_else(|| RenderError::MalformedRecord {
        kind: EntityKind::Relay.label(),
        reason: "relays must be keyed by relay id".to_string(),
    })?;
    Ok(vec![RenderedRow::keyed(id, vec![id.to_string(), cell(entry.value())])])
}

fn protocol_server_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let server: ProtocolServerRecord = decode(EntityKind::Protocol, entry.value())?;
    Ok(vec![RenderedRow::plain(vec![
        server.kind,
        cell(&server.host),
        cell(&server.port),
    ])])
}

fn protocol_stats_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    let stats: ProtocolStatsRecord = decode(EntityKind::Statistic, entry.value())?;
    Ok(vec![RenderedRow::plain(vec![
        stats.protocol_server,
        stats.total_messages_sent.to_string(),
        stats.total_messages_received.to_string(),
        stats.total_requests.to_string(),
        stats.total_bad_requests.to_string(),
        stats.total_errors.to_string(),
    ])])
}

fn log_line_row(entry: Entry<'_>) -> Result<Vec<RenderedRow>, RenderError> {
    Ok(vec![RenderedRow::plain(vec![cell(entry.value())])])
}

fn no_actions(_: &RenderedRow) -> Vec<RowAction> {
    Vec::new()
}

fn delete_action(request: ApiRequest, prompt: &str, failure_message: &'static str) -> RowAction {
    RowAction {
        kind: RowActionKind::Delete,
        request,
        confirm: Some(prompt.to_string()),
        failure_message,
    }
}

fn topic_actions(row: &RenderedRow) -> Vec<RowAction> {
    let Some(id) = row.target.as_deref() else {
        return Vec::new();
    };
    vec![
        delete_action(
            ApiRequest::delete("topics/delete/single").with_query("topicID", id),
            TOPIC_DELETE_PROMPT,
            "Unable to delete the topic!",
        ),
        RowAction {
            kind: RowActionKind::ShowDetail,
            request: ApiRequest::get(format!("topics/get/{id}/subscriber/all")),
            confirm: None,
            failure_message: "Unable to fetch the subscribers of the topic!",
        },
    ]
}

fn subscriber_actions(row: &RenderedRow) -> Vec<RowAction> {
    row.target
        .as_deref()
        .map(|id| {
            vec![delete_action(
                ApiRequest::delete("subscriber/delete/single").with_query("subscriberID", id),
                SUBSCRIBER_DELETE_PROMPT,
                "Unable to delete the subscriber!",
            )]
        })
        .unwrap_or_default()
}

fn mapping_actions(row: &RenderedRow) -> Vec<RowAction> {
    row.target
        .as_deref()
        .map(|from| {
            vec![delete_action(
                ApiRequest::delete("config/mapping/delete/single").with_query("topic", from),
                MAPPING_DELETE_PROMPT,
                "Unable to remove mapping!",
            )]
        })
        .unwrap_or_default()
}

fn relay_actions(row: &RenderedRow) -> Vec<RowAction> {
    row.target
        .as_deref()
        .map(|id| {
            vec![delete_action(
                ApiRequest::delete("config/relay/delete/single").with_query("relayID", id),
                RELAY_DELETE_PROMPT,
                "Unable to remove relay!",
            )]
        })
        .unwrap_or_default()
}

pub static PROTOCOLS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Protocol,
    title: "Protocol servers",
    columns: &["Type", "Host", "Port"],
    widths: &[20, 40, 10],
    empty_text: "No protocol servers running",
    rows: protocol_server_row,
    bind: no_actions,
    bulk_delete: None,
};

pub static TOPICS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Topic,
    title: "Topics",
    columns: &["Name", "Full topic", "Root", "Leaf"],
    widths: &[24, 50, 6, 6],
    empty_text: "No topics returned from TopicService",
    rows: topic_row,
    bind: topic_actions,
    bulk_delete: Some(BulkActionSpec {
        path: "topics/delete/all",
        prompt: "Are you sure you want to delete all topics?",
        failure_message: "Unable to delete all topics!",
    }),
};

pub static SUBSCRIBERS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Subscriber,
    title: "Subscribers",
    columns: &["Protocol", "Host", "Port", "Topic"],
    widths: &[12, 30, 8, 40],
    empty_text: "No subscribers returned from SubscriptionService",
    rows: subscriber_row,
    bind: subscriber_actions,
    bulk_delete: Some(BulkActionSpec {
        path: "subscriber/delete/all",
        prompt: "Are you sure you want to delete all subscribers?",
        failure_message: "Unable to delete all subscribers!",
    }),
};

pub static TOPIC_SUBSCRIBERS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Subscriber,
    title: "Subscribers of topic",
    columns: &["Protocol", "Host", "Port"],
    widths: &[12, 40, 8],
    empty_text: "No subscribers",
    rows: topic_subscriber_row,
    bind: no_actions,
    bulk_delete: None,
};

pub static MAPPINGS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Mapping,
    title: "Mappings",
    columns: &["From topic", "To topic"],
    widths: &[40, 40],
    empty_text: "No mappings returned from TopicService",
    rows: mapping_rows,
    bind: mapping_actions,
    bulk_delete: Some(BulkActionSpec {
        path: "config/mapping/delete/all",
        prompt: "Are you sure you want to delete all mappings?",
        failure_message: "Unable to delete all mappings!",
    }),
};

pub static RELAYS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Relay,
    title: "Relays",
    columns: &["Relay", "Subscription reference"],
    widths: &[24, 70],
    empty_text: "No relays registered",
    rows: relay_row,
    bind: relay_actions,
    bulk_delete: Some(BulkActionSpec {
        path: "config/relay/delete/all",
        prompt: "Are you sure you want to delete all relays?",
        failure_message: "Unable to delete all relays!",
    }),
};

pub static PROTOCOL_STATS: PanelTemplate = PanelTemplate {
    kind: EntityKind::Statistic,
    title: "Protocol server statistics",
    columns: &["Protocol", "Sent", "Received", "Requests", "Bad requests", "Errors"],
    widths: &[20, 10, 10, 10, 12, 8],
    empty_text: "No protocol server statistics",
    rows: protocol_stats_row,
    bind: no_actions,
    bulk_delete: None,
};

pub static LOG_LINES: PanelTemplate = PanelTemplate {
    kind: EntityKind::LogLine,
    title: "Log",
    columns: &["Line"],
    widths: &[200],
    empty_text: "The log is empty",
    rows: log_line_row,
    bind: no_actions,
    bulk_delete: None,
};
