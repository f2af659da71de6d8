use std::time::Duration;

use clap::ValueEnum;
use serde_json::Value;

use super::collection::Collection;
use super::error::{RenderError, json_kind};
use super::gateway::ApiRequest;
use super::panel::{Counter, PanelTemplate};
use super::templates::{self, cell};

pub const DEFAULT_LOG_LENGTH: usize = 250;
pub const DEFAULT_LOG_LEVEL: &str = "DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Tab {
    Main,
    Topics,
    Subscribers,
    Mappings,
    Relays,
    Stats,
    Log,
}

impl Tab {
    pub const ALL: [Tab; 7] = [
        Tab::Main,
        Tab::Topics,
        Tab::Subscribers,
        Tab::Mappings,
        Tab::Relays,
        Tab::Stats,
        Tab::Log,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Main => "Main",
            Tab::Topics => "Topics",
            Tab::Subscribers => "Subscribers",
            Tab::Mappings => "Mappings",
            Tab::Relays => "Relays",
            Tab::Stats => "Statistics",
            Tab::Log => "Log",
        }
    }

    pub fn index(self) -> usize {
        Tab::ALL.iter().position(|tab| *tab == self).unwrap_or(0)
    }

    pub fn from_index(index: usize) -> Option<Tab> {
        Tab::ALL.get(index).copied()
    }

    pub fn template(self) -> &'static PanelTemplate {
        match self {
            Tab::Main => &templates::PROTOCOLS,
            Tab::Topics => &templates::TOPICS,
            Tab::Subscribers => &templates::SUBSCRIBERS,
            Tab::Mappings => &templates::MAPPINGS,
            Tab::Relays => &templates::RELAYS,
            Tab::Stats => &templates::PROTOCOL_STATS,
            Tab::Log => &templates::LOG_LINES,
        }
    }
}

/// Which log file, level and tail length the log tab polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub log_id: String,
    pub level: String,
    pub length: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            log_id: "0".to_string(),
            level: DEFAULT_LOG_LEVEL.to_string(),
            length: DEFAULT_LOG_LENGTH,
        }
    }
}

/// User-adjustable settings read every time a tab is (re)activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashSettings {
    pub interval: Duration,
    pub page_size: usize,
    pub log: LogFilter,
}

/// Parsed payload of one fetch, ready for the panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub collection: Collection,
    pub counters: Vec<(Counter, String)>,
    pub caption: Option<String>,
    pub details: Vec<String>,
    pub protocol_power: Option<bool>,
}

pub type Extractor = fn(&TabDescriptor, Value) -> Result<Extracted, RenderError>;

/// Static description of how one tab is polled and rendered.
#[derive(Clone)]
pub struct TabDescriptor {
    pub tab: Tab,
    pub request: ApiRequest,
    pub interval: Duration,
    pub template: &'static PanelTemplate,
    pub paginated: bool,
    /// Field of the payload holding the collection; `None` means the payload
    /// is the collection.
    pub collection_key: Option<&'static str>,
    pub extract: Extractor,
}

impl TabDescriptor {
    pub fn for_tab(tab: Tab, settings: &DashSettings) -> Self {
        let (request, paginated, collection_key, extract): (_, _, _, Extractor) = match tab {
            Tab::Main => (
                ApiRequest::get("main/get/all"),
                false,
                Some("protocols"),
                extract_main,
            ),
            Tab::Topics => (ApiRequest::get("topics/get/all"), true, None, extract_plain),
            Tab::Subscribers => (
                ApiRequest::get("subscriber/get/all"),
                true,
                None,
                extract_plain,
            ),
            Tab::Mappings => (
                ApiRequest::get("config/mapping/get/all"),
                true,
                None,
                extract_plain,
            ),
            Tab::Relays => (
                ApiRequest::get("config/get/all"),
                true,
                Some("relays"),
                extract_plain,
            ),
            Tab::Stats => (
                ApiRequest::get("statistics/get/all"),
                false,
                Some("protocolServerStatistics"),
                extract_stats,
            ),
            Tab::Log => (
                ApiRequest::get("log")
                    .with_query("logID", settings.log.log_id.as_str())
                    .with_query("logLevel", settings.log.level.as_str())
                    .with_query("length", settings.log.length.to_string()),
                false,
                Some("lines"),
                extract_log,
            ),
        };
        Self {
            tab,
            request,
            interval: settings.interval,
            template: tab.template(),
            paginated,
            collection_key,
            extract,
        }
    }

    pub fn extract(&self, payload: Value) -> Result<Extracted, RenderError> {
        (self.extract)(self, payload)
    }

    fn collection(&self, payload: &Value) -> Result<Collection, RenderError> {
        let value = match self.collection_key {
            None => payload.clone(),
            Some(key) => {
                let Value::Object(map) = payload else {
                    return Err(RenderError::UnexpectedShape {
                        expected: "object",
                        found: json_kind(payload),
                    });
                };
                map.get(key).cloned().ok_or(RenderError::MissingField(key))?
            }
        };
        Collection::from_value(value)
    }
}

fn extract_plain(descriptor: &TabDescriptor, payload: Value) -> Result<Extracted, RenderError> {
    Ok(Extracted {
        collection: descriptor.collection(&payload)?,
        ..Extracted::default()
    })
}

fn count_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).filter(|value| !value.is_null()).map(cell)
}

fn summary_counters(payload: &Value, fields: &[(Counter, &str)]) -> Vec<(Counter, String)> {
    fields
        .iter()
        .filter_map(|(counter, key)| count_field(payload, key).map(|text| (*counter, text)))
        .collect()
}

/// `PT1H2M3.5S` -> `1h 2m 3s`; anything unrecognised is shown as sent.
pub fn humanize_uptime(raw: &str) -> String {
    let Some(body) = raw.strip_prefix("PT") else {
        return raw.to_string();
    };
    let mut parts = Vec::new();
    let mut number = String::new();
    for ch in body.chars() {
        match ch {
            '0'..='9' | '.' => number.push(ch),
            'H' | 'M' | 'S' if !number.is_empty() => {
                let whole = number.split('.').next().unwrap_or_default();
                parts.push(format!("{whole}{}", ch.to_ascii_lowercase()));
                number.clear();
            }
            _ => return raw.to_string(),
        }
    }
    if parts.is_empty() || !number.is_empty() {
        return raw.to_string();
    }
    parts.join(" ")
}

fn extract_main(descriptor: &TabDescriptor, payload: Value) -> Result<Extracted, RenderError> {
    let collection = descriptor.collection(&payload)?;
    let mut counters = summary_counters(
        &payload,
        &[
            (Counter::Subscribers, "subscribers"),
            (Counter::Publishers, "publishers"),
            (Counter::Topics, "topics"),
            (Counter::TotalMessages, "totalMessages"),
        ],
    );
    if let Some(uptime) = payload.get("uptime").and_then(Value::as_str) {
        counters.push((Counter::Uptime, humanize_uptime(uptime)));
    }

    let mut details = Vec::new();
    if let Some(runtime) = payload.get("runtimeStatistics") {
        let field = |key| count_field(runtime, key).unwrap_or_else(|| "?".to_string());
        details.push(format!(
            "CPUs {}  RAM used {} / {} MB (free {} MB)",
            field("cpuAvailable"),
            field("usedRam"),
            field("totalRam"),
            field("freeRam"),
        ));
    }
    let protocol_power = payload.get("protocolPower").and_then(Value::as_bool);
    if let Some(power) = protocol_power {
        details.push(format!(
            "Protocol servers {}",
            if power { "running" } else { "stopped" }
        ));
    }

    Ok(Extracted {
        collection,
        counters,
        caption: None,
        details,
        protocol_power,
    })
}

fn extract_stats(descriptor: &TabDescriptor, payload: Value) -> Result<Extracted, RenderError> {
    let collection = descriptor.collection(&payload)?;
    let core = payload
        .get("coreServiceStatistics")
        .ok_or(RenderError::MissingField("coreServiceStatistics"))?;
    let counters = summary_counters(
        core,
        &[
            (Counter::Subscribers, "subscribers"),
            (Counter::Publishers, "publishers"),
            (Counter::Topics, "topics"),
            (Counter::TotalMessages, "totalMessagesSent"),
        ],
    );
    let field = |key| count_field(core, key).unwrap_or_else(|| "0".to_string());
    let details = vec![format!(
        "Sent {}  Received {}  Requests {}  Bad requests {}  Errors {}",
        field("totalMessagesSent"),
        field("totalMessagesReceived"),
        field("totalRequests"),
        field("totalBadRequests"),
        field("totalErrors"),
    )];
    Ok(Extracted {
        collection,
        counters,
        details,
        ..Extracted::default()
    })
}

fn extract_log(descriptor: &TabDescriptor, payload: Value) -> Result<Extracted, RenderError> {
    let collection = descriptor.collection(&payload)?;
    if let Collection::Keyed(_) = collection {
        return Err(RenderError::UnexpectedShape {
            expected: "array",
            found: "object",
        });
    }
    Ok(Extracted {
        collection,
        caption: payload.get("name").and_then(Value::as_str).map(str::to_string),
        ..Extracted::default()
    })
}

/// Parses `log/levels` (a list) and `log/files` (id -> file name).
pub fn parse_log_levels(payload: &Value) -> Result<Vec<String>, RenderError> {
    match payload {
        Value::Array(levels) => Ok(levels.iter().map(cell).collect()),
        other => Err(RenderError::UnexpectedShape {
            expected: "array",
            found: json_kind(other),
        }),
    }
}

pub fn parse_log_files(payload: &Value) -> Result<Vec<(String, String)>, RenderError> {
    match payload {
        Value::Object(files) => Ok(files
            .iter()
            .map(|(id, name)| (id.clone(), cell(name)))
            .collect()),
        Value::Array(files) => Ok(files
            .iter()
            .enumerate()
            .map(|(id, name)| (id.to_string(), cell(name)))
            .collect()),
        other => Err(RenderError::UnexpectedShape {
            expected: "object",
            found: json_kind(other),
        }),
    }
}
