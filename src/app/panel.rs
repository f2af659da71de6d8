use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local};

use super::collection::{Collection, Entry};
use super::confirm::ActionId;
use super::error::RenderError;
use super::gateway::ApiRequest;
use super::pagination::PageRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Protocol,
    Topic,
    Subscriber,
    Mapping,
    Relay,
    LogLine,
    Statistic,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Protocol => "protocol server",
            EntityKind::Topic => "topic",
            EntityKind::Subscriber => "subscriber",
            EntityKind::Mapping => "mapping",
            EntityKind::Relay => "relay",
            EntityKind::LogLine => "log line",
            EntityKind::Statistic => "statistic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowActionKind {
    Delete,
    ShowDetail,
}

/// One action a rendered row exposes, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAction {
    pub kind: RowActionKind,
    pub request: ApiRequest,
    /// Destructive actions carry the confirmation prompt.
    pub confirm: Option<String>,
    pub failure_message: &'static str,
}

/// Panel-wide destructive action ("delete all ...").
#[derive(Debug, Clone, Copy)]
pub struct BulkActionSpec {
    pub path: &'static str,
    pub prompt: &'static str,
    pub failure_message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    /// Stable record identifier; `None` for rows without actions.
    pub key: Option<String>,
    /// Identifier sent to the backend by this row's actions.
    pub target: Option<String>,
    pub cells: Vec<String>,
    pub pending: bool,
    pub placeholder: bool,
}

impl RenderedRow {
    pub fn keyed(key: impl Into<String>, cells: Vec<String>) -> Self {
        let key = key.into();
        Self {
            target: Some(key.clone()),
            key: Some(key),
            cells,
            pending: false,
            placeholder: false,
        }
    }

    pub fn plain(cells: Vec<String>) -> Self {
        Self {
            key: None,
            target: None,
            cells,
            pending: false,
            placeholder: false,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    fn empty(text: &str) -> Self {
        Self {
            placeholder: true,
            ..Self::plain(vec![text.to_string()])
        }
    }
}

pub type RowTemplate = fn(Entry<'_>) -> Result<Vec<RenderedRow>, RenderError>;
pub type ActionBinder = fn(&RenderedRow) -> Vec<RowAction>;

/// Everything entity-specific about a panel.
pub struct PanelTemplate {
    pub kind: EntityKind,
    pub title: &'static str,
    pub columns: &'static [&'static str],
    pub widths: &'static [u16],
    pub empty_text: &'static str,
    pub rows: RowTemplate,
    pub bind: ActionBinder,
    pub bulk_delete: Option<BulkActionSpec>,
}

impl PanelTemplate {
    /// Runs the row template over every entry; any malformed record fails
    /// the whole batch so a bad response never half-replaces a table.
    pub fn prepare(&self, collection: &Collection) -> Result<PreparedRows, RenderError> {
        let per_entry = collection
            .entries()
            .into_iter()
            .map(self.rows)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PreparedRows { per_entry })
    }
}

/// Rows materialized from one collection, grouped by source entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedRows {
    per_entry: Vec<Vec<RenderedRow>>,
}

impl PreparedRows {
    /// Entry count; this is what pagination pages over.
    pub fn count(&self) -> usize {
        self.per_entry.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundHandler {
    pub row_key: String,
    pub actions: Vec<RowAction>,
}

/// Row actions currently bound for the visible rows of one panel.
#[derive(Debug, Default)]
pub struct ActionHandlerSet {
    bound: Vec<BoundHandler>,
}

impl ActionHandlerSet {
    pub fn bind(&mut self, row_key: &str, actions: Vec<RowAction>) {
        if actions.is_empty() {
            return;
        }
        self.bound.push(BoundHandler {
            row_key: row_key.to_string(),
            actions,
        });
    }

    pub fn unbind_all(&mut self) {
        self.bound.clear();
    }

    pub fn unbind(&mut self, row_key: &str) {
        self.bound.retain(|handler| handler.row_key != row_key);
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    pub fn action(&self, row_key: &str, kind: RowActionKind) -> Option<&RowAction> {
        self.bound
            .iter()
            .find(|handler| handler.row_key == row_key)
            .and_then(|handler| handler.actions.iter().find(|action| action.kind == kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered { rows: usize, handlers: usize },
    Empty,
    /// The panel is not on screen any more; nothing was touched.
    Detached,
}

/// Row buffer and bound actions of one tab.
pub struct Panel {
    template: &'static PanelTemplate,
    attached: bool,
    entries: Vec<Vec<RenderedRow>>,
    loaded: bool,
    rows: Vec<RenderedRow>,
    handlers: ActionHandlerSet,
    selected: usize,
    pending: HashMap<String, ActionId>,
    bulk_pending: Option<ActionId>,
    bulk_committed: bool,
    removed: HashSet<String>,
    caption: Option<String>,
    last_refresh: Option<DateTime<Local>>,
}

impl Panel {
    pub fn new(template: &'static PanelTemplate) -> Self {
        Self {
            template,
            attached: false,
            entries: Vec::new(),
            loaded: false,
            rows: Vec::new(),
            handlers: ActionHandlerSet::default(),
            selected: 0,
            pending: HashMap::new(),
            bulk_pending: None,
            bulk_committed: false,
            removed: HashSet::new(),
            caption: None,
            last_refresh: None,
        }
    }

    pub fn template(&self) -> &'static PanelTemplate {
        self.template
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Takes the panel off screen and discards its data.
    pub fn detach(&mut self) {
        self.attached = false;
        self.handlers.unbind_all();
        self.entries.clear();
        self.rows.clear();
        self.loaded = false;
        self.selected = 0;
        self.pending.clear();
        self.bulk_pending = None;
        self.bulk_committed = false;
        self.removed.clear();
        self.caption = None;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn rows(&self) -> &[RenderedRow] {
        &self.rows
    }

    pub fn handlers(&self) -> &ActionHandlerSet {
        &self.handlers
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn set_caption(&mut self, caption: Option<String>) {
        self.caption = caption;
    }

    pub fn last_refresh(&self) -> Option<DateTime<Local>> {
        self.last_refresh
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Replaces the collection and renders `range` of it (everything when
    /// `None`).
    pub fn render(
        &mut self,
        collection: &Collection,
        range: Option<PageRange>,
    ) -> Result<RenderOutcome, RenderError> {
        let prepared = self.template.prepare(collection)?;
        Ok(self.commit(prepared, range))
    }

    pub fn commit(&mut self, prepared: PreparedRows, range: Option<PageRange>) -> RenderOutcome {
        if !self.attached {
            return RenderOutcome::Detached;
        }
        self.entries = prepared.per_entry;
        self.loaded = true;
        self.removed.clear();
        // Marks only outlive a fetch for rows the broker still reports.
        let entries = &self.entries;
        self.pending.retain(|key, _| {
            entries
                .iter()
                .flatten()
                .any(|row| row.key.as_deref() == Some(key.as_str()))
        });
        if self.bulk_committed {
            self.bulk_pending = None;
            self.bulk_committed = false;
        }
        self.last_refresh = Some(Local::now());
        self.fill(range)
    }

    /// Re-renders a slice of the current collection, e.g. after a page click.
    pub fn fill(&mut self, range: Option<PageRange>) -> RenderOutcome {
        if !self.attached {
            return RenderOutcome::Detached;
        }
        self.handlers.unbind_all();

        if self.entries.is_empty() {
            self.rows = vec![RenderedRow::empty(self.template.empty_text)];
            self.selected = 0;
            return RenderOutcome::Empty;
        }

        let slice = match range {
            None => &self.entries[..],
            Some(range) => {
                let end = range.to.min(self.entries.len());
                let start = range.from.min(end);
                &self.entries[start..end]
            }
        };
        self.rows = slice
            .iter()
            .flatten()
            .filter(|row| {
                row.key
                    .as_ref()
                    .is_none_or(|key| !self.removed.contains(key))
            })
            .cloned()
            .map(|mut row| {
                row.pending = self.bulk_pending.is_some()
                    || row
                        .key
                        .as_ref()
                        .is_some_and(|key| self.pending.contains_key(key));
                row
            })
            .collect();

        for row in &self.rows {
            if let Some(key) = &row.key {
                self.handlers.bind(key, (self.template.bind)(row));
            }
        }
        self.clamp_selection();

        RenderOutcome::Rendered {
            rows: self.rows.len(),
            handlers: self.handlers.len(),
        }
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_row(&self) -> Option<&RenderedRow> {
        self.rows.get(self.selected).filter(|row| !row.placeholder)
    }

    pub fn select(&mut self, index: usize) {
        self.selected = index;
        self.clamp_selection();
    }

    pub fn select_by(&mut self, delta: isize) {
        self.selected = self.selected.saturating_add_signed(delta);
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.rows.len().saturating_sub(1));
    }

    /// Action bound to the selected row, if that row exposes it.
    pub fn selected_action(&self, kind: RowActionKind) -> Option<(String, RowAction)> {
        let row = self.selected_row()?;
        let key = row.key.as_ref()?;
        if row.pending {
            return None;
        }
        self.handlers
            .action(key, kind)
            .map(|action| (key.clone(), action.clone()))
    }

    pub fn has_rows(&self) -> bool {
        self.rows.iter().any(|row| !row.placeholder)
    }

    /// Visible rows whose actions address `target` (mappings share one).
    pub fn keys_for_target(&self, target: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter(|row| row.target.as_deref() == Some(target))
            .filter_map(|row| row.key.clone())
            .collect()
    }

    pub fn mark_pending(&mut self, row_key: &str, action: ActionId) {
        if !self.attached {
            return;
        }
        self.pending.insert(row_key.to_string(), action);
        for row in &mut self.rows {
            if row.key.as_deref() == Some(row_key) {
                row.pending = true;
            }
        }
    }

    pub fn mark_all_pending(&mut self, action: ActionId) {
        if !self.attached {
            return;
        }
        self.bulk_pending = Some(action);
        self.bulk_committed = false;
        for row in &mut self.rows {
            if !row.placeholder {
                row.pending = true;
            }
        }
    }

    /// Rolls back every optimistic mark made for `action`.
    pub fn revert(&mut self, action: ActionId) {
        self.pending.retain(|_, owner| *owner != action);
        if self.bulk_pending == Some(action) {
            self.bulk_pending = None;
            self.bulk_committed = false;
        }
        let bulk = self.bulk_pending.is_some();
        for row in &mut self.rows {
            row.pending = bulk
                || row
                    .key
                    .as_ref()
                    .is_some_and(|key| self.pending.contains_key(key));
        }
    }

    /// Per-item delete succeeded: the row disappears until the next fetch.
    pub fn remove_row(&mut self, row_key: &str) {
        if !self.attached {
            return;
        }
        self.pending.remove(row_key);
        self.removed.insert(row_key.to_string());
        self.rows.retain(|row| row.key.as_deref() != Some(row_key));
        self.handlers.unbind(row_key);
        if self.rows.is_empty() {
            self.rows = vec![RenderedRow::empty(self.template.empty_text)];
        }
        self.clamp_selection();
    }

    /// Bulk delete succeeded: rows stay pending until the next fetch lands.
    pub fn commit_bulk(&mut self, action: ActionId) {
        if self.bulk_pending == Some(action) {
            self.bulk_committed = true;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Subscribers,
    Publishers,
    Topics,
    TotalMessages,
    Uptime,
}

impl Counter {
    pub fn label(self) -> &'static str {
        match self {
            Counter::Subscribers => "Subscribers",
            Counter::Publishers => "Publishers",
            Counter::Topics => "Topics",
            Counter::TotalMessages => "Messages",
            Counter::Uptime => "Uptime",
        }
    }
}

/// Header counters shared by every panel. Only ever set, never incremented.
#[derive(Debug, Default)]
pub struct SummaryCounters {
    values: HashMap<Counter, String>,
}

impl SummaryCounters {
    /// Returns whether the displayed text changed.
    pub fn set(&mut self, counter: Counter, text: impl Into<String>) -> bool {
        let text = text.into();
        if self.values.get(&counter) == Some(&text) {
            return false;
        }
        self.values.insert(counter, text);
        true
    }

    pub fn get(&self, counter: Counter) -> Option<&str> {
        self.values.get(&counter).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::templates::TOPICS;
    use serde_json::json;

    fn topics(range: std::ops::RangeInclusive<usize>) -> Collection {
        Collection::List(
            range
                .map(|i| {
                    json!({
                        "topicID": format!("t{i}"),
                        "name": format!("topic-{i}"),
                        "fullTopicString": format!("root/topic-{i}"),
                        "root": false,
                        "leaf": true,
                    })
                })
                .collect(),
        )
    }

    fn attached_topics_panel() -> Panel {
        let mut panel = Panel::new(&TOPICS);
        panel.attach();
        panel
    }

    fn keys(panel: &Panel) -> Vec<String> {
        panel
            .rows()
            .iter()
            .filter_map(|row| row.key.clone())
            .collect()
    }

    #[test]
    fn rendering_twice_does_not_accumulate_handlers() {
        let mut panel = attached_topics_panel();
        let collection = topics(1..=7);
        panel.render(&collection, None).unwrap();
        let outcome = panel.render(&collection, None).unwrap();
        assert_eq!(outcome, RenderOutcome::Rendered { rows: 7, handlers: 7 });
        assert_eq!(panel.handlers().len(), panel.rows().len());
    }

    #[test]
    fn rows_are_keyed_by_identifier_not_position() {
        let mut panel = attached_topics_panel();
        panel.render(&topics(3..=5), None).unwrap();
        assert_eq!(keys(&panel), vec!["t3", "t4", "t5"]);
        let delete = panel.handlers().action("t4", RowActionKind::Delete).unwrap();
        assert_eq!(delete.request.query, vec![("topicID".to_string(), "t4".to_string())]);
    }

    #[test]
    fn empty_collection_renders_one_placeholder_without_handlers() {
        let mut panel = attached_topics_panel();
        let outcome = panel.render(&Collection::default(), None).unwrap();
        assert_eq!(outcome, RenderOutcome::Empty);
        assert_eq!(panel.rows().len(), 1);
        assert!(panel.rows()[0].placeholder);
        assert!(panel.handlers().is_empty());
        assert!(panel.selected_row().is_none());
    }

    #[test]
    fn range_is_clipped_to_available_rows() {
        let mut panel = attached_topics_panel();
        panel
            .render(&topics(1..=30), Some(PageRange { from: 25, to: 50 }))
            .unwrap();
        assert_eq!(keys(&panel), vec!["t26", "t27", "t28", "t29", "t30"]);
        assert_eq!(panel.fill(Some(PageRange { from: 75, to: 100 })), RenderOutcome::Rendered {
            rows: 0,
            handlers: 0
        });
    }

    #[test]
    fn detached_panel_ignores_late_renders() {
        let mut panel = Panel::new(&TOPICS);
        let outcome = panel.render(&topics(1..=3), None).unwrap();
        assert_eq!(outcome, RenderOutcome::Detached);
        assert!(panel.rows().is_empty());
        assert!(!panel.is_loaded());
    }

    #[test]
    fn malformed_record_leaves_previous_table_untouched() {
        let mut panel = attached_topics_panel();
        panel.render(&topics(1..=2), None).unwrap();
        let broken = Collection::List(vec![json!({"name": "no id"})]);
        assert!(panel.render(&broken, None).is_err());
        assert_eq!(keys(&panel), vec!["t1", "t2"]);
        assert_eq!(panel.handlers().len(), 2);
    }

    #[test]
    fn pending_marks_survive_refresh_and_revert_cleanly() {
        let mut panel = attached_topics_panel();
        let collection = topics(1..=3);
        panel.render(&collection, None).unwrap();
        panel.mark_pending("t2", 9);
        panel.render(&collection, None).unwrap();
        assert!(panel.rows()[1].pending);
        panel.select(1);
        assert!(panel.selected_action(RowActionKind::Delete).is_none());

        panel.revert(9);
        assert!(panel.rows().iter().all(|row| !row.pending));
        assert!(panel.selected_action(RowActionKind::Delete).is_some());
    }

    #[test]
    fn pending_marks_for_vanished_rows_are_dropped_on_fetch() {
        let mut panel = attached_topics_panel();
        panel.render(&topics(1..=3), None).unwrap();
        panel.mark_pending("t1", 3);
        panel.mark_pending("t3", 4);
        panel.render(&topics(2..=3), None).unwrap();
        assert_eq!(panel.pending.len(), 1);
        assert_eq!(panel.pending.get("t3"), Some(&4));

        panel.render(&topics(1..=3), None).unwrap();
        assert!(!panel.rows()[0].pending);
        assert!(panel.rows()[2].pending);
    }

    #[test]
    fn removed_row_stays_hidden_until_next_fetch() {
        let mut panel = attached_topics_panel();
        let collection = topics(1..=3);
        panel.render(&collection, None).unwrap();
        panel.remove_row("t1");
        assert_eq!(keys(&panel), vec!["t2", "t3"]);
        assert_eq!(panel.handlers().len(), 2);
        panel.fill(None);
        assert_eq!(keys(&panel), vec!["t2", "t3"]);
        panel.render(&collection, None).unwrap();
        assert_eq!(keys(&panel), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn committed_bulk_delete_clears_on_next_fetch() {
        let mut panel = attached_topics_panel();
        let collection = topics(1..=2);
        panel.render(&collection, None).unwrap();
        panel.mark_all_pending(4);
        panel.commit_bulk(4);
        panel.fill(None);
        assert!(panel.rows().iter().all(|row| row.pending));
        panel.render(&Collection::default(), None).unwrap();
        assert!(panel.rows().iter().all(|row| !row.pending));
    }

    #[test]
    fn summary_counter_set_is_idempotent() {
        let mut counters = SummaryCounters::default();
        assert!(counters.set(Counter::Subscribers, "4"));
        assert!(!counters.set(Counter::Subscribers, "4"));
        assert_eq!(counters.get(Counter::Subscribers), Some("4"));
        assert!(counters.set(Counter::Subscribers, "5"));
    }
}
