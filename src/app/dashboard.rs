use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use super::collection::Collection;
use super::confirm::{
    ActionConfirmer, ActionId, ActionTarget, MessageArea, PendingAction, Settlement,
};
use super::error::GatewayError;
use super::gateway::{ApiRequest, RequestGateway};
use super::pagination::PaginationController;
use super::panel::{Panel, RowActionKind, SummaryCounters};
use super::scheduler::RefreshScheduler;
use super::tabs::{DashSettings, Tab, TabDescriptor, parse_log_files, parse_log_levels};
use super::templates::{ADD_MAPPING_FAILED, ADD_RELAY_FAILED, TOPIC_SUBSCRIBERS};
use super::types::DashEvent;

const MAX_STATUS_MESSAGES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A fetch landed and the tab's table was replaced.
    Rendered(Tab),
    Updated,
    Ignored,
}

pub struct DetailView {
    pub title: String,
    pub panel: Panel,
}

/// All dashboard state, owned by the event loop.
pub struct Dashboard {
    settings: DashSettings,
    active: Tab,
    panels: HashMap<Tab, Panel>,
    pagination: HashMap<Tab, PaginationController>,
    scheduler: RefreshScheduler,
    gateway: RequestGateway,
    events: UnboundedSender<DashEvent>,
    confirmer: ActionConfirmer,
    messages: MessageArea,
    counters: SummaryCounters,
    details: Vec<String>,
    protocol_power: Option<bool>,
    refresh_enabled: bool,
    last_error: Option<String>,
    status_messages: VecDeque<String>,
    detail: Option<DetailView>,
    log_levels: Vec<String>,
    log_files: Vec<(String, String)>,
    renders: usize,
}

impl Dashboard {
    pub fn new(
        settings: DashSettings,
        initial: Tab,
        gateway: RequestGateway,
        events: UnboundedSender<DashEvent>,
    ) -> Self {
        let panels = Tab::ALL
            .iter()
            .map(|tab| (*tab, Panel::new(tab.template())))
            .collect();
        let pagination = Tab::ALL
            .iter()
            .map(|tab| (*tab, PaginationController::new(settings.page_size)))
            .collect();
        Self {
            scheduler: RefreshScheduler::new(gateway.clone(), events.clone()),
            settings,
            active: initial,
            panels,
            pagination,
            gateway,
            events,
            confirmer: ActionConfirmer::default(),
            messages: MessageArea::default(),
            counters: SummaryCounters::default(),
            details: Vec::new(),
            protocol_power: None,
            refresh_enabled: true,
            last_error: None,
            status_messages: VecDeque::new(),
            detail: None,
            log_levels: Vec::new(),
            log_files: Vec::new(),
            renders: 0,
        }
    }

    /// Shows the initial tab and loads the log selectors.
    pub fn start(&mut self) {
        self.fetch_log_meta();
        self.select_tab(self.active);
    }

    /// Cancels polling and detaches the visible tab; in-flight responses
    /// are dropped when they land.
    pub fn stop(&mut self) {
        self.scheduler.deactivate();
        let tab = self.active;
        self.panel_mut(tab).detach();
        log::debug!("dashboard stopped");
    }

    pub fn active_tab(&self) -> Tab {
        self.active
    }

    pub fn settings(&self) -> &DashSettings {
        &self.settings
    }

    pub fn panel(&self, tab: Tab) -> Option<&Panel> {
        self.panels.get(&tab)
    }

    pub fn active_panel(&self) -> Option<&Panel> {
        self.panel(self.active)
    }

    pub fn pagination(&self, tab: Tab) -> Option<&PaginationController> {
        self.pagination.get(&tab)
    }

    pub fn counters(&self) -> &SummaryCounters {
        &self.counters
    }

    pub fn messages(&self) -> &MessageArea {
        &self.messages
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn protocol_power(&self) -> Option<bool> {
        self.protocol_power
    }

    pub fn refresh_enabled(&self) -> bool {
        self.refresh_enabled
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status_messages(&self) -> impl Iterator<Item = &str> {
        self.status_messages.iter().map(String::as_str)
    }

    pub fn actions_in_flight(&self) -> usize {
        self.confirmer.in_flight()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.confirmer.prompt()
    }

    pub fn detail(&self) -> Option<&DetailView> {
        self.detail.as_ref()
    }

    pub fn log_levels(&self) -> &[String] {
        &self.log_levels
    }

    pub fn log_files(&self) -> &[(String, String)] {
        &self.log_files
    }

    pub fn renders(&self) -> usize {
        self.renders
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    fn panel_mut(&mut self, tab: Tab) -> &mut Panel {
        self.panels
            .entry(tab)
            .or_insert_with(|| Panel::new(tab.template()))
    }

    fn pagination_mut(&mut self, tab: Tab) -> &mut PaginationController {
        let page_size = self.settings.page_size;
        self.pagination
            .entry(tab)
            .or_insert_with(|| PaginationController::new(page_size))
    }

    fn descriptor(&self, tab: Tab) -> TabDescriptor {
        TabDescriptor::for_tab(tab, &self.settings)
    }

    fn push_status(&mut self, message: String) {
        self.status_messages.push_front(message);
        while self.status_messages.len() > MAX_STATUS_MESSAGES {
            self.status_messages.pop_back();
        }
    }

    /// Makes `tab` the visible tab and (re)starts polling it. Switching to
    /// another tab always arms its timer, ending any pause; selecting the
    /// visible tab again restarts its timer with the current settings.
    pub fn select_tab(&mut self, tab: Tab) {
        if tab != self.active {
            let previous = self.active;
            if !self.refresh_enabled {
                log::debug!("pause of {} ends with the tab switch", previous.title());
                self.refresh_enabled = true;
            }
            self.panel_mut(previous).detach();
            self.pagination_mut(previous).reset();
            self.details.clear();
            self.detail = None;
            self.last_error = None;
            self.active = tab;
            log::debug!("switched from {} to {}", previous.title(), tab.title());
        }
        self.panel_mut(tab).attach();
        self.poll_active();
    }

    fn poll_active(&mut self) {
        let descriptor = self.descriptor(self.active);
        if self.refresh_enabled {
            self.scheduler.activate(descriptor);
        } else {
            self.scheduler.fetch_once(&descriptor);
        }
    }

    pub fn next_tab(&mut self) {
        let next = Tab::from_index(self.active.index() + 1).unwrap_or(Tab::Main);
        self.select_tab(next);
    }

    pub fn previous_tab(&mut self) {
        let previous = match self.active.index() {
            0 => Tab::Log,
            index => Tab::from_index(index - 1).unwrap_or(Tab::Main),
        };
        self.select_tab(previous);
    }

    /// Manual start/stop of polling; returns whether refresh is now on.
    pub fn toggle_refresh(&mut self) -> bool {
        if self.refresh_enabled {
            self.refresh_enabled = false;
            self.scheduler.deactivate();
            self.push_status("Automatic refresh paused".to_string());
        } else {
            self.refresh_enabled = true;
            let descriptor = self.descriptor(self.active);
            self.scheduler.activate(descriptor);
            self.push_status("Automatic refresh resumed".to_string());
        }
        self.refresh_enabled
    }

    /// Applies a new update interval; the visible tab is re-activated.
    pub fn set_interval(&mut self, seconds: u64) -> Result<(), String> {
        if seconds < 1 {
            return Err("The update interval must be at least one second".to_string());
        }
        self.settings.interval = Duration::from_secs(seconds);
        if self.refresh_enabled {
            let descriptor = self.descriptor(self.active);
            self.scheduler.activate(descriptor);
        }
        self.push_status(format!("Update interval set to {seconds}s"));
        Ok(())
    }

    pub fn handle_event(&mut self, event: DashEvent) -> EventOutcome {
        match event {
            DashEvent::Tick { tab, generation } => {
                self.scheduler.on_tick(tab, generation);
                EventOutcome::Ignored
            }
            DashEvent::Fetched {
                tab,
                generation,
                result,
            } => self.on_fetched(tab, generation, result),
            DashEvent::ActionSettled { id, result } => self.on_action_settled(id, result),
            DashEvent::DetailLoaded {
                topic_id,
                failure_message,
                result,
            } => self.on_detail_loaded(topic_id, failure_message, result),
            DashEvent::LogLevels(result) => {
                match result.map_err(|err| err.message()).and_then(|payload| {
                    parse_log_levels(&payload).map_err(|err| err.to_string())
                }) {
                    Ok(levels) => self.log_levels = levels,
                    Err(err) => log::warn!("could not load log levels: {err}"),
                }
                EventOutcome::Updated
            }
            DashEvent::LogFiles(result) => {
                match result.map_err(|err| err.message()).and_then(|payload| {
                    parse_log_files(&payload).map_err(|err| err.to_string())
                }) {
                    Ok(files) => self.log_files = files,
                    Err(err) => log::warn!("could not load log files: {err}"),
                }
                EventOutcome::Updated
            }
        }
    }

    fn on_fetched(
        &mut self,
        tab: Tab,
        generation: u64,
        result: Result<Value, GatewayError>,
    ) -> EventOutcome {
        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                if tab == self.active {
                    let at = Local::now().format("%H:%M:%S");
                    self.last_error = Some(if err.is_transient() {
                        log::warn!("refresh of {} failed: {err}", tab.title());
                        format!("Last refresh failed at {at}: {}", err.message())
                    } else {
                        log::error!("refresh of {} rejected: {err}", tab.title());
                        format!("Refresh rejected at {at}: {}", err.message())
                    });
                }
                return EventOutcome::Ignored;
            }
        };

        if !self.panel_mut(tab).is_attached() {
            log::debug!(
                "dropping late {} response of timer {generation}",
                tab.title()
            );
            return EventOutcome::Ignored;
        }

        let descriptor = self.descriptor(tab);
        let prepared = descriptor.extract(payload).and_then(|extracted| {
            descriptor
                .template
                .prepare(&extracted.collection)
                .map(|prepared| (extracted, prepared))
        });
        let (extracted, prepared) = match prepared {
            Ok(parts) => parts,
            Err(err) => {
                log::warn!("skipping {} refresh: {err}", tab.title());
                self.last_error = Some(format!("Malformed {} response: {err}", tab.title()));
                return EventOutcome::Ignored;
            }
        };

        for (counter, text) in extracted.counters {
            self.counters.set(counter, text);
        }
        let range = if descriptor.paginated {
            let pagination = self.pagination_mut(tab);
            pagination.reconcile(prepared.count());
            pagination.current_range()
        } else {
            None
        };
        let panel = self.panel_mut(tab);
        let outcome = panel.commit(prepared, range);
        panel.set_caption(extracted.caption);
        self.details = extracted.details;
        if extracted.protocol_power.is_some() {
            self.protocol_power = extracted.protocol_power;
        }
        self.last_error = None;
        self.renders += 1;
        log::debug!("rendered {} (timer {generation}): {outcome:?}", tab.title());
        EventOutcome::Rendered(tab)
    }

    pub fn select_next_row(&mut self) {
        let tab = self.active;
        self.panel_mut(tab).select_by(1);
    }

    pub fn select_previous_row(&mut self) {
        let tab = self.active;
        self.panel_mut(tab).select_by(-1);
    }

    pub fn select_row(&mut self, index: usize) {
        let tab = self.active;
        self.panel_mut(tab).select(index);
    }

    pub fn click_page(&mut self, page: usize) -> bool {
        let tab = self.active;
        let Some(range) = self.pagination_mut(tab).click(page) else {
            return false;
        };
        self.panel_mut(tab).fill(Some(range));
        true
    }

    pub fn next_page(&mut self) -> bool {
        let tab = self.active;
        let Some(range) = self.pagination_mut(tab).next() else {
            return false;
        };
        self.panel_mut(tab).fill(Some(range));
        true
    }

    pub fn previous_page(&mut self) -> bool {
        let tab = self.active;
        let Some(range) = self.pagination_mut(tab).previous() else {
            return false;
        };
        self.panel_mut(tab).fill(Some(range));
        true
    }

    /// Asks to delete the selected row; nothing happens until confirmed.
    pub fn delete_selected(&mut self) -> bool {
        let tab = self.active;
        let panel = self.panel_mut(tab);
        let Some((key, action)) = panel.selected_action(RowActionKind::Delete) else {
            return false;
        };
        let target = panel
            .selected_row()
            .and_then(|row| row.target.clone())
            .unwrap_or_else(|| key.clone());
        let mut keys = panel.keys_for_target(&target);
        if keys.is_empty() {
            keys.push(key.clone());
        }
        let pending = PendingAction {
            request: action.request,
            target: ActionTarget::Rows { tab, keys },
            failure_message: action.failure_message,
        };
        match action.confirm {
            Some(prompt) => self.confirmer.confirm_and_run(prompt, pending),
            None => {
                let (id, pending) = self.confirmer.start(pending);
                self.dispatch(id, pending);
            }
        }
        true
    }

    pub fn delete_all(&mut self) -> bool {
        let tab = self.active;
        let Some(bulk) = tab.template().bulk_delete else {
            return false;
        };
        self.confirmer.confirm_and_run(
            bulk.prompt,
            PendingAction {
                request: ApiRequest::delete(bulk.path),
                target: ActionTarget::All { tab },
                failure_message: bulk.failure_message,
            },
        );
        true
    }

    pub fn toggle_power(&mut self) {
        let prompt = match self.protocol_power {
            Some(true) => "Shut down all protocol servers?",
            Some(false) => "Boot all protocol servers?",
            None => "Toggle the protocol servers?",
        };
        self.confirmer.confirm_and_run(
            prompt,
            PendingAction {
                request: ApiRequest::post("main/protocols/power"),
                target: ActionTarget::Nothing,
                failure_message: "Unable to toggle the protocol servers!",
            },
        );
    }

    /// Answers the open confirmation prompt.
    pub fn answer_prompt(&mut self, yes: bool) {
        if let Some((id, action)) = self.confirmer.resolve(yes) {
            self.dispatch(id, action);
        }
    }

    pub fn add_mapping(&mut self, from: &str, to: &str) -> Result<(), String> {
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            return Err("Both the source and the target topic are required".to_string());
        }
        let (id, action) = self.confirmer.start(PendingAction {
            request: ApiRequest::post("config/mapping/add")
                .with_query("fromTopic", from)
                .with_query("toTopic", to),
            target: ActionTarget::Nothing,
            failure_message: ADD_MAPPING_FAILED,
        });
        self.dispatch(id, action);
        Ok(())
    }

    pub fn add_relay(&mut self, from: &str) -> Result<(), String> {
        let from = from.trim();
        if from.is_empty() {
            return Err("A relay address is required".to_string());
        }
        let (id, action) = self.confirmer.start(PendingAction {
            request: ApiRequest::post("config/relay/add").with_query("from", from),
            target: ActionTarget::Nothing,
            failure_message: ADD_RELAY_FAILED,
        });
        self.dispatch(id, action);
        Ok(())
    }

    /// Marks rows pending, then sends the request.
    fn dispatch(&mut self, id: ActionId, action: PendingAction) {
        match &action.target {
            ActionTarget::Rows { tab, keys } => {
                let panel = self.panel_mut(*tab);
                for key in keys {
                    panel.mark_pending(key, id);
                }
            }
            ActionTarget::All { tab } => self.panel_mut(*tab).mark_all_pending(id),
            ActionTarget::Nothing => {}
        }
        let ok_events = self.events.clone();
        let err_events = self.events.clone();
        self.gateway.request(
            action.request,
            move |payload| {
                let _ = ok_events.send(DashEvent::ActionSettled {
                    id,
                    result: Ok(payload),
                });
            },
            move |err| {
                let _ = err_events.send(DashEvent::ActionSettled {
                    id,
                    result: Err(err),
                });
            },
        );
    }

    fn on_action_settled(
        &mut self,
        id: ActionId,
        result: Result<Value, GatewayError>,
    ) -> EventOutcome {
        let settlement = self.confirmer.settle(id, result);
        if let Some(settlement) = &settlement {
            log::debug!("action {id} settled as {:?}", settlement.state());
        }
        match settlement {
            None => EventOutcome::Ignored,
            Some(Settlement::Committed(target)) => {
                match target {
                    ActionTarget::Rows { tab, keys } => {
                        let panel = self.panel_mut(tab);
                        for key in &keys {
                            panel.remove_row(key);
                        }
                        self.push_status(format!(
                            "Deleted {} {}",
                            tab.template().kind.label(),
                            keys.join(", ")
                        ));
                    }
                    ActionTarget::All { tab } => {
                        self.panel_mut(tab).commit_bulk(id);
                        self.push_status(format!(
                            "Deleted all {}",
                            tab.title().to_ascii_lowercase()
                        ));
                    }
                    ActionTarget::Nothing => {
                        self.push_status("Request accepted by the broker".to_string());
                        if !self.scheduler.refresh_now() {
                            let descriptor = self.descriptor(self.active);
                            self.scheduler.fetch_once(&descriptor);
                        }
                    }
                }
                EventOutcome::Updated
            }
            Some(Settlement::RolledBack { target, message }) => {
                match target {
                    ActionTarget::Rows { tab, .. } | ActionTarget::All { tab } => {
                        self.panel_mut(tab).revert(id);
                    }
                    ActionTarget::Nothing => {}
                }
                self.messages.push(message);
                EventOutcome::Updated
            }
        }
    }

    /// Loads the subscribers of the selected topic into the detail overlay.
    pub fn show_detail_selected(&mut self) -> bool {
        let tab = self.active;
        let Some((topic_id, action)) = self
            .panel_mut(tab)
            .selected_action(RowActionKind::ShowDetail)
        else {
            return false;
        };
        let failure_message = action.failure_message;
        let ok_events = self.events.clone();
        let err_events = self.events.clone();
        let err_topic = topic_id.clone();
        self.gateway.request(
            action.request,
            move |payload| {
                let _ = ok_events.send(DashEvent::DetailLoaded {
                    topic_id,
                    failure_message,
                    result: Ok(payload),
                });
            },
            move |err| {
                let _ = err_events.send(DashEvent::DetailLoaded {
                    topic_id: err_topic,
                    failure_message,
                    result: Err(err),
                });
            },
        );
        true
    }

    pub fn close_detail(&mut self) -> bool {
        self.detail.take().is_some()
    }

    fn on_detail_loaded(
        &mut self,
        topic_id: String,
        failure_message: &'static str,
        result: Result<Value, GatewayError>,
    ) -> EventOutcome {
        if self.active != Tab::Topics {
            return EventOutcome::Ignored;
        }
        let collection = match result {
            Ok(payload) => Collection::list(payload),
            Err(err) => {
                self.messages.push(
                    err.server_message()
                        .unwrap_or_else(|| failure_message.to_string()),
                );
                return EventOutcome::Updated;
            }
        };
        let collection = match collection {
            Ok(collection) => collection,
            Err(err) => {
                log::warn!("subscribers of topic {topic_id}: {err}");
                self.messages.push(failure_message);
                return EventOutcome::Updated;
            }
        };
        if collection.is_empty() {
            log::debug!("topic {topic_id} has no subscribers");
            return EventOutcome::Ignored;
        }

        let mut panel = Panel::new(&TOPIC_SUBSCRIBERS);
        panel.attach();
        if let Err(err) = panel.render(&collection, None) {
            log::warn!("subscribers of topic {topic_id}: {err}");
            self.messages.push(failure_message);
            return EventOutcome::Updated;
        }
        let name = self
            .panel(Tab::Topics)
            .and_then(|topics| {
                topics
                    .rows()
                    .iter()
                    .find(|row| row.key.as_deref() == Some(topic_id.as_str()))
            })
            .and_then(|row| row.cells.first().cloned())
            .unwrap_or(topic_id);
        self.detail = Some(DetailView {
            title: format!("Subscribers of {name}"),
            panel,
        });
        EventOutcome::Updated
    }

    pub fn dismiss_message(&mut self) -> bool {
        self.messages.dismiss().is_some()
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    fn fetch_log_meta(&self) {
        for path in ["log/levels", "log/files"] {
            let ok_events = self.events.clone();
            let err_events = self.events.clone();
            let wrap = move |result: Result<Value, GatewayError>| match path {
                "log/levels" => DashEvent::LogLevels(result),
                _ => DashEvent::LogFiles(result),
            };
            self.gateway.request(
                ApiRequest::get(path),
                move |payload| {
                    let _ = ok_events.send(wrap(Ok(payload)));
                },
                move |err| {
                    let _ = err_events.send(wrap(Err(err)));
                },
            );
        }
    }

    pub fn cycle_log_level(&mut self) -> Option<&str> {
        let next = cycle(
            self.log_levels.iter().map(String::as_str),
            &self.settings.log.level,
        )?;
        self.settings.log.level = next;
        self.log_filter_changed();
        Some(self.settings.log.level.as_str())
    }

    pub fn cycle_log_file(&mut self) -> Option<&str> {
        let next = cycle(
            self.log_files.iter().map(|(id, _)| id.as_str()),
            &self.settings.log.log_id,
        )?;
        self.settings.log.log_id = next;
        self.log_filter_changed();
        self.log_files
            .iter()
            .find(|(id, _)| *id == self.settings.log.log_id)
            .map(|(_, name)| name.as_str())
    }

    pub fn set_log_length(&mut self, length: usize) -> Result<(), String> {
        if length == 0 {
            return Err("The log length must be at least one line".to_string());
        }
        self.settings.log.length = length;
        self.log_filter_changed();
        Ok(())
    }

    fn log_filter_changed(&mut self) {
        if self.active == Tab::Log {
            self.poll_active();
        }
    }
}

/// Value after `current` in `options`, wrapping; the first one when
/// `current` is not among them.
fn cycle<'a>(options: impl Iterator<Item = &'a str>, current: &str) -> Option<String> {
    let options = options.collect::<Vec<_>>();
    let next = match options.iter().position(|option| *option == current) {
        Some(index) => options.get((index + 1) % options.len()),
        None => options.first(),
    };
    next.map(|option| option.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::gateway::Method;
    use crate::app::gateway::testing::ScriptedTransport;
    use crate::app::tabs::LogFilter;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn topics(count: usize) -> Value {
        Value::Array(
            (1..=count)
                .map(|i| {
                    json!({
                        "topicID": format!("t{i}"),
                        "name": format!("topic-{i}"),
                        "fullTopicString": format!("topic-{i}"),
                        "root": true,
                        "leaf": true,
                    })
                })
                .collect(),
        )
    }

    fn dashboard(
        tab: Tab,
    ) -> (
        Dashboard,
        Arc<ScriptedTransport>,
        UnboundedReceiver<DashEvent>,
    ) {
        let transport = ScriptedTransport::new();
        let gateway = RequestGateway::new(transport.clone(), None);
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = DashSettings {
            interval: Duration::from_secs(1),
            page_size: 25,
            log: LogFilter::default(),
        };
        (Dashboard::new(settings, tab, gateway, tx), transport, rx)
    }

    /// Lets spawned requests finish and feeds everything back in.
    async fn drain(dash: &mut Dashboard, rx: &mut UnboundedReceiver<DashEvent>) {
        for _ in 0..5 {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            while let Ok(event) = rx.try_recv() {
                dash.handle_event(event);
            }
        }
    }

    async fn next_tick(dash: &mut Dashboard, rx: &mut UnboundedReceiver<DashEvent>) {
        tokio::time::sleep(Duration::from_millis(1001)).await;
        drain(dash, rx).await;
    }

    fn visible_keys(dash: &Dashboard) -> Vec<String> {
        dash.active_panel()
            .unwrap()
            .rows()
            .iter()
            .filter_map(|row| row.key.clone())
            .collect()
    }

    fn expected(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
        range.map(|i| format!("t{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn paginates_thirty_topics_then_drops_the_paginator() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(30)));
        dash.start();
        drain(&mut dash, &mut rx).await;

        assert_eq!(visible_keys(&dash), expected(1..=25));
        let widget = dash.pagination(Tab::Topics).unwrap().widget().unwrap();
        assert_eq!(widget.total_pages(), 2);

        assert!(dash.click_page(2));
        assert_eq!(visible_keys(&dash), expected(26..=30));
        assert_eq!(dash.active_panel().unwrap().handlers().len(), 5);

        transport.respond(Method::Get, "topics/get/all", Ok(topics(20)));
        next_tick(&mut dash, &mut rx).await;

        assert!(dash.pagination(Tab::Topics).unwrap().widget().is_none());
        assert_eq!(visible_keys(&dash), expected(1..=20));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_restores_the_row_with_one_message() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(3)));
        transport.respond(
            Method::Delete,
            "topics/delete/single",
            Err(GatewayError::Status {
                status: 500,
                body: String::new(),
            }),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;

        dash.select_next_row();
        assert!(dash.delete_selected());
        assert!(dash.prompt().is_some());
        dash.answer_prompt(true);
        assert!(dash.active_panel().unwrap().rows()[1].pending);

        drain(&mut dash, &mut rx).await;
        let panel = dash.active_panel().unwrap();
        assert_eq!(visible_keys(&dash), expected(1..=3));
        assert!(panel.rows().iter().all(|row| !row.pending));
        assert_eq!(dash.messages().len(), 1);
        assert_eq!(dash.messages().iter().next(), Some("Unable to delete the topic!"));
        let deletes = transport
            .requests()
            .into_iter()
            .filter(|req| req.method == Method::Delete)
            .collect::<Vec<_>>();
        assert_eq!(deletes[0].query, vec![("topicID".to_string(), "t2".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_delete_sends_nothing() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(2)));
        dash.start();
        drain(&mut dash, &mut rx).await;

        dash.delete_selected();
        dash.answer_prompt(false);
        drain(&mut dash, &mut rx).await;
        assert_eq!(transport.count(Method::Delete, "topics/delete/single"), 0);
        assert!(dash.active_panel().unwrap().rows().iter().all(|row| !row.pending));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_delete_removes_the_row() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(3)));
        transport.respond(
            Method::Delete,
            "topics/delete/single",
            Ok(json!({"topicID": "t1"})),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;

        dash.delete_selected();
        dash.answer_prompt(true);
        drain(&mut dash, &mut rx).await;
        assert_eq!(visible_keys(&dash), vec!["t2", "t3"]);
        assert_eq!(dash.active_panel().unwrap().handlers().len(), 2);
        assert!(dash.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_all_leaves_rows_visible_and_enabled() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Subscribers);
        transport.respond(
            Method::Get,
            "subscriber/get/all",
            Ok(json!([
                {"subscriberID": "s1", "originProtocol": "WSN", "host": "a", "port": 1},
                {"subscriberID": "s2", "originProtocol": "MQTT", "host": "b", "port": 2},
            ])),
        );
        transport.respond(
            Method::Delete,
            "subscriber/delete/all",
            Err(GatewayError::Status {
                status: 500,
                body: "Internal Server Error".into(),
            }),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;

        assert!(dash.delete_all());
        dash.answer_prompt(true);
        assert!(dash.active_panel().unwrap().rows().iter().all(|row| row.pending));
        drain(&mut dash, &mut rx).await;

        let rows = dash.active_panel().unwrap().rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| !row.pending));
        assert_eq!(dash.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_for_abandoned_tab_is_dropped() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(3)));
        dash.start();
        dash.select_tab(Tab::Subscribers);
        drain(&mut dash, &mut rx).await;

        let topics_panel = dash.panel(Tab::Topics).unwrap();
        assert!(!topics_panel.is_attached());
        assert!(topics_panel.rows().is_empty());
        assert_eq!(dash.scheduler().live_timer().map(|(tab, _)| tab), Some(Tab::Subscribers));
        assert!(dash.active_panel().unwrap().is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_polling_and_drops_in_flight_responses() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(3)));
        dash.start();
        dash.stop();
        drain(&mut dash, &mut rx).await;
        next_tick(&mut dash, &mut rx).await;

        assert!(!dash.scheduler().is_running());
        assert!(dash.active_panel().unwrap().rows().is_empty());
        assert_eq!(transport.count(Method::Get, "topics/get/all"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_skips_the_tick_and_keeps_polling() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(2)));
        dash.start();
        drain(&mut dash, &mut rx).await;

        transport.respond(Method::Get, "topics/get/all", Ok(json!("maintenance")));
        next_tick(&mut dash, &mut rx).await;
        assert_eq!(visible_keys(&dash), expected(1..=2));
        assert!(dash.last_error().is_some());

        transport.respond(Method::Get, "topics/get/all", Ok(topics(4)));
        next_tick(&mut dash, &mut rx).await;
        assert_eq!(visible_keys(&dash), expected(1..=4));
        assert!(dash.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_refresh_stops_fetching() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert!(!dash.toggle_refresh());
        next_tick(&mut dash, &mut rx).await;
        next_tick(&mut dash, &mut rx).await;
        assert_eq!(transport.count(Method::Get, "topics/get/all"), 1);
        assert!(dash.scheduler().live_timer().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_must_be_positive() {
        let (mut dash, _transport, mut rx) = dashboard(Tab::Main);
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert!(dash.set_interval(0).is_err());
        assert!(dash.set_interval(5).is_ok());
        assert_eq!(dash.scheduler().interval(), Some(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn topic_detail_opens_only_for_subscribers() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(2)));
        transport.respond(
            Method::Get,
            "topics/get/t2/subscriber/all",
            Ok(json!([{"subscriberID": "s9", "originProtocol": "WSN", "host": "h", "port": 80}])),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;

        assert!(dash.show_detail_selected());
        drain(&mut dash, &mut rx).await;
        assert!(dash.detail().is_none());

        dash.select_next_row();
        dash.show_detail_selected();
        drain(&mut dash, &mut rx).await;
        let detail = dash.detail().unwrap();
        assert_eq!(detail.title, "Subscribers of topic-2");
        assert_eq!(detail.panel.rows()[0].cells, vec!["WSN", "h", "80"]);
        assert!(dash.close_detail());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_mapping_add_reports_fallback() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Mappings);
        transport.respond(Method::Get, "config/mapping/get/all", Ok(json!({})));
        transport.respond(
            Method::Post,
            "config/mapping/add",
            Err(GatewayError::Status {
                status: 400,
                body: String::new(),
            }),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;

        assert!(dash.add_mapping(" ", "b").is_err());
        dash.add_mapping("a/b", "c").unwrap();
        drain(&mut dash, &mut rx).await;
        assert_eq!(dash.messages().iter().next(), Some(ADD_MAPPING_FAILED));
        assert!(dash.active_panel().unwrap().rows()[0].placeholder);
    }

    #[tokio::test(start_paused = true)]
    async fn main_tab_sets_summary_counters() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Main);
        transport.respond(
            Method::Get,
            "main/get/all",
            Ok(json!({
                "subscribers": 3, "publishers": 1, "topics": 7, "totalMessages": 12,
                "uptime": "PT1M", "protocols": [], "protocolPower": false,
            })),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert_eq!(dash.counters().get(crate::app::panel::Counter::Topics), Some("7"));
        assert_eq!(dash.protocol_power(), Some(false));
        dash.toggle_power();
        assert_eq!(dash.prompt(), Some("Boot all protocol servers?"));
    }

    #[tokio::test(start_paused = true)]
    async fn log_filter_change_repolls_with_new_query() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Log);
        transport.respond(Method::Get, "log/levels", Ok(json!(["DEBUG", "INFO", "WARN"])));
        transport.respond(Method::Get, "log", Ok(json!({"name": "okse.log", "lines": ["x"]})));
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert_eq!(dash.active_panel().unwrap().caption(), Some("okse.log"));

        assert_eq!(dash.cycle_log_level(), Some("INFO"));
        drain(&mut dash, &mut rx).await;
        let last = transport
            .requests()
            .into_iter()
            .rfind(|req| req.path == "log")
            .unwrap();
        assert!(last.query.contains(&("logLevel".to_string(), "INFO".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_does_not_survive_a_tab_switch() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Log);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(2)));
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert!(!dash.toggle_refresh());

        dash.select_tab(Tab::Topics);
        assert!(dash.refresh_enabled());
        assert_eq!(dash.scheduler().live_timer().map(|(tab, _)| tab), Some(Tab::Topics));
        drain(&mut dash, &mut rx).await;
        for _ in 0..3 {
            next_tick(&mut dash, &mut rx).await;
        }
        assert!(transport.count(Method::Get, "topics/get/all") >= 3);
        assert_eq!(visible_keys(&dash), expected(1..=2));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_refresh_is_reported_apart_from_transient_failures() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Topics);
        transport.respond(Method::Get, "topics/get/all", Ok(topics(2)));
        dash.start();
        drain(&mut dash, &mut rx).await;

        transport.respond(
            Method::Get,
            "topics/get/all",
            Err(GatewayError::Status {
                status: 403,
                body: r#"{"message": "Forbidden"}"#.into(),
            }),
        );
        next_tick(&mut dash, &mut rx).await;
        let error = dash.last_error().unwrap();
        assert!(error.starts_with("Refresh rejected at"));
        assert!(error.ends_with("Forbidden"));

        transport.respond(Method::Get, "topics/get/all", Err(GatewayError::Timeout));
        next_tick(&mut dash, &mut rx).await;
        assert!(dash.last_error().unwrap().starts_with("Last refresh failed at"));
        assert_eq!(visible_keys(&dash), expected(1..=2));
    }

    #[tokio::test(start_paused = true)]
    async fn mapping_delete_takes_every_target_of_the_source_topic() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Mappings);
        transport.respond(
            Method::Get,
            "config/mapping/get/all",
            Ok(json!({"news": ["a", "b"], "x": ["y"]})),
        );
        transport.respond(
            Method::Delete,
            "config/mapping/delete/single",
            Ok(json!({"deleted": true})),
        );
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert_eq!(visible_keys(&dash), vec!["news -> a", "news -> b", "x -> y"]);

        assert!(dash.delete_selected());
        assert_eq!(dash.prompt(), Some(crate::app::templates::MAPPING_DELETE_PROMPT));
        dash.answer_prompt(true);
        let pending = dash
            .active_panel()
            .unwrap()
            .rows()
            .iter()
            .map(|row| row.pending)
            .collect::<Vec<_>>();
        assert_eq!(pending, vec![true, true, false]);
        assert_eq!(dash.actions_in_flight(), 1);

        drain(&mut dash, &mut rx).await;
        assert_eq!(visible_keys(&dash), vec!["x -> y"]);
        assert_eq!(dash.actions_in_flight(), 0);
        let delete = transport
            .requests()
            .into_iter()
            .find(|req| req.method == Method::Delete)
            .unwrap();
        assert_eq!(delete.query, vec![("topic".to_string(), "news".to_string())]);
        assert_eq!(transport.count(Method::Delete, "config/mapping/delete/single"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_relay_add_repolls_at_once() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Relays);
        transport.respond(Method::Get, "config/get/all", Ok(json!({"relays": {}})));
        transport.respond(Method::Post, "config/relay/add", Ok(json!({"added": true})));
        dash.start();
        drain(&mut dash, &mut rx).await;
        assert_eq!(transport.count(Method::Get, "config/get/all"), 1);

        transport.respond(
            Method::Get,
            "config/get/all",
            Ok(json!({"relays": {"r1": "tcp://10.0.0.2:61616"}})),
        );
        assert!(dash.add_relay(" ").is_err());
        dash.add_relay("tcp://10.0.0.2:61616").unwrap();
        drain(&mut dash, &mut rx).await;

        assert_eq!(transport.count(Method::Get, "config/get/all"), 2);
        assert_eq!(visible_keys(&dash), vec!["r1"]);
        assert!(dash.messages().is_empty());
        let add = transport
            .requests()
            .into_iter()
            .find(|req| req.method == Method::Post)
            .unwrap();
        assert_eq!(
            add.query,
            vec![("from".to_string(), "tcp://10.0.0.2:61616".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn successful_mapping_add_repolls_even_while_paused() {
        let (mut dash, transport, mut rx) = dashboard(Tab::Mappings);
        transport.respond(Method::Get, "config/mapping/get/all", Ok(json!({})));
        transport.respond(Method::Post, "config/mapping/add", Ok(json!({"added": true})));
        dash.start();
        drain(&mut dash, &mut rx).await;
        dash.toggle_refresh();

        transport.respond(
            Method::Get,
            "config/mapping/get/all",
            Ok(json!({"news": ["sport"]})),
        );
        dash.add_mapping("news", "sport").unwrap();
        drain(&mut dash, &mut rx).await;

        assert_eq!(transport.count(Method::Get, "config/mapping/get/all"), 2);
        assert_eq!(visible_keys(&dash), vec!["news -> sport"]);
        assert!(dash.scheduler().live_timer().is_none());
    }

    #[test]
    fn cycle_wraps_and_defaults_to_first() {
        let options = ["a", "b"];
        assert_eq!(cycle(options.into_iter(), "b").as_deref(), Some("a"));
        assert_eq!(cycle(options.into_iter(), "zz").as_deref(), Some("a"));
        assert_eq!(cycle(std::iter::empty(), "a"), None);
    }
}
