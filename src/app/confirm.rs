use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use super::error::GatewayError;
use super::gateway::ApiRequest;
use super::tabs::Tab;

pub type ActionId = u64;

const MAX_MESSAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

/// Rows an action optimistically marks while it is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    Rows { tab: Tab, keys: Vec<String> },
    All { tab: Tab },
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub request: ApiRequest,
    pub target: ActionTarget,
    pub failure_message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Committed(ActionTarget),
    RolledBack {
        target: ActionTarget,
        message: String,
    },
}

impl Settlement {
    pub fn state(&self) -> ActionState {
        match self {
            Settlement::Committed(_) => ActionState::Committed,
            Settlement::RolledBack { .. } => ActionState::RolledBack,
        }
    }
}

struct OpenPrompt {
    text: String,
    action: PendingAction,
}

/// Yes/no gate in front of destructive actions and the bookkeeping of
/// every action started through it.
#[derive(Default)]
pub struct ActionConfirmer {
    prompt: Option<OpenPrompt>,
    /// In-flight actions only; an entry leaves the map when it settles.
    actions: HashMap<ActionId, PendingAction>,
    next_id: ActionId,
}

impl ActionConfirmer {
    /// Opens the confirmation prompt. A prompt that is still open is
    /// replaced; it never ran, so nothing needs undoing.
    pub fn confirm_and_run(&mut self, prompt: impl Into<String>, action: PendingAction) {
        let text = prompt.into();
        if let Some(previous) = self.prompt.replace(OpenPrompt { text, action }) {
            log::debug!("discarding unanswered prompt: {}", previous.text);
        }
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_ref().map(|open| open.text.as_str())
    }

    /// Answers the open prompt. "yes" moves the action to `Pending` and hands
    /// it back for the caller to mark rows and dispatch.
    pub fn resolve(&mut self, answer: bool) -> Option<(ActionId, PendingAction)> {
        let open = self.prompt.take()?;
        if !answer {
            log::debug!("declined: {}", open.text);
            return None;
        }
        Some(self.start(open.action))
    }

    /// Starts a non-destructive action without asking.
    pub fn start(&mut self, action: PendingAction) -> (ActionId, PendingAction) {
        self.next_id += 1;
        let id = self.next_id;
        log::info!("action {id}: {}", action.request.describe());
        self.actions.insert(id, action.clone());
        (id, action)
    }

    /// `Pending` while in flight, `Idle` otherwise. Terminal states are
    /// reported once, through [`Settlement::state`].
    pub fn state(&self, id: ActionId) -> ActionState {
        if self.actions.contains_key(&id) {
            ActionState::Pending
        } else {
            ActionState::Idle
        }
    }

    pub fn in_flight(&self) -> usize {
        self.actions.len()
    }

    /// Applies the gateway outcome. Settling twice, or settling an unknown
    /// action, yields nothing.
    pub fn settle(
        &mut self,
        id: ActionId,
        result: Result<Value, GatewayError>,
    ) -> Option<Settlement> {
        let action = self.actions.remove(&id)?;
        match result {
            Ok(payload) if !rejected(&payload) => {
                log::info!("action {id} committed");
                Some(Settlement::Committed(action.target))
            }
            Ok(_) => {
                log::warn!("action {id} rejected by the broker");
                Some(Settlement::RolledBack {
                    target: action.target,
                    message: action.failure_message.to_string(),
                })
            }
            Err(err) => {
                log::warn!("action {id} failed: {err}");
                Some(Settlement::RolledBack {
                    target: action.target,
                    message: err
                        .server_message()
                        .unwrap_or_else(|| action.failure_message.to_string()),
                })
            }
        }
    }
}

/// The broker answers some refusals with 200 and `{"added": false}`.
fn rejected(payload: &Value) -> bool {
    ["added", "deleted"]
        .iter()
        .any(|key| payload.get(*key).and_then(Value::as_bool) == Some(false))
}

/// Non-modal list of failure strings, newest first.
#[derive(Debug, Default)]
pub struct MessageArea {
    messages: VecDeque<String>,
}

impl MessageArea {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push_front(message.into());
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_back();
        }
    }

    pub fn dismiss(&mut self) -> Option<String> {
        self.messages.pop_front()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delete_topic(id: &str) -> PendingAction {
        PendingAction {
            request: ApiRequest::delete("topics/delete/single").with_query("topicID", id),
            target: ActionTarget::Rows {
                tab: Tab::Topics,
                keys: vec![id.to_string()],
            },
            failure_message: "Unable to delete the topic!",
        }
    }

    #[test]
    fn declining_does_nothing() {
        let mut confirmer = ActionConfirmer::default();
        confirmer.confirm_and_run("Delete?", delete_topic("t1"));
        assert_eq!(confirmer.prompt(), Some("Delete?"));
        assert_eq!(confirmer.resolve(false), None);
        assert_eq!(confirmer.prompt(), None);
        assert_eq!(confirmer.resolve(true), None);
    }

    #[test]
    fn confirmed_action_walks_pending_to_committed() {
        let mut confirmer = ActionConfirmer::default();
        confirmer.confirm_and_run("Delete?", delete_topic("t1"));
        let (id, action) = confirmer.resolve(true).unwrap();
        assert_eq!(confirmer.state(id), ActionState::Pending);
        let settled = confirmer.settle(id, Ok(json!({"deleted": true})));
        assert_eq!(settled.as_ref().map(Settlement::state), Some(ActionState::Committed));
        assert_eq!(settled, Some(Settlement::Committed(action.target)));
        assert_eq!(confirmer.state(id), ActionState::Idle);
        assert_eq!(confirmer.settle(id, Ok(Value::Null)), None);
    }

    #[test]
    fn failure_prefers_server_message_then_fallback() {
        let mut confirmer = ActionConfirmer::default();
        let (first, _) = confirmer.start(delete_topic("t1"));
        let (second, _) = confirmer.start(delete_topic("t2"));

        let with_body = confirmer.settle(
            first,
            Err(GatewayError::Status {
                status: 409,
                body: r#"{"message":"topic has children"}"#.into(),
            }),
        );
        let Some(Settlement::RolledBack { message, .. }) = with_body else {
            panic!("expected rollback, got {with_body:?}");
        };
        assert_eq!(message, "topic has children");

        let without_body = confirmer.settle(
            second,
            Err(GatewayError::Status {
                status: 500,
                body: "<html>".into(),
            }),
        );
        let Some(Settlement::RolledBack { message, .. }) = without_body else {
            panic!("expected rollback, got {without_body:?}");
        };
        assert_eq!(message, "Unable to delete the topic!");
        assert_eq!(confirmer.state(second), ActionState::Idle);
        assert_eq!(confirmer.in_flight(), 0);
    }

    #[test]
    fn broker_refusal_in_body_rolls_back() {
        let mut confirmer = ActionConfirmer::default();
        let (id, _) = confirmer.start(PendingAction {
            request: ApiRequest::post("config/relay/add").with_query("from", "http://x"),
            target: ActionTarget::Nothing,
            failure_message: "The broker was unable to add the relay, try again!",
        });
        assert!(matches!(
            confirmer.settle(id, Ok(json!({"added": false}))),
            Some(Settlement::RolledBack { .. })
        ));
    }

    #[test]
    fn settled_actions_are_forgotten() {
        let mut confirmer = ActionConfirmer::default();
        let ids = (0..50)
            .map(|i| confirmer.start(delete_topic(&format!("t{i}"))).0)
            .collect::<Vec<_>>();
        assert_eq!(confirmer.in_flight(), 50);
        for (n, id) in ids.into_iter().enumerate() {
            let result = if n % 2 == 0 {
                Ok(Value::Null)
            } else {
                Err(GatewayError::Timeout)
            };
            assert!(confirmer.settle(id, result).is_some());
        }
        assert_eq!(confirmer.in_flight(), 0);
    }

    #[test]
    fn message_area_is_capped_and_dismissible() {
        let mut area = MessageArea::default();
        for i in 0..15 {
            area.push(format!("failure {i}"));
        }
        assert_eq!(area.len(), MAX_MESSAGES);
        assert_eq!(area.dismiss().as_deref(), Some("failure 14"));
        area.clear();
        assert!(area.is_empty());
    }
}
