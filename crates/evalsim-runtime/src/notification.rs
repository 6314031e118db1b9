//! The bridge from completed events to the agent's inbox: notification
//! policies, the bounded delivery queue, reminder due-time scanning, and
//! `wait_for_notification`'s time-jump helper queries (spec §4.5).
//!
//! The actual time-jumping is driven by `Environment::wait_for_notification`
//! since it needs the event queue and time manager; this module owns the
//! queue of undelivered messages and the policy/reminder bookkeeping that
//! feeds it.

use std::collections::{HashMap, VecDeque};

use evalsim_kernel::app::Reminder;
use evalsim_kernel::event::CompletedEvent;
use evalsim_kernel::notification::{NotableEventRule, NotificationKind, NotificationMessage, NotificationPolicy};

use crate::registry::AppRegistry;

/// *Silent* policy (spec §4.5): only explicit user-to-agent messages and
/// the environment-stop sentinel are ever surfaced. `ENV`-typed events —
/// new mail arriving, a third party adding a calendar entry — are logged
/// but never interrupt the agent.
pub struct SilentPolicy;

impl NotificationPolicy for SilentPolicy {
    fn should_notify(&self, event: &CompletedEvent) -> Option<NotificationMessage> {
        is_user_message(event).then(|| {
            NotificationMessage::new(
                NotificationKind::UserMessage,
                render_return_value(event),
                event.event_time,
            )
        })
    }
}

/// *Verbose* policy (spec §4.5, §9): in addition to user messages, a
/// configurable set of `ENV`-typed events are surfaced per a data-driven
/// `notable_events` rule list — resolving the "policy for what counts as
/// notable... is scenario-specific" open question in favor of
/// configuration over a hardcoded match (spec §9).
pub struct VerbosePolicy {
    pub notable_events: Vec<NotableEventRule>,
}

impl VerbosePolicy {
    pub fn new(notable_events: Vec<NotableEventRule>) -> Self {
        Self { notable_events }
    }
}

impl NotificationPolicy for VerbosePolicy {
    fn should_notify(&self, event: &CompletedEvent) -> Option<NotificationMessage> {
        if is_user_message(event) {
            return Some(NotificationMessage::new(
                NotificationKind::UserMessage,
                render_return_value(event),
                event.event_time,
            ));
        }
        self.notable_events
            .iter()
            .find(|rule| rule.matches(event))
            .map(|rule| {
                NotificationMessage::new(
                    NotificationKind::EnvironmentNotification,
                    rule.render(event),
                    event.event_time,
                )
            })
    }
}

fn is_user_message(event: &CompletedEvent) -> bool {
    matches!(event.event_type, evalsim_kernel::event::EventType::User)
        && event.status == evalsim_kernel::event::CompletedStatus::Success
}

fn render_return_value(event: &CompletedEvent) -> String {
    event
        .return_value
        .as_ref()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| {
            event
                .return_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
}

/// Default capacity of the bounded notification queue (spec §5: "a
/// bounded FIFO with coarse mutual exclusion is sufficient"). Chosen
/// generously — a scenario that produces more than this many
/// undelivered notifications before the agent drains any is almost
/// certainly stuck, not legitimately busy.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Owns the outbound notification queue, the active policy, and
/// per-reminder at-most-once bookkeeping.
pub struct NotificationSystem {
    queue: VecDeque<NotificationMessage>,
    capacity: usize,
    policy: Box<dyn NotificationPolicy>,
    reminder_last_seen: HashMap<(String, String), f64>,
    /// Set to the virtual time AUI's `send_message_to_user` last completed
    /// while no reply has arrived since; cleared the moment a reply
    /// (`send_message_to_agent`) is logged. Drives
    /// [`Self::handle_timeout_after_events`].
    awaiting_user_reply_since: Option<f64>,
}

impl NotificationSystem {
    pub fn new(policy: Box<dyn NotificationPolicy>) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: DEFAULT_QUEUE_CAPACITY,
            policy,
            reminder_last_seen: HashMap::new(),
            awaiting_user_reply_since: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Push a message, dropping the oldest queued entry if the bound
    /// would be exceeded (spec §5).
    pub fn push(&mut self, message: NotificationMessage) {
        if self.queue.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "notification queue full, dropping oldest entry");
            self.queue.pop_front();
        }
        self.queue.push_back(message);
    }

    pub fn pop(&mut self) -> Option<NotificationMessage> {
        self.queue.pop_front()
    }

    pub fn peek(&self) -> Option<&NotificationMessage> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Consult the active policy for `event` and enqueue whatever it
    /// produces, if anything (spec §4.5, event-triggered notifications).
    /// Also updates the scripted-user-reply bookkeeping
    /// [`Self::handle_timeout_after_events`] relies on.
    pub fn notify_if_notable(&mut self, event: &CompletedEvent) {
        let asked_user = event.status == evalsim_kernel::event::CompletedStatus::Success
            && event.app.as_deref() == Some("AUI")
            && event.tool.as_deref() == Some("send_message_to_user");
        if asked_user {
            self.awaiting_user_reply_since.get_or_insert(event.event_time);
        } else if is_user_message(event) {
            self.awaiting_user_reply_since = None;
        }
        if let Some(message) = self.policy.should_notify(event) {
            self.push(message);
        }
    }

    /// Post-tick timeout pass (spec §6's `wait_for_user_input_timeout`):
    /// if AUI has been waiting on a scripted user reply for at least
    /// `timeout` virtual seconds, surface a `WaitTimeout` notification once
    /// and stop waiting on that ask, mirroring
    /// `notification_system.handle_timeout_after_events()` in the ported
    /// environment loop. A `None` timeout (the default) disables the pass
    /// entirely.
    pub fn handle_timeout_after_events(&mut self, now: f64, timeout: Option<f64>) {
        let Some(timeout) = timeout else { return };
        let Some(since) = self.awaiting_user_reply_since else { return };
        if now - since >= timeout {
            self.push(NotificationMessage::new(
                NotificationKind::WaitTimeout,
                "timed out waiting for the scripted user reply",
                now,
            ));
            self.awaiting_user_reply_since = None;
        }
    }

    /// Scan every registered [`evalsim_kernel::app::ReminderSource`] for
    /// reminders whose due time has crossed `now` since the last scan,
    /// emitting one notification per newly-due reminder and recording it
    /// so it is never delivered twice (spec §4.5).
    pub fn scan_reminders(&mut self, apps: &AppRegistry, now: f64) {
        let mut newly_due = Vec::new();
        for app_name in apps.names() {
            let Some(app) = apps.get(app_name) else { continue };
            let Some(source) = app.as_reminder_source() else { continue };
            for reminder in source.due_reminders(now) {
                let key = (app_name.to_string(), reminder.reminder_id.clone());
                let already_seen = self
                    .reminder_last_seen
                    .get(&key)
                    .is_some_and(|seen| *seen >= reminder.due_at);
                if !already_seen {
                    self.reminder_last_seen.insert(key, reminder.due_at);
                    newly_due.push(reminder);
                }
            }
        }
        for reminder in newly_due {
            self.push(NotificationMessage::new(
                NotificationKind::EnvironmentNotification,
                reminder.message,
                now,
            ));
        }
    }

    /// The earliest due time among reminders that have not yet been
    /// surfaced, used by `wait_for_notification`'s three-way min (spec
    /// §4.5 step 2a–2b). Requires re-scanning since the last poke because
    /// a reminder's due time is owned by its app, not by this system.
    pub fn next_pending_reminder_time(&self, apps: &AppRegistry, now: f64) -> Option<f64> {
        let mut earliest: Option<f64> = None;
        for app_name in apps.names() {
            let Some(app) = apps.get(app_name) else { continue };
            let Some(source) = app.as_reminder_source() else { continue };
            // Reminders due at or before `now` are handled by the next
            // `scan_reminders` call in the same tick; look only forward.
            for reminder in source.due_reminders(f64::INFINITY) {
                if reminder.due_at <= now {
                    continue;
                }
                let key = (app_name.to_string(), reminder.reminder_id.clone());
                let already_seen = self
                    .reminder_last_seen
                    .get(&key)
                    .is_some_and(|seen| *seen >= reminder.due_at);
                if already_seen {
                    continue;
                }
                earliest = Some(earliest.map_or(reminder.due_at, |e: f64| e.min(reminder.due_at)));
            }
        }
        earliest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalsim_kernel::event::EventType;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn user_message_event(time: f64, text: &str) -> CompletedEvent {
        CompletedEvent::success(
            "e1",
            time,
            EventType::User,
            "AUI",
            "send_message_to_agent",
            StdHashMap::new(),
            vec![],
            vec![],
            json!(text),
        )
    }

    fn env_event(time: f64, app: &str, tool: &str) -> CompletedEvent {
        CompletedEvent::success("e2", time, EventType::Env, app, tool, StdHashMap::new(), vec![], vec![], json!({"id": 1}))
    }

    #[test]
    fn silent_policy_surfaces_only_user_messages() {
        let policy = SilentPolicy;
        assert!(policy.should_notify(&user_message_event(1.0, "hi")).is_some());
        assert!(policy.should_notify(&env_event(1.0, "Mail", "add_email")).is_none());
    }

    #[test]
    fn verbose_policy_also_surfaces_configured_rules() {
        let policy = VerbosePolicy::new(vec![NotableEventRule {
            app: "Mail".into(),
            tool: "add_email".into(),
            template: "new mail: {return_value}".into(),
        }]);
        assert!(policy.should_notify(&user_message_event(1.0, "hi")).is_some());
        let notable = policy.should_notify(&env_event(1.0, "Mail", "add_email")).unwrap();
        assert_eq!(notable.kind, NotificationKind::EnvironmentNotification);
        assert!(policy.should_notify(&env_event(1.0, "Calendar", "add_event")).is_none());
    }

    #[test]
    fn queue_drops_oldest_past_capacity() {
        let mut system = NotificationSystem::new(Box::new(SilentPolicy)).with_capacity(2);
        system.push(NotificationMessage::new(NotificationKind::UserMessage, "a", 1.0));
        system.push(NotificationMessage::new(NotificationKind::UserMessage, "b", 2.0));
        system.push(NotificationMessage::new(NotificationKind::UserMessage, "c", 3.0));
        assert_eq!(system.len(), 2);
        assert_eq!(system.pop().unwrap().message, "b");
    }

    #[test]
    fn handle_timeout_after_events_fires_once_after_the_configured_wait() {
        let mut system = NotificationSystem::new(Box::new(SilentPolicy));
        let asked = CompletedEvent::success(
            "ask1",
            1.0,
            EventType::Agent,
            "AUI",
            "send_message_to_user",
            StdHashMap::new(),
            vec![],
            vec![],
            json!(true),
        );
        system.notify_if_notable(&asked);

        system.handle_timeout_after_events(3.0, Some(5.0));
        assert!(system.is_empty(), "timeout has not elapsed yet");

        system.handle_timeout_after_events(6.0, Some(5.0));
        assert_eq!(system.len(), 1);
        assert_eq!(system.pop().unwrap().kind, NotificationKind::WaitTimeout);

        system.handle_timeout_after_events(100.0, Some(5.0));
        assert!(system.is_empty(), "must not fire twice for the same ask");
    }

    #[test]
    fn handle_timeout_after_events_is_cancelled_by_a_reply() {
        let mut system = NotificationSystem::new(Box::new(SilentPolicy));
        system.notify_if_notable(&CompletedEvent::success(
            "ask1",
            1.0,
            EventType::Agent,
            "AUI",
            "send_message_to_user",
            StdHashMap::new(),
            vec![],
            vec![],
            json!(true),
        ));
        system.notify_if_notable(&user_message_event(2.0, "here's my reply"));
        system.pop();

        system.handle_timeout_after_events(50.0, Some(5.0));
        assert!(system.is_empty(), "a reply cancels the pending timeout");
    }

    #[test]
    fn scan_reminders_delivers_each_reminder_at_most_once() {
        use async_trait::async_trait;
        use evalsim_kernel::action::ToolMetadata;
        use evalsim_kernel::app::{App, ReminderSource};
        use evalsim_kernel::error::EngineResult;
        use serde_json::Value;

        struct StubReminderApp;
        impl ReminderSource for StubReminderApp {
            fn due_reminders(&self, now: f64) -> Vec<Reminder> {
                if now >= 5.0 {
                    vec![Reminder { reminder_id: "r1".into(), due_at: 5.0, message: "take the pill".into() }]
                } else {
                    vec![]
                }
            }
        }
        #[async_trait]
        impl App for StubReminderApp {
            fn name(&self) -> &str {
                "Reminder"
            }
            fn tools(&self) -> Vec<ToolMetadata> {
                vec![]
            }
            async fn invoke_tool(&mut self, _tool: &str, _args: &StdHashMap<String, Value>) -> EngineResult<Value> {
                Ok(json!(null))
            }
            fn get_state(&self) -> Value {
                json!({})
            }
            fn load_state(&mut self, _state: Value) -> EngineResult<()> {
                Ok(())
            }
            fn reset(&mut self) {}
            fn as_reminder_source(&self) -> Option<&dyn ReminderSource> {
                Some(self)
            }
        }

        let mut registry = AppRegistry::new();
        registry.register(Box::new(StubReminderApp)).unwrap();

        let mut system = NotificationSystem::new(Box::new(SilentPolicy));
        system.scan_reminders(&registry, 4.0);
        assert!(system.is_empty());
        system.scan_reminders(&registry, 5.0);
        assert_eq!(system.len(), 1);
        system.scan_reminders(&registry, 6.0);
        assert_eq!(system.len(), 1, "reminder must not be delivered twice");
    }
}
