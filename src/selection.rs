//! Turns page selections into popups and explanation requests.
//!
//! The controller keeps at most one "current" popup. Every request carries a
//! sequence number that the privileged side echoes back; results that arrive
//! while nothing is current, or that answer an older request, are stale and
//! get dropped.

use std::time::{Duration, Instant};

use crossterm::event::KeyCode;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::ExplainError;
use crate::models::{DestinationId, PopupContent, PopupId, Position, Selection};
use crate::popup::PopupManager;
use crate::transport::{BackgroundRequest, ExplanationResult, PageMessage, PagePort};

/// Wait between pointer-up and reading the selection.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);
pub const MIN_SELECTION_CHARS: usize = 2;
pub const MAX_SELECTION_CHARS: usize = 100;
pub const ERROR_GLYPH: &str = "❌";

static NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());

/// Whatever can report the text currently selected on the page.
pub trait SelectionSource {
    fn selected_text(&self) -> String;
}

impl SelectionSource for str {
    fn selected_text(&self) -> String {
        self.to_string()
    }
}

impl SelectionSource for String {
    fn selected_text(&self) -> String {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    PopupOpen { popup_id: PopupId, text: String },
}

struct PendingSelection {
    due: Instant,
    pointer: Position,
}

pub struct SelectionController {
    popups: PopupManager,
    port: PagePort,
    state: ControllerState,
    last_selection: String,
    pending: Option<PendingSelection>,
    auto_close: Option<Duration>,
    next_request: u64,
    awaiting: Option<u64>,
}

impl SelectionController {
    pub fn new(popups: PopupManager, port: PagePort, auto_close: Option<Duration>) -> Self {
        Self {
            popups,
            port,
            state: ControllerState::Idle,
            last_selection: String::new(),
            pending: None,
            auto_close,
            next_request: 1,
            awaiting: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn current_popup(&self) -> Option<&PopupId> {
        match &self.state {
            ControllerState::PopupOpen { popup_id, .. } => Some(popup_id),
            ControllerState::Idle => None,
        }
    }

    pub fn popups(&self) -> &PopupManager {
        &self.popups
    }

    pub fn popups_mut(&mut self) -> &mut PopupManager {
        &mut self.popups
    }

    pub fn destination(&self) -> DestinationId {
        self.port.destination()
    }

    /// Whether `text` deserves a popup. Expects already trimmed text.
    pub fn should_show_popup(&self, text: &str) -> bool {
        let len = text.chars().count();
        if text.is_empty() || !(MIN_SELECTION_CHARS..=MAX_SELECTION_CHARS).contains(&len) {
            return false;
        }
        if text.trim().is_empty() {
            return false;
        }
        if NUMBER_REGEX.is_match(text) {
            return false;
        }
        text != self.last_selection
    }

    /// Schedules a look at the selection once it has settled.
    pub fn handle_pointer_up(&mut self, pointer: Position, now: Instant) {
        self.pending = Some(PendingSelection {
            due: now + SETTLE_DELAY,
            pointer,
        });
    }

    pub fn handle_key_up(&mut self, key: KeyCode, now: Instant) {
        if key == KeyCode::Esc {
            self.close_current_popup(now);
        }
    }

    pub fn handle_selection_change(&mut self, selected_text: &str, now: Instant) {
        if selected_text.trim().is_empty() && self.current_popup().is_some() {
            self.close_current_popup(now);
        }
    }

    /// Closes the current popup and forgets the last selection so the same
    /// text can trigger again.
    pub fn close_current_popup(&mut self, now: Instant) {
        self.dismiss(now);
        self.last_selection.clear();
    }

    /// Advances timers, evaluates a settled selection and applies any
    /// messages that arrived from the privileged side.
    pub fn tick<S: SelectionSource + ?Sized>(&mut self, now: Instant, source: &S) {
        let expired = self.popups.tick(now);
        if let Some(current) = self.current_popup() {
            if expired.contains(current) {
                debug!(popup = %current, "current popup expired");
                self.state = ControllerState::Idle;
                self.awaiting = None;
                self.last_selection.clear();
            }
        }

        if self.pending.as_ref().is_some_and(|p| p.due <= now) {
            if let Some(pending) = self.pending.take() {
                let selection = Selection::new(&source.selected_text(), pending.pointer);
                if self.should_show_popup(&selection.text) {
                    self.show_popup(selection, now);
                }
            }
        }

        while let Some(message) = self.port.try_recv() {
            self.handle_message(message, now);
        }
    }

    pub fn handle_message(&mut self, message: PageMessage, now: Instant) {
        match message {
            PageMessage::ExplanationResponse(result) => self.apply_result(result),
            PageMessage::HidePopup => self.close_current_popup(now),
        }
    }

    /// Closes everything; used when the page goes away.
    pub fn teardown(&mut self, now: Instant) {
        self.pending = None;
        self.state = ControllerState::Idle;
        self.awaiting = None;
        self.last_selection.clear();
        self.popups.close_all_popups(now);
    }

    fn show_popup(&mut self, selection: Selection, now: Instant) {
        self.dismiss(now);

        let position = self.popups.popup_position(selection.pointer);
        let popup_id = self
            .popups
            .create_popup(&selection.text, position, self.auto_close, now);
        info!(popup = %popup_id, text = %selection.text, "showing popup");

        self.last_selection = selection.text.clone();
        self.state = ControllerState::PopupOpen {
            popup_id: popup_id.clone(),
            text: selection.text.clone(),
        };
        self.request_explanation(&popup_id, selection.text);
    }

    fn request_explanation(&mut self, popup_id: &PopupId, text: String) {
        if !self.port.is_connected() {
            warn!("privileged side unreachable, not sending request");
            self.show_error(popup_id, &ExplainError::ContextInvalidated);
            return;
        }
        let request_id = self.next_request;
        self.next_request += 1;
        let request = BackgroundRequest::GetExplanation {
            text,
            request_id: Some(request_id),
        };
        match self.port.send(&request) {
            Ok(()) => self.awaiting = Some(request_id),
            Err(e) => {
                warn!(error = %e, "failed to send explanation request");
                self.show_error(popup_id, &e);
            }
        }
    }

    fn apply_result(&mut self, result: ExplanationResult) {
        let Some(popup_id) = self.current_popup().cloned() else {
            debug!("stale explanation dropped");
            return;
        };
        // Untagged results can't be matched and go to the current popup.
        if let Some(answered) = result.request_id {
            if self.awaiting != Some(answered) {
                debug!(request = answered, "explanation for a superseded request dropped");
                return;
            }
        }
        let content = match (result.success, result.explanation, result.error) {
            (true, Some(explanation), _) => PopupContent::Explanation(explanation),
            (_, _, Some(error)) => error_content(&error),
            _ => error_content(&ExplainError::Protocol(String::new()).user_message()),
        };
        self.popups.update_popup_content(&popup_id, content);
    }

    fn show_error(&mut self, popup_id: &PopupId, error: &ExplainError) {
        self.popups
            .update_popup_content(popup_id, error_content(&error.user_message()));
    }

    fn dismiss(&mut self, now: Instant) {
        if let ControllerState::PopupOpen { popup_id, .. } = &self.state {
            self.popups.close_popup(popup_id, now);
        }
        self.state = ControllerState::Idle;
        self.awaiting = None;
    }
}

fn error_content(message: &str) -> PopupContent {
    PopupContent::Error(format!("{ERROR_GLYPH} {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PopupGeometry, Viewport};
    use crate::popup::REMOVAL_DELAY;
    use crate::transport::{BackgroundPort, Bridge};

    fn controller() -> (SelectionController, BackgroundPort, Bridge) {
        let (bridge, port) = Bridge::new();
        let popups = PopupManager::new(3, Viewport::new(1280, 800), PopupGeometry::default());
        let controller = SelectionController::new(popups, bridge.connect_page(), Some(Duration::from_secs(15)));
        (controller, port, bridge)
    }

    fn select(controller: &mut SelectionController, text: &str, now: Instant) {
        controller.handle_pointer_up(Position::new(100, 100), now);
        controller.tick(now + SETTLE_DELAY, text);
    }

    fn content(controller: &SelectionController) -> PopupContent {
        let id = controller.current_popup().unwrap();
        controller.popups().get(id).unwrap().content.clone()
    }

    #[test]
    fn rejects_bad_lengths_whitespace_and_numbers() {
        let (c, _port, _bridge) = controller();
        assert!(!c.should_show_popup(""));
        assert!(!c.should_show_popup("a"));
        assert!(!c.should_show_popup(&"a".repeat(101)));
        assert!(!c.should_show_popup("    "));
        assert!(!c.should_show_popup("42"));
        assert!(!c.should_show_popup("3.14"));

        assert!(c.should_show_popup("ab"));
        assert!(c.should_show_popup(&"a".repeat(100)));
        assert!(c.should_show_popup("v1.2"));
        assert!(c.should_show_popup("42 apples"));
    }

    #[test]
    fn same_selection_twice_is_rejected() {
        let (mut c, mut port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        let first = c.current_popup().cloned().unwrap();
        assert!(!c.should_show_popup("API"));

        select(&mut c, "API", now + Duration::from_secs(1));
        assert_eq!(c.current_popup(), Some(&first));
        assert!(port.try_recv().is_some());
        assert!(port.try_recv().is_none());
    }

    #[test]
    fn selection_is_read_only_after_settling() {
        let (mut c, mut port, _bridge) = controller();
        let now = Instant::now();
        c.handle_pointer_up(Position::new(100, 100), now);
        c.tick(now + Duration::from_millis(5), "API");
        assert_eq!(c.state(), &ControllerState::Idle);

        c.tick(now + SETTLE_DELAY, "  API  ");
        assert!(matches!(c.state(), ControllerState::PopupOpen { text, .. } if text == "API"));
        assert_eq!(content(&c), PopupContent::Loading);

        let envelope = port.try_recv().unwrap();
        assert_eq!(envelope.origin, c.destination());
        assert!(matches!(
            envelope.decode(),
            Some(BackgroundRequest::GetExplanation { text, request_id: Some(_) }) if text == "API"
        ));
    }

    #[test]
    fn new_selection_replaces_current_popup() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        let first = c.current_popup().cloned().unwrap();

        select(&mut c, "RAII", now + Duration::from_secs(1));
        let second = c.current_popup().cloned().unwrap();
        assert_ne!(first, second);
        assert!(!c.popups().is_open(&first));
        assert!(c.popups().is_open(&second));
    }

    #[test]
    fn result_updates_current_popup() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("Foo bar.".into())),
            now,
        );
        assert_eq!(content(&c), PopupContent::Explanation("Foo bar.".into()));
    }

    #[test]
    fn error_result_is_prefixed() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::failed(&ExplainError::RateLimit)),
            now,
        );
        assert_eq!(
            content(&c),
            PopupContent::Error("❌ API rate limit exceeded. Please try again later.".into())
        );
    }

    #[test]
    fn late_result_after_close_is_dropped() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        let id = c.current_popup().cloned().unwrap();
        c.close_current_popup(now);
        assert_eq!(c.state(), &ControllerState::Idle);

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("late".into())),
            now,
        );
        assert_eq!(c.popups().get(&id).unwrap().content, PopupContent::Loading);
    }

    fn sent_request_id(port: &mut BackgroundPort) -> Option<u64> {
        match port.try_recv()?.decode()? {
            BackgroundRequest::GetExplanation { request_id, .. } => request_id,
            _ => None,
        }
    }

    #[test]
    fn answer_to_superseded_request_is_dropped() {
        let (mut c, mut port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        let first = sent_request_id(&mut port).unwrap();

        select(&mut c, "RAII", now + Duration::from_secs(1));
        let second = sent_request_id(&mut port).unwrap();
        assert_ne!(first, second);

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("About API.".into()).for_request(Some(first))),
            now,
        );
        assert_eq!(content(&c), PopupContent::Loading);

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("About RAII.".into()).for_request(Some(second))),
            now,
        );
        assert_eq!(content(&c), PopupContent::Explanation("About RAII.".into()));

        c.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("About API.".into()).for_request(Some(first))),
            now,
        );
        assert_eq!(content(&c), PopupContent::Explanation("About RAII.".into()));
    }

    #[test]
    fn escape_and_cleared_selection_close_and_reset() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        c.handle_key_up(KeyCode::Char('x'), now);
        assert!(c.current_popup().is_some());

        c.handle_key_up(KeyCode::Esc, now);
        assert_eq!(c.state(), &ControllerState::Idle);
        assert!(c.should_show_popup("API"));

        select(&mut c, "API", now + Duration::from_secs(1));
        c.handle_selection_change("   ", now + Duration::from_secs(2));
        assert_eq!(c.state(), &ControllerState::Idle);
        assert!(c.should_show_popup("API"));
    }

    #[test]
    fn hide_popup_message_closes() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        c.handle_message(PageMessage::HidePopup, now);
        assert_eq!(c.state(), &ControllerState::Idle);
    }

    #[test]
    fn auto_close_returns_to_idle() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        c.tick(now + Duration::from_secs(16), "API");
        assert_eq!(c.state(), &ControllerState::Idle);

        c.tick(now + Duration::from_secs(16) + REMOVAL_DELAY, "API");
        assert!(c.popups().is_empty());
    }

    #[test]
    fn unreachable_privileged_side_shows_refresh_hint() {
        let (mut c, port, _bridge) = controller();
        drop(port);
        select(&mut c, "API", Instant::now());
        assert_eq!(
            content(&c),
            PopupContent::Error("❌ Extension was reloaded. Please refresh the page.".into())
        );
    }

    #[test]
    fn inbox_messages_are_applied_on_tick() {
        let (mut c, port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        port.outbound().deliver(
            c.destination(),
            &PageMessage::ExplanationResponse(ExplanationResult::ok("Done.".into())),
        );
        c.tick(now + Duration::from_millis(50), "API");
        assert_eq!(content(&c), PopupContent::Explanation("Done.".into()));
    }

    #[test]
    fn teardown_closes_everything() {
        let (mut c, _port, _bridge) = controller();
        let now = Instant::now();
        select(&mut c, "API", now);
        c.teardown(now);
        assert_eq!(c.state(), &ControllerState::Idle);
        assert!(c.popups().popups().all(|p| !p.is_open()));
    }
}
