//! Popup bookkeeping, independent of how popups are drawn.
//!
//! The manager owns every popup that is on screen or playing its exit
//! animation. Time is passed in explicitly so the host decides when
//! deadlines fire; nothing here sleeps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tracing::{debug, trace};

use crate::format::truncate_text;
use crate::models::{PopupContent, PopupGeometry, PopupId, Position, Viewport};

pub const DEFAULT_MAX_POPUPS: usize = 3;
pub const HEADER_MAX_CHARS: usize = 50;
/// How long a closed popup stays around for its exit animation.
pub const REMOVAL_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupPhase {
    Open,
    Closing { remove_at: Instant },
}

#[derive(Debug, Clone)]
pub struct Popup {
    pub id: PopupId,
    /// Full selected text; use [`Popup::header`] for display.
    pub text: String,
    pub position: Position,
    pub content: PopupContent,
    pub expires_at: Option<Instant>,
    pub phase: PopupPhase,
}

impl Popup {
    pub fn header(&self) -> String {
        truncate_text(&self.text, HEADER_MAX_CHARS)
    }

    pub fn is_open(&self) -> bool {
        self.phase == PopupPhase::Open
    }
}

pub struct PopupManager {
    // Oldest first.
    popups: VecDeque<Popup>,
    max_popups: usize,
    viewport: Viewport,
    geometry: PopupGeometry,
}

impl PopupManager {
    pub fn new(max_popups: usize, viewport: Viewport, geometry: PopupGeometry) -> Self {
        Self {
            popups: VecDeque::new(),
            max_popups: max_popups.max(1),
            viewport,
            geometry,
        }
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn geometry(&self) -> PopupGeometry {
        self.geometry
    }

    /// Where a popup for a selection ending at `pointer` should appear.
    pub fn popup_position(&self, pointer: Position) -> Position {
        get_popup_position(pointer, self.viewport, self.geometry)
    }

    /// Registers a new popup in the loading state and returns its ID.
    ///
    /// Popups whose exit animation already finished are dropped first, then
    /// the oldest remaining ones are evicted until the new popup fits under
    /// the limit.
    pub fn create_popup(
        &mut self,
        text: &str,
        position: Position,
        auto_close: Option<Duration>,
        now: Instant,
    ) -> PopupId {
        self.cleanup_popups(now);

        let id = self.next_id();
        let position = clamp_into_viewport(position, self.viewport, self.geometry);
        self.popups.push_back(Popup {
            id: id.clone(),
            text: text.to_string(),
            position,
            content: PopupContent::Loading,
            expires_at: auto_close.map(|delay| now + delay),
            phase: PopupPhase::Open,
        });
        debug!(popup = %id, x = position.x, y = position.y, "popup created");
        id
    }

    /// Replaces the content of an open popup. Popups that are already closing
    /// or gone are left alone; results routinely arrive after a dismissal.
    pub fn update_popup_content(&mut self, id: &PopupId, content: PopupContent) {
        match self.popups.iter_mut().find(|p| &p.id == id && p.is_open()) {
            Some(popup) => popup.content = content,
            None => trace!(popup = %id, "update for closed popup ignored"),
        }
    }

    /// Starts the exit animation; the popup disappears [`REMOVAL_DELAY`]
    /// later. Closing twice or closing an unknown ID does nothing.
    pub fn close_popup(&mut self, id: &PopupId, now: Instant) {
        if let Some(popup) = self.popups.iter_mut().find(|p| &p.id == id && p.is_open()) {
            popup.phase = PopupPhase::Closing {
                remove_at: now + REMOVAL_DELAY,
            };
            debug!(popup = %id, "popup closing");
        }
    }

    pub fn close_all_popups(&mut self, now: Instant) {
        let ids: Vec<PopupId> = self.popups.iter().map(|p| p.id.clone()).collect();
        for id in &ids {
            self.close_popup(id, now);
        }
    }

    /// Fires due deadlines. Returns the IDs of popups that were auto-closed
    /// by this call.
    pub fn tick(&mut self, now: Instant) -> Vec<PopupId> {
        let mut expired = Vec::new();
        for popup in self.popups.iter_mut() {
            if popup.is_open() && popup.expires_at.is_some_and(|at| at <= now) {
                popup.phase = PopupPhase::Closing {
                    remove_at: now + REMOVAL_DELAY,
                };
                expired.push(popup.id.clone());
            }
        }
        for id in &expired {
            debug!(popup = %id, "popup auto-closed");
        }
        self.sweep(now);
        expired
    }

    pub fn get(&self, id: &PopupId) -> Option<&Popup> {
        self.popups.iter().find(|p| &p.id == id)
    }

    pub fn is_open(&self, id: &PopupId) -> bool {
        self.get(id).is_some_and(Popup::is_open)
    }

    /// Tracked popups, oldest first, including ones still animating out.
    pub fn popups(&self) -> impl Iterator<Item = &Popup> {
        self.popups.iter()
    }

    pub fn len(&self) -> usize {
        self.popups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.popups.is_empty()
    }

    fn cleanup_popups(&mut self, now: Instant) {
        self.sweep(now);
        while self.popups.len() >= self.max_popups {
            if let Some(evicted) = self.popups.pop_front() {
                debug!(popup = %evicted.id, "evicted oldest popup");
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        self.popups.retain(|p| match p.phase {
            PopupPhase::Closing { remove_at } => remove_at > now,
            PopupPhase::Open => true,
        });
    }

    fn next_id(&self) -> PopupId {
        loop {
            let candidate = PopupId::from(format!(
                "popup-{}-{}",
                Utc::now().timestamp_millis(),
                random_suffix(9)
            ));
            if self.get(&candidate).is_none() {
                return candidate;
            }
        }
    }
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Places a popup next to the pointer, flipping to the other side of the
/// pointer on any axis where it would overflow, then clamps it on screen.
pub fn get_popup_position(pointer: Position, viewport: Viewport, geometry: PopupGeometry) -> Position {
    let mut x = pointer.x + geometry.offset;
    let mut y = pointer.y + geometry.offset;

    if x + geometry.width > viewport.width {
        x = pointer.x - geometry.width - geometry.offset;
    }
    if y + geometry.height > viewport.height {
        y = pointer.y - geometry.height - geometry.offset;
    }

    clamp_into_viewport(Position::new(x, y), viewport, geometry)
}

// The margin wins when the viewport is too small to fit the popup.
fn clamp_into_viewport(position: Position, viewport: Viewport, geometry: PopupGeometry) -> Position {
    let max_x = viewport.width - geometry.width - geometry.margin;
    let max_y = viewport.height - geometry.height - geometry.margin;
    Position::new(
        position.x.min(max_x).max(geometry.margin),
        position.y.min(max_y).max(geometry.margin),
    )
}
