// SPDX-License-Identifier: BUSL-1.1

//! Display stack management (§4.5).
//!
//! Each view (`dashboard`, `main`) is an independent stack of content pushed
//! by Apps; the top of the active view's stack is what's actually shown.
//! Items can carry an expiry, evicted lazily by the session actor's timer.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::messages::View;

#[derive(Debug, Clone)]
pub struct DisplayItem {
    pub app_id: String,
    pub content: Value,
    pub layout: Value,
    pub pushed_at: Instant,
    pub expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct ViewStack {
    items: Vec<DisplayItem>,
}

impl ViewStack {
    fn push(&mut self, item: DisplayItem) {
        self.items.push(item);
    }

    fn top(&self) -> Option<&DisplayItem> {
        self.items.last()
    }

    fn evict_expired(&mut self, now: Instant) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.expires_at.is_none_or(|exp| exp > now));
        self.items.len() != before
    }

    fn clear_app(&mut self, app_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.app_id != app_id);
        self.items.len() != before
    }

    fn clear_all(&mut self) -> bool {
        let was_empty = self.items.is_empty();
        self.items.clear();
        !was_empty
    }
}

/// Per-session display state: two independent view stacks and rate-limit
/// bookkeeping for `DISPLAY_EVENT` emission.
pub struct DisplayManager {
    dashboard: ViewStack,
    main: ViewStack,
    active_view: View,
    rate_limit: Duration,
    last_emitted_at: Option<Instant>,
}

impl DisplayManager {
    pub fn new(rate_limit: Duration) -> Self {
        Self {
            dashboard: ViewStack::default(),
            main: ViewStack::default(),
            active_view: View::Main,
            rate_limit,
            last_emitted_at: None,
        }
    }

    fn stack(&self, view: View) -> &ViewStack {
        match view {
            View::Dashboard => &self.dashboard,
            View::Main => &self.main,
        }
    }

    fn stack_mut(&mut self, view: View) -> &mut ViewStack {
        match view {
            View::Dashboard => &mut self.dashboard,
            View::Main => &mut self.main,
        }
    }

    pub fn active_view(&self) -> View {
        self.active_view
    }

    pub fn set_view(&mut self, view: View) {
        self.active_view = view;
    }

    pub fn push(
        &mut self,
        view: View,
        app_id: &str,
        content: Value,
        layout: Value,
        duration: Option<Duration>,
        now: Instant,
    ) {
        let item = DisplayItem {
            app_id: app_id.to_owned(),
            content,
            layout,
            pushed_at: now,
            expires_at: duration.map(|d| now + d),
        };
        self.stack_mut(view).push(item);
    }

    /// Remove an App's own content from a view (or both views if `view` is
    /// `None`), typically on App stop.
    pub fn clear_app(&mut self, app_id: &str, view: Option<View>) -> bool {
        match view {
            Some(v) => self.stack_mut(v).clear_app(app_id),
            None => {
                let a = self.dashboard.clear_app(app_id);
                let b = self.main.clear_app(app_id);
                a || b
            }
        }
    }

    pub fn clear_view(&mut self, view: View) -> bool {
        self.stack_mut(view).clear_all()
    }

    /// The item currently visible on the active view, if any.
    pub fn visible_content(&self) -> Option<&DisplayItem> {
        self.stack(self.active_view).top()
    }

    /// Drop expired items from both views; returns whether the active view's
    /// visible content changed as a result.
    pub fn evict_expired(&mut self, now: Instant) -> bool {
        let active_before = self.visible_content().map(|i| i.pushed_at);
        self.dashboard.evict_expired(now);
        self.main.evict_expired(now);
        self.visible_content().map(|i| i.pushed_at) != active_before
    }

    /// Whether enough time has elapsed since the last emission to send a new
    /// `DISPLAY_EVENT` immediately, versus coalescing into the next tick.
    pub fn should_emit_now(&self, now: Instant) -> bool {
        match self.last_emitted_at {
            None => true,
            Some(last) => now.duration_since(last) >= self.rate_limit,
        }
    }

    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_emitted_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_and_visible_content_follows_active_view() {
        let mut mgr = DisplayManager::new(Duration::from_millis(50));
        let now = Instant::now();
        mgr.push(View::Main, "app.a", json!({"text": "hi"}), json!({}), None, now);
        assert!(mgr.visible_content().is_some());
        mgr.set_view(View::Dashboard);
        assert!(mgr.visible_content().is_none());
    }

    #[test]
    fn expired_items_are_evicted() {
        let mut mgr = DisplayManager::new(Duration::from_millis(50));
        let now = Instant::now();
        mgr.push(View::Main, "app.a", json!({}), json!({}), Some(Duration::from_millis(10)), now);
        let later = now + Duration::from_millis(20);
        assert!(mgr.evict_expired(later));
        assert!(mgr.visible_content().is_none());
    }

    #[test]
    fn clear_app_only_removes_its_own_content() {
        let mut mgr = DisplayManager::new(Duration::from_millis(50));
        let now = Instant::now();
        mgr.push(View::Main, "app.a", json!({}), json!({}), None, now);
        mgr.push(View::Main, "app.b", json!({"owner": "b"}), json!({}), None, now);
        mgr.clear_app("app.a", None);
        assert_eq!(mgr.visible_content().unwrap().app_id, "app.b");
    }

    #[test]
    fn rate_limit_coalesces_rapid_emissions() {
        let mut mgr = DisplayManager::new(Duration::from_millis(50));
        let now = Instant::now();
        assert!(mgr.should_emit_now(now));
        mgr.mark_emitted(now);
        assert!(!mgr.should_emit_now(now + Duration::from_millis(10)));
        assert!(mgr.should_emit_now(now + Duration::from_millis(51)));
    }
}
