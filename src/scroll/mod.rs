//! Auto-scroll decisions for a live conversation view.
//!
//! The controller never reads a clock or spawns timers itself: every entry
//! point takes `now`, timers are stored as deadlines, and [`ScrollController::poll`]
//! fires the ones that are due. A driver sleeps until [`ScrollController::next_deadline`].
//!
//! Lifecycle: `new` → observe (`on_scroll_event`, `scroll_to_bottom`, `poll`) → `dispose`.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

/// The scrollable container the controller drives.
pub trait Viewport {
    fn scroll_height(&self) -> f64;
    fn scroll_top(&self) -> f64;
    fn client_height(&self) -> f64;
    fn scroll_to(&mut self, top: f64, behavior: ScrollBehavior);
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollOptions {
    /// Distance from the bottom, in pixels, that still counts as "at bottom".
    pub threshold: f64,
    /// Quiet period after the last user scroll event.
    pub scroll_delay: Duration,
    /// Follow-up scrolls after `scroll_to_bottom`, for content laid out late.
    pub retry_delays: Vec<Duration>,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            threshold: 100.0,
            scroll_delay: Duration::from_millis(100),
            retry_delays: vec![Duration::from_millis(50), Duration::from_millis(150)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub user_scrolling: bool,
    pub should_auto_scroll: bool,
    pub at_bottom: bool,
}

#[derive(Debug, Clone, Copy)]
struct PendingScroll {
    due: Instant,
    behavior: ScrollBehavior,
    force: bool,
}

#[derive(Debug)]
pub struct ScrollController {
    options: ScrollOptions,
    user_scrolling: bool,
    should_auto_scroll: bool,
    programmatic_scroll: bool,
    debounce_deadline: Option<Instant>,
    pending: Vec<PendingScroll>,
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new(ScrollOptions::default())
    }
}

impl ScrollController {
    pub const fn new(options: ScrollOptions) -> Self {
        Self {
            options,
            user_scrolling: false,
            should_auto_scroll: true,
            programmatic_scroll: false,
            debounce_deadline: None,
            pending: Vec::new(),
        }
    }

    pub fn is_at_bottom(&self, viewport: &impl Viewport) -> bool {
        viewport.scroll_height() - viewport.scroll_top() - viewport.client_height()
            <= self.options.threshold
    }

    /// Handles a scroll event observed on the viewport.
    pub fn on_scroll_event(&mut self, viewport: &impl Viewport, now: Instant) {
        // The echo of our own scroll leaves a running debounce untouched.
        if self.programmatic_scroll {
            self.programmatic_scroll = false;
            return;
        }
        self.user_scrolling = true;
        self.should_auto_scroll = self.is_at_bottom(viewport);
        self.debounce_deadline = Some(now + self.options.scroll_delay);
    }

    /// Scrolls to the bottom unless the user has scrolled away, and schedules
    /// the follow-up scrolls. Returns whether anything was scrolled.
    pub fn scroll_to_bottom(
        &mut self,
        viewport: &mut impl Viewport,
        force: bool,
        now: Instant,
    ) -> bool {
        if !force && !self.should_auto_scroll {
            return false;
        }

        self.programmatic_scroll = true;
        viewport.scroll_to(viewport.scroll_height(), ScrollBehavior::Smooth);

        let last = self.options.retry_delays.len().saturating_sub(1);
        for (i, delay) in self.options.retry_delays.iter().enumerate() {
            self.pending.push(PendingScroll {
                due: now + *delay,
                behavior: if i == last {
                    ScrollBehavior::Instant
                } else {
                    ScrollBehavior::Smooth
                },
                force,
            });
        }
        true
    }

    /// One instant scroll to the bottom, no follow-ups.
    pub fn scroll_to_bottom_static_force(&mut self, viewport: &mut impl Viewport) {
        self.programmatic_scroll = true;
        viewport.scroll_to(viewport.scroll_height(), ScrollBehavior::Instant);
    }

    /// Fires every timer due at `now`. A follow-up scroll re-checks the
    /// auto-scroll intent when it fires, not when it was scheduled.
    pub fn poll(&mut self, viewport: &mut impl Viewport, now: Instant) {
        if self.debounce_deadline.is_some_and(|deadline| deadline <= now) {
            self.debounce_deadline = None;
            self.user_scrolling = false;
        }

        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|scroll| scroll.due <= now);
        self.pending = pending;
        due.sort_by_key(|scroll| scroll.due);

        for scroll in due {
            if scroll.force || self.should_auto_scroll {
                self.programmatic_scroll = true;
                viewport.scroll_to(viewport.scroll_height(), scroll.behavior);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .iter()
            .map(|scroll| scroll.due)
            .chain(self.debounce_deadline)
            .min()
    }

    pub fn enable_auto_scroll(&mut self) {
        self.should_auto_scroll = true;
    }

    pub fn disable_auto_scroll(&mut self) {
        self.should_auto_scroll = false;
    }

    pub fn state(&self, viewport: &impl Viewport) -> ScrollState {
        ScrollState {
            user_scrolling: self.user_scrolling,
            should_auto_scroll: self.should_auto_scroll,
            at_bottom: self.is_at_bottom(viewport),
        }
    }

    /// Cancels all pending timers.
    pub fn dispose(&mut self) {
        self.debounce_deadline = None;
        self.pending.clear();
    }

    pub fn reset(&mut self) {
        self.dispose();
        self.user_scrolling = false;
        self.should_auto_scroll = true;
        self.programmatic_scroll = false;
    }
}

/// An in-memory viewport: a content height, a window height and a position.
/// Records every programmatic scroll.
#[derive(Debug, Clone, Default)]
pub struct VirtualViewport {
    content_height: f64,
    client_height: f64,
    scroll_top: f64,
    scrolls: Vec<(f64, ScrollBehavior)>,
}

impl VirtualViewport {
    pub const fn new(client_height: f64) -> Self {
        Self {
            content_height: 0.0,
            client_height,
            scroll_top: 0.0,
            scrolls: Vec::new(),
        }
    }

    pub fn set_content_height(&mut self, height: f64) {
        self.content_height = height;
        self.scroll_top = self.scroll_top.min(self.max_scroll_top());
    }

    /// Moves the window as a user would. The caller still has to report the
    /// event to the controller.
    pub fn user_scroll_to(&mut self, top: f64) {
        self.scroll_top = top.clamp(0.0, self.max_scroll_top());
    }

    pub fn scrolls(&self) -> &[(f64, ScrollBehavior)] {
        &self.scrolls
    }

    fn max_scroll_top(&self) -> f64 {
        (self.content_height - self.client_height).max(0.0)
    }
}

impl Viewport for VirtualViewport {
    fn scroll_height(&self) -> f64 {
        self.content_height.max(self.client_height)
    }

    fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    fn client_height(&self) -> f64 {
        self.client_height
    }

    fn scroll_to(&mut self, top: f64, behavior: ScrollBehavior) {
        self.scroll_top = top.clamp(0.0, self.max_scroll_top());
        self.scrolls.push((top, behavior));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn viewport_at_bottom() -> VirtualViewport {
        let mut viewport = VirtualViewport::new(500.0);
        viewport.set_content_height(2000.0);
        viewport.user_scroll_to(1500.0);
        viewport
    }

    #[test]
    fn test_scroll_to_bottom_schedules_retries() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        assert!(controller.scroll_to_bottom(&mut viewport, false, start));
        assert_eq!(viewport.scrolls(), &[(2000.0, ScrollBehavior::Smooth)]);
        assert_eq!(controller.next_deadline(), Some(start + ms(50)));

        controller.poll(&mut viewport, start + ms(50));
        controller.poll(&mut viewport, start + ms(150));
        assert_eq!(
            viewport.scrolls(),
            &[
                (2000.0, ScrollBehavior::Smooth),
                (2000.0, ScrollBehavior::Smooth),
                (2000.0, ScrollBehavior::Instant),
            ]
        );
        assert!(controller.next_deadline().is_none());
    }

    #[test]
    fn test_programmatic_scroll_is_not_user_intent() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        controller.scroll_to_bottom(&mut viewport, false, start);
        controller.on_scroll_event(&viewport, start);
        assert!(!controller.state(&viewport).user_scrolling);
    }

    #[test]
    fn test_programmatic_echo_keeps_user_debounce() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        viewport.user_scroll_to(1450.0);
        controller.on_scroll_event(&viewport, start);
        assert!(controller.state(&viewport).user_scrolling);

        controller.scroll_to_bottom(&mut viewport, false, start + ms(10));
        controller.on_scroll_event(&viewport, start + ms(10));
        assert!(controller.next_deadline().is_some());

        controller.poll(&mut viewport, start + Duration::from_secs(10));
        assert!(!controller.state(&viewport).user_scrolling);
    }

    #[test]
    fn test_user_scroll_away_suppresses_auto_scroll() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        viewport.user_scroll_to(200.0);
        controller.on_scroll_event(&viewport, start);
        let state = controller.state(&viewport);
        assert!(state.user_scrolling);
        assert!(!state.should_auto_scroll);

        viewport.set_content_height(2600.0);
        assert!(!controller.scroll_to_bottom(&mut viewport, false, start + ms(10)));
        assert!(!controller.scroll_to_bottom(&mut viewport, false, start + ms(20)));
        assert!(viewport.scrolls().is_empty());
        assert_eq!(viewport.scroll_top(), 200.0);

        // Debounce clears the scrolling flag but not the intent.
        controller.poll(&mut viewport, start + ms(100));
        let state = controller.state(&viewport);
        assert!(!state.user_scrolling);
        assert!(!state.should_auto_scroll);
    }

    #[test]
    fn test_forced_scroll_overrides_intent() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        viewport.user_scroll_to(0.0);
        controller.on_scroll_event(&viewport, start);
        assert!(controller.scroll_to_bottom(&mut viewport, true, start));
        controller.poll(&mut viewport, start + ms(200));
        assert_eq!(viewport.scrolls().len(), 3);
        assert_eq!(viewport.scroll_top(), 1500.0);
    }

    #[test]
    fn test_scrolling_back_near_bottom_resumes() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        viewport.user_scroll_to(0.0);
        controller.on_scroll_event(&viewport, start);
        viewport.user_scroll_to(1450.0);
        controller.on_scroll_event(&viewport, start + ms(30));
        assert!(controller.state(&viewport).should_auto_scroll);
        assert!(controller.scroll_to_bottom(&mut viewport, false, start + ms(40)));
    }

    #[test]
    fn test_retry_rechecks_intent_when_fired() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        controller.scroll_to_bottom(&mut viewport, false, start);
        // Consume the programmatic guard, then a real user scroll away.
        controller.on_scroll_event(&viewport, start + ms(1));
        viewport.user_scroll_to(100.0);
        controller.on_scroll_event(&viewport, start + ms(10));

        controller.poll(&mut viewport, start + ms(200));
        assert_eq!(viewport.scrolls().len(), 1, "retries were suppressed");
    }

    #[test]
    fn test_dispose_cancels_timers() {
        let start = Instant::now();
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        controller.scroll_to_bottom(&mut viewport, true, start);
        controller.dispose();
        assert!(controller.next_deadline().is_none());
        controller.poll(&mut viewport, start + ms(500));
        assert_eq!(viewport.scrolls().len(), 1);
    }

    #[test]
    fn test_static_force_and_reset() {
        let mut controller = ScrollController::default();
        let mut viewport = viewport_at_bottom();

        controller.disable_auto_scroll();
        controller.scroll_to_bottom_static_force(&mut viewport);
        assert_eq!(viewport.scrolls(), &[(2000.0, ScrollBehavior::Instant)]);

        controller.reset();
        let state = controller.state(&viewport);
        assert!(state.should_auto_scroll);
        assert!(!state.user_scrolling);
        assert!(state.at_bottom);
    }
}
