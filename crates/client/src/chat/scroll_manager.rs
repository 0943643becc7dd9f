/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Instant,
    Smooth,
}

impl ScrollBehavior {
    fn merge(self, other: Self) -> Self {
        if self == Self::Instant || other == Self::Instant {
            Self::Instant
        } else {
            Self::Smooth
        }
    }
}

/// Change notifications emitted by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptChange {
    /// Rows were added or removed.
    LengthChanged,
    /// The thinking indicator appeared or disappeared.
    ThinkingChanged,
    /// An already visible row grew in place.
    ContentMutated,
}

impl TranscriptChange {
    pub fn behavior(self) -> ScrollBehavior {
        match self {
            Self::LengthChanged | Self::ThinkingChanged => ScrollBehavior::Instant,
            Self::ContentMutated => ScrollBehavior::Smooth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollCommand {
    pub behavior: ScrollBehavior,
    /// Distance from the top of the transcript; the maximum extent is the bottom.
    pub target_offset: f32,
}

/// Keeps the transcript pinned to its newest content, independent from message content.
#[derive(Debug)]
pub struct ScrollManager {
    pending_scroll: Option<ScrollBehavior>,
    last_row_count: usize,
    last_indicator_visible: bool,
    scroll_offset: f32,
    max_offset: f32,
}

impl ScrollManager {
    pub fn new() -> Self {
        Self {
            pending_scroll: None,
            last_row_count: 0,
            last_indicator_visible: false,
            scroll_offset: 0.,
            max_offset: 0.,
        }
    }

    pub fn has_pending_scroll(&self) -> bool {
        self.pending_scroll.is_some()
    }

    pub fn offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn max_offset(&self) -> f32 {
        self.max_offset
    }

    /// Queues a scroll to the bottom; rapid requests coalesce into one command.
    pub fn notify(&mut self, change: TranscriptChange) {
        let behavior = change.behavior();
        self.pending_scroll = Some(match self.pending_scroll {
            Some(pending) => pending.merge(behavior),
            None => behavior,
        });
    }

    /// Derives length and indicator changes from the last values seen.
    pub fn sync(&mut self, row_count: usize, indicator_visible: bool) {
        if row_count != self.last_row_count {
            self.notify(TranscriptChange::LengthChanged);
        }
        if indicator_visible != self.last_indicator_visible {
            self.notify(TranscriptChange::ThinkingChanged);
        }
        self.last_row_count = row_count;
        self.last_indicator_visible = indicator_visible;
    }

    /// Records the extent reported by the host after layout.
    pub fn set_max_offset(&mut self, max_offset: f32) {
        let max_offset = max_offset.max(0.);
        if (max_offset - self.max_offset).abs() > SCROLL_DELTA_EPSILON && self.was_at_bottom() {
            self.notify(TranscriptChange::ContentMutated);
        }
        self.max_offset = max_offset;
        self.scroll_offset = self.scroll_offset.min(max_offset);
    }

    /// Records a scroll performed by the host outside of `apply_pending_scroll`.
    pub fn set_offset(&mut self, offset: f32) {
        self.scroll_offset = offset.clamp(0., self.max_offset);
    }

    pub fn is_at_bottom(&self) -> bool {
        self.max_offset - self.scroll_offset <= SCROLL_DELTA_EPSILON
    }

    pub fn reset(&mut self) {
        self.last_row_count = 0;
        self.last_indicator_visible = false;
        self.scroll_offset = 0.;
        self.max_offset = 0.;
        self.pending_scroll = Some(ScrollBehavior::Instant);
    }

    pub fn apply_pending_scroll(&mut self) -> Option<ScrollCommand> {
        let behavior = self.pending_scroll.take()?;
        self.scroll_offset = self.max_offset;
        Some(ScrollCommand {
            behavior,
            target_offset: self.max_offset,
        })
    }

    fn was_at_bottom(&self) -> bool {
        self.is_at_bottom() || self.pending_scroll.is_some()
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_pending_without_changes() {
        let mut manager = ScrollManager::new();
        manager.sync(0, false);
        assert_eq!(manager.apply_pending_scroll(), None);
    }

    #[test]
    fn length_change_scrolls_instantly_to_bottom() {
        let mut manager = ScrollManager::new();
        manager.set_max_offset(120.);
        manager.sync(3, false);

        let command = manager.apply_pending_scroll().unwrap();
        assert_eq!(command.behavior, ScrollBehavior::Instant);
        assert_eq!(command.target_offset, 120.);
        assert!(manager.is_at_bottom());
        assert_eq!(manager.apply_pending_scroll(), None);
    }

    #[test]
    fn indicator_flip_scrolls_even_without_new_rows() {
        let mut manager = ScrollManager::new();
        manager.sync(2, false);
        manager.apply_pending_scroll();

        manager.sync(2, true);
        assert_eq!(
            manager.apply_pending_scroll().map(|command| command.behavior),
            Some(ScrollBehavior::Instant)
        );

        manager.sync(2, false);
        assert!(manager.apply_pending_scroll().is_some());
    }

    #[test]
    fn in_place_growth_scrolls_smoothly() {
        let mut manager = ScrollManager::new();
        manager.set_max_offset(40.);
        manager.sync(1, false);
        manager.apply_pending_scroll();

        manager.set_max_offset(64.);
        let command = manager.apply_pending_scroll().unwrap();
        assert_eq!(command.behavior, ScrollBehavior::Smooth);
        assert_eq!(command.target_offset, 64.);
    }

    #[test]
    fn burst_of_changes_coalesces_with_instant_winning() {
        let mut manager = ScrollManager::new();
        manager.notify(TranscriptChange::ContentMutated);
        manager.notify(TranscriptChange::LengthChanged);
        manager.notify(TranscriptChange::ContentMutated);

        let command = manager.apply_pending_scroll().unwrap();
        assert_eq!(command.behavior, ScrollBehavior::Instant);
        assert_eq!(manager.apply_pending_scroll(), None);
    }

    #[test]
    fn reset_requests_an_instant_scroll_and_forgets_counts() {
        let mut manager = ScrollManager::new();
        manager.set_max_offset(300.);
        manager.sync(10, true);
        manager.apply_pending_scroll();

        manager.reset();
        assert_eq!(manager.max_offset(), 0.);
        assert_eq!(
            manager.apply_pending_scroll().map(|command| command.behavior),
            Some(ScrollBehavior::Instant)
        );

        manager.sync(10, false);
        assert!(manager.has_pending_scroll());
    }

    #[test]
    fn offsets_are_clamped_to_extent() {
        let mut manager = ScrollManager::new();
        manager.set_max_offset(50.);
        manager.set_offset(80.);
        assert_eq!(manager.offset(), 50.);
        manager.set_offset(-5.);
        assert_eq!(manager.offset(), 0.);
        assert!(!manager.is_at_bottom());
    }
}
