//! Scroll position model for an infinite-history conversation view.
//!
//! The model is pure geometry: the view reports offsets and extents, the
//! model answers "load older now?" and "stick to the bottom?", and keeps the
//! viewport anchored across a prepend.

/// Distance from the top, in pixels, below which older history loads.
const LOAD_OLDER_THRESHOLD: f32 = 100.0;

/// Distance from the bottom, in pixels, within which the view counts as
/// pinned to the latest message.
const AT_BOTTOM_EPSILON: f32 = 10.0;

/// One observed scroll geometry sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollSample {
    /// Offset of the viewport top from the content top.
    pub offset: f32,
    /// Total scrollable content extent.
    pub content_extent: f32,
    /// Visible viewport extent.
    pub viewport_extent: f32,
}

/// Scroll state tracked between geometry samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollModel {
    last: ScrollSample,
    anchor_extent: Option<f32>,
}

impl ScrollModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the latest geometry reported by the view.
    pub fn observe(&mut self, sample: ScrollSample) {
        self.last = sample;
    }

    /// True when the viewport is close enough to the top that the next
    /// older page should be fetched.
    pub fn should_load_older(&self) -> bool {
        self.last.offset < LOAD_OLDER_THRESHOLD
    }

    /// True when the viewport hugs the bottom edge.
    pub fn is_at_bottom(&self) -> bool {
        let max_offset = (self.last.content_extent - self.last.viewport_extent).max(0.0);
        max_offset - self.last.offset <= AT_BOTTOM_EPSILON
    }

    /// Whether a newly appended message should snap the view to the bottom.
    ///
    /// The user's own message always snaps; streamed output snaps only while
    /// the user is already reading the tail.
    pub fn should_scroll_to_bottom(&self, own_message: bool) -> bool {
        own_message || self.is_at_bottom()
    }

    /// Captures the content extent before older messages are prepended.
    pub fn begin_prepend(&mut self) {
        self.anchor_extent = Some(self.last.content_extent);
    }

    /// Computes the offset correction once the prepended content has been
    /// laid out: adding it to the pre-prepend offset keeps the same message
    /// under the viewport top.
    pub fn commit_prepend(&mut self, new_content_extent: f32) -> f32 {
        let Some(old_extent) = self.anchor_extent.take() else {
            return 0.0;
        };
        (new_content_extent - old_extent).max(0.0)
    }

    /// Drops state from a previous session's geometry.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
