use std::time::Duration;

use crate::pagination::Viewport;

pub const DEFAULT_DRAG_THRESHOLD_FRACTION: f64 = 1.0 / 3.0;
pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(150);
pub const DEFAULT_PAGE_CACHE_TURNS: usize = 32;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 360.0,
    height: 640.0,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Fraction of the card width a drag must project past to switch phase.
    pub drag_threshold_fraction: f64,
    pub resize_debounce: Duration,
    /// Number of turns whose pages stay cached; `0` disables eviction.
    pub page_cache_turns: usize,
    pub event_channel_capacity: usize,
    /// Card size used until the first settled resize arrives.
    pub initial_viewport: Viewport,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            drag_threshold_fraction: DEFAULT_DRAG_THRESHOLD_FRACTION,
            resize_debounce: DEFAULT_RESIZE_DEBOUNCE,
            page_cache_turns: DEFAULT_PAGE_CACHE_TURNS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            initial_viewport: DEFAULT_VIEWPORT,
        }
    }
}
