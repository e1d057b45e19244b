//! Page events as delivered by the storefront runtime. Every event carries
//! its offset from page load in milliseconds; timers are deadlines compared
//! against that clock, and `Tick` exists only to advance it.

use serde::{Deserialize, Serialize};

/// Milliseconds since page load.
pub type Millis = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PageEventKind {
    Tick,
    Scroll {
        scroll_top: f64,
        scroll_height: f64,
        viewport_height: f64,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    MouseLeave {
        client_y: f64,
    },
    KeyDown,
    Touch,
    AddToCart {
        #[serde(default)]
        product_id: Option<String>,
        #[serde(default)]
        collection_ids: Vec<String>,
    },
    CartUpdated {
        total_value: f64,
        #[serde(default)]
        item_ids: Vec<String>,
    },
    Custom {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEvent {
    pub at_ms: Millis,
    #[serde(flatten)]
    pub kind: PageEventKind,
}

impl PageEvent {
    pub fn new(at_ms: Millis, kind: PageEventKind) -> Self {
        Self { at_ms, kind }
    }

    pub fn tick(at_ms: Millis) -> Self {
        Self::new(at_ms, PageEventKind::Tick)
    }

    /// Scroll event positioned at `percent` of the scrollable height of a
    /// 1000px viewport over a 5000px document.
    pub fn scroll_to(at_ms: Millis, percent: f64) -> Self {
        let viewport_height = 1000.0;
        let scroll_height = 5000.0;
        Self::new(
            at_ms,
            PageEventKind::Scroll {
                scroll_top: (scroll_height - viewport_height) * percent / 100.0,
                scroll_height,
                viewport_height,
            },
        )
    }

    /// Pointer, keyboard, scroll or touch input. Resets idle timers.
    pub fn is_activity(&self) -> bool {
        matches!(
            self.kind,
            PageEventKind::Scroll { .. }
                | PageEventKind::MouseMove { .. }
                | PageEventKind::KeyDown
                | PageEventKind::Touch
        )
    }

    /// Scroll depth in percent for scroll events.
    pub fn scroll_percent(&self) -> Option<f64> {
        match self.kind {
            PageEventKind::Scroll {
                scroll_top,
                scroll_height,
                viewport_height,
            } => Some(scroll_percent(scroll_top, scroll_height, viewport_height)),
            _ => None,
        }
    }
}

/// Fraction of the scrollable height already scrolled past, in percent. A
/// page that fits in the viewport counts as fully scrolled.
pub fn scroll_percent(scroll_top: f64, scroll_height: f64, viewport_height: f64) -> f64 {
    let scrollable = scroll_height - viewport_height;
    if scrollable <= 0.0 {
        return 100.0;
    }
    (scroll_top / scrollable * 100.0).clamp(0.0, 100.0)
}
