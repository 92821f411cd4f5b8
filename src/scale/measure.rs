//! Natural content size of the embedded document

use kiosk_core_interface::{BoxMetrics, DocumentMetrics};

/// Id of the stylesheet injected into each loaded document
pub const STYLE_ID: &str = "kiosk-scale-style";

/// Neutralises scrollbars and page margins so the document's box matches
/// its content, and promotes it to its own compositor layer
pub const STYLE_CSS: &str = "html, body { overflow: hidden !important; margin: 0 !important; \
padding: 0 !important; width: 100%; height: 100%; box-sizing: border-box; } \
html { will-change: transform; transform: translateZ(0); }";

/// Measured content dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentSize {
    pub width: f64,
    pub height: f64,
    /// Raw values above the limit before clamping, if any
    pub oversized: Option<(f64, f64)>,
}

/// Largest positive reading across root and body, clamped to `max_px`.
///
/// Returns `None` when no dimension on either axis is positive.
pub fn content_size(metrics: &DocumentMetrics, max_px: f64) -> Option<ContentSize> {
    let boxes: Vec<&BoxMetrics> = std::iter::once(&metrics.root)
        .chain(metrics.body.as_ref())
        .collect();

    let width = largest(boxes.iter().flat_map(|b| {
        [b.scroll_width, b.offset_width, b.client_width]
    }))?;
    let height = largest(boxes.iter().flat_map(|b| {
        [b.scroll_height, b.offset_height, b.client_height]
    }))?;

    let oversized = (width > max_px || height > max_px).then_some((width, height));
    Some(ContentSize {
        width: width.min(max_px),
        height: height.min(max_px),
        oversized,
    })
}

fn largest(values: impl Iterator<Item = f64>) -> Option<f64> {
    values
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_over_root_and_body() {
        let metrics = DocumentMetrics {
            root: BoxMetrics {
                scroll_width: 1200.0,
                client_width: 1920.0,
                scroll_height: 700.0,
                ..Default::default()
            },
            body: Some(BoxMetrics {
                offset_width: 1600.0,
                scroll_height: 2400.0,
                ..Default::default()
            }),
        };
        let size = content_size(&metrics, 20_000.0).unwrap();
        assert_eq!((size.width, size.height), (1920.0, 2400.0));
        assert!(size.oversized.is_none());
    }

    #[test]
    fn test_missing_body_uses_root() {
        let metrics = DocumentMetrics {
            root: BoxMetrics::uniform(800.0, 600.0),
            body: None,
        };
        let size = content_size(&metrics, 20_000.0).unwrap();
        assert_eq!((size.width, size.height), (800.0, 600.0));
    }

    #[test]
    fn test_nothing_positive() {
        let metrics = DocumentMetrics {
            root: BoxMetrics::uniform(0.0, 600.0),
            body: Some(BoxMetrics::uniform(-5.0, 600.0)),
        };
        assert!(content_size(&metrics, 20_000.0).is_none());
    }

    #[test]
    fn test_oversized_is_clamped_and_flagged() {
        let metrics = DocumentMetrics {
            root: BoxMetrics::uniform(1920.0, 90_000.0),
            body: None,
        };
        let size = content_size(&metrics, 20_000.0).unwrap();
        assert_eq!(size.height, 20_000.0);
        assert_eq!(size.oversized, Some((1920.0, 90_000.0)));
    }
}
