use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.left + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.top + self.height / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right() && y >= self.top && y <= self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center_x(&self) -> f64 {
        self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.height / 2.0
    }

    /// Area of `rect` that falls inside the viewport.
    pub fn visible_area(&self, rect: &Rect) -> f64 {
        let w = (rect.right().min(self.width) - rect.left.max(0.0)).max(0.0);
        let h = (rect.bottom().min(self.height) - rect.top.max(0.0)).max(0.0);
        w * h
    }

    pub fn visible_ratio(&self, rect: &Rect) -> f64 {
        let total = rect.area();
        if total <= 0.0 {
            return 0.0;
        }
        self.visible_area(rect) / total
    }
}

/// Which on-screen test a site applies to its candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visibility {
    /// Non-empty and entirely inside the viewport.
    FullyContained,
    /// At least this fraction of the element's area is on screen.
    AreaRatio(f64),
    /// Touches the viewport and is larger than `min_size` on both axes.
    Intersects { min_size: f64 },
    /// Overlaps the viewport horizontally; vertical position is ignored.
    HorizontalOverlap,
}

impl Visibility {
    pub fn admits(&self, rect: &Rect, viewport: &Viewport) -> bool {
        match *self {
            Visibility::FullyContained => {
                rect.width > 0.0
                    && rect.height > 0.0
                    && rect.top >= 0.0
                    && rect.left >= 0.0
                    && rect.bottom() <= viewport.height
                    && rect.right() <= viewport.width
            }
            Visibility::AreaRatio(threshold) => {
                viewport.visible_area(rect) > 0.0 && viewport.visible_ratio(rect) >= threshold
            }
            Visibility::Intersects { min_size } => {
                let intersects = !(rect.bottom() < 0.0
                    || rect.top > viewport.height
                    || rect.right() < 0.0
                    || rect.left > viewport.width);
                intersects && rect.width > min_size && rect.height > min_size
            }
            Visibility::HorizontalOverlap => rect.right() > 0.0 && rect.left < viewport.width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    /// Right-to-left by left edge.
    RightToLeft,
    /// Right-to-left by horizontal centre.
    RightToLeftByCenter,
    /// Keep the `keep` candidates closest to the viewport's horizontal
    /// centre, then order them right-to-left.
    NearestToCenter { keep: usize },
    /// Leave document order untouched.
    Document,
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Returns the indices of `rects` that pass `visibility`, ordered per `order`.
pub fn select(rects: &[Rect], viewport: &Viewport, visibility: Visibility, order: PageOrder) -> Vec<usize> {
    let mut picked: Vec<usize> = (0..rects.len())
        .filter(|&idx| visibility.admits(&rects[idx], viewport))
        .collect();

    match order {
        PageOrder::RightToLeft => {
            picked.sort_by(|&a, &b| descending(rects[a].left, rects[b].left));
        }
        PageOrder::RightToLeftByCenter => {
            picked.sort_by(|&a, &b| descending(rects[a].center_x(), rects[b].center_x()));
        }
        PageOrder::NearestToCenter { keep } => {
            let center = viewport.center_x();
            let distance = |idx: usize| (rects[idx].center_x() - center).abs();
            picked.sort_by(|&a, &b| {
                distance(a)
                    .partial_cmp(&distance(b))
                    .unwrap_or(Ordering::Equal)
            });
            picked.truncate(keep);
            picked.sort_by(|&a, &b| descending(rects[a].left, rects[b].left));
        }
        PageOrder::Document => {}
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    const VP: Viewport = Viewport {
        width: 1280.0,
        height: 800.0,
    };

    #[test]
    fn fully_contained_accepts_exact_viewport() {
        let exact = Rect::new(0.0, 0.0, VP.width, VP.height);
        assert!(Visibility::FullyContained.admits(&exact, &VP));

        let outside = Rect::new(1300.0, 0.0, 200.0, 300.0);
        assert!(!Visibility::FullyContained.admits(&outside, &VP));
        assert!(!Visibility::AreaRatio(0.4).admits(&outside, &VP));
        assert!(!Visibility::Intersects { min_size: 1.0 }.admits(&outside, &VP));
        assert!(!Visibility::HorizontalOverlap.admits(&outside, &VP));

        let empty = Rect::new(10.0, 10.0, 0.0, 100.0);
        assert!(!Visibility::FullyContained.admits(&empty, &VP));
    }

    #[test]
    fn area_ratio_threshold() {
        // Half of the page hangs off the bottom edge.
        let half = Rect::new(0.0, 400.0, 400.0, 800.0);
        assert!(Visibility::AreaRatio(0.4).admits(&half, &VP));
        assert!(!Visibility::AreaRatio(0.6).admits(&half, &VP));
        assert!(!Visibility::FullyContained.admits(&half, &VP));
    }

    #[test]
    fn right_to_left_ordering() {
        let rects = [
            Rect::new(0.0, 0.0, 600.0, 800.0),
            Rect::new(640.0, 0.0, 600.0, 800.0),
        ];
        assert_eq!(
            select(&rects, &VP, Visibility::FullyContained, PageOrder::RightToLeft),
            vec![1, 0]
        );
    }

    #[test]
    fn nearest_two_to_center_then_right_to_left() {
        let rects = [
            Rect::new(-1200.0, 0.0, 600.0, 800.0),
            Rect::new(40.0, 0.0, 600.0, 800.0),
            Rect::new(640.0, 0.0, 600.0, 800.0),
            Rect::new(1240.0, 0.0, 600.0, 800.0),
        ];
        let picked = select(
            &rects,
            &VP,
            Visibility::HorizontalOverlap,
            PageOrder::NearestToCenter { keep: 2 },
        );
        assert_eq!(picked, vec![2, 1]);
    }
}
