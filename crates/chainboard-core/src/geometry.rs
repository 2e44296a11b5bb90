//! Bounding-box helpers shared by the object store and the transform engine.

use kurbo::{Point, Rect, Vec2};

/// Smallest width/height a stroke bounding box may have.
pub const MIN_STROKE_SPAN: f64 = 1.0;

/// Bounding box of a point sequence.
///
/// A zero span on either axis (a single point, or a perfectly straight
/// horizontal/vertical stroke) is widened to [`MIN_STROKE_SPAN`] so the box
/// never has zero area. An empty sequence yields [`Rect::ZERO`].
pub fn stroke_bounds(points: &[Point]) -> Rect {
    let Some(first) = points.first() else {
        return Rect::ZERO;
    };

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &points[1..] {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    let width = span_or_min(max_x - min_x);
    let height = span_or_min(max_y - min_y);
    Rect::from_origin_size((min_x, min_y), (width, height))
}

fn span_or_min(span: f64) -> f64 {
    if span > 0.0 { span } else { MIN_STROKE_SPAN }
}

/// Union of a set of boxes, or `None` when the set is empty.
pub fn union_bounds<I>(boxes: I) -> Option<Rect>
where
    I: IntoIterator<Item = Rect>,
{
    boxes.into_iter().reduce(|acc, b| acc.union(b))
}

/// Translate every point by `delta`.
pub fn translate_points(points: &mut [Point], delta: Vec2) {
    for point in points {
        *point += delta;
    }
}

/// Fractional position of `value` inside `[origin, origin + extent]`.
///
/// A degenerate extent maps everything to 0 instead of dividing by zero.
pub fn fraction(value: f64, origin: f64, extent: f64) -> f64 {
    if extent > 0.0 { (value - origin) / extent } else { 0.0 }
}

/// Re-project points from one box into another, preserving each point's
/// fractional position inside the box.
pub fn remap_points(points: &[Point], from: Rect, to: Rect) -> Vec<Point> {
    points
        .iter()
        .map(|p| {
            let fx = fraction(p.x, from.x0, from.width());
            let fy = fraction(p.y, from.y0, from.height());
            Point::new(to.x0 + fx * to.width(), to.y0 + fy * to.height())
        })
        .collect()
}

/// Decode a ledger's flat `[x0, y0, x1, y1, ...]` coordinate list.
/// A trailing unpaired coordinate is ignored.
pub fn points_from_flat(coords: &[i32]) -> Vec<Point> {
    coords
        .chunks_exact(2)
        .map(|pair| Point::new(f64::from(pair[0]), f64::from(pair[1])))
        .collect()
}

/// Encode points as the ledger's flat integer coordinate list (rounded).
pub fn points_to_flat(points: &[Point]) -> Vec<i32> {
    points
        .iter()
        .flat_map(|p| [p.x.round() as i32, p.y.round() as i32])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stroke_bounds_min_max() {
        let points = vec![
            Point::new(10.0, 40.0),
            Point::new(-5.0, 20.0),
            Point::new(30.0, 25.0),
        ];
        let bounds = stroke_bounds(&points);
        assert_eq!(bounds, Rect::new(-5.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn test_stroke_bounds_degenerate() {
        let single = stroke_bounds(&[Point::new(7.0, 9.0)]);
        assert_eq!(single, Rect::from_origin_size((7.0, 9.0), (1.0, 1.0)));

        let flat = stroke_bounds(&[Point::new(0.0, 5.0), Point::new(50.0, 5.0)]);
        assert!((flat.width() - 50.0).abs() < f64::EPSILON);
        assert!((flat.height() - 1.0).abs() < f64::EPSILON);

        assert_eq!(stroke_bounds(&[]), Rect::ZERO);
    }

    #[test]
    fn test_remap_points_scales_with_box() {
        let from = Rect::new(0.0, 0.0, 10.0, 10.0);
        let to = Rect::new(100.0, 100.0, 120.0, 130.0);
        let mapped = remap_points(&[Point::new(0.0, 0.0), Point::new(5.0, 10.0)], from, to);
        assert_eq!(mapped, vec![Point::new(100.0, 100.0), Point::new(110.0, 130.0)]);
    }

    #[test]
    fn test_remap_points_zero_extent() {
        let from = Rect::new(5.0, 5.0, 5.0, 15.0);
        let to = Rect::new(0.0, 0.0, 20.0, 20.0);
        let mapped = remap_points(&[Point::new(5.0, 10.0)], from, to);
        assert_eq!(mapped, vec![Point::new(0.0, 10.0)]);
    }

    #[test]
    fn test_flat_points_ignore_trailing_coordinate() {
        let points = points_from_flat(&[1, 2, 3, 4, 5]);
        assert_eq!(points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert_eq!(points_to_flat(&[Point::new(1.4, 2.6)]), vec![1, 3]);
    }

    #[test]
    fn test_union_bounds() {
        assert!(union_bounds(Vec::<Rect>::new()).is_none());
        let u = union_bounds([Rect::new(0.0, 0.0, 1.0, 1.0), Rect::new(5.0, 5.0, 6.0, 8.0)]);
        assert_eq!(u, Some(Rect::new(0.0, 0.0, 6.0, 8.0)));
    }
}
