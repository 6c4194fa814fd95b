//! Point-set geometry: shoelace area, perimeter, convexity, ray-casting
//! containment and maximum-deviation polygon simplification.

use crate::models::geometry::Point;

/// Drop the closing point of a ring if it repeats the first.
pub fn open_ring(points: &[Point]) -> &[Point] {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() > 1 && first == last => {
            &points[..points.len() - 1]
        }
        _ => points,
    }
}

/// Append the first point if the ring is not already closed.
pub fn close_ring(mut points: Vec<Point>) -> Vec<Point> {
    if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
        if first != *last {
            points.push(first);
        }
    }
    points
}

/// Signed shoelace area. Positive for counter-clockwise rings in a y-up frame.
pub fn signed_area(points: &[Point]) -> f64 {
    let ring = open_ring(points);
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

pub fn area(points: &[Point]) -> f64 {
    signed_area(points).abs()
}

/// Sum of edge lengths around the closed ring.
pub fn perimeter(points: &[Point]) -> f64 {
    let ring = open_ring(points);
    if ring.len() < 2 {
        return 0.0;
    }
    (0..ring.len())
        .map(|i| ring[i].distance(&ring[(i + 1) % ring.len()]))
        .sum()
}

/// Mean of the distinct ring vertices.
pub fn mean_point(points: &[Point]) -> Point {
    let ring = open_ring(points);
    if ring.is_empty() {
        return Point::default();
    }
    let n = ring.len() as f64;
    let (sx, sy) = ring.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// True when every non-zero cross product of consecutive edges has the same sign.
pub fn is_convex(points: &[Point]) -> bool {
    let ring = open_ring(points);
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let c = ring[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

/// Even-odd ray casting along +x.
pub fn contains_point(polygon: &[Point], point: &Point) -> bool {
    let ring = open_ring(polygon);
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (ring[i], ring[j]);
        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Distance from `p` to the infinite line through `a` and `b`, or to `a`
/// when the two coincide.
pub fn line_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return p.distance(a);
    }
    ((dy * p.x - dx * p.y + b.x * a.y - b.y * a.x) / len).abs()
}

/// Distance from `p` to the closed segment `a`–`b`.
pub fn segment_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * dx, a.y + t * dy))
}

/// Maximum-deviation simplification of an open chain: the endpoints are kept,
/// and an interior point survives only if it lies farther than `epsilon` from
/// the chord of the span being split. Uses an explicit work stack.
pub fn simplify_chain(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (mut max_dist, mut index) = (0.0, start);
        for i in start + 1..end {
            let d = line_distance(&points[i], &points[start], &points[end]);
            if d > max_dist {
                max_dist = d;
                index = i;
            }
        }
        if max_dist > epsilon {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Simplify a closed ring. The ring is split at its first vertex and the
/// vertex farthest from it; each half is simplified as a chain. The result is
/// closed (first point repeated at the end).
pub fn simplify_polygon(points: &[Point], epsilon: f64) -> Vec<Point> {
    let ring = open_ring(points);
    if ring.len() < 3 {
        return close_ring(ring.to_vec());
    }

    let anchor = ring[0];
    let (far, _) = ring
        .iter()
        .enumerate()
        .skip(1)
        .fold((1, -1.0), |(bi, bd), (i, p)| {
            let d = p.distance(&anchor);
            if d > bd {
                (i, d)
            } else {
                (bi, bd)
            }
        });

    let first_half = simplify_chain(&ring[..=far], epsilon);
    let mut second: Vec<Point> = ring[far..].to_vec();
    second.push(anchor);
    let second_half = simplify_chain(&second, epsilon);

    let mut out = first_half;
    out.extend_from_slice(&second_half[1..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: f64, h: f64) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(w, h),
            Point::new(0.0, h),
            Point::new(0.0, 0.0),
        ]
    }

    #[test]
    fn test_rectangle_area_and_perimeter() {
        let r = rect(30.0, 20.0);
        assert_eq!(area(&r), 600.0);
        assert_eq!(perimeter(&r), 100.0);
        assert_eq!(mean_point(&r), Point::new(15.0, 10.0));
        assert!(is_convex(&r));
    }

    #[test]
    fn test_simplify_keeps_minimal_rectangle() {
        let r = rect(30.0, 20.0);
        let simplified = simplify_polygon(&r, 9.9);
        assert_eq!(simplified, r);
        assert_eq!(area(&simplified), 600.0);
        // Idempotent.
        assert_eq!(simplify_polygon(&simplified, 9.9), simplified);
    }

    #[test]
    fn test_simplify_drops_collinear_points() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.2),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(0.0, 0.0),
        ];
        let simplified = simplify_polygon(&ring, 1.0);
        assert_eq!(simplified.len(), 5);
        assert!(!simplified.contains(&Point::new(5.0, 0.2)));
    }

    #[test]
    fn test_concave_polygon_is_not_convex() {
        let l_shape = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(!is_convex(&l_shape));
        assert_eq!(area(&l_shape), 75.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let r = rect(10.0, 10.0);
        assert!(contains_point(&r, &Point::new(5.0, 5.0)));
        assert!(!contains_point(&r, &Point::new(15.0, 5.0)));
        assert!(!contains_point(&r, &Point::new(-1.0, -1.0)));
    }

    #[test]
    fn test_segment_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert_eq!(segment_distance(&Point::new(5.0, 3.0), &a, &b), 3.0);
        assert_eq!(segment_distance(&Point::new(13.0, 4.0), &a, &b), 5.0);
        assert_eq!(line_distance(&Point::new(13.0, 4.0), &a, &b), 4.0);
    }
}
