use geo_types::{Coord, LineString};

use super::shape::ComplexShape;

fn simplify_ring(points: &[[f32; 2]], tolerance: f32) -> Vec<[f32; 2]> {
    use geo::Simplify;

    let line = LineString::new(points.iter().map(|&[x, y]| Coord { x, y }).collect());
    line.simplify(&tolerance)
        .coords()
        .map(|c| [c.x, c.y])
        .collect()
}

/// Douglas-Peucker simplification of every ring.
pub fn simplify_shapes(shapes: &mut [ComplexShape], tolerance: f32) {
    for shape in shapes {
        shape.exterior = simplify_ring(&shape.exterior, tolerance);
        for hole in &mut shape.holes {
            *hole = simplify_ring(hole, tolerance);
        }
    }
}
