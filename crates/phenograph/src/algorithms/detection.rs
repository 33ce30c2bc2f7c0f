use std::collections::HashSet;

use geo_types::Polygon;

use super::shape::ComplexShape;

/// Group contours into shapes: a contour contained in a larger one becomes its hole.
pub fn detect_holes(contours: Vec<Vec<[f32; 2]>>) -> Vec<ComplexShape> {
    use geo::{Area, Contains};

    let mut polygons: Vec<(Polygon<f32>, Vec<[f32; 2]>)> = contours
        .into_iter()
        .map(|points| {
            let shape = ComplexShape { exterior: points, holes: Vec::new() };
            (shape.to_geo_polygon(), shape.exterior)
        })
        .collect();

    // Largest first so outer contours are seen before the ones they contain
    polygons.sort_by(|a, b| {
        b.0.unsigned_area()
            .partial_cmp(&a.0.unsigned_area())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut shapes = Vec::new();
    let mut used = HashSet::new();

    for (i, (outer, outer_points)) in polygons.iter().enumerate() {
        if !used.insert(i) {
            continue;
        }
        let mut holes = Vec::new();
        for (j, (inner, inner_points)) in polygons.iter().enumerate() {
            if i == j || used.contains(&j) {
                continue;
            }
            if outer.contains(inner) {
                holes.push(inner_points.clone());
                used.insert(j);
            }
        }
        shapes.push(ComplexShape {
            exterior: outer_points.clone(),
            holes,
        });
    }

    shapes
}
