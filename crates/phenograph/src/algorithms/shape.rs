use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// An outer contour with the holes it contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexShape {
    /// The exterior boundary of the shape (outer contour)
    pub exterior: Vec<[f32; 2]>,
    /// Interior boundaries (holes within the shape)
    pub holes: Vec<Vec<[f32; 2]>>,
}

fn ring(points: &[[f32; 2]]) -> LineString<f32> {
    LineString::new(points.iter().map(|&[x, y]| Coord { x, y }).collect())
}

fn ring_length(points: &[[f32; 2]]) -> f32 {
    points
        .windows(2)
        .map(|w| {
            let dx = w[1][0] - w[0][0];
            let dy = w[1][1] - w[0][1];
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

impl ComplexShape {
    pub fn to_geo_polygon(&self) -> Polygon<f32> {
        Polygon::new(
            ring(&self.exterior),
            self.holes.iter().map(|hole| ring(hole)).collect(),
        )
    }

    /// Area enclosed by the exterior minus the holes.
    pub fn area(&self) -> f32 {
        use geo::Area;
        self.to_geo_polygon().unsigned_area()
    }

    pub fn has_holes(&self) -> bool {
        !self.holes.is_empty()
    }

    pub fn bounding_box(&self) -> ([f32; 2], [f32; 2]) {
        let mut min = [f32::INFINITY, f32::INFINITY];
        let mut max = [f32::NEG_INFINITY, f32::NEG_INFINITY];
        for &[x, y] in &self.exterior {
            min = [min[0].min(x), min[1].min(y)];
            max = [max[0].max(x), max[1].max(y)];
        }
        (min, max)
    }

    pub fn centroid(&self) -> [f32; 2] {
        use geo::Centroid;
        match self.to_geo_polygon().centroid() {
            Some(c) => [c.x(), c.y()],
            None => {
                // Degenerate polygon, fall back to bounding box center
                let (min, max) = self.bounding_box();
                [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0]
            }
        }
    }

    /// Length of all rings, holes included.
    pub fn perimeter(&self) -> f32 {
        ring_length(&self.exterior) + self.holes.iter().map(|h| ring_length(h)).sum::<f32>()
    }
}
