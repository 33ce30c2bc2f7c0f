use image::GrayImage;

/// Trace every contour of a binary mask with imageproc.
pub fn extract_contours(binary_image: &GrayImage) -> Vec<Vec<[f32; 2]>> {
    imageproc::contours::find_contours::<i32>(binary_image)
        .into_iter()
        .map(|contour| {
            contour
                .points
                .iter()
                .map(|p| [p.x as f32, p.y as f32])
                .collect()
        })
        .filter(|points: &Vec<[f32; 2]>| !points.is_empty())
        .collect()
}
