use std::path::Path;

use image::{Rgb, RgbImage};

use super::ConfusionMatrix;

/// Yellow-green-blue ramp, light to dark.
const RAMP: [[u8; 3]; 5] = [
    [255, 255, 217],
    [199, 233, 180],
    [65, 182, 196],
    [34, 94, 168],
    [8, 29, 88],
];

fn ramp_color(value: f64) -> Rgb<u8> {
    let value = value.clamp(0.0, 1.0) * (RAMP.len() - 1) as f64;
    let low = value.floor() as usize;
    let high = (low + 1).min(RAMP.len() - 1);
    let t = value - low as f64;

    let mut rgb = [0u8; 3];
    for (channel, out) in rgb.iter_mut().enumerate() {
        let a = RAMP[low][channel] as f64;
        let b = RAMP[high][channel] as f64;
        *out = (a + (b - a) * t).round() as u8;
    }
    Rgb(rgb)
}

/// Render the matrix as square cells of `cell_size` pixels with a one-pixel grid.
///
/// Raw counts are scaled by the largest cell; with `normalize` each row is
/// scaled by its own sum first.
pub fn render_heatmap(matrix: &ConfusionMatrix, cell_size: u32, normalize: bool) -> RgbImage {
    let n = matrix.num_classes() as u32;
    let values: Vec<Vec<f64>> = if normalize {
        matrix.normalized()
    } else {
        let rows = matrix.rows();
        let max = rows.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;
        rows.into_iter()
            .map(|row| row.into_iter().map(|c| c as f64 / max).collect())
            .collect()
    };

    let stride = cell_size + 1;
    let side = (n * stride + 1).max(1);
    let mut image = RgbImage::from_pixel(side, side, Rgb([255, 255, 255]));

    for (truth, row) in values.iter().enumerate() {
        for (prediction, &value) in row.iter().enumerate() {
            let color = ramp_color(value);
            let x0 = prediction as u32 * stride + 1;
            let y0 = truth as u32 * stride + 1;
            for y in y0..y0 + cell_size {
                for x in x0..x0 + cell_size {
                    image.put_pixel(x, y, color);
                }
            }
        }
    }

    image
}

pub fn save_heatmap(
    matrix: &ConfusionMatrix,
    path: &Path,
    normalize: bool,
) -> Result<(), image::ImageError> {
    if normalize {
        tracing::info!("Normalized confusion matrix");
    } else {
        tracing::info!("Confusion matrix, without normalization");
    }
    render_heatmap(matrix, 16, normalize).save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_endpoints() {
        assert_eq!(ramp_color(0.0), Rgb(RAMP[0]));
        assert_eq!(ramp_color(1.0), Rgb(RAMP[4]));
        assert_eq!(ramp_color(7.0), Rgb(RAMP[4]));
    }

    #[test]
    fn diagonal_is_darkest() {
        let matrix = ConfusionMatrix::from_predictions(&[0, 0, 0, 1], &[0, 0, 0, 1], 2);

        let image = render_heatmap(&matrix, 4, false);

        assert_eq!(image.dimensions(), (11, 11));
        assert_eq!(*image.get_pixel(1, 1), Rgb(RAMP[4]));
        assert_eq!(*image.get_pixel(6, 1), Rgb(RAMP[0]));
    }

    #[test]
    fn heatmap_is_written_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.png");
        let matrix = ConfusionMatrix::from_predictions(&[0, 1], &[1, 1], 2);

        save_heatmap(&matrix, &path, true).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.width(), 35);
    }
}
