use image::{RgbImage, imageops::FilterType};

/// Dense HWC pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster<T> {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<T>,
}

impl<T: Copy> Raster<T> {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            height * width * channels,
            "Raster data length {} does not match {}x{}x{}",
            data.len(),
            height,
            width,
            channels
        );
        Self {
            height,
            width,
            channels,
            data,
        }
    }

    pub fn filled(height: usize, width: usize, channels: usize, value: T) -> Self {
        Self::new(height, width, channels, vec![value; height * width * channels])
    }

    pub fn get(&self, y: usize, x: usize, c: usize) -> T {
        self.data[(y * self.width + x) * self.channels + c]
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    /// Swap the two spatial axes.
    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for x in 0..self.width {
            for y in 0..self.height {
                for c in 0..self.channels {
                    data.push(self.get(y, x, c));
                }
            }
        }
        Self::new(self.width, self.height, self.channels, data)
    }

    /// All samples are stored in landscape orientation.
    pub fn into_landscape(self) -> Self {
        if self.is_portrait() {
            self.transpose()
        } else {
            self
        }
    }

    /// Nearest-neighbour resize to `height / ratio` x `width / ratio`.
    pub fn downsample_nearest(&self, ratio: usize) -> Self {
        let (new_h, new_w) = downsampled_size(self.height, self.width, ratio);
        let mut data = Vec::with_capacity(new_h * new_w * self.channels);
        for y in 0..new_h {
            let src_y = y * self.height / new_h;
            for x in 0..new_w {
                let src_x = x * self.width / new_w;
                for c in 0..self.channels {
                    data.push(self.get(src_y, src_x, c));
                }
            }
        }
        Self::new(new_h, new_w, self.channels, data)
    }

    /// Pad on the bottom and right up to `height` x `width`.
    pub fn pad_to(&self, height: usize, width: usize, value: T) -> Self {
        assert!(
            height >= self.height && width >= self.width,
            "Cannot pad {}x{} down to {}x{}",
            self.height,
            self.width,
            height,
            width
        );
        let mut padded = Self::filled(height, width, self.channels, value);
        for y in 0..self.height {
            let src = y * self.width * self.channels;
            let dst = y * width * self.channels;
            let len = self.width * self.channels;
            padded.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        }
        padded
    }
}

impl Raster<u8> {
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(height as usize, width as usize, 3, image.into_raw())
    }

    /// Triangle-filter (bilinear) resize to `height / ratio` x `width / ratio`.
    pub fn downsample_linear(&self, ratio: usize) -> Self {
        if ratio <= 1 {
            return self.clone();
        }
        let (new_h, new_w) = downsampled_size(self.height, self.width, ratio);
        let image = RgbImage::from_raw(self.width as u32, self.height as u32, self.data.clone())
            .expect("RGB raster holds exactly width * height * 3 bytes");
        let resized =
            image::imageops::resize(&image, new_w as u32, new_h as u32, FilterType::Triangle);
        Self::from_rgb(resized)
    }
}

fn downsampled_size(height: usize, width: usize, ratio: usize) -> (usize, usize) {
    let ratio = ratio.max(1);
    ((height / ratio).max(1), (width / ratio).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_swaps_axes() {
        let raster = Raster::new(2, 3, 1, vec![1, 2, 3, 4, 5, 6]);
        let transposed = raster.transpose();

        assert_eq!(transposed.height, 3);
        assert_eq!(transposed.width, 2);
        assert_eq!(transposed.data, vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn portrait_rasters_are_rotated() {
        let raster = Raster::new(3, 1, 1, vec![1, 2, 3]);
        let landscape = raster.into_landscape();

        assert_eq!((landscape.height, landscape.width), (1, 3));
    }

    #[test]
    fn nearest_downsample_keeps_labels_intact() {
        let raster = Raster::new(4, 4, 1, (0..16).collect::<Vec<i32>>());
        let small = raster.downsample_nearest(2);

        assert_eq!((small.height, small.width), (2, 2));
        assert_eq!(small.data, vec![0, 2, 8, 10]);
    }

    #[test]
    fn pad_fills_bottom_and_right() {
        let raster = Raster::new(1, 2, 1, vec![7, 8]);
        let padded = raster.pad_to(2, 3, -1);

        assert_eq!(padded.data, vec![7, 8, -1, -1, -1, -1]);
    }

    #[test]
    fn linear_downsample_averages_uniform_image() {
        let raster = Raster::filled(8, 6, 3, 100u8);
        let small = raster.downsample_linear(2);

        assert_eq!((small.height, small.width, small.channels), (4, 3, 3));
        assert!(small.data.iter().all(|&v| v == 100));
    }
}
