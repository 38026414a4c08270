use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage};

use super::{DataError, Raster};

/// Value written to label pixels that must not contribute to the loss.
pub const IGNORE_LABEL: i32 = -1;

/// Class index VOC uses for object boundaries and "difficult" regions.
const VOC_VOID_INDEX: i32 = 255;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplePaths {
    pub image: PathBuf,
    pub label: PathBuf,
}

/// A directory layout of raw images and their per-pixel ground truth.
pub trait SegmentationSource {
    /// Stable identifier, used to name cache files.
    fn name(&self) -> &str;

    fn sample_paths(&self) -> Result<Vec<SamplePaths>, DataError>;

    fn read_image(&self, path: &Path) -> Result<Raster<u8>, DataError> {
        Ok(Raster::from_rgb(open_image(path)?.into_rgb8()))
    }

    fn read_label(&self, path: &Path) -> Result<Raster<i32>, DataError>;

    /// Fixed class count of the label set, when the dataset defines one.
    fn num_classes(&self) -> Option<usize> {
        None
    }
}

/// Berkeley Segmentation Dataset (BSDS500).
///
/// Expects `images/{train,test,val}/*.jpg` and the first human segmentation of
/// each `groundTruth/*.mat` exported as a single-channel PNG next to it
/// (`groundTruth/{train,test,val}/<stem>.png`).
#[derive(Clone, Debug)]
pub struct BsrSource {
    root: PathBuf,
}

impl BsrSource {
    pub const SPLITS: [&'static str; 3] = ["train", "test", "val"];

    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `<data_root>/BSR/BSDS500/data`
    pub fn from_data_root<P: AsRef<Path>>(data_root: P) -> Self {
        Self::new(data_root.as_ref().join("BSR").join("BSDS500").join("data"))
    }
}

impl SegmentationSource for BsrSource {
    fn name(&self) -> &str {
        "bsr"
    }

    fn sample_paths(&self) -> Result<Vec<SamplePaths>, DataError> {
        let mut samples = Vec::new();

        for split in Self::SPLITS {
            let images_dir = self.root.join("images").join(split);
            let labels_dir = self.root.join("groundTruth").join(split);
            ensure_dir(&images_dir)?;
            ensure_dir(&labels_dir)?;

            for image in list_images(&images_dir)? {
                let Some(stem) = image.file_stem() else {
                    continue;
                };
                let label = labels_dir.join(format!("{}.png", stem.to_string_lossy()));
                if label.exists() {
                    samples.push(SamplePaths { image, label });
                } else {
                    tracing::warn!("No ground truth for {}", image.display());
                }
            }
        }

        if samples.is_empty() {
            return Err(DataError::Empty(self.root.clone()));
        }
        Ok(samples)
    }

    fn read_label(&self, path: &Path) -> Result<Raster<i32>, DataError> {
        let label = open_image(path)?;
        let (width, height) = (label.width() as usize, label.height() as usize);

        let data: Vec<i32> = match label.color() {
            ColorType::L8 => label.into_luma8().iter().map(|&v| v as i32).collect(),
            ColorType::L16 => label.into_luma16().iter().map(|&v| v as i32).collect(),
            color => {
                return Err(DataError::UnsupportedLabel {
                    path: path.to_path_buf(),
                    color,
                });
            }
        };

        Ok(Raster::new(height, width, 1, data))
    }
}

/// PASCAL VOC 2012 segmentation.
#[derive(Clone, Debug)]
pub struct VocSource {
    root: PathBuf,
    palette: HashMap<[u8; 3], i32>,
}

impl VocSource {
    pub const NUM_CLASSES: usize = 21;

    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let palette = voc_colormap(256)
            .into_iter()
            .enumerate()
            .map(|(index, color)| (color, index as i32))
            .collect();

        Self {
            root: root.as_ref().to_path_buf(),
            palette,
        }
    }

    /// `<data_root>/VOCdevkit/VOC2012`
    pub fn from_data_root<P: AsRef<Path>>(data_root: P) -> Self {
        Self::new(data_root.as_ref().join("VOCdevkit").join("VOC2012"))
    }

    fn ids(&self, labels_dir: &Path) -> Result<Vec<String>, DataError> {
        let list = self
            .root
            .join("ImageSets")
            .join("Segmentation")
            .join("trainval.txt");

        if list.exists() {
            let content = std::fs::read_to_string(&list).map_err(|e| DataError::io(&list, e))?;
            return Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect());
        }

        Ok(list_images(labels_dir)?
            .iter()
            .filter_map(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .collect())
    }

    fn class_of(&self, color: [u8; 3]) -> i32 {
        match self.palette.get(&color) {
            Some(&index) if (index as usize) < Self::NUM_CLASSES => index,
            _ => IGNORE_LABEL,
        }
    }
}

impl SegmentationSource for VocSource {
    fn name(&self) -> &str {
        "voc"
    }

    fn num_classes(&self) -> Option<usize> {
        Some(Self::NUM_CLASSES)
    }

    fn sample_paths(&self) -> Result<Vec<SamplePaths>, DataError> {
        let images_dir = self.root.join("JPEGImages");
        let labels_dir = self.root.join("SegmentationClass");
        ensure_dir(&images_dir)?;
        ensure_dir(&labels_dir)?;

        let samples: Vec<SamplePaths> = self
            .ids(&labels_dir)?
            .into_iter()
            .map(|id| SamplePaths {
                image: images_dir.join(format!("{id}.jpg")),
                label: labels_dir.join(format!("{id}.png")),
            })
            .filter(|sample| sample.image.exists() && sample.label.exists())
            .collect();

        if samples.is_empty() {
            return Err(DataError::Empty(self.root.clone()));
        }
        Ok(samples)
    }

    fn read_label(&self, path: &Path) -> Result<Raster<i32>, DataError> {
        let label = open_image(path)?;
        let (width, height) = (label.width() as usize, label.height() as usize);

        let data: Vec<i32> = match label.color() {
            // Already index-valued (e.g. SBD conversions).
            ColorType::L8 => label
                .into_luma8()
                .iter()
                .map(|&v| match v as i32 {
                    VOC_VOID_INDEX => IGNORE_LABEL,
                    v if (v as usize) < Self::NUM_CLASSES => v,
                    _ => IGNORE_LABEL,
                })
                .collect(),
            _ => label
                .into_rgb8()
                .pixels()
                .map(|pixel| self.class_of(pixel.0))
                .collect(),
        };

        Ok(Raster::new(height, width, 1, data))
    }
}

/// The standard PASCAL VOC label colour map.
pub fn voc_colormap(n: usize) -> Vec<[u8; 3]> {
    (0..n)
        .map(|index| {
            let mut class = index;
            let mut rgb = [0u8; 3];
            for shift in (0..8).rev() {
                for (channel, value) in rgb.iter_mut().enumerate() {
                    *value |= (((class >> channel) & 1) as u8) << shift;
                }
                class >>= 3;
            }
            rgb
        })
        .collect()
}

fn open_image(path: &Path) -> Result<DynamicImage, DataError> {
    image::open(path).map_err(|source| DataError::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_dir(path: &Path) -> Result<(), DataError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(DataError::MissingDirectory(path.to_path_buf()))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| DataError::io(dir, e))? {
        let path = entry.map_err(|e| DataError::io(dir, e))?.path();
        if path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|valid| valid.eq_ignore_ascii_case(ext))
                })
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn colormap_matches_voc_palette() {
        let colors = voc_colormap(256);

        assert_eq!(colors[0], [0, 0, 0]);
        assert_eq!(colors[1], [128, 0, 0]);
        assert_eq!(colors[15], [192, 128, 128]);
        assert_eq!(colors[255], [224, 224, 192]);
    }

    #[test]
    fn voc_rgb_labels_decode_to_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label.png");
        let colors = voc_colormap(256);
        let mut label = RgbImage::new(3, 1);
        label.put_pixel(0, 0, Rgb(colors[1]));
        label.put_pixel(1, 0, Rgb(colors[255]));
        label.put_pixel(2, 0, Rgb(colors[20]));
        label.save(&path).unwrap();

        let raster = VocSource::new(dir.path()).read_label(&path).unwrap();

        assert_eq!(raster.data, vec![1, IGNORE_LABEL, 20]);
    }

    #[test]
    fn voc_pairs_follow_image_set_list() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["JPEGImages", "SegmentationClass", "ImageSets/Segmentation"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        for id in ["a", "b"] {
            RgbImage::new(2, 2)
                .save(root.join("JPEGImages").join(format!("{id}.jpg")))
                .unwrap();
            RgbImage::new(2, 2)
                .save(root.join("SegmentationClass").join(format!("{id}.png")))
                .unwrap();
        }
        std::fs::write(root.join("ImageSets/Segmentation/trainval.txt"), "b\nmissing\n").unwrap();

        let samples = VocSource::new(root).sample_paths().unwrap();

        assert_eq!(samples.len(), 1);
        assert!(samples[0].image.ends_with("b.jpg"));
    }

    #[test]
    fn bsr_reads_grayscale_segment_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.png");
        let mut label = GrayImage::new(2, 1);
        label.put_pixel(0, 0, Luma([3]));
        label.put_pixel(1, 0, Luma([7]));
        label.save(&path).unwrap();

        let raster = BsrSource::new(dir.path()).read_label(&path).unwrap();

        assert_eq!(raster.data, vec![3, 7]);
    }

    #[test]
    fn empty_bsr_layout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        for split in BsrSource::SPLITS {
            std::fs::create_dir_all(dir.path().join("images").join(split)).unwrap();
            std::fs::create_dir_all(dir.path().join("groundTruth").join(split)).unwrap();
        }

        let result = BsrSource::new(dir.path()).sample_paths();

        assert!(matches!(result, Err(DataError::Empty(_))));
    }

    #[test]
    fn empty_voc_layout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("JPEGImages")).unwrap();
        std::fs::create_dir_all(dir.path().join("SegmentationClass")).unwrap();

        let result = VocSource::new(dir.path()).sample_paths();

        assert!(matches!(result, Err(DataError::Empty(_))));
    }

    #[test]
    fn voc_declares_its_class_count() {
        assert_eq!(VocSource::new("unused").num_classes(), Some(21));
        assert_eq!(BsrSource::new("unused").num_classes(), None);
    }

    #[test]
    fn missing_layout_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let result = BsrSource::new(dir.path()).sample_paths();

        assert!(matches!(result, Err(DataError::MissingDirectory(_))));
    }
}
