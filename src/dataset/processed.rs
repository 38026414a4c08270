use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use burn::data::dataset::Dataset;

use super::source::{IGNORE_LABEL, SegmentationSource};
use super::{DataError, Raster};

const CACHE_VERSION: u32 = 1;

/// One image and its per-pixel class indices, ready for batching.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SegmentationItem {
    /// CHW, scaled to [0, 1].
    pub image: Vec<f32>,
    /// HW class indices; `IGNORE_LABEL` marks pixels without ground truth.
    pub label: Vec<i32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

#[derive(Encode, Decode)]
struct CachedDataSet {
    version: u32,
    source: String,
    downsample_ratio: usize,
    items: Vec<SegmentationItem>,
}

/// Index ranges of a train / validation / test split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSplit {
    pub train: Range<usize>,
    pub valid: Range<usize>,
    pub test: Range<usize>,
}

/// A fully materialised segmentation dataset where every sample has the same shape.
#[derive(Clone, Debug)]
pub struct ProcessedDataSet {
    items: Vec<SegmentationItem>,
    num_classes: usize,
}

impl ProcessedDataSet {
    pub fn from_items(items: Vec<SegmentationItem>) -> Self {
        let num_classes = items
            .iter()
            .flat_map(|item| item.label.iter())
            .copied()
            .filter(|&label| label >= 0)
            .max()
            .map_or(0, |max| max as usize + 1);

        Self { items, num_classes }
    }

    /// Load `source` from the cache in `cache_dir`, or read, downsample and cache it.
    pub fn process<S: SegmentationSource>(
        source: &S,
        downsample_ratio: usize,
        cache_dir: &Path,
    ) -> Result<Self, DataError> {
        let cache_path = Self::cache_path(source, downsample_ratio, cache_dir);

        if cache_path.exists() {
            match Self::load_cache(&cache_path, source.name(), downsample_ratio) {
                Ok(Some(dataset)) => {
                    tracing::info!(
                        "Loaded {} cached samples of shape {:?} from {}",
                        dataset.len(),
                        dataset.sample_shape(),
                        cache_path.display()
                    );
                    return Ok(dataset.with_class_count(source.num_classes()));
                }
                Ok(None) => tracing::warn!("Stale cache {}, rebuilding", cache_path.display()),
                Err(err) => tracing::warn!("Unreadable cache {}: {err}", cache_path.display()),
            }
        }

        let dataset = Self::read_source(source, downsample_ratio)?
            .with_class_count(source.num_classes());
        dataset.save_cache(&cache_path, source.name(), downsample_ratio)?;
        tracing::info!(
            "Processed {} samples of shape {:?}, cached to {}",
            dataset.len(),
            dataset.sample_shape(),
            cache_path.display()
        );
        Ok(dataset)
    }

    /// Widen the class count to a dataset-defined one, so a subset that
    /// never shows the last class still gets a full-size head.
    fn with_class_count(mut self, num_classes: Option<usize>) -> Self {
        if let Some(num_classes) = num_classes {
            self.num_classes = self.num_classes.max(num_classes);
        }
        self
    }

    pub fn cache_path<S: SegmentationSource>(
        source: &S,
        downsample_ratio: usize,
        cache_dir: &Path,
    ) -> PathBuf {
        cache_dir.join(format!("{}_x{}.bin", source.name(), downsample_ratio))
    }

    fn read_source<S: SegmentationSource>(
        source: &S,
        downsample_ratio: usize,
    ) -> Result<Self, DataError> {
        let mut images = Vec::new();
        let mut labels = Vec::new();

        for sample in source.sample_paths()? {
            let image = source.read_image(&sample.image)?;
            let label = source.read_label(&sample.label)?;

            if (image.height, image.width) != (label.height, label.width) {
                return Err(DataError::ShapeMismatch {
                    image: sample.image,
                    image_size: (image.height, image.width),
                    label_size: (label.height, label.width),
                });
            }

            images.push(image.into_landscape().downsample_linear(downsample_ratio));
            labels.push(label.into_landscape().downsample_nearest(downsample_ratio));
        }

        Self::from_rasters(images, labels)
    }

    /// Pad to a common size, scale by the global maximum and check for non-finite values.
    pub fn from_rasters(
        images: Vec<Raster<u8>>,
        labels: Vec<Raster<i32>>,
    ) -> Result<Self, DataError> {
        if images.len() != labels.len() {
            return Err(DataError::CountMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }

        let height = images.iter().map(|r| r.height).max().unwrap_or(0);
        let width = images.iter().map(|r| r.width).max().unwrap_or(0);
        let max_value = images
            .iter()
            .flat_map(|r| r.data.iter())
            .copied()
            .max()
            .unwrap_or(0)
            .max(1) as f32;

        let mut items = Vec::with_capacity(images.len());
        for (index, (image, label)) in images.into_iter().zip(labels).enumerate() {
            let image = image.pad_to(height, width, 0);
            let label = label.pad_to(height, width, IGNORE_LABEL);
            let channels = image.channels;

            let mut chw = Vec::with_capacity(image.data.len());
            for c in 0..channels {
                for y in 0..height {
                    for x in 0..width {
                        chw.push(image.get(y, x, c) as f32 / max_value);
                    }
                }
            }

            if chw.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFinite(index));
            }

            items.push(SegmentationItem {
                image: chw,
                label: label.data,
                channels,
                height,
                width,
            });
        }

        Ok(Self::from_items(items))
    }

    fn load_cache(
        path: &Path,
        source: &str,
        downsample_ratio: usize,
    ) -> Result<Option<Self>, DataError> {
        let file = File::open(path).map_err(|e| DataError::io(path, e))?;
        let cached: CachedDataSet =
            bincode::decode_from_std_read(&mut BufReader::new(file), bincode::config::standard())?;

        if cached.version != CACHE_VERSION
            || cached.source != source
            || cached.downsample_ratio != downsample_ratio
        {
            return Ok(None);
        }
        Ok(Some(Self::from_items(cached.items)))
    }

    fn save_cache(
        &self,
        path: &Path,
        source: &str,
        downsample_ratio: usize,
    ) -> Result<(), DataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        let cached = CachedDataSet {
            version: CACHE_VERSION,
            source: source.to_string(),
            downsample_ratio,
            items: self.items.clone(),
        };
        let file = File::create(path).map_err(|e| DataError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::encode_into_std_write(cached, &mut writer, bincode::config::standard())?;
        writer.flush().map_err(|e| DataError::io(path, e))
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn items(&self) -> &[SegmentationItem] {
        &self.items
    }

    /// `[channels, height, width]` of every sample.
    pub fn sample_shape(&self) -> [usize; 3] {
        self.items
            .first()
            .map_or([0, 0, 0], |item| [item.channels, item.height, item.width])
    }

    /// Inverse class frequency (`total / count`) over labelled pixels; absent classes get 0.
    pub fn class_weights(&self) -> Vec<f32> {
        let mut counts = vec![0u64; self.num_classes];
        for label in self.items.iter().flat_map(|item| item.label.iter()) {
            if *label >= 0 {
                counts[*label as usize] += 1;
            }
        }
        let total: u64 = counts.iter().sum();

        counts
            .into_iter()
            .map(|count| {
                if count == 0 {
                    0.0
                } else {
                    total as f32 / count as f32
                }
            })
            .collect()
    }

    pub fn split(&self, train_ratio: f64, valid_ratio: f64) -> DataSplit {
        let n = self.items.len();
        let n_train = ((n as f64 * train_ratio).round() as usize).min(n);
        let n_valid = ((n as f64 * valid_ratio).round() as usize).min(n - n_train);

        DataSplit {
            train: 0..n_train,
            valid: n_train..n_train + n_valid,
            test: n_train..n,
        }
    }

    pub fn subset(&self, range: Range<usize>) -> Self {
        Self {
            items: self.items[range].to_vec(),
            num_classes: self.num_classes,
        }
    }
}

impl Dataset<SegmentationItem> for ProcessedDataSet {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::source::SamplePaths;

    #[derive(Default)]
    struct InMemorySource {
        images: Vec<Raster<u8>>,
        labels: Vec<Raster<i32>>,
        classes: Option<usize>,
    }

    impl SegmentationSource for InMemorySource {
        fn name(&self) -> &str {
            "memory"
        }

        fn sample_paths(&self) -> Result<Vec<SamplePaths>, DataError> {
            Ok((0..self.images.len())
                .map(|i| SamplePaths {
                    image: PathBuf::from(i.to_string()),
                    label: PathBuf::from(i.to_string()),
                })
                .collect())
        }

        fn read_image(&self, path: &Path) -> Result<Raster<u8>, DataError> {
            let index: usize = path.to_string_lossy().parse().unwrap();
            Ok(self.images[index].clone())
        }

        fn read_label(&self, path: &Path) -> Result<Raster<i32>, DataError> {
            let index: usize = path.to_string_lossy().parse().unwrap();
            Ok(self.labels[index].clone())
        }

        fn num_classes(&self) -> Option<usize> {
            self.classes
        }
    }

    fn source() -> InMemorySource {
        InMemorySource {
            images: vec![Raster::filled(2, 4, 3, 200), Raster::filled(4, 2, 3, 100)],
            labels: vec![
                Raster::new(2, 4, 1, vec![0, 0, 1, 1, 0, 0, 1, 1]),
                Raster::new(4, 2, 1, vec![2, 2, 2, 2, 2, 2, 2, -1]),
            ],
            classes: None,
        }
    }

    #[test]
    fn samples_are_rotated_scaled_and_labelled() {
        let dir = tempfile::tempdir().unwrap();

        let dataset = ProcessedDataSet::process(&source(), 1, dir.path()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.sample_shape(), [3, 2, 4]);
        assert_eq!(dataset.num_classes(), 3);
        let first = dataset.get(0).unwrap();
        assert_eq!(first.image[0], 1.0);
        let second = dataset.get(1).unwrap();
        assert_eq!(second.image[0], 0.5);
    }

    #[test]
    fn second_process_reads_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProcessedDataSet::process(&source(), 1, dir.path()).unwrap();
        assert!(ProcessedDataSet::cache_path(&source(), 1, dir.path()).exists());

        let cached = ProcessedDataSet::process(&InMemorySource::default(), 1, dir.path()).unwrap();

        assert_eq!(first.items(), cached.items());
    }

    #[test]
    fn corrupt_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProcessedDataSet::cache_path(&source(), 1, dir.path());
        std::fs::write(&path, b"not a cache").unwrap();

        let dataset = ProcessedDataSet::process(&source(), 1, dir.path()).unwrap();

        assert_eq!(dataset.len(), 2);
        let cached = ProcessedDataSet::process(&InMemorySource::default(), 1, dir.path()).unwrap();
        assert_eq!(cached.items(), dataset.items());
    }

    #[test]
    fn cache_from_another_version_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProcessedDataSet::cache_path(&source(), 1, dir.path());
        let stale = CachedDataSet {
            version: CACHE_VERSION + 1,
            source: "memory".to_string(),
            downsample_ratio: 1,
            items: Vec::new(),
        };
        let mut file = File::create(&path).unwrap();
        bincode::encode_into_std_write(stale, &mut file, bincode::config::standard()).unwrap();

        let dataset = ProcessedDataSet::process(&source(), 1, dir.path()).unwrap();

        assert_eq!(dataset.len(), 2);
        let cached = ProcessedDataSet::process(&InMemorySource::default(), 1, dir.path()).unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[test]
    fn label_of_another_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource {
            images: vec![Raster::filled(2, 2, 3, 1)],
            labels: vec![Raster::filled(2, 3, 1, 0)],
            classes: None,
        };

        let result = ProcessedDataSet::process(&source, 1, dir.path());

        assert!(matches!(
            result,
            Err(DataError::ShapeMismatch {
                image_size: (2, 2),
                label_size: (2, 3),
                ..
            })
        ));
    }

    #[test]
    fn declared_class_count_wins_over_observed_labels() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource {
            classes: Some(21),
            ..source()
        };

        let dataset = ProcessedDataSet::process(&source, 1, dir.path()).unwrap();
        let cached = ProcessedDataSet::process(&source, 1, dir.path()).unwrap();

        assert_eq!(dataset.num_classes(), 21);
        assert_eq!(cached.num_classes(), 21);
    }

    #[test]
    fn unpaired_rasters_are_rejected() {
        let images = vec![Raster::filled(1, 1, 3, 10), Raster::filled(1, 1, 3, 10)];
        let labels = vec![Raster::filled(1, 1, 1, 0)];

        let result = ProcessedDataSet::from_rasters(images, labels);

        assert!(matches!(
            result,
            Err(DataError::CountMismatch { images: 2, labels: 1 })
        ));
    }

    #[test]
    fn cache_for_another_ratio_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        ProcessedDataSet::process(&source(), 1, dir.path()).unwrap();

        let halved = ProcessedDataSet::process(&source(), 2, dir.path()).unwrap();

        assert_eq!(halved.sample_shape(), [3, 1, 2]);
    }

    #[test]
    fn padding_uses_ignore_label() {
        let images = vec![Raster::filled(1, 1, 3, 10), Raster::filled(2, 2, 3, 10)];
        let labels = vec![Raster::new(1, 1, 1, vec![1]), Raster::filled(2, 2, 1, 0)];

        let dataset = ProcessedDataSet::from_rasters(images, labels).unwrap();

        assert_eq!(dataset.items()[0].label, vec![1, IGNORE_LABEL, IGNORE_LABEL, IGNORE_LABEL]);
        assert_eq!(dataset.items()[0].image[1], 0.0);
    }

    #[test]
    fn class_weights_are_inverse_frequencies() {
        let items = vec![SegmentationItem {
            image: vec![0.0; 4],
            label: vec![0, 0, 0, 2],
            channels: 1,
            height: 2,
            width: 2,
        }];

        let weights = ProcessedDataSet::from_items(items).class_weights();

        assert_eq!(weights, vec![4.0 / 3.0, 0.0, 4.0]);
    }

    #[test]
    fn split_matches_reference_ratios() {
        let item = SegmentationItem {
            image: vec![0.0],
            label: vec![0],
            channels: 1,
            height: 1,
            width: 1,
        };
        let dataset = ProcessedDataSet::from_items(vec![item; 500]);

        let split = dataset.split(0.88, 0.04);

        assert_eq!(split.train, 0..440);
        assert_eq!(split.valid, 440..460);
        assert_eq!(split.test, 440..500);
    }
}
