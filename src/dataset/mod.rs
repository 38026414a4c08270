mod error;
mod kshot;
mod processed;
mod raster;
mod segmentation;
mod source;

pub use error::DataError;
pub use kshot::{Episode, KShotSampler};
pub use processed::{DataSplit, ProcessedDataSet, SegmentationItem};
pub use raster::Raster;
pub use segmentation::{SegmentationBatch, SegmentationBatcher};
pub use source::{
    BsrSource, IGNORE_LABEL, SamplePaths, SegmentationSource, VocSource, voc_colormap,
};

#[cfg(test)]
pub(crate) mod testing;
