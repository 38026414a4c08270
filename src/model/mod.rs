mod blocks;
mod decoder;
mod encoder;
mod segmentation;

pub use blocks::{
    ChannelDropout, ConvBnRelu, ConvBnReluConfig, PyramidPoolingBranch,
    PyramidPoolingBranchConfig, UpsampleMode,
};
pub use decoder::{SegDecoder, SegDecoderConfig};
pub use encoder::{SegEncoder, SegEncoderConfig};
pub use segmentation::{SegmentationModel, SegmentationModelConfig};
