use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory does not exist: `{0}`")]
    MissingDirectory(PathBuf),

    #[error("No valid image/label pairs found under `{0}`")]
    Empty(PathBuf),

    #[error("Unable to decode image `{path}`: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Unsupported label color type {color:?} in `{path}`")]
    UnsupportedLabel {
        path: PathBuf,
        color: image::ColorType,
    },

    #[error("Image `{image}` is {image_size:?} but its label is {label_size:?}")]
    ShapeMismatch {
        image: PathBuf,
        image_size: (usize, usize),
        label_size: (usize, usize),
    },

    #[error("Got {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("Processed images contain a non-finite value at sample {0}")]
    NonFinite(usize),

    #[error("Cache encoding failed: {0}")]
    CacheEncode(#[from] bincode::error::EncodeError),

    #[error("Cache decoding failed: {0}")]
    CacheDecode(#[from] bincode::error::DecodeError),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
