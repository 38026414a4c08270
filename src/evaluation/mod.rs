mod confusion;
mod heatmap;

pub use confusion::{ConfusionMatrix, compute_iou, pixel_accuracy};
pub use heatmap::{render_heatmap, save_heatmap};
