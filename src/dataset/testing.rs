use super::{ProcessedDataSet, SegmentationItem};

/// `samples` identical 8x8 RGB images whose dark left half is class 0
/// and bright right half class 1.
pub(crate) fn split_halves(samples: usize) -> ProcessedDataSet {
    let (height, width) = (8, 8);
    let items = (0..samples)
        .map(|_| {
            let mut image = Vec::with_capacity(3 * height * width);
            for _ in 0..3 {
                for _ in 0..height {
                    for x in 0..width {
                        image.push(if x < width / 2 { 0.0 } else { 1.0 });
                    }
                }
            }
            let label = (0..height * width)
                .map(|i| if i % width < width / 2 { 0 } else { 1 })
                .collect();
            SegmentationItem {
                image,
                label,
                channels: 3,
                height,
                width,
            }
        })
        .collect();
    ProcessedDataSet::from_items(items)
}
