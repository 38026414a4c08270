use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::SegmentationItem;

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch_size, channels, height, width]`
    pub images: Tensor<B, 4, Float>,
    /// `[batch_size, height, width]`
    pub targets: Tensor<B, 3, Int>,
}

impl<B: Backend> Batcher<SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>) -> SegmentationBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let SegmentationItem {
                image,
                label,
                channels,
                height,
                width,
            } = item;

            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(image, Shape::new([channels, height, width]))
                    .convert::<B::FloatElem>(),
                &self.device,
            ));
            targets.push(Tensor::<B, 2, Int>::from_data(
                TensorData::new(label, Shape::new([height, width])).convert::<B::IntElem>(),
                &self.device,
            ));
        }

        SegmentationBatch {
            images: Tensor::stack(images, 0),
            targets: Tensor::stack(targets, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn batch_stacks_images_and_targets() {
        let item = SegmentationItem {
            image: vec![0.25; 3 * 2 * 4],
            label: vec![0, 1, 2, -1, 0, 1, 2, -1],
            channels: 3,
            height: 2,
            width: 4,
        };
        let batcher = SegmentationBatcher::<TestBackend>::new(Default::default());

        let batch = batcher.batch(vec![item.clone(), item]);

        assert_eq!(batch.images.dims(), [2, 3, 2, 4]);
        assert_eq!(batch.targets.dims(), [2, 2, 4]);
        let targets = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        assert_eq!(&targets[..4], &[0, 1, 2, -1]);
    }
}
