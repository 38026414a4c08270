use std::collections::HashMap;

use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, ParamId},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

#[derive(Clone, Debug)]
struct Slot {
    offset: usize,
    len: usize,
}

/// Where each trainable tensor of a module lives in one flat parameter vector.
///
/// Only tensors that require gradients are laid out, so batch-norm running
/// statistics are left untouched by [ParamLayout::assign].
#[derive(Clone, Debug)]
pub struct ParamLayout {
    order: Vec<ParamId>,
    slots: HashMap<ParamId, Slot>,
    num_params: usize,
}

impl ParamLayout {
    pub fn from_module<B: Backend, M: Module<B>>(module: &M) -> Self {
        let mut collector = LayoutCollector::default();
        module.visit(&mut collector);

        let layout = Self {
            order: collector.order,
            slots: collector.slots,
            num_params: collector.offset,
        };
        tracing::debug!(
            "Parameter layout: {} tensors, {} values",
            layout.order.len(),
            layout.num_params
        );
        layout
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn num_tensors(&self) -> usize {
        self.order.len()
    }

    /// Whether both layouts address the same parameters in the same order.
    pub fn same_params(&self, other: &Self) -> bool {
        self.num_params == other.num_params && self.order == other.order
    }

    /// Concatenate the module's trainable tensors, `[num_params]`.
    pub fn flatten<B: Backend, M: Module<B>>(&self, module: &M) -> Tensor<B, 1> {
        let mut gatherer = Gatherer {
            layout: self,
            tensors: HashMap::new(),
        };
        module.visit(&mut gatherer);

        let tensors = self.ordered(gatherer.tensors);
        Tensor::cat(tensors, 0)
    }

    /// Gradients of every laid-out tensor; tensors without one contribute zeros.
    pub fn gradients<B: AutodiffBackend, M: Module<B>>(
        &self,
        module: &M,
        grads: &B::Gradients,
    ) -> Tensor<B::InnerBackend, 1> {
        let mut gatherer = GradientGatherer::<B> {
            layout: self,
            grads,
            tensors: HashMap::new(),
        };
        module.visit(&mut gatherer);

        let tensors = self.ordered(gatherer.tensors);
        Tensor::cat(tensors, 0)
    }

    /// Replace the module's trainable tensors with slices of `flat`, keeping
    /// whatever autodiff history `flat` carries.
    pub fn assign<B: Backend, M: Module<B>>(&self, module: M, flat: Tensor<B, 1>) -> M {
        self.check_len(flat.dims()[0]);
        module.map(&mut Assigner { layout: self, flat })
    }

    /// Replace the module's trainable tensors with fresh leaves built from `flat`.
    pub fn assign_leaves<B: AutodiffBackend, M: Module<B>>(
        &self,
        module: M,
        flat: Tensor<B::InnerBackend, 1>,
    ) -> M {
        self.check_len(flat.dims()[0]);
        module.map(&mut LeafAssigner::<B> { layout: self, flat })
    }

    fn check_len(&self, len: usize) {
        assert_eq!(
            len, self.num_params,
            "Flat parameter vector has {} values, layout expects {}",
            len, self.num_params
        );
    }

    fn ordered<B: Backend>(
        &self,
        mut tensors: HashMap<ParamId, Tensor<B, 1>>,
    ) -> Vec<Tensor<B, 1>> {
        self.order
            .iter()
            .map(|id| {
                tensors
                    .remove(id)
                    .unwrap_or_else(|| panic!("Parameter {id:?} is missing from the module"))
            })
            .collect()
    }

    fn slot(&self, id: &ParamId) -> Option<&Slot> {
        self.slots.get(id)
    }
}

#[derive(Default)]
struct LayoutCollector {
    order: Vec<ParamId>,
    slots: HashMap<ParamId, Slot>,
    offset: usize,
}

impl<B: Backend> ModuleVisitor<B> for LayoutCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if !tensor.is_require_grad() {
            return;
        }
        let len = tensor.shape().num_elements();
        self.order.push(id);
        self.slots.insert(
            id,
            Slot {
                offset: self.offset,
                len,
            },
        );
        self.offset += len;
    }
}

struct Gatherer<'a, B: Backend> {
    layout: &'a ParamLayout,
    tensors: HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for Gatherer<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(slot) = self.layout.slot(&id) {
            self.tensors.insert(id, tensor.clone().reshape([slot.len]));
        }
    }
}

struct GradientGatherer<'a, B: AutodiffBackend> {
    layout: &'a ParamLayout,
    grads: &'a B::Gradients,
    tensors: HashMap<ParamId, Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientGatherer<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let Some(slot) = self.layout.slot(&id) else {
            return;
        };
        let grad = match tensor.grad(self.grads) {
            Some(grad) => grad.reshape([slot.len]),
            None => Tensor::zeros([slot.len], &tensor.device()),
        };
        self.tensors.insert(id, grad);
    }
}

struct Assigner<'a, B: Backend> {
    layout: &'a ParamLayout,
    flat: Tensor<B, 1>,
}

impl<B: Backend> ModuleMapper<B> for Assigner<'_, B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self.layout.slot(&id) {
            Some(slot) => self
                .flat
                .clone()
                .slice([slot.offset..slot.offset + slot.len])
                .reshape(tensor.shape()),
            None => tensor,
        }
    }
}

struct LeafAssigner<'a, B: AutodiffBackend> {
    layout: &'a ParamLayout,
    flat: Tensor<B::InnerBackend, 1>,
}

impl<B: AutodiffBackend> ModuleMapper<B> for LeafAssigner<'_, B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self.layout.slot(&id) {
            Some(slot) => {
                let values = self
                    .flat
                    .clone()
                    .slice([slot.offset..slot.offset + slot.len])
                    .reshape(tensor.shape());
                Tensor::from_inner(values).require_grad()
            }
            None => tensor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig},
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    fn linear(device: &<TestBackend as Backend>::Device) -> Linear<TestBackend> {
        LinearConfig::new(3, 2).init(device)
    }

    #[test]
    fn layout_counts_weights_and_biases() {
        let device = Default::default();
        let layout = ParamLayout::from_module(&linear(&device));

        assert_eq!(layout.num_tensors(), 2);
        assert_eq!(layout.num_params(), 3 * 2 + 2);
    }

    #[test]
    fn batch_norm_running_statistics_are_skipped() {
        let device = Default::default();
        let norm: BatchNorm<TestBackend, 2> = BatchNormConfig::new(4).init(&device);

        let layout = ParamLayout::from_module(&norm);

        // Scale and shift only.
        assert_eq!(layout.num_params(), 8);
        assert_eq!(layout.flatten(&norm).dims(), [8]);
    }

    #[test]
    fn layouts_of_distinct_instances_differ() {
        let device = Default::default();
        let module = linear(&device);
        let layout = ParamLayout::from_module(&module);
        let zeros = Tensor::<NdArray<f32>, 1>::zeros([layout.num_params()], &device);

        let updated = layout.assign_leaves::<TestBackend, _>(module, zeros);

        assert!(layout.same_params(&ParamLayout::from_module(&updated)));
        assert!(!layout.same_params(&ParamLayout::from_module(&linear(&device))));
    }

    #[test]
    fn assign_then_flatten_returns_the_same_values() {
        let device = Default::default();
        let module = linear(&device);
        let layout = ParamLayout::from_module(&module);
        let values =
            Tensor::<TestBackend, 1>::from_floats([1., 2., 3., 4., 5., 6., 7., 8.], &device);

        let module = layout.assign(module, values.clone());

        let flat = layout.flatten(&module);
        flat.into_data().assert_eq(&values.into_data(), false);
    }

    #[test]
    fn gradients_follow_the_layout() {
        let device = Default::default();
        let module = linear(&device);
        let layout = ParamLayout::from_module(&module);
        let zeros = Tensor::<NdArray<f32>, 1>::zeros([layout.num_params()], &device);
        let module = layout.assign_leaves::<TestBackend, _>(module, zeros);

        let input = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        let grads = module.forward(input).sum().backward();
        let flat = layout.gradients::<TestBackend, _>(&module, &grads);

        // d(sum(xW + b))/dW = 1 for every weight, /db = 1 for every bias.
        flat.into_data().assert_eq(&TensorData::from([1f32; 8]), false);
    }

    #[test]
    fn tracked_assignment_propagates_gradients_to_the_source() {
        let device = Default::default();
        let module = linear(&device);
        let layout = ParamLayout::from_module(&module);
        let source =
            Tensor::<TestBackend, 1>::ones([layout.num_params()], &device).require_grad();
        let scaled = source.clone().mul_scalar(2.0);

        let module = layout.assign(module, scaled);
        let input = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        let grads = module.forward(input).sum().backward();

        let grad = source.grad(&grads).expect("source is a leaf");
        grad.into_data().assert_eq(&TensorData::from([2f32; 8]), false);
    }
}
