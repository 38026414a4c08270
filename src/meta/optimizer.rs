use burn::{prelude::*, tensor::backend::AutodiffBackend};

use crate::model::SegmentationModel;
use crate::training::UpdateRule;

use super::cell::{MetaLearningModel, MetaState};
use super::params::ParamLayout;

/// Applies a trained [MetaLearningModel] as a plain update rule.
///
/// The cell runs without autodiff. Its recurrent state persists across calls
/// on the same model and restarts when handed a model with other parameters,
/// such as a fresh network or one loaded from a checkpoint.
pub struct LearnedOptimizer<B: AutodiffBackend> {
    cell: MetaLearningModel<B::InnerBackend>,
    layout: Option<ParamLayout>,
    state: Option<MetaState<B::InnerBackend>>,
}

impl<B: AutodiffBackend> LearnedOptimizer<B> {
    pub fn new(cell: MetaLearningModel<B::InnerBackend>) -> Self {
        Self {
            cell,
            layout: None,
            state: None,
        }
    }

    pub fn reset(&mut self) {
        self.layout = None;
        self.state = None;
    }
}

impl<B: AutodiffBackend> UpdateRule<B> for LearnedOptimizer<B> {
    fn update(&mut self, model: SegmentationModel<B>, loss: Tensor<B, 1>) -> SegmentationModel<B> {
        let grads = loss.backward();
        let layout = ParamLayout::from_module(&model);
        let same_model = self
            .layout
            .take()
            .is_some_and(|cached| cached.same_params(&layout));

        let grad = layout.gradients::<B, _>(&model, &grads);
        let theta = layout.flatten(&model).inner();
        let state = match self.state.take() {
            Some(state) if same_model => state,
            _ => {
                tracing::debug!("Starting learned optimizer state for a new model");
                self.cell.init_state(layout.num_params(), &theta.device())
            }
        };

        let (theta, state) = self.cell.step(theta, grad, loss.inner(), state);
        let model = layout.assign_leaves::<B, _>(model, theta);

        self.state = Some(state);
        self.layout = Some(layout);
        model
    }
}
