use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, tanh},
};

/// Recurrent state carried across update steps, one row per parameter.
#[derive(Clone, Debug)]
pub struct MetaState<B: Backend> {
    pub hidden: Tensor<B, 2>,
    pub cell: Tensor<B, 2>,
    /// Previous per-parameter learning rate, `[num_params, 1]`.
    pub lr: Tensor<B, 2>,
    /// Previous per-parameter forget gate, `[num_params, 1]`.
    pub forget: Tensor<B, 2>,
}

impl<B: Backend> MetaState<B> {
    /// Zero hidden and cell state; learning rate and forget gate start at one.
    pub fn new(num_params: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros([num_params, hidden_size], device),
            cell: Tensor::zeros([num_params, hidden_size], device),
            lr: Tensor::ones([num_params, 1], device),
            forget: Tensor::ones([num_params, 1], device),
        }
    }

    pub fn num_params(&self) -> usize {
        self.hidden.dims()[0]
    }

    pub fn detach(self) -> Self {
        Self {
            hidden: self.hidden.detach(),
            cell: self.cell.detach(),
            lr: self.lr.detach(),
            forget: self.forget.detach(),
        }
    }
}

#[derive(Config, Debug)]
pub struct MetaLearningModelConfig {
    #[config(default = 8)]
    pub hidden_size: usize,
    /// Scale `p` of the log-magnitude input preprocessing.
    #[config(default = 10.0)]
    pub preprocess_scale: f32,
    #[config(default = 5.0)]
    pub forget_bias: f32,
    #[config(default = "-5.0")]
    pub lr_bias: f32,
    /// Half-width of the uniform initialisation of the gate weights.
    #[config(default = 0.01)]
    pub gate_init: f64,
}

/// Coordinate-wise recurrent update rule.
///
/// Every parameter is a row of the batch: the gradient and the loss drive a
/// small LSTM, whose hidden state in turn drives a learning-rate gate `i` and
/// a forget gate `f`. The parameter update is `θ ← f ⊙ θ − i ⊙ ∇θ`.
#[derive(Module, Debug)]
pub struct MetaLearningModel<B: Backend> {
    lstm: Linear<B>,
    lr_gate: Linear<B>,
    forget_gate: Linear<B>,
    hidden_size: usize,
    preprocess_scale: f32,
}

impl MetaLearningModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MetaLearningModel<B> {
        let gate_init = Initializer::Uniform {
            min: -self.gate_init,
            max: self.gate_init,
        };
        // Preprocessed gradient and loss, two features each.
        let lstm = LinearConfig::new(4 + self.hidden_size, 4 * self.hidden_size).init(device);
        let gate = |bias: f32| {
            let mut linear = LinearConfig::new(self.hidden_size + 2, 1)
                .with_initializer(gate_init.clone())
                .init(device);
            linear.bias = Some(Param::from_tensor(Tensor::full([1], bias, device)));
            linear
        };

        MetaLearningModel {
            lstm,
            lr_gate: gate(self.lr_bias),
            forget_gate: gate(self.forget_bias),
            hidden_size: self.hidden_size,
            preprocess_scale: self.preprocess_scale,
        }
    }
}

impl<B: Backend> MetaLearningModel<B> {
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn init_state(&self, num_params: usize, device: &B::Device) -> MetaState<B> {
        MetaState::new(num_params, self.hidden_size, device)
    }

    /// One update of the flat parameters `theta` given their gradient and the loss.
    ///
    /// - theta, grad: `[num_params]`
    /// - loss: `[1]`
    pub fn step(
        &self,
        theta: Tensor<B, 1>,
        grad: Tensor<B, 1>,
        loss: Tensor<B, 1>,
        state: MetaState<B>,
    ) -> (Tensor<B, 1>, MetaState<B>) {
        let [num_params] = theta.dims();
        assert_eq!(
            state.num_params(),
            num_params,
            "State tracks {} parameters, got {}",
            state.num_params(),
            num_params
        );
        let grad = grad.reshape([num_params, 1]);
        let theta = theta.reshape([num_params, 1]);

        let loss =
            preprocess(loss.reshape([1, 1]), self.preprocess_scale).repeat_dim(0, num_params);
        let inputs = Tensor::cat(
            vec![
                preprocess(grad.clone(), self.preprocess_scale),
                loss,
                state.hidden,
            ],
            1,
        );

        let gates = self.lstm.forward(inputs);
        let gate = |index: usize| {
            gates
                .clone()
                .narrow(1, index * self.hidden_size, self.hidden_size)
        };
        let (input, forget, candidate, output) = (gate(0), gate(1), gate(2), gate(3));
        let cell = sigmoid(forget) * state.cell + sigmoid(input) * tanh(candidate);
        let hidden = sigmoid(output) * tanh(cell.clone());

        let lr = sigmoid(self.lr_gate.forward(Tensor::cat(
            vec![hidden.clone(), theta.clone(), state.lr],
            1,
        )));
        let forget = sigmoid(self.forget_gate.forward(Tensor::cat(
            vec![hidden.clone(), theta.clone(), state.forget],
            1,
        )));

        let next = forget.clone() * theta - lr.clone() * grad;

        (
            next.reshape([num_params]),
            MetaState {
                hidden,
                cell,
                lr,
                forget,
            },
        )
    }
}

/// Log-magnitude and sign encoding of `x`, `[n, 1]` to `[n, 2]`.
///
/// Values with `|x| >= e^-p` map to `(ln|x| / p, sign(x))`, smaller ones to
/// `(-1, e^p x)`, keeping inputs of very different scales in a similar range.
fn preprocess<B: Backend>(x: Tensor<B, 2>, p: f32) -> Tensor<B, 2> {
    let threshold = (-p).exp();
    let device = x.device();
    let large = x.clone().abs().greater_equal_elem(threshold);

    let magnitude = Tensor::full(x.shape(), -1.0, &device)
        .mask_where(large.clone(), x.clone().abs().clamp_min(threshold).log().div_scalar(p));
    let direction = x.clone().mul_scalar(p.exp()).mask_where(large, x.sign());

    Tensor::cat(vec![magnitude, direction], 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn preprocessing_splits_scales() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, -1.0, 0.0], &device).reshape([3, 1]);

        let encoded = preprocess(x, 10.0).into_data().to_vec::<f32>().unwrap();

        assert_eq!(encoded.len(), 6);
        // ln(1) / 10 = 0 with sign.
        assert!(encoded[0].abs() < 1e-6 && (encoded[1] - 1.0).abs() < 1e-6);
        assert!(encoded[2].abs() < 1e-6 && (encoded[3] + 1.0).abs() < 1e-6);
        // Below threshold.
        assert!((encoded[4] + 1.0).abs() < 1e-6 && encoded[5].abs() < 1e-6);
    }

    #[test]
    fn initial_step_is_a_small_gradient_step() {
        let device = Default::default();
        let cell: MetaLearningModel<TestBackend> = MetaLearningModelConfig::new().init(&device);
        let theta = Tensor::<TestBackend, 1>::from_floats([0.5, -0.5, 0.0, 1.0], &device);
        let grad = Tensor::<TestBackend, 1>::from_floats([1.0, -1.0, 0.0, 2.0], &device);
        let loss = Tensor::<TestBackend, 1>::from_floats([0.7], &device);

        let (next, state) = cell.step(
            theta.clone(),
            grad.clone(),
            loss,
            cell.init_state(4, &device),
        );

        assert_eq!(next.dims(), [4]);
        assert_eq!(state.hidden.dims(), [4, 8]);
        let theta = theta.into_data().to_vec::<f32>().unwrap();
        let grad = grad.into_data().to_vec::<f32>().unwrap();
        let next = next.into_data().to_vec::<f32>().unwrap();
        for ((t, g), n) in theta.iter().zip(&grad).zip(&next) {
            // Forget gate close to one, learning rate close to zero.
            assert!((n - t).abs() <= 0.05 * (t.abs() + g.abs()) + 1e-6);
            if *g != 0.0 {
                assert!((n - t) * g <= 1e-3, "update should not climb the gradient");
            }
        }
    }

    #[test]
    fn state_rows_follow_parameters() {
        let device = Default::default();
        let state = MetaState::<TestBackend>::new(3, 8, &device);

        assert_eq!(state.num_params(), 3);
        assert_eq!(state.lr.clone().sum().into_scalar(), 3.0);
        assert_eq!(state.cell.sum().into_scalar(), 0.0);
    }
}
