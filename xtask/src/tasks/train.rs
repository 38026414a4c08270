use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use burn_metaseg::{ExperimentConfig, ExperimentPaths, Segmenter, training::sgd};

use super::{ExperimentArgs, Task, dispatch, load_data, prepare, report, segmenter_config};

struct Train {
    config: ExperimentConfig,
    paths: ExperimentPaths,
}

pub fn run(args: &ExperimentArgs) -> Result<()> {
    let (config, paths) = prepare(args, true)?;
    dispatch(config.use_cpu, Train { config, paths })
}

impl Task for Train {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let Train { config, paths } = self;
        B::seed(config.seed);

        let data = load_data(&config, &paths)?;
        let mut segmenter = Segmenter::<B>::new(
            segmenter_config(&config, &data),
            data,
            config.ignore_index,
            &device,
        );

        let model_path = paths.model_path();
        let loaded = config.load_model && segmenter.load_model(&model_path)?;
        if !loaded {
            let mut rule = sgd::<B>(config.lr, config.momentum, config.weight_decay);
            segmenter.train(&mut rule);
            segmenter.save_model(&model_path)?;
        }

        report(&segmenter, &paths)
    }
}
