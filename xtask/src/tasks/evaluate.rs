use anyhow::{Result, bail};
use burn::tensor::backend::AutodiffBackend;
use burn_metaseg::{ExperimentConfig, ExperimentPaths, Segmenter};

use super::{ExperimentArgs, Task, dispatch, load_data, prepare, report, segmenter_config};

struct Evaluate {
    config: ExperimentConfig,
    paths: ExperimentPaths,
}

pub fn run(args: &ExperimentArgs) -> Result<()> {
    let (config, paths) = prepare(args, false)?;
    dispatch(config.use_cpu, Evaluate { config, paths })
}

impl Task for Evaluate {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let Evaluate { config, paths } = self;

        let data = load_data(&config, &paths)?;
        let mut segmenter = Segmenter::<B>::new(
            segmenter_config(&config, &data),
            data,
            config.ignore_index,
            &device,
        );

        let model_path = paths.model_path();
        if !segmenter.load_model(&model_path)? {
            bail!("No saved model at {}", model_path.display());
        }

        report(&segmenter, &paths)
    }
}
