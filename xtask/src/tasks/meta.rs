use anyhow::{Result, bail};
use burn::tensor::backend::AutodiffBackend;
use burn_metaseg::{
    ExperimentConfig, ExperimentPaths, MetaLearner, MetaLearnerConfig, ProcessedDataSet,
    Segmenter, meta::MetaLearningModelConfig,
};
use clap::Args;

use super::{ExperimentArgs, Task, dispatch, load_data, prepare, report, segmenter_config};

#[derive(Args, Debug)]
pub struct MetaTrainArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    #[arg(long, default_value_t = 100)]
    pub episodes: usize,

    /// Support samples per episode.
    #[arg(short, default_value_t = 5)]
    pub k: usize,

    #[arg(long, default_value_t = 5)]
    pub query_size: usize,

    /// Base channel count of the networks trained inside each episode.
    #[arg(long, default_value_t = 8)]
    pub learner_channels: usize,
}

fn meta_config(
    config: &ExperimentConfig,
    data: &ProcessedDataSet,
    channels: usize,
) -> MetaLearnerConfig {
    MetaLearnerConfig::new(
        MetaLearningModelConfig::new(),
        MetaLearnerConfig::learner_for(data, channels).with_ignore_index(config.ignore_index),
    )
    .with_ignore_index(config.ignore_index)
    .with_seed(config.seed)
}

struct MetaTrain {
    config: ExperimentConfig,
    paths: ExperimentPaths,
    episodes: usize,
    k: usize,
    query_size: usize,
    learner_channels: usize,
}

pub fn run_train(args: &MetaTrainArgs) -> Result<()> {
    let (config, paths) = prepare(&args.experiment, true)?;
    dispatch(
        config.use_cpu,
        MetaTrain {
            config,
            paths,
            episodes: args.episodes,
            k: args.k,
            query_size: args.query_size,
            learner_channels: args.learner_channels,
        },
    )
}

impl Task for MetaTrain {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let config = &self.config;
        B::seed(config.seed);

        let data = load_data(config, &self.paths)?;
        let split = data.split(config.train_ratio, config.val_ratio);
        let meta_config = meta_config(config, &data, self.learner_channels)
            .with_episodes(self.episodes)
            .with_k(self.k)
            .with_query_size(self.query_size);

        let mut meta = MetaLearner::<B>::new(meta_config, &device);
        let path = self.paths.meta_model_path();
        if config.load_model && meta.load_model(&path)? {
            tracing::info!("Continuing from the saved meta-learner");
        }

        let losses = meta.train(&data, split.train);
        if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
            tracing::info!("query loss went from {first:.5} to {last:.5}");
        }
        meta.save_model(&path)?;
        Ok(())
    }
}

struct MetaFit {
    config: ExperimentConfig,
    paths: ExperimentPaths,
}

pub fn run_fit(args: &ExperimentArgs) -> Result<()> {
    let (config, paths) = prepare(args, true)?;
    dispatch(config.use_cpu, MetaFit { config, paths })
}

impl Task for MetaFit {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let MetaFit { config, paths } = self;
        B::seed(config.seed);

        let data = load_data(&config, &paths)?;
        let meta_config = meta_config(&config, &data, config.model_size);
        let mut meta = MetaLearner::<B>::new(meta_config, &device);
        let meta_path = paths.meta_model_path();
        if !meta.load_model(&meta_path)? {
            bail!(
                "No saved meta-learner at {}, run meta-train first",
                meta_path.display()
            );
        }

        let mut segmenter = Segmenter::<B>::new(
            segmenter_config(&config, &data),
            data,
            config.ignore_index,
            &device,
        );
        let model_path = paths.model_path();
        let loaded = config.load_model && segmenter.load_model(&model_path)?;
        if !loaded {
            let mut rule = meta.optimizer();
            segmenter.train(&mut rule);
            segmenter.save_model(&model_path)?;
        }

        report(&segmenter, &paths)
    }
}
