use anyhow::Result;
use burn::{
    backend::NdArray,
    data::dataloader::DataLoaderBuilder,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{LearnerBuilder, metric::LossMetric},
};
use burn_metaseg::{
    ExperimentConfig, ExperimentPaths, IoUMetric, PixelAccuracyMetric, Segmenter,
    dataset::SegmentationBatcher, training::sgd_config,
};
use clap::Args;

use super::{
    ExperimentArgs, Task, dispatch, load_data, model_config, prepare, report, segmenter_config,
};

#[derive(Args, Debug)]
pub struct FitArgs {
    #[command(flatten)]
    pub experiment: ExperimentArgs,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
}

struct Fit {
    config: ExperimentConfig,
    paths: ExperimentPaths,
    num_workers: usize,
}

pub fn run(args: &FitArgs) -> Result<()> {
    let (config, paths) = prepare(&args.experiment, true)?;
    dispatch(
        config.use_cpu,
        Fit {
            config,
            paths,
            num_workers: args.num_workers,
        },
    )
}

impl Task for Fit {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()> {
        let Fit {
            config,
            paths,
            num_workers,
        } = self;
        B::seed(config.seed);

        let data = load_data(&config, &paths)?;
        let split = data.split(config.train_ratio, config.val_ratio);
        tracing::info!(
            "Fitting on {} samples, validating on {}",
            split.train.len(),
            split.valid.len()
        );

        let dataloader_train = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(device.clone()))
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(num_workers)
            .build(data.subset(split.train.clone()));
        let dataloader_valid =
            DataLoaderBuilder::new(SegmentationBatcher::<B::InnerBackend>::new(device.clone()))
                .batch_size(config.batch_size)
                .num_workers(num_workers)
                .build(data.subset(split.valid.clone()));

        let learner = LearnerBuilder::new(paths.artifact_dir())
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .metric_train_numeric(PixelAccuracyMetric::<NdArray>::new())
            .metric_valid_numeric(PixelAccuracyMetric::<NdArray>::new())
            .metric_train_numeric(IoUMetric::<NdArray>::new())
            .metric_valid_numeric(IoUMetric::<NdArray>::new())
            .with_file_checkpointer(CompactRecorder::new())
            .with_application_logger(None)
            .devices(vec![device.clone()])
            .num_epochs(config.epochs)
            .summary()
            .build(
                model_config(&config, &data).init::<B>(&device),
                sgd_config(config.momentum, config.weight_decay).init(),
                config.lr,
            );

        let model = learner.fit(dataloader_train, dataloader_valid);

        let mut segmenter = Segmenter::<B>::new(
            segmenter_config(&config, &data),
            data,
            config.ignore_index,
            &device,
        );
        segmenter.set_model(model);
        segmenter.save_model(&paths.model_path())?;
        report(&segmenter, &paths)
    }
}
