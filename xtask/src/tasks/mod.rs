use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use burn::{
    backend::{Autodiff, NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice},
    config::Config,
    tensor::backend::AutodiffBackend,
};
use burn_metaseg::{
    DataSetName, ExperimentConfig, ExperimentPaths, ProcessedDataSet, SegmentationModelConfig,
    Segmenter, SegmenterConfig,
    dataset::{BsrSource, VocSource},
    evaluation::save_heatmap,
};
use clap::{Args, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub mod evaluate;
pub mod fit;
pub mod meta;
pub mod train;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DataSetArg {
    Bsr,
    Voc,
}

impl From<DataSetArg> for DataSetName {
    fn from(value: DataSetArg) -> Self {
        match value {
            DataSetArg::Bsr => DataSetName::Bsr,
            DataSetArg::Voc => DataSetName::Voc,
        }
    }
}

/// Experiment settings; flags override the JSON file given with `--config`.
#[derive(Args, Debug)]
pub struct ExperimentArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub dataset: Option<DataSetArg>,

    #[arg(long)]
    pub experiment: Option<String>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(short, long)]
    pub epochs: Option<usize>,

    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Base channel count of the encoder.
    #[arg(long)]
    pub model_size: Option<usize>,

    #[arg(long)]
    pub downsample_ratio: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub data_root: Option<String>,

    #[arg(long)]
    pub results_root: Option<String>,

    /// Run on the CPU backend instead of the GPU.
    #[arg(long)]
    pub cpu: bool,

    /// Reuse the saved model of this experiment instead of training a new one.
    #[arg(long)]
    pub load_model: bool,
}

impl ExperimentArgs {
    pub fn resolve(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)
                .map_err(|e| anyhow!("Failed to load config {}: {e}", path.display()))?,
            None => ExperimentConfig::new(),
        };

        if let Some(dataset) = self.dataset {
            config.dataset = dataset.into();
        }
        if let Some(experiment) = &self.experiment {
            config.experiment = experiment.clone();
        }
        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(model_size) = self.model_size {
            config.model_size = model_size;
        }
        if let Some(ratio) = self.downsample_ratio {
            config.downsample_ratio = ratio;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(root) = &self.data_root {
            config.data_root = root.clone();
        }
        if let Some(root) = &self.results_root {
            config.results_root = root.clone();
        }
        config.use_cpu |= self.cpu;
        config.load_model |= self.load_model;

        Ok(config)
    }
}

/// Resolve the configuration, create the experiment directories and start logging.
///
/// A training run that does not reuse a saved model also mirrors the log into
/// the experiment's console file and saves the resolved configuration next to it.
pub fn prepare(
    args: &ExperimentArgs,
    training: bool,
) -> Result<(ExperimentConfig, ExperimentPaths)> {
    let config = args.resolve()?;
    let fresh = training && !config.load_model;
    let paths = config.paths();
    paths
        .create()
        .with_context(|| format!("Failed to create {}", paths.experiment_dir.display()))?;

    init_logging(fresh.then(|| paths.console_file()))?;

    if fresh {
        config
            .save(paths.config_file())
            .with_context(|| format!("Failed to save {}", paths.config_file().display()))?;
    }
    tracing::info!("Experiment directory: {}", paths.experiment_dir.display());
    tracing::info!("{config}");

    Ok((config, paths))
}

fn init_logging(console_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match console_file {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install the logger")
}

/// Work generic over the autodiff backend, run on the device the config asks for.
pub trait Task {
    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<()>;
}

pub fn dispatch<T: Task>(use_cpu: bool, task: T) -> Result<()> {
    if use_cpu {
        tracing::info!("Running on the CPU backend");
        task.run::<Autodiff<NdArray<f32>>>(NdArrayDevice::Cpu)
    } else {
        tracing::info!("Running on the GPU backend");
        task.run::<Autodiff<Wgpu<f32, i32>>>(WgpuDevice::default())
    }
}

pub fn load_data(config: &ExperimentConfig, paths: &ExperimentPaths) -> Result<ProcessedDataSet> {
    let data = match config.dataset {
        DataSetName::Bsr => ProcessedDataSet::process(
            &BsrSource::from_data_root(&config.data_root),
            config.downsample_ratio,
            &paths.processed_data_dir,
        ),
        DataSetName::Voc => ProcessedDataSet::process(
            &VocSource::from_data_root(&config.data_root),
            config.downsample_ratio,
            &paths.processed_data_dir,
        ),
    };

    data.with_context(|| format!("Failed to load the {} dataset", config.dataset.as_str()))
}

pub fn model_config(config: &ExperimentConfig, data: &ProcessedDataSet) -> SegmentationModelConfig {
    let [channels, _, _] = data.sample_shape();

    SegmentationModelConfig::new(channels, data.num_classes())
        .with_base_channels(config.model_size)
        .with_ignore_index(config.ignore_index)
}

pub fn segmenter_config(config: &ExperimentConfig, data: &ProcessedDataSet) -> SegmenterConfig {
    SegmenterConfig::new(model_config(config, data))
        .with_epochs(config.epochs)
        .with_batch_size(config.batch_size)
        .with_train_ratio(config.train_ratio)
        .with_valid_ratio(config.val_ratio)
        .with_seed(config.seed)
}

/// Test accuracy, whole-dataset accuracy and IoU, plus raw and normalised confusion heat maps.
pub fn report<B: AutodiffBackend>(segmenter: &Segmenter<B>, paths: &ExperimentPaths) -> Result<()> {
    let report = segmenter.test();

    for (qualifier, normalize) in [("", false), ("_normalized", true)] {
        let path = paths.graph_file(qualifier);
        save_heatmap(&report.confusion, &path, normalize)
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }

    Ok(())
}
