use std::path::{Path, PathBuf};

use burn::prelude::*;

#[derive(Config, Debug, PartialEq, Eq)]
pub enum DataSetName {
    Bsr,
    Voc,
}

impl DataSetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSetName::Bsr => "BSR",
            DataSetName::Voc => "VOC",
        }
    }
}

/// Hyper-parameters and locations of a single segmentation experiment.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    #[config(default = "DataSetName::Voc")]
    pub dataset: DataSetName,
    #[config(default = "String::from(\"FullSeg\")")]
    pub experiment: String,
    #[config(default = 64)]
    pub model_size: usize,
    #[config(default = 0.075)]
    pub lr: f64,
    #[config(default = false)]
    pub load_model: bool,
    #[config(default = 4)]
    pub downsample_ratio: usize,
    #[config(default = 60)]
    pub batch_size: usize,
    #[config(default = 1000)]
    pub epochs: usize,
    #[config(default = 24)]
    pub seed: u64,
    #[config(default = false)]
    pub use_cpu: bool,
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 0.001)]
    pub weight_decay: f32,
    #[config(default = "-1")]
    pub ignore_index: i32,
    #[config(default = 0.88)]
    pub train_ratio: f64,
    #[config(default = 0.04)]
    pub val_ratio: f64,
    #[config(default = "String::from(\"../Data\")")]
    pub data_root: String,
    #[config(default = "String::from(\"../ExperimentResults\")")]
    pub results_root: String,
}

impl ExperimentConfig {
    pub fn paths(&self) -> ExperimentPaths {
        ExperimentPaths::new(self)
    }
}

/// Where an experiment keeps its checkpoints, plots and console log.
///
/// Layout: `<results_root>/<DATASET>/<experiment>/<model_size>/`.
#[derive(Debug, Clone)]
pub struct ExperimentPaths {
    pub experiment_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    lr: f64,
}

impl ExperimentPaths {
    pub fn new(config: &ExperimentConfig) -> Self {
        let experiment_dir = Path::new(&config.results_root)
            .join(config.dataset.as_str())
            .join(&config.experiment)
            .join(config.model_size.to_string());

        Self {
            experiment_dir,
            processed_data_dir: Path::new(&config.data_root).join("ProcessedData"),
            lr: config.lr,
        }
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.experiment_dir)?;
        std::fs::create_dir_all(&self.processed_data_dir)
    }

    /// Checkpoint path without extension; the recorder appends its own, so the
    /// learning rate's decimal point is spelled `_`.
    pub fn model_path(&self) -> PathBuf {
        let lr = self.lr.to_string().replace('.', "_");
        self.experiment_dir.join(format!("model_{lr}"))
    }

    pub fn meta_model_path(&self) -> PathBuf {
        self.experiment_dir.join("meta_learning_model")
    }

    pub fn graph_file(&self, qualifier: &str) -> PathBuf {
        self.experiment_dir
            .join(format!("heatmap_confusion_matrix{}{qualifier}.png", self.lr))
    }

    pub fn console_file(&self) -> PathBuf {
        self.experiment_dir.join(format!("console_{}.txt", self.lr))
    }

    pub fn config_file(&self) -> PathBuf {
        self.experiment_dir.join("config.json")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.experiment_dir.join("artifacts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_experiment() {
        let config = ExperimentConfig::new();

        assert_eq!(config.dataset, DataSetName::Voc);
        assert_eq!(config.experiment, "FullSeg");
        assert_eq!(config.model_size, 64);
        assert_eq!(config.batch_size, 60);
        assert_eq!(config.downsample_ratio, 4);
        assert_eq!(config.ignore_index, -1);
    }

    #[test]
    fn paths_follow_dataset_experiment_size_layout() {
        let config = ExperimentConfig::new()
            .with_results_root("results".to_string())
            .with_dataset(DataSetName::Bsr)
            .with_lr(0.5);
        let paths = config.paths();

        assert_eq!(
            paths.experiment_dir,
            Path::new("results").join("BSR").join("FullSeg").join("64")
        );
        assert!(paths.model_path().ends_with("model_0_5"));
        assert!(paths.console_file().ends_with("console_0.5.txt"));
        assert!(
            paths
                .graph_file("_test")
                .ends_with("heatmap_confusion_matrix0.5_test.png")
        );
    }
}
