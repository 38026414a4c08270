/// Pixel-level confusion matrix; rows are ground truth, columns predictions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[i64], truths: &[i64], num_classes: usize) -> Self {
        let mut matrix = Self::new(num_classes);
        matrix.update(predictions, truths);
        matrix
    }

    /// Count each (truth, prediction) pair. Truths outside `[0, num_classes)`,
    /// such as the ignore label, are skipped; so are out-of-range predictions.
    pub fn update(&mut self, predictions: &[i64], truths: &[i64]) {
        assert_eq!(
            predictions.len(),
            truths.len(),
            "Predictions ({}) and ground truths ({}) must have the same length",
            predictions.len(),
            truths.len()
        );

        let n = self.num_classes as i64;
        for (&prediction, &truth) in predictions.iter().zip(truths) {
            if (0..n).contains(&truth) && (0..n).contains(&prediction) {
                self.counts[truth as usize * self.num_classes + prediction as usize] += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        assert_eq!(self.num_classes, other.num_classes);
        for (count, other) in self.counts.iter_mut().zip(&other.counts) {
            *count += other;
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn get(&self, truth: usize, prediction: usize) -> u64 {
        self.counts[truth * self.num_classes + prediction]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn rows(&self) -> Vec<Vec<u64>> {
        self.counts
            .chunks(self.num_classes.max(1))
            .map(<[u64]>::to_vec)
            .collect()
    }

    /// Each row divided by its sum; empty rows stay zero.
    pub fn normalized(&self) -> Vec<Vec<f64>> {
        self.rows()
            .into_iter()
            .map(|row| {
                let sum: u64 = row.iter().sum();
                row.into_iter()
                    .map(|count| {
                        if sum == 0 {
                            0.0
                        } else {
                            count as f64 / sum as f64
                        }
                    })
                    .collect()
            })
            .collect()
    }

    pub fn pixel_accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.get(c, c)).sum();
        correct as f64 / total as f64
    }

    /// Intersection over union per class; `None` when the class appears in
    /// neither the predictions nor the ground truth.
    pub fn iou_per_class(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|class| {
                let intersection = self.get(class, class);
                let truth: u64 = (0..self.num_classes).map(|p| self.get(class, p)).sum();
                let predicted: u64 = (0..self.num_classes).map(|t| self.get(t, class)).sum();
                let union = truth + predicted - intersection;

                (union > 0).then(|| intersection as f64 / union as f64)
            })
            .collect()
    }

    /// Mean IoU over the classes that appear at all.
    pub fn mean_iou(&self) -> f64 {
        let ious: Vec<f64> = self.iou_per_class().into_iter().flatten().collect();
        if ious.is_empty() {
            0.0
        } else {
            ious.iter().sum::<f64>() / ious.len() as f64
        }
    }
}

/// Mean over images of the fraction of labelled pixels predicted correctly.
pub fn pixel_accuracy(
    predictions: &[Vec<i64>],
    truths: &[Vec<i64>],
    ignore_index: Option<i64>,
) -> f64 {
    let accuracies: Vec<f64> = predictions
        .iter()
        .zip(truths)
        .filter_map(|(prediction, truth)| {
            let correct = prediction
                .iter()
                .zip(truth)
                .filter(|(p, t)| p == t)
                .count();
            let total = match ignore_index {
                Some(ignore) => truth.iter().filter(|&&t| t != ignore).count(),
                None => truth.len(),
            };
            (total > 0).then(|| correct as f64 / total as f64)
        })
        .collect();

    if accuracies.is_empty() {
        0.0
    } else {
        accuracies.iter().sum::<f64>() / accuracies.len() as f64
    }
}

/// Mean IoU of a flattened prediction against its ground truth.
pub fn compute_iou(predictions: &[i64], truths: &[i64], num_classes: usize) -> f64 {
    ConfusionMatrix::from_predictions(predictions, truths, num_classes).mean_iou()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_truth_rows_and_prediction_columns() {
        let matrix = ConfusionMatrix::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 3);

        assert_eq!(matrix.rows(), vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 1, 1]]);
        assert_eq!(matrix.total(), 4);
        assert_eq!(matrix.pixel_accuracy(), 0.75);
    }

    #[test]
    fn ignore_label_is_skipped() {
        let matrix = ConfusionMatrix::from_predictions(&[0, 1], &[0, -1], 2);

        assert_eq!(matrix.total(), 1);
    }

    #[test]
    fn iou_per_class_and_mean() {
        let matrix = ConfusionMatrix::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 4);

        let ious = matrix.iou_per_class();

        assert_eq!(ious[0], Some(1.0));
        assert_eq!(ious[1], Some(0.5));
        assert_eq!(ious[2], Some(0.5));
        assert_eq!(ious[3], None);
        assert!((matrix.mean_iou() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn normalized_rows_sum_to_one() {
        let matrix = ConfusionMatrix::from_predictions(&[0, 0, 1], &[0, 1, 1], 3);

        let normalized = matrix.normalized();

        assert_eq!(normalized[1], vec![0.5, 0.5, 0.0]);
        assert_eq!(normalized[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn pixel_accuracy_averages_per_image() {
        let predictions = vec![vec![0, 0, 0, 0], vec![1, 1]];
        let truths = vec![vec![0, 0, -1, -1], vec![1, 0]];

        let with_ignore = pixel_accuracy(&predictions, &truths, Some(-1));
        let without = pixel_accuracy(&predictions, &truths, None);

        assert!((with_ignore - 0.75).abs() < 1e-12);
        assert!((without - 0.5).abs() < 1e-12);
    }

    #[test]
    fn merge_adds_counts() {
        let mut a = ConfusionMatrix::from_predictions(&[0], &[0], 2);
        let b = ConfusionMatrix::from_predictions(&[1], &[0], 2);

        a.merge(&b);

        assert_eq!(a.rows(), vec![vec![1, 1], vec![0, 0]]);
    }
}
