//! Evaluation report rendering.
//!
//! A [`ReportRenderer`] turns labels, predictions and metrics into a text report and
//! a set of named images. The bundled [`SvgReportRenderer`] draws plain SVG charts
//! so no plotting toolchain is needed.

use crate::error::TrainingResult;
use crate::metrics::Metrics;
use gridlab_abstraction::{BackendKind, FeatureScore, LossHistory, TaskKind};
use std::collections::BTreeMap;
use std::fmt;

pub const CONFUSION_MATRIX: &str = "confusion_matrix.svg";
pub const REGRESSION_SCATTER: &str = "regression_scatter.svg";
pub const FEATURE_IMPORTANCE: &str = "feature_importance.svg";
pub const TRAINING_LOSS_CURVE: &str = "training_loss_curve.svg";

/// Top-N features drawn in the importance chart.
const IMPORTANCE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub backend: BackendKind,
    pub task: TaskKind,
    pub labels: &'a [f64],
    pub predicted: &'a [f64],
    pub metrics: &'a Metrics,
    /// `None` when the backend exposes no importance signal.
    pub importance: Option<&'a [FeatureScore]>,
    pub history: Option<&'a LossHistory>,
    /// Storage id of the evaluated model, for evaluation runs.
    pub source_model: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedReport {
    pub document: String,
    /// Image file name to bytes.
    pub images: BTreeMap<String, Vec<u8>>,
}

pub trait ReportRenderer: Send + Sync + fmt::Debug {
    fn render(&self, input: &ReportInput<'_>) -> TrainingResult<RenderedReport>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SvgReportRenderer;

impl ReportRenderer for SvgReportRenderer {
    fn render(&self, input: &ReportInput<'_>) -> TrainingResult<RenderedReport> {
        let mut images = BTreeMap::new();
        match &input.metrics.confusion_matrix {
            Some(matrix) if input.task.is_classification() => {
                images.insert(CONFUSION_MATRIX.to_string(), confusion_matrix_svg(matrix, input.backend).into_bytes());
            }
            _ => {
                images.insert(
                    REGRESSION_SCATTER.to_string(),
                    scatter_svg(input.labels, input.predicted).into_bytes(),
                );
            }
        }
        if let Some(importance) = input.importance.filter(|i| !i.is_empty()) {
            images.insert(FEATURE_IMPORTANCE.to_string(), importance_svg(importance, input.backend).into_bytes());
        }
        if let Some(history) = input.history.filter(|h| !h.train.is_empty()) {
            images.insert(TRAINING_LOSS_CURVE.to_string(), loss_curve_svg(history).into_bytes());
        }
        Ok(RenderedReport { document: document(input), images })
    }
}

fn document(input: &ReportInput<'_>) -> String {
    let mut lines = vec![format!("Model: {}", input.backend), format!("Task: {}", input.task)];
    if let Some(source) = input.source_model {
        lines.push(format!("Source: {source}"));
    }
    lines.push("-".repeat(20));

    let metrics = input.metrics;
    if input.task.is_classification() {
        lines.push(format!("Accuracy: {:.4}", metrics.get("accuracy").unwrap_or(0.0)));
        lines.push(String::new());
        lines.push("Classification Report:".to_string());
        lines.push(format!("{:>12} {:>10} {:>10} {:>10} {:>10}", "class", "precision", "recall", "f1-score", "support"));
        for score in &metrics.per_class {
            lines.push(format!(
                "{:>12} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                score.class, score.precision, score.recall, score.f1, score.support
            ));
        }
        lines.push(format!(
            "{:>12} {:>10.4} {:>10.4} {:>10.4} {:>10}",
            "macro avg",
            metrics.get("precision_macro").unwrap_or(0.0),
            metrics.get("recall_macro").unwrap_or(0.0),
            metrics.get("f1_macro").unwrap_or(0.0),
            input.labels.len()
        ));
    } else {
        lines.push(format!("RMSE: {:.4}", metrics.get("rmse").unwrap_or(0.0)));
        lines.push(format!("MAE: {:.4}", metrics.get("mae").unwrap_or(0.0)));
        lines.push(format!("R2: {:.4}", metrics.get("r2").unwrap_or(0.0)));
    }
    if let Some(history) = input.history {
        if let Some(last) = history.eval.last().or_else(|| history.train.last()) {
            lines.push(format!("Final {}: {last:.4} after {} iterations", history.metric, history.train.len()));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 480.0;
const MARGIN: f64 = 60.0;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

struct Svg {
    body: String,
}

impl Svg {
    fn new(title: &str) -> Self {
        let mut body = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif">"#
        );
        body.push_str(r##"<rect width="100%" height="100%" fill="#ffffff"/>"##);
        body.push_str(&format!(
            r#"<text x="{}" y="30" font-size="18" text-anchor="middle">{}</text>"#,
            WIDTH / 2.0,
            escape(title)
        ));
        Self { body }
    }

    fn text(&mut self, x: f64, y: f64, size: u32, anchor: &str, text: &str) {
        self.body.push_str(&format!(
            r#"<text x="{x:.1}" y="{y:.1}" font-size="{size}" text-anchor="{anchor}">{}</text>"#,
            escape(text)
        ));
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        self.body
            .push_str(&format!(r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}"/>"#));
    }

    fn line(&mut self, (x1, y1): (f64, f64), (x2, y2): (f64, f64), stroke: &str, dashed: bool) {
        let dash = if dashed { r#" stroke-dasharray="6 4""# } else { "" };
        self.body.push_str(&format!(
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{stroke}"{dash}/>"#
        ));
    }

    fn polyline(&mut self, points: &[(f64, f64)], stroke: &str) {
        let coords: Vec<String> = points.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
        self.body.push_str(&format!(
            r#"<polyline points="{}" fill="none" stroke="{stroke}" stroke-width="2"/>"#,
            coords.join(" ")
        ));
    }

    fn axes(&mut self, x_label: &str, y_label: &str) {
        self.line((MARGIN, HEIGHT - MARGIN), (WIDTH - MARGIN, HEIGHT - MARGIN), "#333333", false);
        self.line((MARGIN, MARGIN), (MARGIN, HEIGHT - MARGIN), "#333333", false);
        self.text(WIDTH / 2.0, HEIGHT - 15.0, 13, "middle", x_label);
        self.body.push_str(&format!(
            r#"<text x="18" y="{:.1}" font-size="13" text-anchor="middle" transform="rotate(-90 18 {:.1})">{}</text>"#,
            HEIGHT / 2.0,
            HEIGHT / 2.0,
            escape(y_label)
        ));
    }

    fn finish(mut self) -> String {
        self.body.push_str("</svg>\n");
        self.body
    }
}

/// Maps `[lo, hi]` onto a pixel range, tolerating a degenerate span.
fn scale(value: f64, lo: f64, hi: f64, from: f64, to: f64) -> f64 {
    let span = if hi > lo { hi - lo } else { 1.0 };
    from + (value - lo) / span * (to - from)
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

fn confusion_matrix_svg(matrix: &[Vec<u64>], backend: BackendKind) -> String {
    let mut svg = Svg::new(&format!("Confusion Matrix ({backend})"));
    let k = matrix.len().max(1);
    let cell = ((WIDTH.min(HEIGHT) - 2.0 * MARGIN) / k as f64).max(1.0);
    let max = matrix.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;

    for (actual, row) in matrix.iter().enumerate() {
        for (predicted, count) in row.iter().enumerate() {
            let x = MARGIN + predicted as f64 * cell;
            let y = MARGIN + actual as f64 * cell;
            let shade = 245 - (*count as f64 / max * 180.0) as u8;
            svg.rect(x, y, cell - 1.0, cell - 1.0, &format!("rgb({shade},{shade},255)"));
            svg.text(x + cell / 2.0, y + cell / 2.0 + 5.0, 14, "middle", &count.to_string());
        }
        svg.text(MARGIN - 8.0, MARGIN + (actual as f64 + 0.5) * cell + 5.0, 12, "end", &actual.to_string());
        svg.text(MARGIN + (actual as f64 + 0.5) * cell, MARGIN + k as f64 * cell + 18.0, 12, "middle", &actual.to_string());
    }
    svg.text(WIDTH / 2.0, HEIGHT - 15.0, 13, "middle", "Predicted");
    svg.text(20.0, HEIGHT / 2.0, 13, "start", "Actual");
    svg.finish()
}

fn scatter_svg(labels: &[f64], predicted: &[f64]) -> String {
    let mut svg = Svg::new("Actual vs Predicted");
    svg.axes("Actual Values", "Predicted Values");
    let (lo, hi) = bounds(labels.iter().chain(predicted).copied());
    let px = |v: f64| scale(v, lo, hi, MARGIN, WIDTH - MARGIN);
    let py = |v: f64| scale(v, lo, hi, HEIGHT - MARGIN, MARGIN);

    svg.line((px(lo), py(lo)), (px(hi), py(hi)), "#d62728", true);
    for (y, p) in labels.iter().zip(predicted) {
        svg.body.push_str(&format!(
            r##"<circle cx="{:.1}" cy="{:.1}" r="3" fill="#1f77b4" fill-opacity="0.5"/>"##,
            px(*y),
            py(*p)
        ));
    }
    svg.text(MARGIN, HEIGHT - MARGIN + 16.0, 11, "start", &format!("{lo:.2}"));
    svg.text(WIDTH - MARGIN, HEIGHT - MARGIN + 16.0, 11, "end", &format!("{hi:.2}"));
    svg.finish()
}

fn importance_svg(importance: &[FeatureScore], backend: BackendKind) -> String {
    let top = &importance[..importance.len().min(IMPORTANCE_LIMIT)];
    let mut svg = Svg::new(&format!("Feature Importance ({backend})"));
    let label_width = 160.0;
    let max = top.iter().map(|f| f.score).fold(0.0_f64, f64::max);
    let bar_height = (HEIGHT - 2.0 * MARGIN) / top.len() as f64;

    for (idx, feature) in top.iter().enumerate() {
        let y = MARGIN + idx as f64 * bar_height;
        let width = scale(feature.score, 0.0, max, 0.0, WIDTH - MARGIN - label_width - 20.0);
        svg.rect(label_width, y + 2.0, width.max(1.0), bar_height - 4.0, "#4c72b0");
        svg.text(label_width - 8.0, y + bar_height / 2.0 + 4.0, 12, "end", &feature.name);
        svg.text(label_width + width + 6.0, y + bar_height / 2.0 + 4.0, 11, "start", &format!("{:.4}", feature.score));
    }
    svg.finish()
}

fn loss_curve_svg(history: &LossHistory) -> String {
    let mut svg = Svg::new(&format!("Training Loss ({})", history.metric));
    svg.axes("Iteration", &history.metric);
    let rounds = history.train.len().max(history.eval.len());
    let (lo, hi) = bounds(history.train.iter().chain(&history.eval).copied());
    let last = rounds.saturating_sub(1) as f64;
    let to_points = |series: &[f64]| -> Vec<(f64, f64)> {
        series
            .iter()
            .enumerate()
            .map(|(i, v)| (scale(i as f64, 0.0, last, MARGIN, WIDTH - MARGIN), scale(*v, lo, hi, HEIGHT - MARGIN, MARGIN)))
            .collect()
    };

    svg.polyline(&to_points(&history.train), "#1f77b4");
    svg.text(WIDTH - MARGIN, MARGIN, 12, "end", "Train");
    if !history.eval.is_empty() {
        svg.polyline(&to_points(&history.eval), "#ff7f0e");
        svg.text(WIDTH - MARGIN, MARGIN + 16.0, 12, "end", "Test");
    }
    svg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::evaluate;

    #[test]
    fn test_classification_report_and_images() {
        let labels = [0.0, 1.0, 1.0, 0.0];
        let predicted = [0.0, 1.0, 0.0, 0.0];
        let metrics = evaluate(TaskKind::Binary, &labels, &predicted, Some(2)).unwrap();
        let importance = vec![FeatureScore { name: "volt<age>".to_string(), score: 0.7 }];
        let history = LossHistory { metric: "logloss".to_string(), train: vec![0.6, 0.4], eval: vec![0.65, 0.5] };
        let input = ReportInput {
            backend: BackendKind::BoostedTree,
            task: TaskKind::Binary,
            labels: &labels,
            predicted: &predicted,
            metrics: &metrics,
            importance: Some(&importance),
            history: Some(&history),
            source_model: None,
        };
        let rendered = SvgReportRenderer.render(&input).unwrap();

        assert!(rendered.document.starts_with("Model: boosted_tree\nTask: binary\n--------------------\n"));
        assert!(rendered.document.contains("Accuracy: 0.7500"));
        let names: Vec<&str> = rendered.images.keys().map(String::as_str).collect();
        assert_eq!(names, vec![CONFUSION_MATRIX, FEATURE_IMPORTANCE, TRAINING_LOSS_CURVE]);
        let chart = String::from_utf8(rendered.images[FEATURE_IMPORTANCE].clone()).unwrap();
        assert!(chart.contains("volt&lt;age&gt;"));
        assert!(chart.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_regression_without_importance() {
        let labels = [1.0, 2.0, 3.0];
        let predicted = [1.5, 2.0, 2.5];
        let metrics = evaluate(TaskKind::Regression, &labels, &predicted, None).unwrap();
        let input = ReportInput {
            backend: BackendKind::Linear,
            task: TaskKind::Regression,
            labels: &labels,
            predicted: &predicted,
            metrics: &metrics,
            importance: None,
            history: None,
            source_model: Some("run_a/model_run_a.json"),
        };
        let rendered = SvgReportRenderer.render(&input).unwrap();
        assert!(rendered.document.contains("RMSE: "));
        assert!(rendered.document.contains("Source: run_a/model_run_a.json"));
        assert_eq!(rendered.images.keys().map(String::as_str).collect::<Vec<_>>(), vec![REGRESSION_SCATTER]);
    }
}
