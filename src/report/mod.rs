//! Export of the per-student performance report.
//!
//! The export runs as a fixed sequence of stages. Only the chart stage is
//! allowed to fail softly: it records a warning, puts a placeholder where
//! the picture would go and lets the export finish. Every other failure
//! aborts before anything reaches the sink.

mod chart;
mod document;
mod sink;

use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub use chart::{RasterImage, Rasterizable, TrendChart};
pub use document::{Block, ReportDocument};
pub use sink::{ExportSink, FileSink};

use crate::error::{remediation_hint, CaptureError, ReportError, ReportWarning};
use crate::models::ComparisonRow;

pub const CHART_PLACEHOLDER: &str = "Chart could not be included in this report.";
const ATTRIBUTION: &str = "Generated by GroupScholar Performance Insights";
const DEFAULT_LINES_PER_PAGE: usize = 48;

/// Inputs for one export. `selected_subject` of `None` means all subjects.
pub struct ReportContext<'a> {
    pub title: String,
    pub display_name: String,
    pub selected_subject: Option<String>,
    pub comparison: Vec<ComparisonRow>,
    pub peer_groups: Vec<String>,
    pub chart: Option<&'a dyn Rasterizable>,
    pub generated_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub success: bool,
    pub warnings: Vec<ReportWarning>,
    pub location: Option<String>,
    pub error: Option<ReportError>,
}

pub struct ReportPipeline<K> {
    sink: K,
    settle: Duration,
    lines_per_page: usize,
    running: Mutex<()>,
}

impl<K: ExportSink> ReportPipeline<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            settle: Duration::from_millis(300),
            lines_per_page: DEFAULT_LINES_PER_PAGE,
            running: Mutex::new(()),
        }
    }

    /// How long to let chart animations finish before capturing.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_lines_per_page(mut self, lines: usize) -> Self {
        self.lines_per_page = lines;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Concurrent calls on the same pipeline run one after another.
    pub async fn export_report(&self, context: &ReportContext<'_>) -> ExportOutcome {
        let _running = self.running.lock().await;
        let mut warnings = Vec::new();

        match self.run(context, &mut warnings).await {
            Ok(location) => {
                info!(%location, warnings = warnings.len(), "report exported");
                ExportOutcome {
                    success: true,
                    warnings,
                    location: Some(location),
                    error: None,
                }
            }
            Err(err) => {
                error!(%err, "report export failed");
                ExportOutcome {
                    success: false,
                    warnings,
                    location: None,
                    error: Some(err),
                }
            }
        }
    }

    async fn run(
        &self,
        context: &ReportContext<'_>,
        warnings: &mut Vec<ReportWarning>,
    ) -> Result<String, ReportError> {
        let mut document = self.init_document(context)?;
        write_header(&mut document, context);
        document.push(score_table(context)?);

        document.push(Block::Heading("Performance Trend".to_string()));
        match self.capture_chart(context.chart).await {
            Ok(image) => document.push(Block::Image {
                alt: "Performance trend".to_string(),
                width: image.width,
                height: image.height,
                png: image.png,
            }),
            Err(err) => {
                warn!(%err, "chart left out of report");
                warnings.push(ReportWarning::ChartCaptureFailed(err));
                document.push(Block::Placeholder(CHART_PLACEHOLDER.to_string()));
            }
        }

        document.set_footer(ATTRIBUTION);
        let filename = report_filename(&context.display_name, context.generated_on);
        let bytes = document.render_markdown().into_bytes();

        self.sink.save(&bytes, &filename).await.map_err(|err| {
            let message = format!("{err:#}");
            let hint = remediation_hint(&message).to_string();
            ReportError::ExportPersistenceFailed { message, hint }
        })
    }

    fn init_document(&self, context: &ReportContext<'_>) -> Result<ReportDocument, ReportError> {
        if !self.sink.is_available() {
            return Err(ReportError::ExportUnavailable);
        }
        Ok(ReportDocument::new(context.title.clone(), self.lines_per_page))
    }

    async fn capture_chart(
        &self,
        chart: Option<&dyn Rasterizable>,
    ) -> Result<RasterImage, CaptureError> {
        let chart = chart.ok_or(CaptureError::SurfaceMissing)?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let image = chart.capture().await?;
        if image.width == 0 || image.height == 0 {
            return Err(CaptureError::EmptyImage {
                width: image.width,
                height: image.height,
            });
        }
        if image.png.is_empty() {
            return Err(CaptureError::EmptyPayload);
        }
        Ok(image)
    }
}

fn write_header(document: &mut ReportDocument, context: &ReportContext<'_>) {
    let subject = context
        .selected_subject
        .as_deref()
        .unwrap_or("All subjects");
    document.push(Block::Text(format!(
        "Student: {}\nSubject: {}\nGenerated on {}",
        context.display_name,
        subject,
        context.generated_on.format("%Y-%m-%d")
    )));
    document.push(Block::Heading("Score Comparison".to_string()));
}

fn score_cell(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.0}"))
}

/// Subject, student score and one column per peer group. A selected subject
/// the student has no records for still gets a row of "N/A" cells.
fn score_table(context: &ReportContext<'_>) -> Result<Block, ReportError> {
    let selected = context
        .selected_subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut rows: Vec<ComparisonRow> = context
        .comparison
        .iter()
        .filter(|row| selected.map_or(true, |subject| row.subject.eq_ignore_ascii_case(subject)))
        .cloned()
        .collect();

    if rows.is_empty() {
        match selected {
            Some(subject) => rows.push(ComparisonRow {
                subject: subject.to_string(),
                student_score: None,
                peer_averages: Default::default(),
            }),
            None => {
                return Err(ReportError::TableRender(
                    "no subject scores to tabulate".to_string(),
                ))
            }
        }
    }

    let mut headers = vec!["Subject".to_string(), "Student score".to_string()];
    headers.extend(context.peer_groups.iter().map(|group| format!("{group} average")));

    let rows = rows
        .into_iter()
        .map(|row| {
            let mut cells = vec![
                row.subject.clone(),
                score_cell(row.student_score.map(|v| v as f64)),
            ];
            for group in &context.peer_groups {
                cells.push(score_cell(row.peer_averages.get(group).copied().flatten()));
            }
            cells
        })
        .collect();

    Ok(Block::Table { headers, rows })
}

pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "student".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn report_filename(display_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_performance_report_{}.md",
        sanitize_filename(display_name),
        date.format("%Y-%m-%d")
    )
}
