use async_trait::async_trait;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::CaptureError;
use crate::models::PerformanceRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Any rendered surface the report can embed as a picture.
#[async_trait]
pub trait Rasterizable: Send + Sync {
    async fn capture(&self) -> Result<RasterImage, CaptureError>;
}

const PALETTE: [RGBColor; 6] = [
    RGBColor(37, 99, 235),
    RGBColor(22, 163, 74),
    RGBColor(234, 88, 12),
    RGBColor(147, 51, 234),
    RGBColor(219, 39, 119),
    RGBColor(13, 148, 136),
];

/// Line chart of monthly subject averages on a 0..100 scale.
#[derive(Debug, Clone)]
pub struct TrendChart {
    rows: Vec<PerformanceRow>,
    subjects: Vec<String>,
    width: u32,
    height: u32,
}

impl TrendChart {
    pub fn new(rows: Vec<PerformanceRow>, subjects: Vec<String>) -> Self {
        Self {
            rows,
            subjects,
            width: 960,
            height: 420,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn has_data(&self) -> bool {
        self.rows.iter().any(|row| !row.values.is_empty())
    }

    /// Runs of consecutive months that have a value. A month without one
    /// breaks the line instead of dropping it to zero.
    fn segments(&self, subject: &str) -> Vec<Vec<(i32, i32)>> {
        let mut segments = Vec::new();
        let mut current = Vec::new();
        for (index, row) in self.rows.iter().enumerate() {
            match row.value(subject) {
                Some(value) => current.push((index as i32, value.clamp(0, 100) as i32)),
                None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
                None => {}
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;

        let last = self.rows.len().saturating_sub(1).max(1) as i32;
        let months: Vec<&str> = self.rows.iter().map(|row| row.month.as_str()).collect();

        let mut chart = ChartBuilder::on(root)
            .margin(20)
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0..last, 0..100)?;

        chart
            .configure_mesh()
            .x_labels(months.len().max(2))
            .x_label_formatter(&|index: &i32| {
                months
                    .get(*index as usize)
                    .map(|month| month.to_string())
                    .unwrap_or_default()
            })
            .y_labels(5)
            .y_desc("Score")
            .light_line_style(&RGBColor(228, 231, 237))
            .draw()?;

        for (series, subject) in self.subjects.iter().enumerate() {
            let color = PALETTE[series % PALETTE.len()];
            let segments = self.segments(subject);

            for (position, segment) in segments.iter().enumerate() {
                let line = chart.draw_series(LineSeries::new(
                    segment.iter().copied(),
                    color.stroke_width(2),
                ))?;
                if position == 0 {
                    line.label(subject.as_str()).legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                    });
                }
                chart.draw_series(
                    segment
                        .iter()
                        .map(|point| Circle::new(*point, 3, color.filled())),
                )?;
            }
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerRight)
            .background_style(&WHITE.mix(0.85))
            .border_style(&BLACK)
            .draw()?;

        root.present()
    }

    fn render_rgb(&self) -> Result<Vec<u8>, CaptureError> {
        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            self.draw(&root)
                .map_err(|err| CaptureError::Render(err.to_string()))?;
        }
        Ok(buffer)
    }
}

#[async_trait]
impl Rasterizable for TrendChart {
    async fn capture(&self) -> Result<RasterImage, CaptureError> {
        if self.width == 0 || self.height == 0 || !self.has_data() {
            return Ok(RasterImage {
                width: 0,
                height: 0,
                png: Vec::new(),
            });
        }

        let rgb = self.render_rgb()?;
        let png = encode_png(&rgb, self.width, self.height)
            .map_err(|err| CaptureError::Render(err.to_string()))?;
        Ok(RasterImage {
            width: self.width,
            height: self.height,
            png,
        })
    }
}

fn encode_png(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, png::EncodingError> {
    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.write_header()?.write_image_data(rgb)?;
    }
    Ok(buffer)
}
