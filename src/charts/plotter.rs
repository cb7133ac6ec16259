//! Chart Plotter Module
//! Draws bar and line charts as SVG documents with plotters.

use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;

/// Series colors, cycled in series order.
pub const PALETTE: [RGBColor; 10] = [
    RGBColor(52, 152, 219),  // Blue
    RGBColor(231, 76, 60),   // Red
    RGBColor(46, 204, 113),  // Green
    RGBColor(155, 89, 182),  // Purple
    RGBColor(243, 156, 18),  // Orange
    RGBColor(26, 188, 156),  // Teal
    RGBColor(233, 30, 99),   // Pink
    RGBColor(0, 188, 212),   // Cyan
    RGBColor(255, 87, 34),   // Deep Orange
    RGBColor(96, 125, 139),  // Blue Grey
];

const GRID: RGBColor = RGBColor(220, 220, 220);
/// Keep at most this many x labels so date axes stay readable.
const MAX_X_LABELS: usize = 12;

/// One line of a line chart; `values[i]` belongs to the i-th x label.
pub struct LineData<'a> {
    pub name: &'a str,
    pub values: Vec<f64>,
}

/// Stateless SVG chart drawing. Every call builds its own drawing area.
pub struct ChartPlotter;

impl ChartPlotter {
    /// Vertical bars, one per category. Non-finite values leave an empty slot.
    pub fn bar_svg(
        title: &str,
        y_desc: &str,
        categories: &[String],
        values: &[f64],
        size: (u32, u32),
        fmt_y: &dyn Fn(f64) -> String,
    ) -> Result<String, String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
            root.fill(&WHITE).map_err(|e| e.to_string())?;

            let n = categories.len() as u32;
            let (y0, y1) = Self::y_bounds(values.iter().copied());
            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 20))
                .margin(12)
                .x_label_area_size(40)
                .y_label_area_size(70)
                .build_cartesian_2d((0u32..n).into_segmented(), y0..y1)
                .map_err(|e| e.to_string())?;

            let step = Self::label_step(categories.len());
            let x_label = |v: &SegmentValue<u32>| match v {
                SegmentValue::CenterOf(i) if (*i as usize) % step == 0 => {
                    categories.get(*i as usize).cloned().unwrap_or_default()
                }
                _ => String::new(),
            };
            chart
                .configure_mesh()
                .disable_x_mesh()
                .light_line_style(GRID)
                .bold_line_style(GRID)
                .x_labels(categories.len().max(1))
                .y_labels(6)
                .x_label_formatter(&x_label)
                .y_label_formatter(&|v| fmt_y(*v))
                .y_desc(y_desc)
                .draw()
                .map_err(|e| e.to_string())?;

            let color = PALETTE[0];
            chart
                .draw_series(values.iter().enumerate().filter(|(_, v)| v.is_finite()).map(
                    |(i, &v)| {
                        let i = i as u32;
                        let mut bar = Rectangle::new(
                            [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), v)],
                            color.filled(),
                        );
                        bar.set_margin(0, 0, 6, 6);
                        bar
                    },
                ))
                .map_err(|e| e.to_string())?;

            root.present().map_err(|e| e.to_string())?;
        }
        Ok(svg)
    }

    /// One polyline per series over shared x labels, with a legend.
    pub fn line_svg(
        title: &str,
        y_desc: &str,
        x_labels: &[String],
        lines: &[LineData<'_>],
        size: (u32, u32),
        fmt_y: &dyn Fn(f64) -> String,
    ) -> Result<String, String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
            root.fill(&WHITE).map_err(|e| e.to_string())?;

            let n = x_labels.len() as u32;
            let (y0, y1) = Self::y_bounds(lines.iter().flat_map(|l| l.values.iter().copied()));
            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 20))
                .margin(12)
                .x_label_area_size(40)
                .y_label_area_size(70)
                .build_cartesian_2d((0u32..n).into_segmented(), y0..y1)
                .map_err(|e| e.to_string())?;

            let step = Self::label_step(x_labels.len());
            let x_label = |v: &SegmentValue<u32>| match v {
                SegmentValue::CenterOf(i) if (*i as usize) % step == 0 => {
                    x_labels.get(*i as usize).cloned().unwrap_or_default()
                }
                _ => String::new(),
            };
            chart
                .configure_mesh()
                .light_line_style(GRID)
                .bold_line_style(GRID)
                .x_labels(x_labels.len().max(1))
                .y_labels(6)
                .x_label_formatter(&x_label)
                .y_label_formatter(&|v| fmt_y(*v))
                .y_desc(y_desc)
                .draw()
                .map_err(|e| e.to_string())?;

            for (idx, line) in lines.iter().enumerate() {
                let color = PALETTE[idx % PALETTE.len()];
                let points: Vec<(SegmentValue<u32>, f64)> = line
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(i, &v)| (SegmentValue::CenterOf(i as u32), v))
                    .collect();

                chart
                    .draw_series(LineSeries::new(points.iter().cloned(), color.stroke_width(2)))
                    .map_err(|e| e.to_string())?
                    .label(line.name)
                    .legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(2))
                    });
                chart
                    .draw_series(
                        points
                            .iter()
                            .map(|(x, y)| Circle::new((x.clone(), *y), 3, color.filled())),
                    )
                    .map_err(|e| e.to_string())?;
            }

            if lines.len() > 1 {
                chart
                    .configure_series_labels()
                    .position(SeriesLabelPosition::UpperLeft)
                    .background_style(WHITE.mix(0.85))
                    .border_style(BLACK)
                    .draw()
                    .map_err(|e| e.to_string())?;
            }

            root.present().map_err(|e| e.to_string())?;
        }
        Ok(svg)
    }

    /// Value range padded by 10%, always including zero.
    fn y_bounds<I: Iterator<Item = f64>>(values: I) -> (f64, f64) {
        let (lo, hi) = values
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if hi - lo <= f64::EPSILON {
            return (lo, lo + 1.0);
        }
        let pad = (hi - lo) * 0.1;
        let lo = if lo < 0.0 { lo - pad } else { lo };
        (lo, hi + pad)
    }

    fn label_step(count: usize) -> usize {
        count.div_ceil(MAX_X_LABELS).max(1)
    }
}
