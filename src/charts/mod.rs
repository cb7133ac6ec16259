//! Charts module - Table formatting and SVG chart rendering

pub mod format;
mod plotter;
mod renderer;

pub use format::{NumberFormatter, Tone};
pub use plotter::{ChartPlotter, PALETTE};
pub use renderer::{
    ChartKind, ChartSeries, ChartSpec, RenderError, RenderedChart, RenderedSection, RenderedTable,
    RowKind, SectionBody, SectionInput, SectionRenderer, TableCell, TableRow,
};
