//! Stats module - Aggregation, period rollups and comparisons

mod aggregator;
pub mod comparison;
pub mod rollup;

pub use aggregator::{
    AggregateError, AggregateRow, AggregateTable, AggregationKey, AggregationSpec, Aggregator,
    MetricFormula, MetricSpec, Rollup,
};
pub use comparison::{compare_latest, ComparisonRow};
pub use rollup::{period_rows, PeriodKind, PeriodRow};
