//! Section planning: resolves each configured section to its aggregate and
//! expands `split_by` into one section per dimension value.

use crate::charts::{RenderError, SectionInput};
use crate::config::SectionSpec;
use crate::stats::{AggregateRow, AggregateTable};
use std::collections::{BTreeMap, BTreeSet};

pub fn plan_sections<'a>(
    sections: &'a [SectionSpec],
    tables: &'a BTreeMap<String, AggregateTable>,
) -> Result<Vec<SectionInput<'a>>, RenderError> {
    let mut planned = Vec::new();

    for (index, section) in sections.iter().enumerate() {
        let table = tables.get(&section.source).ok_or_else(|| RenderError::Unknown {
            section: section.title.clone(),
            what: "source",
            name: section.source.clone(),
        })?;
        let order = section.order.unwrap_or(index as i32);
        let members = section
            .members
            .as_ref()
            .map(|name| dimension(section, table, name))
            .transpose()?;
        let input = move |title: String, rows: Vec<AggregateRow>| SectionInput {
            order,
            title,
            subtitle: members.and_then(|idx| members_line(&rows, idx)),
            layout: &section.layout,
            table,
            rows,
        };

        let Some(split) = &section.split_by else {
            planned.push(input(section.title.clone(), table.rows.clone()));
            continue;
        };

        let split_idx = dimension(section, table, split)?;
        let values = table.distinct_values(split_idx);
        if values.is_empty() {
            // Rendered as an empty section so it is reported as omitted.
            planned.push(input(section.title.clone(), Vec::new()));
            continue;
        }

        for value in values {
            let rows = table
                .rows
                .iter()
                .filter(|r| r.key.get(split_idx) == value)
                .cloned()
                .collect();
            planned.push(input(format!("{}: {}", section.title, value), rows));
        }
    }

    Ok(planned)
}

fn dimension(section: &SectionSpec, table: &AggregateTable, name: &str) -> Result<usize, RenderError> {
    table.dimension_index(name).ok_or_else(|| RenderError::Unknown {
        section: section.title.clone(),
        what: "dimension",
        name: name.to_string(),
    })
}

/// "Members: a, b" over the non-empty values of one dimension, ascending.
fn members_line(rows: &[AggregateRow], index: usize) -> Option<String> {
    let values: BTreeSet<&str> = rows
        .iter()
        .map(|r| r.key.get(index))
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(format!(
        "Members: {}",
        values.into_iter().collect::<Vec<_>>().join(", ")
    ))
}
