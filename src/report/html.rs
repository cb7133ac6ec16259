//! HTML Report Writer
//! Renders a report artifact as one HTML document.

use super::ReportArtifact;
use crate::charts::{RenderedTable, RowKind, SectionBody, Tone};

/// How chart sections reference their SVG.
pub(crate) enum ChartEmbed<'a> {
    /// SVG markup inside the page.
    Inline,
    /// Relative file per section index; `None` for table sections.
    Linked(&'a [Option<String>]),
}

const STYLE: &str = r#"body { font-family: sans-serif; margin: 24px; color: #222; }
h1 { font-size: 22px; }
h2 { font-size: 17px; margin-top: 28px; }
p.subtitle { color: #555; font-size: 13px; margin-top: -8px; }
ul.narrative { color: #555; font-size: 13px; }
table { border-collapse: collapse; font-size: 13px; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: right; }
th { background: #f0f0f0; }
td:first-child, th:first-child { text-align: left; }
tr.week_total td { background: #f7f7f7; }
tr.month_total td { background: #ececec; font-weight: bold; }
tr.grand_total td { background: #dde6f0; font-weight: bold; }
td.increase { color: #1a7f37; }
td.decrease { color: #c62828; }
"#;

pub(crate) fn render_document(artifact: &ReportArtifact, charts: ChartEmbed<'_>) -> String {
    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
{style}</style>
</head>
<body>
<h1>{title}</h1>
"#,
        title = escape(&artifact.title),
        style = STYLE
    );

    html.push_str("<ul class=\"narrative\">\n");
    for line in &artifact.narrative {
        html.push_str(&format!("<li>{}</li>\n", escape(line)));
    }
    html.push_str("</ul>\n");

    for (idx, section) in artifact.sections.iter().enumerate() {
        html.push_str(&format!(
            "<section>\n<h2>{}</h2>\n",
            escape(&section.title)
        ));
        if let Some(subtitle) = &section.subtitle {
            html.push_str(&format!("<p class=\"subtitle\">{}</p>\n", escape(subtitle)));
        }
        match &section.body {
            SectionBody::Table(table) => html.push_str(&table_html(table)),
            SectionBody::Chart(chart) => match &charts {
                ChartEmbed::Inline => {
                    html.push_str("<figure>\n");
                    html.push_str(&chart.svg);
                    html.push_str("\n</figure>\n");
                }
                ChartEmbed::Linked(files) => {
                    if let Some(Some(file)) = files.get(idx) {
                        html.push_str(&format!(
                            "<figure><img src=\"{}\" alt=\"{}\"></figure>\n",
                            escape(file),
                            escape(&chart.title)
                        ));
                    }
                }
            },
        }
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn table_html(table: &RenderedTable) -> String {
    let mut html = String::from("<table>\n<thead><tr>");
    for column in &table.columns {
        html.push_str(&format!("<th>{}</th>", escape(column)));
    }
    html.push_str("</tr></thead>\n<tbody>\n");

    for row in &table.rows {
        let class = match row.kind {
            RowKind::Data => "",
            RowKind::WeekTotal => " class=\"week_total\"",
            RowKind::MonthTotal => " class=\"month_total\"",
            RowKind::GrandTotal => " class=\"grand_total\"",
        };
        html.push_str(&format!("<tr{}>", class));
        for cell in &row.cells {
            let class = match cell.tone {
                Tone::Plain => "",
                Tone::Increase => " class=\"increase\"",
                Tone::Decrease => " class=\"decrease\"",
            };
            html.push_str(&format!("<td{}>{}</td>", class, escape(&cell.text)));
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>\n");
    html
}

/// Escape the five HTML special characters.
fn escape(s: &str) -> String {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return s.to_string();
    }
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#39;");
    }
}
