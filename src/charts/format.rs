//! Number Formatting Module
//! Table cell text for metric values and day-over-day change rates.

use crate::config::{FormatSpec, NumberStyle};
use serde::Serialize;

/// Highlight of a table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Plain,
    Increase,
    Decrease,
}

/// Formats metric values according to the configured style.
#[derive(Debug, Clone)]
pub struct NumberFormatter {
    spec: FormatSpec,
}

impl NumberFormatter {
    pub fn new(spec: &FormatSpec) -> Self {
        Self { spec: spec.clone() }
    }

    /// `decimals` overrides the global setting for fixed style.
    pub fn format(&self, value: f64, decimals: Option<usize>) -> String {
        if !value.is_finite() {
            return self.spec.nan_text.clone();
        }
        let places = match self.spec.style {
            NumberStyle::Fixed => decimals.unwrap_or(self.spec.decimals),
            NumberStyle::Adaptive => {
                if value == 0.0 {
                    return "0".to_string();
                }
                if value.fract() == 0.0 || value.abs() >= 10.0 {
                    0
                } else {
                    1
                }
            }
        };
        self.group(value, places)
    }

    fn group(&self, value: f64, places: usize) -> String {
        let text = format!("{:.*}", places, value.abs());
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (text.as_str(), None),
        };

        let digits: Vec<char> = int_part.chars().collect();
        let mut grouped = String::with_capacity(text.len() + digits.len() / 3);
        for (i, c) in digits.iter().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push_str(&self.spec.thousands_separator);
            }
            grouped.push(*c);
        }
        if let Some(frac) = frac_part {
            grouped.push_str(&self.spec.decimal_separator);
            grouped.push_str(frac);
        }

        // No "-0.00" for values that round to zero.
        let negative = value < 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0');
        if negative {
            format!("-{}", grouped)
        } else {
            grouped
        }
    }
}

/// Change from `previous` to `current` as signed percent text plus its tone.
pub fn change_rate(current: f64, previous: Option<f64>) -> (String, Tone) {
    let Some(previous) = previous else {
        return ("-".to_string(), Tone::Plain);
    };
    if previous == 0.0 || !previous.is_finite() {
        return if current > 0.0 {
            ("+100%".to_string(), Tone::Increase)
        } else {
            ("0%".to_string(), Tone::Plain)
        };
    }
    if !current.is_finite() {
        return ("-".to_string(), Tone::Plain);
    }

    let rate = (current - previous) / previous.abs() * 100.0;
    let rounded = (rate * 10.0).round() / 10.0;
    if rate == 0.0 {
        ("0%".to_string(), Tone::Plain)
    } else if rate > 0.0 {
        let tone = if rounded == 0.0 { Tone::Plain } else { Tone::Increase };
        (format!("+{:.1}%", rate), tone)
    } else {
        let tone = if rounded == 0.0 { Tone::Plain } else { Tone::Decrease };
        (format!("-{:.1}%", rate.abs()), tone)
    }
}
