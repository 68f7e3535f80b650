use crate::domain::dates::{date_string_with_offset, format_date, parse_date};
use chrono::NaiveDate;
use regex::Regex;

const DATE_MACRO_PATTERN: &str = r"%date\(([-+]?\d*)\)%";

/// Replaces every `%date(n)%` macro with `reference + n` days. An empty or
/// unparseable offset counts as zero.
pub fn expand(template: &str, reference: NaiveDate) -> String {
    let regex = match Regex::new(DATE_MACRO_PATTERN) {
        Ok(regex) => regex,
        Err(error) => {
            log::error!("date macro pattern failed to compile: {error}");
            return template.to_string();
        }
    };

    let macros: Vec<(std::ops::Range<usize>, i64)> = regex
        .captures_iter(template)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let offset = captures
                .get(1)
                .map(|raw| parse_offset(raw.as_str()))
                .unwrap_or(0);
            Some((whole.range(), offset))
        })
        .collect();

    // Back to front so earlier ranges stay valid.
    let mut expanded = template.to_string();
    for (range, offset) in macros.into_iter().rev() {
        let replacement =
            date_string_with_offset(reference, offset).unwrap_or_else(|| format_date(reference));
        expanded.replace_range(range, &replacement);
    }
    expanded
}

/// Expands against a `yyyy-MM-dd` string, using `fallback` when it does not parse.
pub fn expand_for_date_string(template: &str, date_string: &str, fallback: NaiveDate) -> String {
    let reference = parse_date(date_string).unwrap_or_else(|error| {
        log::warn!("template reference date {error}; expanding against {fallback}");
        fallback
    });
    expand(template, reference)
}

fn parse_offset(raw: &str) -> i64 {
    if raw.is_empty() {
        return 0;
    }
    raw.parse::<i64>().unwrap_or(0)
}
