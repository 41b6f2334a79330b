//! Narrative pattern grammar and interpreter (spec §4.3, §9 "Narrative templates").
//!
//! A pattern is a per-model template rendered against one record to produce
//! the text that gets embedded. The grammar is intentionally tiny: literal
//! runs and `{field}` / `{field:formatter}` placeholders. Formatters are a
//! closed enum; an unrecognized formatter name falls back to `default` and
//! the caller is expected to warn once per (model, field) — this module only
//! reports that fallback, it does not rate-limit the warning itself.

use std::fmt;

use serde_json::Value as JsonValue;

/// One of the closed set of value formatters a placeholder may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatter {
    /// `1234.5` -> `$1,234.50`.
    Currency,
    /// An ISO date/datetime -> `January 5, 2024`.
    ReadableDate,
    /// Pass-through, trimmed.
    Name,
    /// `0.5` -> `50%`.
    Percentage,
    /// A list/number -> `3 items`.
    CountWithSummary,
    /// Truncate to 50 chars with an ellipsis.
    Truncate50,
    /// Truncate to 100 chars with an ellipsis.
    Truncate100,
    /// `true`/`false` -> `Yes`/`No`.
    BooleanYesNo,
    /// `to_string` of the underlying JSON scalar.
    Default,
}

impl Formatter {
    /// Parses a formatter name, falling back to [`Formatter::Default`] and
    /// reporting the fallback via the returned bool (spec §9).
    #[must_use]
    pub fn parse(name: &str) -> (Self, bool) {
        match name {
            "currency" => (Formatter::Currency, false),
            "readable_date" => (Formatter::ReadableDate, false),
            "name" => (Formatter::Name, false),
            "percentage" => (Formatter::Percentage, false),
            "count_with_summary" => (Formatter::CountWithSummary, false),
            "truncate_50" => (Formatter::Truncate50, false),
            "truncate_100" => (Formatter::Truncate100, false),
            "boolean_yes_no" => (Formatter::BooleanYesNo, false),
            "default" => (Formatter::Default, false),
            _ => (Formatter::Default, true),
        }
    }

    /// Formats `value` per this formatter's rule. Never fails: an
    /// unsuitable value shape degrades to its `to_string`/`Display` form.
    #[must_use]
    pub fn apply(self, value: &JsonValue) -> String {
        match self {
            Formatter::Currency => match value.as_f64() {
                Some(n) => format!("${:.2}", n).chars().rev().collect::<String>().as_str().pipe_commas(),
                None => scalar_to_string(value),
            },
            Formatter::ReadableDate => value
                .as_str()
                .and_then(|s| {
                    chrono::DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.format("%B %-d, %Y").to_string())
                        .or_else(|_| {
                            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                                .map(|d| d.format("%B %-d, %Y").to_string())
                        })
                        .ok()
                })
                .unwrap_or_else(|| scalar_to_string(value)),
            Formatter::Name => scalar_to_string(value).trim().to_string(),
            Formatter::Percentage => match value.as_f64() {
                Some(n) => format!("{:.0}%", n * 100.0),
                None => scalar_to_string(value),
            },
            Formatter::CountWithSummary => match value {
                JsonValue::Array(items) => format!("{} item{}", items.len(), if items.len() == 1 { "" } else { "s" }),
                JsonValue::Number(n) => format!("{n} item{}", if n.as_i64() == Some(1) { "" } else { "s" }),
                _ => scalar_to_string(value),
            },
            Formatter::Truncate50 => truncate(&scalar_to_string(value), 50),
            Formatter::Truncate100 => truncate(&scalar_to_string(value), 100),
            Formatter::BooleanYesNo => match value.as_bool() {
                Some(true) => "Yes".to_string(),
                Some(false) => "No".to_string(),
                None => scalar_to_string(value),
            },
            Formatter::Default => scalar_to_string(value),
        }
    }
}

trait PipeCommas {
    fn pipe_commas(&self) -> String;
}

impl PipeCommas for str {
    fn pipe_commas(&self) -> String {
        // operates on the reversed "00.4321$" form produced by Currency above
        let mut out = String::new();
        let mut digit_run = 0usize;
        let mut past_decimal = false;
        for ch in self.chars() {
            if ch == '.' {
                past_decimal = true;
                out.push(ch);
                continue;
            }
            if past_decimal && ch.is_ascii_digit() {
                if digit_run != 0 && digit_run % 3 == 0 {
                    out.push(',');
                }
                digit_run += 1;
            }
            out.push(ch);
        }
        out.chars().rev().collect()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// One resolved segment of a parsed pattern.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { name: String, formatter: String },
}

/// A parsed, ready-to-render narrative pattern (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

/// A formatter name in a placeholder did not match the closed enum; the
/// render fell back to `default` for that field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormatterWarning {
    /// The field whose placeholder requested an unknown formatter.
    pub field: String,
    /// The unrecognized formatter name as written in the template.
    pub formatter: String,
}

impl fmt::Display for UnknownFormatterWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown formatter {:?} for field {}, using default", self.formatter, self.field)
    }
}

impl Pattern {
    /// Parses a template string. Malformed placeholders (unmatched `{`)
    /// are treated as literal text rather than rejected, since this is a
    /// best-effort rendering step with no I/O and no fallible path (spec
    /// §4.3 "Failure semantics: pure function... no I/O").
    #[must_use]
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut inner = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c2);
                }
                if closed {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let (name, formatter) = match inner.split_once(':') {
                        Some((n, f)) => (n.to_string(), f.to_string()),
                        None => (inner.clone(), "default".to_string()),
                    };
                    segments.push(Segment::Field { name, formatter });
                } else {
                    literal.push('{');
                    literal.push_str(&inner);
                }
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Pattern { segments }
    }

    /// Names referenced by `{field}`/`{field:formatter}` placeholders, in
    /// template order. Used by the transformer to build the "dynamic
    /// appendix" of fields the template did not already mention.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::Field { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Renders the template against `lookup`, a callback resolving a field
    /// name to its current JSON value (or `None` if absent/null, in which
    /// case the placeholder renders as empty text). Returns the rendered
    /// text plus any unknown-formatter warnings encountered, in order.
    pub fn render<'a, F>(&self, mut lookup: F) -> (String, Vec<UnknownFormatterWarning>)
    where
        F: FnMut(&str) -> Option<&'a JsonValue>,
    {
        let mut out = String::new();
        let mut warnings = Vec::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Field { name, formatter } => {
                    let (parsed, was_unknown) = Formatter::parse(formatter);
                    if was_unknown {
                        warnings.push(UnknownFormatterWarning {
                            field: name.clone(),
                            formatter: formatter.clone(),
                        });
                    }
                    if let Some(value) = lookup(name) {
                        out.push_str(&parsed.apply(value));
                    }
                }
            }
        }
        (out, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_literal_and_placeholder_segments() {
        let pattern = Pattern::parse("Lead: {name} worth {expected_revenue:currency}");
        assert_eq!(pattern.referenced_fields(), vec!["name", "expected_revenue"]);
    }

    #[test]
    fn renders_currency_with_thousands_separators() {
        let value = json!(1_234_567.5);
        assert_eq!(Formatter::Currency.apply(&value), "$1,234,567.50");
    }

    #[test]
    fn renders_boolean_yes_no() {
        assert_eq!(Formatter::BooleanYesNo.apply(&json!(true)), "Yes");
        assert_eq!(Formatter::BooleanYesNo.apply(&json!(false)), "No");
    }

    #[test]
    fn renders_percentage() {
        assert_eq!(Formatter::Percentage.apply(&json!(0.5)), "50%");
    }

    #[test]
    fn truncates_long_strings() {
        let long = "a".repeat(60);
        let truncated = Formatter::Truncate50.apply(&json!(long));
        assert_eq!(truncated.chars().count(), 53);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn unknown_formatter_falls_back_to_default_and_warns() {
        let pattern = Pattern::parse("{amount:made_up_formatter}");
        let value = json!(42);
        let (rendered, warnings) = pattern.render(|name| if name == "amount" { Some(&value) } else { None });
        assert_eq!(rendered, "42");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "amount");
    }

    #[test]
    fn missing_field_renders_as_empty() {
        let pattern = Pattern::parse("Name: {name}");
        let (rendered, warnings) = pattern.render(|_| None);
        assert_eq!(rendered, "Name: ");
        assert!(warnings.is_empty());
    }

    #[test]
    fn full_pattern_render_matches_expected_narrative() {
        let pattern = Pattern::parse("{name} ({stage_id:name}) expects {expected_revenue:currency} by {create_date:readable_date}");
        let name = json!("Acme deal");
        let stage = json!("Qualified");
        let revenue = json!(50_000.0);
        let date = json!("2024-03-15T00:00:00Z");
        let (rendered, warnings) = pattern.render(|field| match field {
            "name" => Some(&name),
            "stage_id" => Some(&stage),
            "expected_revenue" => Some(&revenue),
            "create_date" => Some(&date),
            _ => None,
        });
        assert_eq!(rendered, "Acme deal (Qualified) expects $50,000.00 by March 15, 2024");
        assert!(warnings.is_empty());
    }
}
