//! Placeholder substitution.
//!
//! Tokens have the form `{{ key }}` (whitespace around the key is optional). Text is
//! scanned once, left to right; each token whose key is present in the data record is
//! replaced by the value's text, every other token is left exactly as written.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::ops::Range;

use serde_json::{Map, Value};

use super::common::display_value;
use super::workbook::{CellValue, Workbook};

/// Key/value data applied to a template.
pub type DataRecord = Map<String, Value>;

/// A placeholder occurrence inside a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// Byte range of the whole token including the braces.
    pub span: Range<usize>,
    pub key: &'a str,
}

/// Iterator over the tokens of a text, see [`tokens`].
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    text: &'a str,
    pos: usize,
}

/// Scan `text` for `{{key}}` tokens.
///
/// A key runs up to the first `}}` and may not contain `{` or `}`; when it does the scan
/// resumes one character after the opening brace, so `{{{name}}` yields the token
/// `{{name}}` preceded by a literal `{`.
pub fn tokens(text: &str) -> Tokens<'_> {
    Tokens { text, pos: 0 }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.pos + self.text.get(self.pos..)?.find("{{")?;
            let body_start = start + 2;
            let rest = &self.text[body_start..];
            let brace = rest.find(['{', '}'])?;

            if rest[brace..].starts_with("}}") {
                let key = rest[..brace].trim();
                if !key.is_empty() {
                    let end = body_start + brace + 2;
                    self.pos = end;
                    return Some(Token {
                        span: start..end,
                        key,
                    });
                }
            }
            self.pos = start + 1;
        }
    }
}

/// Result of filling a single piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledText<'a> {
    pub text: Cow<'a, str>,
    pub replaced: usize,
    pub unresolved: Vec<&'a str>,
}

/// Replace every token in `text` whose key exists in `data`.
pub fn fill_text<'a>(text: &'a str, data: &DataRecord) -> FilledText<'a> {
    let mut out = String::new();
    let mut last = 0;
    let mut replaced = 0;
    let mut unresolved = Vec::new();

    for token in tokens(text) {
        match data.get(token.key) {
            Some(value) => {
                out.push_str(&text[last..token.span.start]);
                out.push_str(&display_value(value));
                last = token.span.end;
                replaced += 1;
            }
            None => unresolved.push(token.key),
        }
    }

    let text = if replaced == 0 {
        Cow::Borrowed(text)
    } else {
        out.push_str(&text[last..]);
        Cow::Owned(out)
    };

    FilledText {
        text,
        replaced,
        unresolved,
    }
}

/// Statistics of one substitution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionReport {
    pub cells_examined: usize,
    pub cells_changed: usize,
    pub tokens_replaced: usize,
    /// Keys of tokens left in place because the data record has no such key.
    pub unresolved: BTreeSet<String>,
}

/// Apply `data` to every text cell of `workbook`, in sheet, row, column order.
///
/// Non-text cells are never touched and substituted text stays text even when it looks
/// numeric. Missing keys and unused data entries are not errors.
pub fn substitute(workbook: &mut Workbook, data: &DataRecord) -> SubstitutionReport {
    let mut report = SubstitutionReport::default();

    for cell in workbook.cells_mut() {
        let CellValue::Text(current) = &mut cell.value else {
            continue;
        };
        report.cells_examined += 1;

        let FilledText {
            text,
            replaced,
            unresolved,
        } = fill_text(current, data);
        report
            .unresolved
            .extend(unresolved.into_iter().map(str::to_string));
        report.tokens_replaced += replaced;

        let replacement = match text {
            Cow::Owned(text) => Some(text),
            Cow::Borrowed(_) => None,
        };
        if let Some(text) = replacement {
            *current = text;
            report.cells_changed += 1;
        }
    }

    report
}

/// Keys of all tokens found in the workbook's text cells.
pub fn scan_placeholders(workbook: &Workbook) -> BTreeSet<String> {
    workbook
        .cells()
        .filter_map(|cell| cell.value.as_text())
        .flat_map(|text| tokens(text).map(|token| token.key.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> DataRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test data must be an object"),
        }
    }

    fn keys(text: &str) -> Vec<&str> {
        tokens(text).map(|t| t.key).collect()
    }

    #[test]
    fn finds_tokens_with_optional_whitespace() {
        assert_eq!(keys("{{name}}"), vec!["name"]);
        assert_eq!(keys("{{ name }} and {{\tperiod}}"), vec!["name", "period"]);
        assert_eq!(keys("no tokens here"), Vec::<&str>::new());
        assert_eq!(keys("{{}} {{ }}"), Vec::<&str>::new());
    }

    #[test]
    fn handles_adjacent_and_nested_looking_braces() {
        assert_eq!(keys("{{a}}{{b}}"), vec!["a", "b"]);
        assert_eq!(keys("{{{name}}"), vec!["name"]);
        assert_eq!(keys("{{a}b}}"), Vec::<&str>::new());
        assert_eq!(keys("{{ unterminated"), Vec::<&str>::new());
        let spans: Vec<_> = tokens("x{{{name}}}").map(|t| t.span).collect();
        assert_eq!(spans, vec![2..10]);
    }

    #[test]
    fn replaces_exact_token() {
        let data = record(json!({ "name": "Ada" }));
        assert_eq!(fill_text("{{name}}", &data).text, "Ada");
    }

    #[test]
    fn replaces_several_tokens_in_one_pass() {
        let data = record(json!({ "name": "Ada", "period": "Jan" }));
        let filled = fill_text("{{name}} / {{period}}", &data);
        assert_eq!(filled.text, "Ada / Jan");
        assert_eq!(filled.replaced, 2);
    }

    #[test]
    fn leaves_unknown_tokens_verbatim() {
        let data = record(json!({ "name": "Ada" }));
        let filled = fill_text("{{unknown}}", &data);
        assert!(matches!(filled.text, Cow::Borrowed("{{unknown}}")));
        assert_eq!(filled.unresolved, vec!["unknown"]);

        let mixed = fill_text("{{name}} owes {{ amount }}", &data);
        assert_eq!(mixed.text, "Ada owes {{ amount }}");
    }

    #[test]
    fn keys_are_case_sensitive() {
        let data = record(json!({ "Name": "Ada" }));
        assert_eq!(fill_text("{{name}}", &data).text, "{{name}}");
    }

    #[test]
    fn replacement_values_are_not_rescanned() {
        let data = record(json!({ "a": "{{b}}", "b": "oops" }));
        assert_eq!(fill_text("{{a}}", &data).text, "{{b}}");
    }

    #[test]
    fn scalar_values_are_coerced_to_text() {
        let data = record(json!({ "salary": 5000, "rate": 1.5, "active": true }));
        assert_eq!(
            fill_text("{{salary}}|{{rate}}|{{active}}", &data).text,
            "5000|1.5|true"
        );
    }

    #[test]
    fn regex_metacharacters_in_keys_match_literally() {
        let data = record(json!({ "a.b": "dot", "total(usd)": 10 }));
        assert_eq!(
            fill_text("{{a.b}} {{total(usd)}} {{axb}}", &data).text,
            "dot 10 {{axb}}"
        );
    }
}
