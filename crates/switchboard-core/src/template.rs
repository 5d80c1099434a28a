// ── Command templates ──
//
// Vendor intent is written as templates with `{name}` placeholders:
// ordered CLI lines, or a JSON skeleton for REST payloads. Rendering is
// all-or-nothing. Every supplied parameter must be non-empty and every
// placeholder must resolve, otherwise nothing is returned.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;

/// Named parameter set for a render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_owned(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn error(&self, template: &str, parameter: &str) -> CoreError {
        CoreError::TemplateParameter {
            template: template.to_owned(),
            parameter: parameter.to_owned(),
            params: self.0.clone(),
        }
    }

    /// Reject the whole set if any value is empty.
    fn check_non_empty(&self, template: &str) -> Result<(), CoreError> {
        match self.0.iter().find(|(_, v)| v.trim().is_empty()) {
            Some((name, _)) => Err(self.error(template, name)),
            None => Ok(()),
        }
    }
}

/// Substitute every `{name}` in `text`.
fn substitute(template: &str, text: &str, params: &Params) -> Result<String, CoreError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(params.error(template, after));
        };
        let name = &after[..close];
        match params.get(name) {
            Some(value) if !name.is_empty() => out.push_str(value),
            _ => return Err(params.error(template, name)),
        }
        rest = &after[close + 1..];
    }

    if rest.contains('}') {
        return Err(params.error(template, rest));
    }
    out.push_str(rest);
    Ok(out)
}

// ── CLI templates ───────────────────────────────────────────────────

/// An ordered list of command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    name: &'static str,
    lines: Vec<String>,
}

impl CommandTemplate {
    pub fn new<S: Into<String>>(name: &'static str, lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            name,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render every line, or fail without partial output.
    pub fn render(&self, params: &Params) -> Result<Vec<String>, CoreError> {
        params.check_non_empty(self.name)?;
        self.lines
            .iter()
            .map(|line| substitute(self.name, line, params))
            .collect()
    }
}

// ── Payload templates ───────────────────────────────────────────────

/// A JSON skeleton whose object keys and string values may carry
/// placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadTemplate {
    name: &'static str,
    path: String,
    skeleton: Value,
}

/// A rendered REST request: target path and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPayload {
    pub path: String,
    pub body: Value,
}

impl PayloadTemplate {
    pub fn new(name: &'static str, path: impl Into<String>, skeleton: Value) -> Self {
        Self {
            name,
            path: path.into(),
            skeleton,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn render(&self, params: &Params) -> Result<RenderedPayload, CoreError> {
        params.check_non_empty(self.name)?;
        Ok(RenderedPayload {
            path: substitute(self.name, &self.path, params)?,
            body: self.render_value(&self.skeleton, params)?,
        })
    }

    fn render_value(&self, value: &Value, params: &Params) -> Result<Value, CoreError> {
        Ok(match value {
            Value::String(s) => {
                let rendered = substitute(self.name, s, params)?;
                // A lone placeholder holding an integer becomes a JSON number.
                let lone = s.starts_with('{') && s.ends_with('}') && s.matches('{').count() == 1;
                match rendered.parse::<u64>() {
                    Ok(n) if lone => Value::from(n),
                    _ => Value::String(rendered),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v, params))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(
                        substitute(self.name, k, params)?,
                        self.render_value(v, params)?,
                    );
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }
}
