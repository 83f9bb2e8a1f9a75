//! JSON Schema to regular expression.
//!
//! Every schema node becomes a regex fragment matching the JSON texts that
//! satisfy it. Objects list their properties in declaration order, and the
//! configured [`WhitespacePolicy`](crate::WhitespacePolicy) is inserted
//! around every piece of JSON punctuation.
//!
//! Only schemas whose instances form a regular language are supported.
//! Anything else, including references that would have to be inlined
//! forever, is rejected with [`Error::UnsupportedSchema`].

use indexmap::IndexSet;
use itertools::Itertools;
use regex_syntax::ast::{self, AssertionKind, Ast};
use serde_json::{Map, Value};

use crate::config::CompileConfig;
use crate::error::{Error, Result};

pub const STRING_INNER: &str = r#"(?:[^"\\\x00-\x1F\x7F]|\\["\\/bfnrt]|\\u[0-9a-fA-F]{4})"#;
pub const INTEGER: &str = r"-?(?:0|[1-9][0-9]*)";
pub const NUMBER: &str = r"-?(?:0|[1-9][0-9]*)(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?";
pub const BOOLEAN: &str = r"(?:true|false)";
pub const NULL: &str = r"null";

const DATE: &str = r"[0-9]{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12][0-9]|3[01])";
const TIME: &str = r"(?:[01][0-9]|2[0-3]):[0-5][0-9]:[0-5][0-9](?:\.[0-9]+)?(?:Z|[+-](?:[01][0-9]|2[0-3]):[0-5][0-9])?";
const UUID: &str = r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

/// Keywords that constrain instances in ways a regular expression cannot
/// follow, or that relate several values to each other.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "not",
    "if",
    "then",
    "else",
    "dependentRequired",
    "dependentSchemas",
    "dependencies",
    "patternProperties",
    "propertyNames",
    "unevaluatedProperties",
    "unevaluatedItems",
    "contains",
    "minContains",
    "maxContains",
    "minProperties",
    "maxProperties",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
];

/// Transpile a schema given as JSON text.
pub fn compile_json_schema_str(schema: &str, config: &CompileConfig) -> Result<String> {
    let schema: Value = serde_json::from_str(schema)?;
    compile_json_schema(&schema, config)
}

/// Transpile `schema` into a regular expression over its JSON instances.
pub fn compile_json_schema(schema: &Value, config: &CompileConfig) -> Result<String> {
    let mut transpiler = Transpiler {
        root: schema,
        ws: config.whitespace.to_regex(),
        refs: IndexSet::new(),
    };
    let regex = transpiler.node(schema, "#")?;
    tracing::debug!(regex_len = regex.len(), "transpiled JSON schema");
    Ok(regex)
}

/// Drop a leading `^` and a trailing `$` (or `\A`, `\z`) from a string
/// pattern; the fragment is anchored by the surrounding quotes.
fn strip_anchors(pattern: &str) -> std::result::Result<&str, ast::Error> {
    let ast = ast::parse::Parser::new().parse(pattern)?;
    let items = match &ast {
        Ast::Concat(concat) => &concat.asts[..],
        other => std::slice::from_ref(other),
    };
    let mut start = 0;
    let mut end = pattern.len();
    if let Some(Ast::Assertion(first)) = items.first() {
        if matches!(first.kind, AssertionKind::StartLine | AssertionKind::StartText) {
            start = first.span.end.offset;
        }
    }
    if let Some(Ast::Assertion(last)) = items.last() {
        if matches!(last.kind, AssertionKind::EndLine | AssertionKind::EndText) {
            end = last.span.start.offset.max(start);
        }
    }
    Ok(&pattern[start..end])
}

fn unsupported(path: &str, reason: impl Into<String>) -> Error {
    Error::UnsupportedSchema {
        path: path.to_string(),
        reason: reason.into(),
    }
}

struct Transpiler<'a> {
    root: &'a Value,
    ws: String,
    /// References currently being inlined, outermost first.
    refs: IndexSet<String>,
}

impl<'a> Transpiler<'a> {
    fn node(&mut self, schema: &'a Value, path: &str) -> Result<String> {
        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(true) => {
                return Err(unsupported(path, "`true` accepts arbitrary JSON values"))
            }
            Value::Bool(false) => return Err(unsupported(path, "`false` accepts nothing")),
            _ => return Err(unsupported(path, "schema must be an object or a boolean")),
        };

        if let Some(keyword) = UNSUPPORTED_KEYWORDS.iter().find(|k| obj.contains_key(**k)) {
            return Err(unsupported(path, format!("keyword `{keyword}`")));
        }
        if obj.get("uniqueItems") == Some(&Value::Bool(true)) {
            return Err(unsupported(path, "keyword `uniqueItems`"));
        }

        if let Some(reference) = obj.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| unsupported(path, "`$ref` must be a string"))?;
            return self.reference(reference, path);
        }
        if let Some(value) = obj.get("const") {
            return Ok(self.literal(value));
        }
        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .filter(|values| !values.is_empty())
                .ok_or_else(|| unsupported(path, "`enum` must be a non-empty array"))?;
            return Ok(format!(
                "(?:{})",
                values.iter().map(|v| self.literal(v)).join("|")
            ));
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(schemas) = obj.get(keyword) {
                return self.alternatives(schemas, &format!("{path}/{keyword}"));
            }
        }
        if let Some(schemas) = obj.get("allOf") {
            return match schemas.as_array().map(Vec::as_slice) {
                Some([only]) => self.node(only, &format!("{path}/allOf/0")),
                _ => Err(unsupported(path, "`allOf` with more than one schema")),
            };
        }

        match obj.get("type") {
            Some(Value::String(ty)) => self.typed(ty, obj, path),
            Some(Value::Array(types)) if !types.is_empty() => {
                let branches = types
                    .iter()
                    .map(|ty| match ty {
                        Value::String(ty) => self.typed(ty, obj, path),
                        _ => Err(unsupported(path, "`type` entries must be strings")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("(?:{})", branches.join("|")))
            }
            Some(_) => Err(unsupported(path, "malformed `type`")),
            None if obj.contains_key("properties") || obj.contains_key("additionalProperties") => {
                self.object(obj, path)
            }
            None if obj.contains_key("items") || obj.contains_key("prefixItems") => {
                self.array(obj, path)
            }
            None => Err(unsupported(path, "schema has no type")),
        }
    }

    fn typed(&mut self, ty: &str, obj: &'a Map<String, Value>, path: &str) -> Result<String> {
        match ty {
            "string" => self.string(obj, path),
            "integer" => Ok(INTEGER.to_string()),
            "number" => Ok(NUMBER.to_string()),
            "boolean" => Ok(BOOLEAN.to_string()),
            "null" => Ok(NULL.to_string()),
            "array" => self.array(obj, path),
            "object" => self.object(obj, path),
            other => Err(unsupported(path, format!("unknown type `{other}`"))),
        }
    }

    fn reference(&mut self, reference: &str, path: &str) -> Result<String> {
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| unsupported(path, format!("non-local reference `{reference}`")))?;
        let target = self
            .root
            .pointer(pointer)
            .ok_or_else(|| unsupported(path, format!("unresolvable reference `{reference}`")))?;
        if self.refs.contains(reference) {
            let cycle = self.refs.iter().chain([&reference.to_string()]).join(" -> ");
            return Err(unsupported(path, format!("recursive reference {cycle}")));
        }
        self.refs.insert(reference.to_string());
        let regex = self.node(target, reference);
        self.refs.pop();
        regex
    }

    fn alternatives(&mut self, schemas: &'a Value, path: &str) -> Result<String> {
        let schemas = schemas
            .as_array()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| unsupported(path, "expected a non-empty array of schemas"))?;
        let branches = schemas
            .iter()
            .enumerate()
            .map(|(i, schema)| self.node(schema, &format!("{path}/{i}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("(?:{})", branches.join("|")))
    }

    fn string(&mut self, obj: &Map<String, Value>, path: &str) -> Result<String> {
        if let Some(pattern) = obj.get("pattern") {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| unsupported(path, "`pattern` must be a string"))?;
            if obj.contains_key("minLength") || obj.contains_key("maxLength") {
                return Err(unsupported(
                    path,
                    "`pattern` combined with `minLength` or `maxLength`",
                ));
            }
            let pattern = strip_anchors(pattern).map_err(|e| {
                unsupported(path, format!("invalid `pattern`: {}", e.kind()))
            })?;
            return Ok(format!(r#""(?:{pattern})""#));
        }
        if let Some(format) = obj.get("format").and_then(Value::as_str) {
            let inner = match format {
                "date-time" => format!("{DATE}T{TIME}"),
                "date" => DATE.to_string(),
                "time" => TIME.to_string(),
                "uuid" => UUID.to_string(),
                other => return Err(unsupported(path, format!("string format `{other}`"))),
            };
            return Ok(format!(r#""{inner}""#));
        }

        let min = bound(obj, "minLength", path)?.unwrap_or(0);
        let max = bound(obj, "maxLength", path)?;
        let quantifier = repeat(min, max, path)?;
        Ok(format!(r#""{STRING_INNER}{quantifier}""#))
    }

    fn array(&mut self, obj: &'a Map<String, Value>, path: &str) -> Result<String> {
        let ws = self.ws.clone();
        if let Some(prefix) = obj.get("prefixItems") {
            let prefix = prefix
                .as_array()
                .ok_or_else(|| unsupported(path, "`prefixItems` must be an array"))?;
            let items = prefix
                .iter()
                .enumerate()
                .map(|(i, schema)| self.node(schema, &format!("{path}/prefixItems/{i}")))
                .collect::<Result<Vec<_>>>()?;
            let separator = format!("{ws},{ws}");
            return Ok(format!(r"\[{ws}{}{ws}\]", items.join(&separator)));
        }

        let items = obj
            .get("items")
            .ok_or_else(|| unsupported(path, "array without `items`"))?;
        let item = self.node(items, &format!("{path}/items"))?;
        let min = bound(obj, "minItems", path)?.unwrap_or(0);
        let max = bound(obj, "maxItems", path)?;
        let more = format!("(?:{ws},{ws}{item})");

        let body = match (min, max) {
            (_, Some(0)) => String::new(),
            (0, None) => format!("(?:{item}{more}*)?"),
            (0, Some(max)) => format!("(?:{item}{more}{{0,{}}})?", max - 1),
            (min, max) => format!(
                "{item}{more}{}",
                repeat(min - 1, max.map(|max| max - 1), path)?
            ),
        };
        if max.is_some_and(|max| max < min) {
            return Err(unsupported(path, "`maxItems` is below `minItems`"));
        }
        Ok(format!(r"\[{ws}{body}{ws}\]"))
    }

    fn object(&mut self, obj: &'a Map<String, Value>, path: &str) -> Result<String> {
        let ws = self.ws.clone();
        let properties = match obj.get("properties") {
            Some(Value::Object(properties)) if !properties.is_empty() => properties,
            Some(Value::Object(_)) | None => return self.open_object(obj, path),
            Some(_) => return Err(unsupported(path, "`properties` must be an object")),
        };

        let required: Vec<&str> = match obj.get("required") {
            Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
            Some(_) => return Err(unsupported(path, "`required` must be an array")),
            None => Vec::new(),
        };
        if let Some(missing) = required.iter().find(|name| !properties.contains_key(**name)) {
            return Err(unsupported(
                path,
                format!("required property `{missing}` has no schema"),
            ));
        }

        let mut entries = Vec::with_capacity(properties.len());
        let mut is_required = Vec::with_capacity(properties.len());
        for (name, schema) in properties {
            let value = self.node(schema, &format!("{path}/properties/{name}"))?;
            entries.push(format!("{ws}{}{ws}:{ws}{value}", self.key(name)));
            is_required.push(required.contains(&name.as_str()));
        }

        let mut regex = String::from(r"\{");
        match is_required.iter().rposition(|&r| r) {
            Some(last_required) => {
                for (i, entry) in entries.iter().enumerate() {
                    let entry = if i < last_required {
                        format!("{entry}{ws},")
                    } else if i > last_required {
                        format!("{ws},{entry}")
                    } else {
                        entry.clone()
                    };
                    if is_required[i] {
                        regex.push_str(&entry);
                    } else {
                        regex.push_str(&format!("(?:{entry})?"));
                    }
                }
            }
            None => {
                // every property is optional: pick the first one present,
                // the others may appear around it in declaration order
                let choices = (0..entries.len())
                    .map(|first| {
                        let mut choice = String::new();
                        for entry in &entries[..first] {
                            choice.push_str(&format!("(?:{entry}{ws},)?"));
                        }
                        choice.push_str(&entries[first]);
                        for entry in &entries[first + 1..] {
                            choice.push_str(&format!("(?:{ws},{entry})?"));
                        }
                        choice
                    })
                    .join("|");
                regex.push_str(&format!("(?:{choices})?"));
            }
        }
        regex.push_str(&format!(r"{ws}\}}"));
        Ok(regex)
    }

    /// An object without declared properties: either empty, or a map whose
    /// values follow `additionalProperties`.
    fn open_object(&mut self, obj: &'a Map<String, Value>, path: &str) -> Result<String> {
        let ws = self.ws.clone();
        match obj.get("additionalProperties") {
            Some(Value::Bool(false)) => Ok(format!(r"\{{{ws}\}}")),
            Some(schema @ Value::Object(_)) => {
                let value = self.node(schema, &format!("{path}/additionalProperties"))?;
                let entry = format!(r#"{ws}"{STRING_INNER}*"{ws}:{ws}{value}"#);
                Ok(format!(r"\{{(?:{entry}(?:{ws},{entry})*)?{ws}\}}"))
            }
            _ => Err(unsupported(path, "object with unconstrained properties")),
        }
    }

    /// A property name as it appears in the output, quoted and escaped.
    fn key(&self, name: &str) -> String {
        regex::escape(&Value::String(name.to_string()).to_string())
    }

    /// Exactly `value`, with the configured whitespace inside containers.
    fn literal(&self, value: &Value) -> String {
        let ws = &self.ws;
        match value {
            Value::Array(items) => {
                let items = items.iter().map(|v| self.literal(v)).join(&format!("{ws},{ws}"));
                format!(r"\[{ws}{items}{ws}\]")
            }
            Value::Object(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| format!("{ws}{}{ws}:{ws}{}", self.key(k), self.literal(v)))
                    .join(&format!("{ws},"));
                format!(r"\{{{entries}{ws}\}}")
            }
            scalar => regex::escape(&scalar.to_string()),
        }
    }
}

fn bound(obj: &Map<String, Value>, keyword: &str, path: &str) -> Result<Option<u64>> {
    match obj.get(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| unsupported(path, format!("`{keyword}` must be a non-negative integer"))),
    }
}

fn repeat(min: u64, max: Option<u64>, path: &str) -> Result<String> {
    Ok(match max {
        Some(max) if max < min => {
            return Err(unsupported(path, "upper bound is below lower bound"));
        }
        Some(max) if max == min => format!("{{{min}}}"),
        Some(max) => format!("{{{min},{max}}}"),
        None if min == 0 => "*".to_string(),
        None => format!("{{{min},}}"),
    })
}
