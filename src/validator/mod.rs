//! Runtime content validators compiled from stored template schemas.
//!
//! A schema is a tree of JSON nodes, each with a `type` of `object`, `array`,
//! `string`, `number` or `boolean`. Nodes with a missing or unrecognized type are
//! treated as strings. Object shapes are closed: keys not listed in `properties`
//! are reported. String nodes support `enum`, `format: "uri"`, `minLength`,
//! `maxLength` and `pattern`.
//!
//! Compilation is strict. A node that is not a JSON object, or a constraint with the
//! wrong shape, is an [`Error::InvalidSchema`]: the template itself is corrupt and no
//! document can be judged against it.

mod cache;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use cache::ValidatorCache;

use crate::error::{Error, Result};

static URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:(//[^\s/?#]+)?[^\s]*$").expect("static uri regex")
});

/// One step in the path to an offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidType,
    UnrecognizedKeys,
    InvalidEnumValue,
    InvalidString,
    TooSmall,
    TooBig,
}

/// A single reason a value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub path: Vec<PathSegment>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<IssueCode>,
}

impl Issue {
    fn new(path: &[PathSegment], code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            path: path.to_vec(),
            message: message.into(),
            code: Some(code),
        }
    }
}

#[derive(Debug)]
enum Node {
    Object {
        properties: BTreeMap<String, Node>,
        required: BTreeSet<String>,
    },
    Array {
        items: Option<Box<Node>>,
    },
    String(StringRules),
    Number,
    Boolean,
}

#[derive(Debug, Default)]
struct StringRules {
    allowed: Option<Vec<String>>,
    uri: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
}

/// A compiled, reusable validator for one template schema.
#[derive(Debug)]
pub struct Validator {
    root: Node,
}

impl Validator {
    /// Compiles a raw schema. Fails if the schema is not a well-formed node tree.
    pub fn compile(schema: &Value) -> Result<Self> {
        Ok(Self {
            root: build_node(schema, "$")?,
        })
    }

    /// Validates `value`, returning the accepted data or every issue found.
    pub fn safe_parse(&self, value: &Value) -> std::result::Result<Value, Vec<Issue>> {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        check_node(&self.root, value, &mut path, &mut issues);
        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(issues)
        }
    }
}

fn malformed(path: &str, message: impl Into<String>) -> Error {
    Error::InvalidSchema {
        path: path.to_string(),
        message: message.into(),
    }
}

fn build_node(schema: &Value, path: &str) -> Result<Node> {
    let node = schema
        .as_object()
        .ok_or_else(|| malformed(path, "schema node must be a non-null object"))?;

    match node.get("type").and_then(Value::as_str) {
        Some("object") => build_object(node, path),
        Some("array") => {
            let items = match node.get("items") {
                None | Some(Value::Null) => None,
                Some(items) => Some(Box::new(build_node(items, &format!("{path}.items"))?)),
            };
            Ok(Node::Array { items })
        }
        Some("number") => Ok(Node::Number),
        Some("boolean") => Ok(Node::Boolean),
        _ => build_string(node, path).map(Node::String),
    }
}

fn build_object(node: &Map<String, Value>, path: &str) -> Result<Node> {
    let mut properties = BTreeMap::new();
    match node.get("properties") {
        None | Some(Value::Null) => {}
        Some(Value::Object(props)) => {
            for (key, child) in props {
                let child_path = format!("{path}.properties.{key}");
                properties.insert(key.clone(), build_node(child, &child_path)?);
            }
        }
        Some(_) => return Err(malformed(path, "`properties` must be an object")),
    }

    let required = string_list(node.get("required"), path, "required")?
        .unwrap_or_default()
        .into_iter()
        .collect();

    Ok(Node::Object {
        properties,
        required,
    })
}

fn build_string(node: &Map<String, Value>, path: &str) -> Result<StringRules> {
    let pattern = match node.get("pattern") {
        None | Some(Value::Null) => None,
        Some(Value::String(p)) => Some(
            Regex::new(p).map_err(|e| malformed(path, format!("invalid `pattern`: {e}")))?,
        ),
        Some(_) => return Err(malformed(path, "`pattern` must be a string")),
    };

    Ok(StringRules {
        allowed: string_list(node.get("enum"), path, "enum")?,
        uri: node.get("format").and_then(Value::as_str) == Some("uri"),
        min_length: length_bound(node.get("minLength"), path, "minLength")?,
        max_length: length_bound(node.get("maxLength"), path, "maxLength")?,
        pattern,
    })
}

fn string_list(value: Option<&Value>, path: &str, field: &str) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(path, format!("`{field}` must contain only strings")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(malformed(path, format!("`{field}` must be an array"))),
    }
}

fn length_bound(value: Option<&Value>, path: &str, field: &str) -> Result<Option<usize>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| malformed(path, format!("`{field}` must be a non-negative integer"))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_issue(path: &[PathSegment], expected: &str, value: &Value) -> Issue {
    Issue::new(
        path,
        IssueCode::InvalidType,
        format!("Expected {expected}, received {}", kind_of(value)),
    )
}

fn check_node(node: &Node, value: &Value, path: &mut Vec<PathSegment>, issues: &mut Vec<Issue>) {
    match node {
        Node::Object {
            properties,
            required,
        } => {
            let Some(fields) = value.as_object() else {
                issues.push(type_issue(path, "object", value));
                return;
            };

            for (key, child) in properties {
                path.push(PathSegment::Key(key.clone()));
                match fields.get(key) {
                    Some(field) => check_node(child, field, path, issues),
                    None if required.contains(key) => {
                        issues.push(Issue::new(path, IssueCode::InvalidType, "Required"));
                    }
                    None => {}
                }
                path.pop();
            }

            let unknown: Vec<String> = fields
                .keys()
                .filter(|k| !properties.contains_key(*k))
                .map(|k| format!("'{k}'"))
                .collect();
            if !unknown.is_empty() {
                issues.push(Issue::new(
                    path,
                    IssueCode::UnrecognizedKeys,
                    format!("Unrecognized key(s) in object: {}", unknown.join(", ")),
                ));
            }
        }
        Node::Array { items } => {
            let Some(elements) = value.as_array() else {
                issues.push(type_issue(path, "array", value));
                return;
            };
            if let Some(items) = items {
                for (i, element) in elements.iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    check_node(items, element, path, issues);
                    path.pop();
                }
            }
        }
        Node::String(rules) => check_string(rules, value, path, issues),
        Node::Number => {
            if !value.is_number() {
                issues.push(type_issue(path, "number", value));
            }
        }
        Node::Boolean => {
            if !value.is_boolean() {
                issues.push(type_issue(path, "boolean", value));
            }
        }
    }
}

fn check_string(rules: &StringRules, value: &Value, path: &[PathSegment], issues: &mut Vec<Issue>) {
    let Some(s) = value.as_str() else {
        issues.push(type_issue(path, "string", value));
        return;
    };

    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|a| a == s) {
            let options: Vec<String> = allowed.iter().map(|a| format!("'{a}'")).collect();
            issues.push(Issue::new(
                path,
                IssueCode::InvalidEnumValue,
                format!(
                    "Invalid enum value. Expected {}, received '{s}'",
                    options.join(" | ")
                ),
            ));
        }
        return;
    }

    if rules.uri && !URI_RE.is_match(s) {
        issues.push(Issue::new(path, IssueCode::InvalidString, "Invalid url"));
    }

    let len = s.chars().count();
    if let Some(min) = rules.min_length {
        if len < min {
            issues.push(Issue::new(
                path,
                IssueCode::TooSmall,
                format!("String must contain at least {min} character(s)"),
            ));
        }
    }
    if let Some(max) = rules.max_length {
        if len > max {
            issues.push(Issue::new(
                path,
                IssueCode::TooBig,
                format!("String must contain at most {max} character(s)"),
            ));
        }
    }

    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(s) {
            issues.push(Issue::new(path, IssueCode::InvalidString, "Invalid"));
        }
    }
}
