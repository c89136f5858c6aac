//! RFC 6570 URI templates.
//!
//! Templates are parsed once (when a discovery document or overlay entry is
//! loaded) and expanded many times at request time. All four levels are
//! supported: simple, reserved and fragment expansion, label, path, path
//! parameter and query operators, and the prefix (`:n`) and explode (`*`)
//! modifiers. A variable that is missing or `null` is undefined and produces
//! nothing, so a template expanded without variables simply loses its
//! placeholders and optional query sections.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::error::TemplateError;

const MAX_PREFIX: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Simple,
    Reserved,
    Fragment,
    Label,
    Path,
    PathParam,
    Query,
    QueryContinuation,
}

impl Operator {
    fn parse(c: char) -> Result<Option<Self>, TemplateError> {
        let op = match c {
            '+' => Operator::Reserved,
            '#' => Operator::Fragment,
            '.' => Operator::Label,
            '/' => Operator::Path,
            ';' => Operator::PathParam,
            '?' => Operator::Query,
            '&' => Operator::QueryContinuation,
            '=' | ',' | '!' | '@' | '|' => return Err(TemplateError::UnsupportedOperator(c)),
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    fn first(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved => "",
            Operator::Fragment => "#",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::PathParam => ";",
            Operator::Query => "?",
            Operator::QueryContinuation => "&",
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved | Operator::Fragment => ",",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::PathParam => ";",
            Operator::Query | Operator::QueryContinuation => "&",
        }
    }

    fn named(self) -> bool {
        matches!(
            self,
            Operator::PathParam | Operator::Query | Operator::QueryContinuation
        )
    }

    fn if_empty(self) -> &'static str {
        match self {
            Operator::Query | Operator::QueryContinuation => "=",
            _ => "",
        }
    }

    fn allow_reserved(self) -> bool {
        matches!(self, Operator::Reserved | Operator::Fragment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    None,
    Prefix(usize),
    Explode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VarSpec {
    name: String,
    modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression { operator: Operator, vars: Vec<VarSpec> },
}

/// A parsed URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
}

impl UriTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(c) = rest.chars().next() {
            match c {
                '{' => {
                    let close = rest.find('}').ok_or(TemplateError::UnclosedExpression(offset))?;
                    let body = &rest[1..close];
                    if body.contains('{') {
                        return Err(TemplateError::UnclosedExpression(offset));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(parse_expression(body, offset)?);
                    rest = &rest[close + 1..];
                    offset += close + 1;
                }
                '}' => return Err(TemplateError::UnmatchedClose(offset)),
                _ => {
                    literal.push(c);
                    rest = &rest[c.len_utf8()..];
                    offset += c.len_utf8();
                }
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the template contains at least one expression.
    pub fn is_templated(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Expression { .. }))
    }

    /// Declared variable names in order of first appearance.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for part in &self.parts {
            if let Part::Expression { vars, .. } = part {
                for var in vars {
                    if !names.iter().any(|n| n == &var.name) {
                        names.push(var.name.clone());
                    }
                }
            }
        }
        names
    }

    pub fn expand(&self, variables: &Map<String, Value>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expression { operator, vars } => {
                    let expanded: Vec<String> = vars
                        .iter()
                        .filter_map(|var| {
                            variables
                                .get(&var.name)
                                .and_then(|value| expand_var(*operator, var, value))
                        })
                        .collect();
                    if !expanded.is_empty() {
                        out.push_str(operator.first());
                        out.push_str(&expanded.join(operator.separator()));
                    }
                }
            }
        }
        out
    }
}

impl FromStr for UriTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_expression(body: &str, offset: usize) -> Result<Part, TemplateError> {
    let mut chars = body.chars();
    let first = chars.next().ok_or(TemplateError::EmptyExpression(offset))?;
    let (operator, list) = match Operator::parse(first)? {
        Some(op) => (op, chars.as_str()),
        None => (Operator::Simple, body),
    };
    if list.is_empty() {
        return Err(TemplateError::EmptyExpression(offset));
    }

    let vars = list
        .split(',')
        .map(parse_varspec)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Part::Expression { operator, vars })
}

fn parse_varspec(spec: &str) -> Result<VarSpec, TemplateError> {
    let (name, modifier) = if let Some(name) = spec.strip_suffix('*') {
        (name, Modifier::Explode)
    } else if let Some((name, len)) = spec.split_once(':') {
        let len: usize = len
            .parse()
            .map_err(|_| TemplateError::InvalidPrefix(spec.to_string()))?;
        if len == 0 || len >= MAX_PREFIX {
            return Err(TemplateError::InvalidPrefix(spec.to_string()));
        }
        (name, Modifier::Prefix(len))
    } else {
        (spec, Modifier::None)
    };

    if !is_valid_varname(name) {
        return Err(TemplateError::InvalidVariable(spec.to_string()));
    }
    Ok(VarSpec {
        name: name.to_string(),
        modifier,
    })
}

fn is_valid_varname(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes[0] == b'.' {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let triplet = bytes.get(i + 1..i + 3);
                if !triplet.is_some_and(|t| t.iter().all(u8::is_ascii_hexdigit)) {
                    return false;
                }
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' => i += 1,
            _ => return false,
        }
    }
    true
}

fn expand_var(op: Operator, var: &VarSpec, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) => Some(expand_list(op, var, items)),
        Value::Object(map) => Some(expand_map(op, var, map)),
        scalar => {
            let mut text = scalar_text(scalar);
            if let Modifier::Prefix(len) = var.modifier {
                text = text.chars().take(len).collect();
            }
            let encoded = encode(&text, op.allow_reserved());
            Some(named_value(op, &var.name, &encoded))
        }
    }
}

fn expand_list(op: Operator, var: &VarSpec, items: &[Value]) -> String {
    let encoded = items
        .iter()
        .map(|item| encode(&scalar_text(item), op.allow_reserved()));
    if var.modifier == Modifier::Explode {
        encoded
            .map(|item| {
                if op.named() {
                    named_value(op, &var.name, &item)
                } else {
                    item
                }
            })
            .collect::<Vec<_>>()
            .join(op.separator())
    } else {
        let joined = encoded.collect::<Vec<_>>().join(",");
        if op.named() {
            named_value(op, &var.name, &joined)
        } else {
            joined
        }
    }
}

fn expand_map(op: Operator, var: &VarSpec, map: &Map<String, Value>) -> String {
    let pairs = map.iter().map(|(k, v)| {
        (
            encode(k, op.allow_reserved()),
            encode(&scalar_text(v), op.allow_reserved()),
        )
    });
    if var.modifier == Modifier::Explode {
        pairs
            .map(|(k, v)| {
                if v.is_empty() && op.named() {
                    format!("{k}{}", op.if_empty())
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(op.separator())
    } else {
        let joined = pairs
            .map(|(k, v)| format!("{k},{v}"))
            .collect::<Vec<_>>()
            .join(",");
        if op.named() {
            named_value(op, &var.name, &joined)
        } else {
            joined
        }
    }
}

fn named_value(op: Operator, name: &str, encoded: &str) -> String {
    if !op.named() {
        return encoded.to_string();
    }
    if encoded.is_empty() {
        format!("{name}{}", op.if_empty())
    } else {
        format!("{name}={encoded}")
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Everything except the unreserved set `ALPHA / DIGIT / "-" / "." / "_" / "~"`.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// As [`UNRESERVED`], additionally letting the reserved set through.
const UNRESERVED_OR_RESERVED: &AsciiSet = &UNRESERVED
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Percent-encodes `text`. With `allow_reserved` the reserved set and
/// existing pct-encoded triplets pass through untouched.
pub(crate) fn encode(text: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return utf8_percent_encode(text, UNRESERVED).to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('%') {
        out.extend(utf8_percent_encode(&rest[..pos], UNRESERVED_OR_RESERVED));
        let tail = &rest[pos..];
        let is_triplet = tail
            .as_bytes()
            .get(1..3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if is_triplet {
            out.push_str(&tail[..3]);
            rest = &tail[3..];
        } else {
            out.push_str("%25");
            rest = &tail[1..];
        }
    }
    out.extend(utf8_percent_encode(rest, UNRESERVED_OR_RESERVED));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let value = json!({
            "var": "value",
            "hello": "Hello World!",
            "path": "/foo/bar",
            "empty": "",
            "list": ["red", "green", "blue"],
            "keys": { "semi": ";", "dot": ".", "comma": "," },
            "x": "1024",
            "y": "768",
            "undef": null,
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn expand(template: &str) -> String {
        UriTemplate::parse(template).unwrap().expand(&vars())
    }

    #[test]
    fn simple_and_reserved_expansion() {
        assert_eq!(expand("{var}"), "value");
        assert_eq!(expand("{hello}"), "Hello%20World%21");
        assert_eq!(expand("{+hello}"), "Hello%20World!");
        assert_eq!(expand("{+path}/here"), "/foo/bar/here");
        assert_eq!(expand("{#var}"), "#value");
        assert_eq!(expand("{#hello}"), "#Hello%20World!");
        assert_eq!(expand("map?{x,y}"), "map?1024,768");
        assert_eq!(expand("{x,hello,y}"), "1024,Hello%20World%21,768");
        assert_eq!(expand("{+x,hello,y}"), "1024,Hello%20World!,768");
    }

    #[test]
    fn label_path_and_parameter_operators() {
        assert_eq!(expand("X{.x,y}"), "X.1024.768");
        assert_eq!(expand("X{.empty}"), "X.");
        assert_eq!(expand("{/var,x}/here"), "/value/1024/here");
        assert_eq!(expand("{;x,y}"), ";x=1024;y=768");
        assert_eq!(expand("{;x,y,empty}"), ";x=1024;y=768;empty");
        assert_eq!(expand("{?x,y}"), "?x=1024&y=768");
        assert_eq!(expand("{?x,y,empty}"), "?x=1024&y=768&empty=");
        assert_eq!(expand("?fixed=yes{&x}"), "?fixed=yes&x=1024");
    }

    #[test]
    fn modifiers_and_composite_values() {
        assert_eq!(expand("{var:3}"), "val");
        assert_eq!(expand("{list}"), "red,green,blue");
        assert_eq!(expand("{list*}"), "red,green,blue");
        assert_eq!(expand("{keys}"), "comma,%2C,dot,.,semi,%3B");
        assert_eq!(expand("{keys*}"), "comma=%2C,dot=.,semi=%3B");
        assert_eq!(expand("{?list*}"), "?list=red&list=green&list=blue");
        assert_eq!(expand("{?keys*}"), "?comma=%2C&dot=.&semi=%3B");
        assert_eq!(expand("{/list*,path:4}"), "/red/green/blue/%2Ffoo");
    }

    #[test]
    fn undefined_variables_are_omitted() {
        assert_eq!(expand("{undef}"), "");
        assert_eq!(expand("{?undef}"), "");
        let template =
            UriTemplate::parse("https://h/accounts/{accountNumber}/transactions{?count}").unwrap();
        assert_eq!(template.expand(&Map::new()), "https://h/accounts//transactions");
    }

    #[test]
    fn literal_template_passes_through() {
        let template = UriTemplate::parse("https://h/v1/health").unwrap();
        assert!(!template.is_templated());
        assert_eq!(template.expand(&vars()), "https://h/v1/health");
        assert!(template.variable_names().is_empty());
    }

    #[test]
    fn numbers_expand_without_quotes() {
        let template = UriTemplate::parse("https://h/accounts/{id}{?count}").unwrap();
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!(123456));
        variables.insert("count".to_string(), json!(10));
        assert_eq!(template.expand(&variables), "https://h/accounts/123456?count=10");
    }

    #[test]
    fn variable_names_are_deduplicated_in_order() {
        let template = UriTemplate::parse("{/a,b}{?b,c*}{&d:2}").unwrap();
        assert_eq!(template.variable_names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert_eq!(
            UriTemplate::parse("https://h/{id").unwrap_err(),
            TemplateError::UnclosedExpression(10)
        );
        assert_eq!(
            UriTemplate::parse("https://h/id}").unwrap_err(),
            TemplateError::UnmatchedClose(12)
        );
        assert_eq!(UriTemplate::parse("{}").unwrap_err(), TemplateError::EmptyExpression(0));
        assert_eq!(UriTemplate::parse("{?}").unwrap_err(), TemplateError::EmptyExpression(0));
        assert_eq!(
            UriTemplate::parse("{=x}").unwrap_err(),
            TemplateError::UnsupportedOperator('=')
        );
        assert!(matches!(
            UriTemplate::parse("{a b}"),
            Err(TemplateError::InvalidVariable(_))
        ));
        assert!(matches!(
            UriTemplate::parse("{a:0}"),
            Err(TemplateError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn reserved_encoding_keeps_pct_triplets() {
        assert_eq!(encode("a%20b c", true), "a%20b%20c");
        assert_eq!(encode("a%20b", false), "a%2520b");
        assert_eq!(encode("100%", true), "100%25");
    }

    #[test]
    fn reserved_set_depends_on_operator() {
        assert_eq!(encode("/foo/bar?x=1", false), "%2Ffoo%2Fbar%3Fx%3D1");
        assert_eq!(encode("/foo/bar?x=1", true), "/foo/bar?x=1");
        assert_eq!(encode("caf\u{e9} ~-._", false), "caf%C3%A9%20~-._");
        assert_eq!(encode("caf\u{e9}", true), "caf%C3%A9");
    }
}
