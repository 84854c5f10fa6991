use std::borrow::Cow;

use regex::Regex;
use tracing::debug;

use crate::context::RequestContext;
use crate::models::Condition;

/// Request attribute a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Uri,
    Header,
    Query,
    Host,
    Ip,
    Cookie,
    Post,
    ReqMethod,
    Domain,
}

impl ParamType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_ascii_lowercase().as_str() {
            "uri" => ParamType::Uri,
            "header" => ParamType::Header,
            "query" => ParamType::Query,
            "host" => ParamType::Host,
            "ip" => ParamType::Ip,
            "cookie" => ParamType::Cookie,
            "post" => ParamType::Post,
            "req_method" | "method" => ParamType::ReqMethod,
            "domain" => ParamType::Domain,
            _ => return None,
        })
    }

    fn extract<'a>(&self, name: &str, ctx: &'a RequestContext) -> Option<Cow<'a, str>> {
        match self {
            ParamType::Uri => Some(Cow::Borrowed(ctx.path())),
            ParamType::Header => ctx.header(name).map(Cow::Borrowed),
            ParamType::Query => ctx.query(name).map(Cow::Borrowed),
            ParamType::Host => non_empty(ctx.host()),
            ParamType::Ip => ctx.client_ip().map(|ip| Cow::Owned(ip.to_string())),
            ParamType::Cookie => ctx.cookie(name).map(Cow::Borrowed),
            ParamType::Post => ctx.body_field(name).map(Cow::Owned),
            ParamType::ReqMethod => non_empty(ctx.method()),
            ParamType::Domain => non_empty(ctx.domain()),
        }
    }
}

fn non_empty(s: &str) -> Option<Cow<'_, str>> {
    if s.is_empty() { None } else { Some(Cow::Borrowed(s)) }
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Regex),
    Regex(Regex),
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Greater(f64),
    Less(f64),
    Exclude(String),
    /// Unknown operator or a pattern that failed to compile.
    Never,
}

impl Matcher {
    fn compile(operator: &str, value: &str) -> Self {
        let value = value.trim();
        match operator.trim() {
            "match" => glob_to_regex(value).map(Matcher::Glob).unwrap_or(Matcher::Never),
            "=" => Matcher::Equals(value.to_string()),
            "regex" | "regEx" => Regex::new(&format!("^(?:{value})$"))
                .map(Matcher::Regex)
                .unwrap_or(Matcher::Never),
            "like" | "contains" => Matcher::Contains(value.to_string()),
            "startsWith" => Matcher::StartsWith(value.to_string()),
            "endsWith" => Matcher::EndsWith(value.to_string()),
            ">" => value.parse().map(Matcher::Greater).unwrap_or(Matcher::Never),
            "<" => value.parse().map(Matcher::Less).unwrap_or(Matcher::Never),
            "exclude" => Matcher::Exclude(value.to_string()),
            _ => Matcher::Never,
        }
    }

    fn test(&self, actual: &str) -> bool {
        match self {
            Matcher::Glob(re) | Matcher::Regex(re) => re.is_match(actual),
            Matcher::Equals(v) => actual == v,
            Matcher::Contains(v) => actual.contains(v.as_str()),
            Matcher::StartsWith(v) => actual.starts_with(v.as_str()),
            Matcher::EndsWith(v) => actual.ends_with(v.as_str()),
            Matcher::Greater(v) => actual.trim().parse::<f64>().is_ok_and(|a| a > *v),
            Matcher::Less(v) => actual.trim().parse::<f64>().is_ok_and(|a| a < *v),
            Matcher::Exclude(v) => actual != v,
            Matcher::Never => false,
        }
    }
}

/// Ant-style path pattern as an anchored regex.
///
/// `?` is one character, `*` a run inside one segment, `**` a run across
/// segments. A `/**` segment also matches nothing, so `/a/**` accepts `/a`.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '/' if chars.get(i + 1) == Some(&'*')
                && chars.get(i + 2) == Some(&'*')
                && matches!(chars.get(i + 3), None | Some('/')) =>
            {
                out.push_str("(?:/.*)?");
                i += 3;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 2;
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// A condition with its operator and pattern parsed ahead of time.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    param_type: Option<ParamType>,
    param_name: String,
    matcher: Matcher,
}

impl CompiledCondition {
    pub fn compile(condition: &Condition) -> Self {
        let param_type = ParamType::parse(&condition.param_type);
        let matcher = Matcher::compile(&condition.operator, &condition.param_value);
        if param_type.is_none() || matches!(matcher, Matcher::Never) {
            debug!(
                "condition `{}` ({} {} {}) can never match",
                condition.id, condition.param_type, condition.operator, condition.param_value
            );
        }
        Self {
            param_type,
            param_name: condition.param_name.trim().to_string(),
            matcher,
        }
    }

    /// Missing request attributes never match.
    pub fn evaluate(&self, ctx: &RequestContext) -> bool {
        let Some(param_type) = self.param_type else {
            return false;
        };
        match param_type.extract(&self.param_name, ctx) {
            Some(actual) => self.matcher.test(&actual),
            None => false,
        }
    }
}

/// Evaluates a condition without a pre-compiled index.
pub fn evaluate(condition: &Condition, ctx: &RequestContext) -> bool {
    CompiledCondition::compile(condition).evaluate(ctx)
}
