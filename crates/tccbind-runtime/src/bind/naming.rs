//! Symbol naming rules
//!
//! Symbol names come from templates such as `{class:L}_{mutator}_{field:L}`.
//! A token may carry a format specifier after a colon; its characters are
//! applied left to right:
//!
//! - `U` upper-cases the whole value
//! - `L` lower-cases the whole value
//! - `u` upper-cases the first character
//! - `l` lower-cases the first character
//! - `s` inserts `_` before every inner upper-case character
//!
//! Unknown specifier characters are ignored.

use crate::bind::describe::{MemberDescriptor, MemberKind};
use crate::error::BindError;
use crate::marshal::HostType;
use tccbind_config::NamingConfig;

pub const DEFAULT_METHOD: &str = "{class:L}_{method:L}";
pub const DEFAULT_PROPERTY: &str = "{class:L}_{mutator}_{property:L}";
pub const DEFAULT_FIELD: &str = "{class:L}_{mutator}_{field:L}";
pub const DEFAULT_CONSTRUCTOR: &str = "{class:L}_new{args}";
pub const DEFAULT_RELEASE_SYMBOL: &str = "gc_free";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Class,
    Method,
    Property,
    Field,
    Mutator,
    Args,
}

impl Token {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "class" => Some(Token::Class),
            "method" => Some(Token::Method),
            "property" => Some(Token::Property),
            "field" => Some(Token::Field),
            "mutator" => Some(Token::Mutator),
            "args" => Some(Token::Args),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Token { token: Token, spec: String },
}

/// A parsed naming template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

/// Values substituted into a template
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    pub class: String,
    pub member: String,
    pub mutator: String,
    pub args: String,
}

impl NameContext {
    pub fn for_member(member: &MemberDescriptor) -> Self {
        Self {
            class: member.owner.name().to_string(),
            member: member.name.clone(),
            mutator: member.kind.mutator().unwrap_or_default().to_string(),
            args: encode_args(&member.params),
        }
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, BindError> {
        let invalid = |reason: String| BindError::InvalidTemplate {
            template: source.to_string(),
            reason,
        };

        let mut parts = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| invalid("unterminated token".to_string()))?;
            let body = &after[..close];
            let (name, spec) = body.split_once(':').unwrap_or((body, ""));
            let token =
                Token::parse(name).ok_or_else(|| invalid(format!("unknown token '{}'", name)))?;
            parts.push(Part::Token {
                token,
                spec: spec.to_string(),
            });
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched '}'".to_string()));
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &NameContext) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Token { token, spec } => {
                    let value = match token {
                        Token::Class => &ctx.class,
                        Token::Method | Token::Property | Token::Field => &ctx.member,
                        Token::Mutator => &ctx.mutator,
                        Token::Args => &ctx.args,
                    };
                    out.push_str(&apply_format(value, spec));
                }
            }
        }
        out
    }
}

/// Apply a format specifier to a value
pub fn apply_format(value: &str, spec: &str) -> String {
    let mut symbol = value.to_string();
    for c in spec.chars() {
        symbol = match c {
            'U' => symbol.to_uppercase(),
            'L' => symbol.to_lowercase(),
            'u' => map_first(&symbol, |c| c.to_uppercase().collect()),
            'l' => map_first(&symbol, |c| c.to_lowercase().collect()),
            's' => split_upper(&symbol),
            _ => symbol,
        };
    }
    symbol
}

fn map_first(value: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => f(first) + chars.as_str(),
        None => String::new(),
    }
}

fn split_upper(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for (i, c) in value.chars().enumerate() {
        if i > 0 && c.is_uppercase() {
            out.push('_');
        }
        out.push(c);
    }
    out
}

/// Encode a parameter list for constructor symbols: `_` followed by the
/// lower-cased type names, or nothing when there are no parameters
pub fn encode_args(params: &[HostType]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut out = String::from("_");
    for ty in params {
        out.push_str(&ty.name().to_lowercase());
    }
    out
}

/// Check that a symbol can be referenced from C
pub fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Templates used to name every kind of member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRules {
    method: Template,
    property: Template,
    field: Template,
    constructor: Template,
    release_symbol: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            method: builtin(DEFAULT_METHOD, Token::Method),
            property: builtin(DEFAULT_PROPERTY, Token::Property),
            field: builtin(DEFAULT_FIELD, Token::Field),
            constructor: Template {
                source: DEFAULT_CONSTRUCTOR.to_string(),
                parts: vec![
                    Part::Token {
                        token: Token::Class,
                        spec: "L".to_string(),
                    },
                    Part::Literal("_new".to_string()),
                    Part::Token {
                        token: Token::Args,
                        spec: String::new(),
                    },
                ],
            },
            release_symbol: DEFAULT_RELEASE_SYMBOL.to_string(),
        }
    }
}

/// Built-in `{class:L}_[{mutator}_]{member:L}` templates
fn builtin(source: &str, member: Token) -> Template {
    let mut parts = vec![
        Part::Token {
            token: Token::Class,
            spec: "L".to_string(),
        },
        Part::Literal("_".to_string()),
    ];
    if member != Token::Method {
        parts.push(Part::Token {
            token: Token::Mutator,
            spec: String::new(),
        });
        parts.push(Part::Literal("_".to_string()));
    }
    parts.push(Part::Token {
        token: member,
        spec: "L".to_string(),
    });
    Template {
        source: source.to_string(),
        parts,
    }
}

impl NamingRules {
    /// Build rules from a `[naming]` config section, keeping defaults for unset entries
    pub fn from_config(config: &NamingConfig) -> Result<Self, BindError> {
        let mut rules = Self::default();
        if let Some(template) = &config.method {
            rules.method = Template::parse(template)?;
        }
        if let Some(template) = &config.property {
            rules.property = Template::parse(template)?;
        }
        if let Some(template) = &config.field {
            rules.field = Template::parse(template)?;
        }
        if let Some(template) = &config.constructor {
            rules.constructor = Template::parse(template)?;
        }
        if let Some(symbol) = &config.release_symbol {
            rules = rules.with_release_symbol(symbol)?;
        }
        Ok(rules)
    }

    pub fn with_method(mut self, template: &str) -> Result<Self, BindError> {
        self.method = Template::parse(template)?;
        Ok(self)
    }

    pub fn with_property(mut self, template: &str) -> Result<Self, BindError> {
        self.property = Template::parse(template)?;
        Ok(self)
    }

    pub fn with_field(mut self, template: &str) -> Result<Self, BindError> {
        self.field = Template::parse(template)?;
        Ok(self)
    }

    pub fn with_constructor(mut self, template: &str) -> Result<Self, BindError> {
        self.constructor = Template::parse(template)?;
        Ok(self)
    }

    pub fn with_release_symbol(mut self, symbol: &str) -> Result<Self, BindError> {
        if !is_c_identifier(symbol) {
            return Err(BindError::InvalidSymbol(symbol.to_string()));
        }
        self.release_symbol = symbol.to_string();
        Ok(self)
    }

    pub fn release_symbol(&self) -> &str {
        &self.release_symbol
    }

    /// Template that names members of this kind
    pub fn template_for(&self, kind: MemberKind) -> &Template {
        match kind {
            MemberKind::Constructor => &self.constructor,
            MemberKind::Method => &self.method,
            MemberKind::PropertyGetter | MemberKind::PropertySetter => &self.property,
            MemberKind::FieldGetter | MemberKind::FieldSetter => &self.field,
        }
    }

    /// Symbol name for a member; an explicit override always wins
    pub fn symbol_for(&self, member: &MemberDescriptor) -> String {
        if let Some(symbol) = &member.symbol {
            return symbol.clone();
        }
        self.template_for(member.kind)
            .render(&NameContext::for_member(member))
    }
}
