//! Query expression tree
//!
//! Every operator has two accepted wire spellings, a `$`-prefixed alias
//! (`$and`, `$getField`) and a trailing-underscore canonical name (`and_`,
//! `get_field_`). Both deserialize into the same variant; nothing downstream
//! ever sees which spelling was used. Serialization always emits the alias.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Root of a query: `{"$expr": <operation>}` / `{"expr_": <operation>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "$expr", alias = "expr_")]
    pub expr: Expr,
}

impl Query {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }
}

/// Target type of a `$convert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvertTo {
    Double,
    Int,
    String,
    Bool,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertSpec {
    pub input: Box<Expr>,
    pub to: ConvertTo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsSpec {
    pub input: Box<Expr>,
    pub substr: Box<Expr>,
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    #[serde(rename = "$literal", alias = "literal_")]
    Literal(JsonValue),

    #[serde(rename = "$getField", alias = "get_field_")]
    GetField(String),

    #[serde(rename = "$convert", alias = "convert_")]
    Convert(ConvertSpec),

    #[serde(rename = "$and", alias = "and_")]
    And(Vec<Expr>),

    #[serde(rename = "$or", alias = "or_")]
    Or(Vec<Expr>),

    #[serde(rename = "$not", alias = "not_")]
    Not((Box<Expr>,)),

    #[serde(rename = "$eq", alias = "eq_")]
    Eq((Box<Expr>, Box<Expr>)),

    #[serde(rename = "$gt", alias = "gt_")]
    Gt((Box<Expr>, Box<Expr>)),

    #[serde(rename = "$gte", alias = "gte_")]
    Gte((Box<Expr>, Box<Expr>)),

    #[serde(rename = "$in", alias = "in_")]
    In((Box<Expr>, Vec<Expr>)),

    #[serde(rename = "$contains", alias = "contains_")]
    Contains(ContainsSpec),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Self::GetField(path.into())
    }

    pub fn lit(value: impl Into<JsonValue>) -> Self {
        Self::Literal(value.into())
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::Eq((Box::new(lhs), Box::new(rhs)))
    }

    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Self::Gt((Box::new(lhs), Box::new(rhs)))
    }

    pub fn gte(lhs: Expr, rhs: Expr) -> Self {
        Self::Gte((Box::new(lhs), Box::new(rhs)))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Expr) -> Self {
        Self::Not((Box::new(inner),))
    }

    pub fn is_in(lhs: Expr, values: Vec<Expr>) -> Self {
        Self::In((Box::new(lhs), values))
    }

    pub fn contains(input: Expr, substr: impl Into<String>, case_insensitive: bool) -> Self {
        Self::Contains(ContainsSpec {
            input: Box::new(input),
            substr: Box::new(Self::lit(substr.into())),
            case_insensitive,
        })
    }

    pub fn convert(input: Expr, to: ConvertTo) -> Self {
        Self::Convert(ConvertSpec {
            input: Box::new(input),
            to,
        })
    }

    /// `field == literal` shorthand
    pub fn field_eq(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::eq(Self::field(path), Self::lit(value))
    }
}
