use crate::core::{PRIMARY_CATEGORY, Value};
use crate::identity::IdentifierValue;
use crate::naming::quote_ident;

/// Role a column plays in shard routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Primary,
    /// References rows of `category`'s key space.
    Foreign { category: String },
    /// Not a key; values are never translated.
    Plain,
}

impl KeyKind {
    pub fn foreign(category: &str) -> Self {
        Self::Foreign {
            category: category.to_string(),
        }
    }

    pub fn is_key(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// The key space values of this column belong to, if it is a key.
    /// Primary keys belong to the key space of the query itself.
    pub fn category<'a>(&'a self, own: &'a str) -> Option<&'a str> {
        match self {
            Self::Primary => Some(own),
            Self::Foreign { category } => Some(category),
            Self::Plain => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyColumn {
    pub name: String,
    pub kind: KeyKind,
    /// Integer ids are shard-relative; other key types (natural string keys)
    /// are opaque.
    pub integral: bool,
}

impl KeyColumn {
    pub fn primary(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: KeyKind::Primary,
            integral: true,
        }
    }

    pub fn foreign(name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: KeyKind::foreign(category),
            integral: true,
        }
    }

    /// A foreign key into the primary key space.
    pub fn references(name: &str) -> Self {
        Self::foreign(name, PRIMARY_CATEGORY)
    }

    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: KeyKind::Plain,
            integral: false,
        }
    }

    /// Marks the key as non-integral (e.g. a string natural key).
    pub fn opaque(mut self) -> Self {
        self.integral = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOperator {
    Equality,
    Inclusion,
    Negation,
}

/// A condition on a key column as the caller wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPredicate {
    pub column: KeyColumn,
    pub operator: PredicateOperator,
    pub values: Vec<Value>,
}

impl QueryPredicate {
    pub fn eq(column: KeyColumn, value: impl Into<Value>) -> Self {
        Self {
            column,
            operator: PredicateOperator::Equality,
            values: vec![value.into()],
        }
    }

    pub fn in_list<V: Into<Value>>(column: KeyColumn, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            column,
            operator: PredicateOperator::Inclusion,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<V: Into<Value>>(column: KeyColumn, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            column,
            operator: PredicateOperator::Negation,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Equality and inclusion on a key column can pin a query to shards;
    /// negation never can.
    pub fn is_shard_determining(&self) -> bool {
        self.column.kind.is_key() && self.operator != PredicateOperator::Negation
    }

    pub fn is_empty_inclusion(&self) -> bool {
        self.operator == PredicateOperator::Inclusion && self.values.is_empty()
    }
}

/// A predicate rewritten for one target shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPredicate {
    pub column: String,
    pub operator: PredicateOperator,
    pub values: Vec<IdentifierValue>,
}

impl BoundPredicate {
    /// Renders a parameterized condition, pushing its values onto `binds`.
    ///
    /// Malformed values bind as NULL in equality and inclusion, so they match
    /// nothing, and are left out of negations, which they could never
    /// exclude anything from.
    pub fn to_sql(&self, binds: &mut Vec<Value>) -> String {
        let column = quote_ident(&self.column);
        let values: Vec<&IdentifierValue> = match self.operator {
            PredicateOperator::Negation => self
                .values
                .iter()
                .filter(|v| !matches!(v, IdentifierValue::Malformed(_)))
                .collect(),
            _ => self.values.iter().collect(),
        };

        match (self.operator, values.as_slice()) {
            (PredicateOperator::Inclusion, []) => "1 = 0".to_string(),
            (PredicateOperator::Negation, []) => "1 = 1".to_string(),
            (PredicateOperator::Equality, [value, ..]) | (PredicateOperator::Inclusion, [value]) => {
                binds.push(value.to_value());
                format!("{} = ${}", column, binds.len())
            }
            (PredicateOperator::Equality, []) => "1 = 0".to_string(),
            (PredicateOperator::Negation, [value]) => {
                binds.push(value.to_value());
                format!("{} <> ${}", column, binds.len())
            }
            (operator, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|value| {
                        binds.push(value.to_value());
                        format!("${}", binds.len())
                    })
                    .collect();
                let keyword = if operator == PredicateOperator::Negation { "NOT IN" } else { "IN" };
                format!("{} {} ({})", column, keyword, placeholders.join(", "))
            }
        }
    }
}
