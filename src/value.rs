use std::collections::BTreeMap;

/// A data value a template can be rendered against.
///
/// `Map` uses a `BTreeMap` so that iteration order (and therefore rendered
/// output) is deterministic regardless of insertion order.
///
/// # Example
///
/// ```rust
/// use minibars::Value;
///
/// let data = Value::from_iter([
///     ("firstname", Value::from("Yehuda")),
///     ("lastname", Value::from("Katz")),
/// ]);
/// assert!(data.is_truthy());
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A string explicitly marked as already escaped; the escaper passes it
    /// through unchanged.
    Safe(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Marks a string as pre-escaped so escaping output leaves it alone.
    pub fn safe<T: Into<String>>(content: T) -> Self {
        Self::Safe(content.into())
    }

    /// Truthiness for conditional helpers: the value itself, except that
    /// strings, sequences and mappings are additionally falsy when empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(_) | Self::Float(_) => true,
            Self::String(s) | Self::Safe(s) => !s.is_empty(),
            Self::Array(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }

    /// True for `Null` and for empty strings/sequences/mappings; used by
    /// `each` to decide whether to fall back to the else branch.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => false,
            Self::String(s) | Self::Safe(s) => s.is_empty(),
            Self::Array(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) | Self::Safe(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// Single keyed access with a path segment: a map key match, or a
    /// numeric index into a sequence.
    pub(crate) fn index_str(&self, segment: &str) -> Option<&Value> {
        match self {
            Self::Map(map) => map.get(segment),
            Self::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_)
            | Self::Safe(_) => None,
        }
    }

    /// Single keyed/indexed access, as performed by the `lookup` helper.
    pub fn index(&self, key: &Value) -> Option<&Value> {
        match self {
            Self::Map(map) => map.get(&key.to_string()),
            Self::Array(items) => match key {
                Value::Int(i) => usize::try_from(*i).ok().and_then(|i| items.get(i)),
                Value::String(s) | Value::Safe(s) => {
                    s.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                Value::Null
                | Value::Bool(_)
                | Value::Float(_)
                | Value::Array(_)
                | Value::Map(_) => None,
            },
            Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_)
            | Self::Safe(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            // `{}` on f64 already drops a zero fraction, so 90.0 prints "90".
            Self::Float(n) => write!(f, "{}", n),
            Self::String(s) | Self::Safe(s) => f.write_str(s),
            Self::Array(items) => {
                let mut first = true;
                for item in items {
                    if !first {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                    first = false;
                }
                Ok(())
            }
            Self::Map(_) => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
