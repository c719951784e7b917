//! Dynamic property values.
//!
//! Observed properties are dynamically typed: a [`Value`] is a scalar, a
//! string, or a handle to another [`Observed`] object. Object values compare
//! by handle identity, which is what observer chains use to decide whether an
//! intermediate object was replaced.

use std::fmt;

use crate::observed::Observed;

/// A dynamically typed property value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Absent / unset.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// Owned string.
    Text(String),
    /// Handle to a nested observable object.
    Object(Observed),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            // Objects compare by identity, not structure. A freshly built
            // object with identical contents is still a replacement.
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// Whether this value is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The name of this value's variant, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Object(_) => "object",
        }
    }

    /// Boolean view, `None` for other variants.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view, `None` for other variants.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Float view, `None` for other variants.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view, `None` for other variants.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Object view, `None` for other variants.
    #[must_use]
    pub fn as_object(&self) -> Option<&Observed> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Strict boolean extraction.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] when the value is not a `Bool`.
    pub fn try_bool(&self) -> Result<bool, ValueError> {
        self.as_bool().ok_or_else(|| self.wrong_type("bool"))
    }

    /// Strict integer extraction.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] when the value is not an `Int`.
    pub fn try_int(&self) -> Result<i64, ValueError> {
        self.as_int().ok_or_else(|| self.wrong_type("int"))
    }

    /// Strict float extraction.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] when the value is not a `Float`.
    pub fn try_float(&self) -> Result<f64, ValueError> {
        self.as_float().ok_or_else(|| self.wrong_type("float"))
    }

    /// Strict string extraction.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] when the value is not a `Text`.
    pub fn try_text(&self) -> Result<&str, ValueError> {
        self.as_text().ok_or_else(|| self.wrong_type("text"))
    }

    /// Strict object extraction.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::WrongType`] when the value is not an `Object`.
    pub fn try_object(&self) -> Result<&Observed, ValueError> {
        self.as_object().ok_or_else(|| self.wrong_type("object"))
    }

    fn wrong_type(&self, expected: &'static str) -> ValueError {
        ValueError::WrongType {
            expected,
            found: self.type_name(),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Observed> for Value {
    fn from(o: Observed) -> Self {
        Value::Object(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Errors from strict [`Value`] extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value held a different variant than requested.
    WrongType {
        /// The requested variant.
        expected: &'static str,
        /// The variant actually present.
        found: &'static str,
    },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongType { expected, found } => {
                write!(f, "expected {expected} value, found {found}")
            }
        }
    }
}

impl std::error::Error for ValueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_equality() {
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Int(4));
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::from("a"), Value::Text("a".to_string()));
    }

    #[test]
    fn object_equality_is_identity() {
        let a = Observed::new();
        let b = Observed::new();
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn strict_extraction_errors_name_both_types() {
        let err = Value::Int(1).try_text().unwrap_err();
        assert_eq!(
            err,
            ValueError::WrongType {
                expected: "text",
                found: "int",
            }
        );
        assert_eq!(err.to_string(), "expected text value, found int");
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(2i64)), Value::Int(2));
    }
}
