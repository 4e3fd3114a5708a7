//! Declarative JSON-shape validation.
//!
//! A validation series is an ordered list of (JSON-pointer path,
//! predicate) checks. [`validate`] walks the series and returns false as
//! soon as any path is absent or any predicate rejects. This is used
//! only at handshake and control-message boundaries; it makes no claim
//! to being a schema language.

use serde_json::Value;

/// A single shape check: the value at `path` must exist and satisfy the
/// predicate.
pub struct Check {
    pub path: &'static str,
    pub predicate: Predicate,
}

impl Check {
    pub fn new(path: &'static str, predicate: Predicate) -> Self {
        Self { path, predicate }
    }
}

/// The predicates a series can apply to a located value.
pub enum Predicate {
    /// The path exists; the value itself is unconstrained.
    Exists,
    /// The value is a non-empty string.
    NotEmpty,
    IsBool,
    IsNumber,
    /// The value equals one of the given literals.
    Matches(Vec<Value>),
    /// The value is numeric and at least `k`.
    GreaterEq(i64),
    /// The value equals the given literal.
    Compare(Value),
    /// The inner predicate rejects.
    Inverse(Box<Predicate>),
}

impl Predicate {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Predicate::Exists => true,
            Predicate::NotEmpty => value.as_str().is_some_and(|s| !s.is_empty()),
            Predicate::IsBool => value.is_boolean(),
            Predicate::IsNumber => value.is_number(),
            Predicate::Matches(literals) => literals.iter().any(|l| l == value),
            Predicate::GreaterEq(k) => value.as_f64().is_some_and(|n| n >= *k as f64),
            Predicate::Compare(literal) => literal == value,
            Predicate::Inverse(inner) => !inner.accepts(value),
        }
    }
}

/// Run a validation series against a value.
pub fn validate(value: &Value, series: &[Check]) -> bool {
    series.iter().all(|check| {
        value
            .pointer(check.path)
            .is_some_and(|v| check.predicate.accepts(v))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subject() -> Value {
        json!({
            "Dietrich": "Buxtehude",
            "famous": true,
            "instrument": "organ",
            "year": 1637
        })
    }

    #[test]
    fn compare_and_is_bool() {
        assert!(validate(
            &subject(),
            &[
                Check::new("/Dietrich", Predicate::Compare(json!("Buxtehude"))),
                Check::new("/famous", Predicate::IsBool),
            ]
        ));
    }

    #[test]
    fn absent_path_fails() {
        assert!(!validate(
            &subject(),
            &[Check::new("/operas", Predicate::Exists)]
        ));
    }

    #[test]
    fn matches_literal_set() {
        assert!(validate(
            &subject(),
            &[Check::new(
                "/instrument",
                Predicate::Matches(vec![
                    json!("viola da gamba"),
                    json!("organ"),
                    json!("lute")
                ])
            )]
        ));
        assert!(!validate(
            &subject(),
            &[Check::new(
                "/instrument",
                Predicate::Matches(vec![json!("harpsichord")])
            )]
        ));
    }

    #[test]
    fn greater_eq_boundary() {
        assert!(!validate(
            &subject(),
            &[Check::new("/year", Predicate::GreaterEq(1685))]
        ));
        assert!(validate(
            &subject(),
            &[Check::new("/year", Predicate::GreaterEq(1637))]
        ));
        assert!(validate(
            &subject(),
            &[Check::new("/year", Predicate::GreaterEq(1600))]
        ));
    }

    #[test]
    fn inverse_negates() {
        assert!(!validate(
            &subject(),
            &[Check::new(
                "/famous",
                Predicate::Inverse(Box::new(Predicate::Compare(json!(true))))
            )]
        ));
    }

    #[test]
    fn not_empty_requires_string() {
        assert!(validate(
            &subject(),
            &[Check::new("/instrument", Predicate::NotEmpty)]
        ));
        assert!(!validate(
            &json!({ "instrument": "" }),
            &[Check::new("/instrument", Predicate::NotEmpty)]
        ));
        assert!(!validate(
            &json!({ "instrument": 4 }),
            &[Check::new("/instrument", Predicate::NotEmpty)]
        ));
    }

    #[test]
    fn root_pointer_addresses_whole_value() {
        assert!(validate(&json!("a message"), &[Check::new("", Predicate::NotEmpty)]));
        assert!(!validate(&json!(""), &[Check::new("", Predicate::NotEmpty)]));
        assert!(!validate(
            &json!({ "a": 1 }),
            &[Check::new("", Predicate::NotEmpty)]
        ));
    }

    #[test]
    fn series_short_circuits_in_order() {
        // The second check would pass, but the first one's absence fails
        // the series.
        assert!(!validate(
            &subject(),
            &[
                Check::new("/missing", Predicate::Exists),
                Check::new("/famous", Predicate::IsBool),
            ]
        ));
    }
}
