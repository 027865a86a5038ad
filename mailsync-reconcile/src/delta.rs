//! Field-level change detection between a snapshot record and a desired one.
//!
//! The backend reads and writes the same concept in different shapes: some
//! fields are renamed between GET and POST, quotas come back in bytes but go
//! out in MiB, and numbers may come back as strings. [`FieldPolicy`] resolves
//! a desired (write-side) field to its read-side counterpart before comparing.
//!
//! Coercion rules:
//! - JSON-identical values are equal.
//! - Scalars compare by canonical text: integral numbers without a fraction,
//!   booleans as `1`/`0`, null as the empty string.
//! - Arrays compare pairwise with the same rules.
//! - Quota fields compare as integers after converting the read side from
//!   bytes to whole MiB (nearest, half up). An unparsable side is a change.

use serde_json::Value;

use mailsync_core::Record;

/// Bytes per write-side quota unit.
pub const MEBIBYTE: u64 = 1024 * 1024;

/// Per-kind comparison overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPolicy {
    /// Fields never compared (generated secrets, write-only triggers).
    pub ignored: &'static [&'static str],
    /// `(write name, read name)` pairs.
    pub renames: &'static [(&'static str, &'static str)],
    /// Read-side names of fields reported in bytes and written in MiB.
    pub quota_fields: &'static [&'static str],
}

impl FieldPolicy {
    /// No overrides: every field compared as-is.
    pub const PLAIN: FieldPolicy = FieldPolicy {
        ignored: &[],
        renames: &[],
        quota_fields: &[],
    };

    /// Read-side name of a write-side field.
    pub fn read_name<'a>(&self, field: &'a str) -> &'a str {
        self.renames
            .iter()
            .find(|(write, _)| *write == field)
            .map(|(_, read)| *read)
            .unwrap_or(field)
    }

    /// Whether `desired` differs from what `current` holds for `field`.
    pub fn has_delta(&self, field: &str, current: &Record, desired: &Value) -> bool {
        let read = self.read_name(field);
        if self.ignored.contains(&field) || self.ignored.contains(&read) {
            return false;
        }
        let Some(current_value) = current.get(read) else {
            return true;
        };
        if self.quota_fields.contains(&read) {
            return quota_differs(current_value, desired);
        }
        !values_equal(current_value, desired)
    }
}

/// Default change-delta: absent or different after coercion.
pub fn default_delta(field: &str, current: &Record, desired: &Value) -> bool {
    FieldPolicy::PLAIN.has_delta(field, current, desired)
}

/// Equality after type coercion.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        _ => match (canonical_text(a), canonical_text(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Canonical text of a scalar, `None` for containers.
pub fn canonical_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        (f as i64).to_string()
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::String(s) => Some(normalize_numeric_text(s)),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Integer reading of a number or numeric string.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Convert a byte count to whole MiB, rounding to the nearest unit.
pub fn bytes_to_mebibytes(bytes: u64) -> u64 {
    bytes.saturating_add(MEBIBYTE / 2) / MEBIBYTE
}

fn quota_differs(current_bytes: &Value, desired_units: &Value) -> bool {
    let current = as_integer(current_bytes)
        .filter(|b| *b >= 0)
        .map(|b| bytes_to_mebibytes(b as u64));
    let desired = as_integer(desired_units).filter(|u| *u >= 0).map(|u| u as u64);
    match (current, desired) {
        (Some(c), Some(d)) => c != d,
        _ => true,
    }
}

/// `"007"` and `"7"` are the same number; anything non-numeric is kept.
fn normalize_numeric_text(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed.parse::<i64>() {
        Ok(i) => i.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[rstest]
    #[case(json!(1), json!("1"), true)]
    #[case(json!("1"), json!(1), true)]
    #[case(json!(true), json!(1), true)]
    #[case(json!(false), json!("0"), true)]
    #[case(json!(2.0), json!(2), true)]
    #[case(json!(" 5 "), json!(5), true)]
    #[case(json!(null), json!(""), true)]
    #[case(json!("abc"), json!("abc"), true)]
    #[case(json!("abc"), json!("abd"), false)]
    #[case(json!(1), json!(2), false)]
    #[case(json!(["a", 1]), json!(["a", "1"]), true)]
    #[case(json!(["a"]), json!(["a", "b"]), false)]
    #[case(json!(["a"]), json!("a"), false)]
    fn coercing_equality(#[case] a: Value, #[case] b: Value, #[case] equal: bool) {
        assert_eq!(values_equal(&a, &b), equal);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(2_097_152, 2)]
    #[case(1_572_864, 2)] // 1.5 MiB rounds half up
    #[case(1_572_863, 1)]
    #[case(1, 0)]
    fn mebibyte_rounding(#[case] bytes: u64, #[case] units: u64) {
        assert_eq!(bytes_to_mebibytes(bytes), units);
    }

    #[test]
    fn absent_field_is_a_delta() {
        let current = record(json!({"active": 1}));
        assert!(default_delta("name", &current, &json!("x")));
    }

    #[test]
    fn quota_in_bytes_matches_quota_in_units() {
        let policy = FieldPolicy {
            quota_fields: &["quota"],
            ..FieldPolicy::PLAIN
        };
        let current = record(json!({"quota": 2_097_152}));
        assert!(!policy.has_delta("quota", &current, &json!(2)));
        assert!(!policy.has_delta("quota", &current, &json!("2")));
        assert!(policy.has_delta("quota", &current, &json!(3)));

        let as_string = record(json!({"quota": "2097152"}));
        assert!(!policy.has_delta("quota", &as_string, &json!(2)));

        let zero = record(json!({"quota": 0}));
        assert!(!policy.has_delta("quota", &zero, &json!(0)));
    }

    #[test]
    fn unparsable_quota_is_a_delta() {
        let policy = FieldPolicy {
            quota_fields: &["quota"],
            ..FieldPolicy::PLAIN
        };
        let current = record(json!({"quota": "lots"}));
        assert!(policy.has_delta("quota", &current, &json!(2)));
    }

    #[test]
    fn renamed_field_compares_against_read_name() {
        let policy = FieldPolicy {
            renames: &[("mailboxes", "max_num_mboxes_for_domain")],
            ..FieldPolicy::PLAIN
        };
        let current = record(json!({"max_num_mboxes_for_domain": 500}));
        assert!(policy.has_delta("mailboxes", &current, &json!(10000)));
        assert!(!policy.has_delta("mailboxes", &current, &json!(500)));
    }

    #[test]
    fn ignored_fields_never_differ() {
        let policy = FieldPolicy {
            ignored: &["password"],
            ..FieldPolicy::PLAIN
        };
        let current = Record::new();
        assert!(!policy.has_delta("password", &current, &json!("s3cret")));
    }
}
