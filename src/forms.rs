//! Field-level validation of submitted form values.
//!
//! A `Form` wraps the raw values and accumulates per-field messages as rules
//! run; callers check `valid()` at the end and echo `errors` back to the user.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern compiles")
});

pub const MSG_REQUIRED: &str = "This field cannot be blank";
pub const MSG_EMAIL: &str = "Invalid email address";

/// Field name → messages, in the order the rules produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// First message for `field`, the one a form shows next to the input.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn all(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl std::fmt::Display for FormErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for m in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{field}: {m}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Form {
    values: BTreeMap<String, String>,
    pub errors: FormErrors,
}

impl Form {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            errors: FormErrors::default(),
        }
    }

    /// Raw value, `""` when absent.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    /// Whether the field was submitted with a non-blank value.
    pub fn has(&self, field: &str) -> bool {
        !self.get(field).trim().is_empty()
    }

    pub fn required(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            if !self.has(field) {
                self.errors.add(field, MSG_REQUIRED);
            }
        }
        self
    }

    /// Counts characters, not bytes.
    pub fn min_length(&mut self, field: &str, min: usize) -> &mut Self {
        if self.get(field).trim().chars().count() < min {
            self.errors
                .add(field, format!("This field must be at least {min} characters long"));
        }
        self
    }

    pub fn max_length(&mut self, field: &str, max: usize) -> &mut Self {
        if self.get(field).chars().count() > max {
            self.errors
                .add(field, format!("This field must be at most {max} characters long"));
        }
        self
    }

    pub fn is_email(&mut self, field: &str) -> &mut Self {
        if !EMAIL.is_match(self.get(field).trim()) {
            self.errors.add(field, MSG_EMAIL);
        }
        self
    }

    /// Record `message` against `field` unless `ok`.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.add(field, message);
        }
        self
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> FormErrors {
        self.errors
    }
}
