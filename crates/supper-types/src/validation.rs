use thiserror::Error;

use crate::ids;

/// A rejected input. `field` names the offending input field and becomes
/// part of the machine-readable error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field path, e.g. `options[1].mealID`.
    pub fn nested(self, prefix: impl std::fmt::Display) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            message: self.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        for (i, item) in self.iter().enumerate() {
            item.validate().map_err(|e| e.nested(format!("[{}]", i)))?;
        }
        Ok(())
    }
}

pub fn required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be blank"));
    }
    Ok(())
}

pub fn length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::new(
            field,
            format!("length must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

pub fn max_length(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    length(field, value, 0, max)
}

/// Non-blank, well-formed identifier reference.
pub fn id_ref(field: &str, value: &str) -> Result<(), ValidationError> {
    required(field, value)?;
    if !ids::is_well_formed(value) {
        return Err(ValidationError::new(field, "is not a valid identifier"));
    }
    Ok(())
}

pub fn optional_id_ref(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) => id_ref(field, v),
        None => Ok(()),
    }
}

/// Update inputs treat an empty string as "leave unchanged", so only
/// non-empty values are checked.
pub fn optional_length(field: &str, value: Option<&str>, min: usize, max: usize) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_empty() => length(field, v, min, max),
        _ => Ok(()),
    }
}

pub fn range<T: PartialOrd + std::fmt::Display>(field: &str, value: T, min: T, max: T) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

pub fn email(field: &str, value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid || trimmed.len() > 320 {
        return Err(ValidationError::new(field, "must be an email address"));
    }
    Ok(())
}

pub fn url(field: &str, value: &str) -> Result<(), ValidationError> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ValidationError::new(field, "must be an http(s) URL")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_are_rejected() {
        assert!(required("name", "   ").is_err());
        assert!(required("name", "soup").is_ok());
    }

    #[test]
    fn length_counts_characters() {
        assert!(length("name", "héllo", 5, 5).is_ok());
        assert_eq!(length("name", "ab", 3, 10).unwrap_err().field, "name");
    }

    #[test]
    fn vec_validation_reports_index() {
        struct Item(&'static str);
        impl Validate for Item {
            fn validate(&self) -> Result<(), ValidationError> {
                required("name", self.0)
            }
        }
        let err = vec![Item("a"), Item("")].validate().unwrap_err();
        assert_eq!(err.field, "[1].name");
    }

    #[test]
    fn email_and_url_checks() {
        assert!(email("to", "a@b.co").is_ok());
        assert!(email("to", "nope").is_err());
        assert!(url("url", "https://hooks.example.com/x").is_ok());
        assert!(url("url", "ftp://example.com").is_err());
        assert!(url("url", "https://").is_err());
    }
}
