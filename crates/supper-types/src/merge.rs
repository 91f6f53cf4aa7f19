//! Partial-update helpers. Absent input fields leave the target untouched;
//! empty strings count as absent. Nullable targets are cleared only by an
//! explicit `null`.

pub fn string(target: &mut String, value: Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            *target = v;
        }
    }
}

pub fn value<T>(target: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *target = v;
    }
}

pub fn nullable<T>(target: &mut Option<T>, value: Option<Option<T>>) {
    if let Some(v) = value {
        *target = v;
    }
}

/// Overwrites a list only when a non-empty list is supplied.
pub fn list<T>(target: &mut Vec<T>, value: Option<Vec<T>>) {
    if let Some(v) = value {
        if !v.is_empty() {
            *target = v;
        }
    }
}

/// Implemented by entities that accept partial updates.
pub trait Updatable {
    type Input;

    /// Applies the non-absent fields of `input`.
    fn apply(&mut self, input: Self::Input);

    /// An update input that reproduces the entity's current state.
    fn to_update_input(&self) -> Self::Input;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_ignored() {
        let mut name = "stew".to_string();
        string(&mut name, Some(String::new()));
        assert_eq!(name, "stew");
        string(&mut name, Some("soup".into()));
        assert_eq!(name, "soup");
        string(&mut name, None);
        assert_eq!(name, "soup");
    }

    #[test]
    fn nullable_clears_only_on_explicit_null() {
        let mut notes = Some("x".to_string());
        nullable(&mut notes, None);
        assert_eq!(notes.as_deref(), Some("x"));
        nullable(&mut notes, Some(None));
        assert_eq!(notes, None);
    }

    #[test]
    fn zero_scalars_are_applied_when_present() {
        let mut rank = 3u32;
        value(&mut rank, Some(0));
        assert_eq!(rank, 0);
        value(&mut rank, None);
        assert_eq!(rank, 0);
    }
}
