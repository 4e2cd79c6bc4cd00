use serde::Deserialize;
use tracing::warn;
use warden_application::CurrentUserRole;
use warden_core::{AppError, AppResult};

pub(super) const COUNT_SEGMENT: &str = "$count";
const FILTER_BY_CURRENT_USER: &str = "filterByCurrentUser";
const LEGACY_FUNCTION_NAMESPACE: &str = "microsoft.graph.";

#[derive(Debug, Deserialize)]
pub struct CollectionPath {
    pub provider: String,
    pub collection: String,
}

#[derive(Debug, Deserialize)]
pub struct EntityPath {
    pub provider: String,
    pub collection: String,
    pub segment: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigationPath {
    pub provider: String,
    pub collection: String,
    pub segment: String,
    pub navigation: String,
}

#[derive(Debug, Deserialize)]
pub struct NestedPath {
    pub provider: String,
    pub collection: String,
    pub segment: String,
    pub navigation: String,
    pub item: String,
}

/// Segment following a collection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Segment {
    Count,
    FilterByCurrentUser(CurrentUserRole),
    Key(String),
}

impl Segment {
    pub(super) fn parse(raw: &str) -> AppResult<Self> {
        if raw == COUNT_SEGMENT {
            return Ok(Self::Count);
        }

        let (function, namespaced) = match raw.strip_prefix(LEGACY_FUNCTION_NAMESPACE) {
            Some(function) => (function, true),
            None => (raw, false),
        };
        let Some(arguments) = function.strip_prefix(FILTER_BY_CURRENT_USER) else {
            return Ok(Self::Key(raw.to_owned()));
        };
        if namespaced {
            warn!(
                segment = raw,
                "namespaced filterByCurrentUser alias is deprecated"
            );
        }

        let on = arguments
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|rest| rest.trim().strip_prefix("on"))
            .and_then(|rest| rest.trim_start().strip_prefix('='))
            .and_then(|rest| rest.trim().strip_prefix('\''))
            .and_then(|rest| rest.strip_suffix('\''))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "'{raw}' must have the form filterByCurrentUser(on='principal|approver|creator')"
                ))
            })?;

        Ok(Self::FilterByCurrentUser(on.parse()?))
    }

    /// Returns the entity key, rejecting function and count segments.
    pub(super) fn into_key(self) -> AppResult<String> {
        match self {
            Self::Key(id) => Ok(id),
            Self::Count | Self::FilterByCurrentUser(_) => Err(AppError::NotSupported(
                "the operation requires an entity key".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Segment {
        Segment::parse(raw).unwrap_or_else(|error| panic!("'{raw}' should parse: {error}"))
    }

    #[test]
    fn count_and_keys_are_recognised() {
        assert_eq!(parse("$count"), Segment::Count);
        assert_eq!(parse("abc-123"), Segment::Key("abc-123".to_owned()));
    }

    #[test]
    fn filter_function_parses_every_role() {
        assert_eq!(
            parse("filterByCurrentUser(on='principal')"),
            Segment::FilterByCurrentUser(CurrentUserRole::Principal)
        );
        assert_eq!(
            parse("filterByCurrentUser(on = 'approver')"),
            Segment::FilterByCurrentUser(CurrentUserRole::Approver)
        );
        assert_eq!(
            parse("microsoft.graph.filterByCurrentUser(on='creator')"),
            Segment::FilterByCurrentUser(CurrentUserRole::Creator)
        );
    }

    #[test]
    fn malformed_filter_function_is_invalid_input() {
        for raw in [
            "filterByCurrentUser",
            "filterByCurrentUser()",
            "filterByCurrentUser(on=principal)",
            "filterByCurrentUser(on='owner')",
        ] {
            assert!(
                matches!(Segment::parse(raw), Err(AppError::Validation(_))),
                "'{raw}' should be rejected"
            );
        }
    }

    #[test]
    fn namespaced_ids_that_are_not_functions_stay_keys() {
        assert_eq!(
            parse("microsoft.graph.something"),
            Segment::Key("microsoft.graph.something".to_owned())
        );
    }
}
