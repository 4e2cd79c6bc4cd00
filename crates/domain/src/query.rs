//! OData-flavoured query options evaluated over JSON projections.

mod expand;
mod filter;

use std::cmp::Ordering;

use serde_json::{Map, Value};
use warden_core::{AppError, AppResult};

pub use expand::{ExpandItem, parse_expand};
pub use filter::{
    ComparisonOperator, FilterExpression, FilterLiteral, StringFunction, compare_json,
    resolve_path,
};

/// One `$orderby` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Property path split on `/`.
    pub path: Vec<String>,
    /// Sort descending.
    pub descending: bool,
}

impl OrderBy {
    /// Descending order on a top-level property.
    #[must_use]
    pub fn descending(property: &str) -> Self {
        Self {
            path: vec![property.to_owned()],
            descending: true,
        }
    }

    /// Ascending order on a top-level property.
    #[must_use]
    pub fn ascending(property: &str) -> Self {
        Self {
            path: vec![property.to_owned()],
            descending: false,
        }
    }

    fn parse(raw: &str) -> AppResult<Self> {
        let mut parts = raw.split_whitespace();
        let Some(path) = parts.next() else {
            return Err(AppError::Validation("empty $orderby key".to_owned()));
        };
        let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "unsupported $orderby direction '{other}'"
                )));
            }
        };
        if parts.next().is_some() {
            return Err(AppError::Validation(format!(
                "malformed $orderby key '{raw}'"
            )));
        }

        Ok(Self {
            path: path.split('/').map(str::to_owned).collect(),
            descending,
        })
    }
}

/// Parsed query options of a collection read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// `$filter`
    pub filter: Option<FilterExpression>,
    /// `$orderby`
    pub order_by: Vec<OrderBy>,
    /// `$top`
    pub top: Option<usize>,
    /// `$skip`
    pub skip: usize,
    /// `$count`
    pub count: bool,
    /// `$search`, lower-cased.
    pub search: Option<String>,
    /// `$select`
    pub select: Vec<String>,
    /// `$expand`
    pub expand: Vec<ExpandItem>,
}

/// Filtered, ordered and paged rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Rows of the requested page.
    pub rows: Vec<Value>,
    /// Total matching rows when `$count=true`.
    pub count: Option<usize>,
}

impl QueryOptions {
    /// Parses `$`-prefixed query parameters; other parameters are ignored.
    pub fn parse<'a, I>(parameters: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();

        for (name, value) in parameters {
            match name {
                "$filter" => options.filter = Some(FilterExpression::parse(value)?),
                "$orderby" => {
                    options.order_by = value
                        .split(',')
                        .filter(|key| !key.trim().is_empty())
                        .map(OrderBy::parse)
                        .collect::<AppResult<_>>()?;
                }
                "$top" => options.top = Some(parse_count(name, value)?),
                "$skip" => options.skip = parse_count(name, value)?,
                "$count" => {
                    options.count = match value {
                        "true" => true,
                        "false" => false,
                        _ => {
                            return Err(AppError::Validation(format!(
                                "$count must be true or false, got '{value}'"
                            )));
                        }
                    };
                }
                "$search" => {
                    let term = value.trim().trim_matches('"').trim();
                    options.search = (!term.is_empty()).then(|| term.to_lowercase());
                }
                "$select" => {
                    options.select = value
                        .split(',')
                        .map(str::trim)
                        .filter(|property| !property.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                "$expand" => options.expand = parse_expand(value)?,
                _ if name.starts_with('$') => {
                    return Err(AppError::Validation(format!(
                        "unsupported query option '{name}'"
                    )));
                }
                _ => {}
            }
        }

        Ok(options)
    }

    /// Deepest `$expand` chain requested.
    #[must_use]
    pub fn expand_depth(&self) -> usize {
        self.expand.iter().map(ExpandItem::depth).max().unwrap_or(0)
    }

    /// Returns whether the row passes `$filter` and `$search`.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let filtered = self
            .filter
            .as_ref()
            .is_none_or(|filter| filter.matches(row));
        let searched = self.search.as_deref().is_none_or(|term| {
            row.as_object().is_some_and(|object| {
                object.values().any(|value| {
                    value
                        .as_str()
                        .is_some_and(|text| text.to_lowercase().contains(term))
                })
            })
        });

        filtered && searched
    }

    /// Filters, orders and pages rows; `id` is always the final ascending tie-break.
    #[must_use]
    pub fn apply(&self, rows: Vec<Value>, default_order: &OrderBy, max_page_size: usize) -> QueryPage {
        let mut rows: Vec<Value> = rows.into_iter().filter(|row| self.matches(row)).collect();

        let order: Vec<&OrderBy> = if self.order_by.is_empty() {
            vec![default_order]
        } else {
            self.order_by.iter().collect()
        };
        rows.sort_by(|left, right| {
            order
                .iter()
                .map(|key| {
                    let ordering =
                        compare_json(resolve_path(left, &key.path), resolve_path(right, &key.path));
                    if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or_else(|| compare_json(left.get("id"), right.get("id")))
        });

        let count = self.count.then_some(rows.len());
        let top = self.top.unwrap_or(max_page_size).min(max_page_size);
        let rows = rows.into_iter().skip(self.skip).take(top).collect();

        QueryPage { rows, count }
    }

    /// Applies `$select` to a row, keeping `id` and expanded navigations.
    #[must_use]
    pub fn project(&self, row: Value) -> Value {
        if self.select.is_empty() {
            return row;
        }
        let Value::Object(object) = row else {
            return row;
        };

        let kept: Map<String, Value> = object
            .into_iter()
            .filter(|(key, _)| {
                key == "id"
                    || self.select.iter().any(|property| property == key)
                    || self.expand.iter().any(|item| &item.property == key)
            })
            .collect();

        Value::Object(kept)
    }
}

fn parse_count(name: &str, value: &str) -> AppResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| AppError::Validation(format!("{name} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{OrderBy, QueryOptions};

    fn options(parameters: &[(&str, &str)]) -> QueryOptions {
        QueryOptions::parse(parameters.iter().copied())
            .unwrap_or_else(|error| panic!("parse failed: {error}"))
    }

    fn rows() -> Vec<serde_json::Value> {
        vec![
            json!({"id": "b", "createdDateTime": "2024-06-01T00:00:00Z", "displayName": "Helpdesk"}),
            json!({"id": "a", "createdDateTime": "2024-06-01T00:00:00Z", "displayName": "Readers"}),
            json!({"id": "c", "createdDateTime": "2024-06-02T00:00:00Z", "displayName": "Global"}),
        ]
    }

    fn ids(rows: &[serde_json::Value]) -> Vec<&str> {
        rows.iter()
            .filter_map(|row| row.get("id").and_then(serde_json::Value::as_str))
            .collect()
    }

    #[test]
    fn default_order_is_descending_with_id_tie_break() {
        let page = QueryOptions::default().apply(rows(), &OrderBy::descending("createdDateTime"), 999);

        assert_eq!(ids(&page.rows), vec!["c", "a", "b"]);
        assert_eq!(page.count, None);
    }

    #[test]
    fn pages_after_counting() {
        let options = options(&[("$count", "true"), ("$top", "1"), ("$skip", "1"), ("$orderby", "id")]);

        let page = options.apply(rows(), &OrderBy::descending("createdDateTime"), 999);

        assert_eq!(page.count, Some(3));
        assert_eq!(ids(&page.rows), vec!["b"]);
    }

    #[test]
    fn top_is_capped_by_page_size() {
        let options = options(&[("$top", "50")]);

        let page = options.apply(rows(), &OrderBy::ascending("id"), 2);

        assert_eq!(ids(&page.rows), vec!["a", "b"]);
    }

    #[test]
    fn search_matches_top_level_strings_case_insensitively() {
        let options = options(&[("$search", "\"HELP\"")]);

        let page = options.apply(rows(), &OrderBy::ascending("id"), 999);

        assert_eq!(ids(&page.rows), vec!["b"]);
    }

    #[test]
    fn select_keeps_id_and_expanded_navigations() {
        let options = options(&[("$select", "displayName"), ("$expand", "principal")]);

        let projected = options.project(json!({
            "id": "a", "displayName": "Readers", "status": "Provisioned", "principal": null
        }));

        assert_eq!(projected, json!({"id": "a", "displayName": "Readers", "principal": null}));
    }

    #[test]
    fn unknown_dollar_options_are_rejected() {
        assert!(QueryOptions::parse([("$format", "json")]).is_err());
        assert!(QueryOptions::parse([("$top", "-1")]).is_err());
        assert!(QueryOptions::parse([("api-version", "1")]).is_ok());
    }

    #[test]
    fn expand_depth_reports_nested_chain() {
        let options = options(&[("$expand", "activatedUsing($expand=principal),roleDefinition")]);

        assert_eq!(options.expand_depth(), 2);
    }
}
