use warden_core::{AppError, AppResult};

/// One `$expand` navigation, optionally with a nested `$expand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandItem {
    /// Navigation property name.
    pub property: String,
    /// Nested expansions of the referent.
    pub nested: Vec<ExpandItem>,
}

impl ExpandItem {
    /// Number of hops this item traverses, including nested ones.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.nested.iter().map(Self::depth).max().unwrap_or(0)
    }
}

/// Parses `a,b($expand=c)` into expand items.
pub fn parse_expand(input: &str) -> AppResult<Vec<ExpandItem>> {
    split_top_level(input, ',')?
        .into_iter()
        .map(parse_item)
        .collect()
}

fn parse_item(raw: &str) -> AppResult<ExpandItem> {
    let raw = raw.trim();
    let (property, options) = match raw.find('(') {
        Some(open) => {
            let Some(inner) = raw[open + 1..].strip_suffix(')') else {
                return Err(AppError::Validation(format!(
                    "malformed $expand item '{raw}'"
                )));
            };
            (&raw[..open], Some(inner))
        }
        None => (raw, None),
    };

    let property = property.trim();
    if property.is_empty()
        || !property
            .chars()
            .all(|character| character.is_ascii_alphanumeric())
    {
        return Err(AppError::Validation(format!(
            "invalid $expand property '{property}'"
        )));
    }

    let mut nested = Vec::new();
    if let Some(options) = options {
        for option in split_top_level(options, ';')? {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            match option.split_once('=') {
                Some(("$expand", value)) => nested.extend(parse_expand(value)?),
                _ => {
                    return Err(AppError::Validation(format!(
                        "unsupported nested $expand option '{option}'"
                    )));
                }
            }
        }
    }

    Ok(ExpandItem {
        property: property.to_owned(),
        nested,
    })
}

fn split_top_level(input: &str, separator: char) -> AppResult<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;

    for (index, character) in input.char_indices() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    AppError::Validation(format!("unbalanced parentheses in '{input}'"))
                })?;
            }
            _ if character == separator && depth == 0 => {
                parts.push(&input[start..index]);
                start = index + character.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(AppError::Validation(format!(
            "unbalanced parentheses in '{input}'"
        )));
    }
    parts.push(&input[start..]);

    Ok(parts
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .collect())
}
