use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;
use warden_core::{AppError, AppResult};

/// Comparison operator of a `$filter` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    /// `eq`
    Equal,
    /// `ne`
    NotEqual,
    /// `gt`
    GreaterThan,
    /// `ge`
    GreaterOrEqual,
    /// `lt`
    LessThan,
    /// `le`
    LessOrEqual,
}

impl ComparisonOperator {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Equal),
            "ne" => Some(Self::NotEqual),
            "gt" => Some(Self::GreaterThan),
            "ge" => Some(Self::GreaterOrEqual),
            "lt" => Some(Self::LessThan),
            "le" => Some(Self::LessOrEqual),
            _ => None,
        }
    }
}

/// String function usable in `$filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFunction {
    /// `startswith(path, 'x')`
    StartsWith,
    /// `endswith(path, 'x')`
    EndsWith,
    /// `contains(path, 'x')`
    Contains,
}

/// Literal operand of a `$filter` term.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Numeric literal.
    Number(f64),
    /// Quoted string literal.
    String(String),
    /// Bare ISO-8601 date-time literal.
    DateTime(DateTime<Utc>),
}

/// Parsed `$filter` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// Both operands hold.
    And(Box<FilterExpression>, Box<FilterExpression>),
    /// Either operand holds.
    Or(Box<FilterExpression>, Box<FilterExpression>),
    /// Operand does not hold.
    Not(Box<FilterExpression>),
    /// `path op literal`
    Compare {
        /// Property path split on `/`.
        path: Vec<String>,
        /// Operator.
        operator: ComparisonOperator,
        /// Right-hand literal.
        literal: FilterLiteral,
    },
    /// `path in (a, b, ...)`
    In {
        /// Property path split on `/`.
        path: Vec<String>,
        /// Candidate literals.
        literals: Vec<FilterLiteral>,
    },
    /// `fn(path, 'value')`, case-insensitive.
    Function {
        /// Function.
        function: StringFunction,
        /// Property path split on `/`.
        path: Vec<String>,
        /// Argument.
        argument: String,
    },
}

impl FilterExpression {
    /// Parses a `$filter` value.
    pub fn parse(input: &str) -> AppResult<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        let expression = parser.parse_or()?;
        if parser.position != parser.tokens.len() {
            return Err(invalid(format!(
                "unexpected trailing input in $filter '{input}'"
            )));
        }

        Ok(expression)
    }

    /// Evaluates the expression against a JSON row.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Self::And(left, right) => left.matches(row) && right.matches(row),
            Self::Or(left, right) => left.matches(row) || right.matches(row),
            Self::Not(inner) => !inner.matches(row),
            Self::Compare {
                path,
                operator,
                literal,
            } => compare(resolve_path(row, path), *operator, literal),
            Self::In { path, literals } => {
                let value = resolve_path(row, path);
                literals
                    .iter()
                    .any(|literal| compare(value, ComparisonOperator::Equal, literal))
            }
            Self::Function {
                function,
                path,
                argument,
            } => {
                let Some(value) = resolve_path(row, path).and_then(Value::as_str) else {
                    return false;
                };
                let value = value.to_lowercase();
                let argument = argument.to_lowercase();
                match function {
                    StringFunction::StartsWith => value.starts_with(argument.as_str()),
                    StringFunction::EndsWith => value.ends_with(argument.as_str()),
                    StringFunction::Contains => value.contains(argument.as_str()),
                }
            }
        }
    }
}

/// Resolves a `/`-separated property path inside a JSON row.
#[must_use]
pub fn resolve_path<'a>(row: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(row, |current, segment| current.get(segment.as_str()))
}

/// Total order over JSON values used by `$orderby`; date-time strings compare chronologically.
#[must_use]
pub fn compare_json(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let rank = |value: Option<&Value>| match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(_) => 4,
    };

    match (left, right) {
        (Some(Value::Bool(left)), Some(Value::Bool(right))) => left.cmp(right),
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(left)), Some(Value::String(right))) => compare_strings(left, right),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn compare_strings(left: &str, right: &str) -> Ordering {
    match (parse_date_time(left), parse_date_time(right)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}

fn parse_date_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

fn compare(value: Option<&Value>, operator: ComparisonOperator, literal: &FilterLiteral) -> bool {
    let ordering = match (value, literal) {
        (None | Some(Value::Null), FilterLiteral::Null) => Some(Ordering::Equal),
        (_, FilterLiteral::Null) | (None | Some(Value::Null), _) => None,
        (Some(Value::Bool(value)), FilterLiteral::Bool(literal)) => Some(value.cmp(literal)),
        (Some(Value::Number(value)), FilterLiteral::Number(literal)) => {
            value.as_f64().and_then(|value| value.partial_cmp(literal))
        }
        (Some(Value::String(value)), FilterLiteral::String(literal)) => {
            Some(compare_strings(value, literal))
        }
        (Some(Value::String(value)), FilterLiteral::DateTime(literal)) => {
            parse_date_time(value).map(|value| value.cmp(literal))
        }
        _ => None,
    };

    match operator {
        ComparisonOperator::Equal => ordering == Some(Ordering::Equal),
        ComparisonOperator::NotEqual => ordering != Some(Ordering::Equal),
        ComparisonOperator::GreaterThan => ordering == Some(Ordering::Greater),
        ComparisonOperator::GreaterOrEqual => {
            matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
        }
        ComparisonOperator::LessThan => ordering == Some(Ordering::Less),
        ComparisonOperator::LessOrEqual => {
            matches!(ordering, Some(Ordering::Less | Ordering::Equal))
        }
    }
}

fn invalid(message: String) -> AppError {
    AppError::Validation(message)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Comma,
    Word(String),
    Quoted(String),
    Bare(String),
}

fn tokenize(input: &str) -> AppResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&character) = chars.peek() {
        match character {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            value.push('\'');
                        }
                        Some('\'') => break,
                        Some(other) => value.push(other),
                        None => {
                            return Err(invalid(format!(
                                "unterminated string literal in $filter '{input}'"
                            )));
                        }
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut value = String::new();
                while let Some(&next) = chars.peek() {
                    if matches!(next, ' ' | '\t' | '\n' | '\r' | '(' | ')' | ',' | '\'') {
                        break;
                    }
                    value.push(next);
                    chars.next();
                }
                let numeric = value
                    .trim_start_matches('-')
                    .starts_with(|first: char| first.is_ascii_digit());
                tokens.push(if numeric {
                    Token::Bare(value)
                } else {
                    Token::Word(value)
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect(&mut self, expected: &Token, context: &str) -> AppResult<()> {
        match self.next() {
            Some(token) if &token == expected => Ok(()),
            _ => Err(invalid(format!("expected {context} in $filter"))),
        }
    }

    fn parse_or(&mut self) -> AppResult<FilterExpression> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.position += 1;
            let right = self.parse_and()?;
            left = FilterExpression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> AppResult<FilterExpression> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.position += 1;
            let right = self.parse_unary()?;
            left = FilterExpression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> AppResult<FilterExpression> {
        if self.peek_keyword("not") {
            self.position += 1;
            let inner = self.parse_unary()?;
            return Ok(FilterExpression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> AppResult<FilterExpression> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                self.expect(&Token::Close, "')'")?;
                Ok(inner)
            }
            Some(Token::Word(word)) => {
                let function = match word.to_ascii_lowercase().as_str() {
                    "startswith" => Some(StringFunction::StartsWith),
                    "endswith" => Some(StringFunction::EndsWith),
                    "contains" => Some(StringFunction::Contains),
                    _ => None,
                };
                if let Some(function) = function
                    && self.peek() == Some(&Token::Open)
                {
                    return self.parse_function(function);
                }
                self.parse_comparison(split_path(word.as_str()))
            }
            _ => Err(invalid(
                "expected a property, function or '(' in $filter".to_owned(),
            )),
        }
    }

    fn parse_function(&mut self, function: StringFunction) -> AppResult<FilterExpression> {
        self.expect(&Token::Open, "'('")?;
        let Some(Token::Word(path)) = self.next() else {
            return Err(invalid("expected a property path in $filter function".to_owned()));
        };
        self.expect(&Token::Comma, "','")?;
        let Some(Token::Quoted(argument)) = self.next() else {
            return Err(invalid("expected a string argument in $filter function".to_owned()));
        };
        self.expect(&Token::Close, "')'")?;

        Ok(FilterExpression::Function {
            function,
            path: split_path(path.as_str()),
            argument,
        })
    }

    fn parse_comparison(&mut self, path: Vec<String>) -> AppResult<FilterExpression> {
        let Some(Token::Word(operator)) = self.next() else {
            return Err(invalid("expected a comparison operator in $filter".to_owned()));
        };

        if operator.eq_ignore_ascii_case("in") {
            self.expect(&Token::Open, "'(' after in")?;
            let mut literals = vec![self.parse_literal()?];
            while self.peek() == Some(&Token::Comma) {
                self.position += 1;
                literals.push(self.parse_literal()?);
            }
            self.expect(&Token::Close, "')'")?;
            return Ok(FilterExpression::In { path, literals });
        }

        let operator = ComparisonOperator::parse(operator.as_str())
            .ok_or_else(|| invalid(format!("unsupported $filter operator '{operator}'")))?;
        let literal = self.parse_literal()?;

        Ok(FilterExpression::Compare {
            path,
            operator,
            literal,
        })
    }

    fn parse_literal(&mut self) -> AppResult<FilterLiteral> {
        match self.next() {
            Some(Token::Quoted(value)) => Ok(FilterLiteral::String(value)),
            Some(Token::Word(word)) => match word.to_ascii_lowercase().as_str() {
                "null" => Ok(FilterLiteral::Null),
                "true" => Ok(FilterLiteral::Bool(true)),
                "false" => Ok(FilterLiteral::Bool(false)),
                _ => Err(invalid(format!("unsupported $filter literal '{word}'"))),
            },
            Some(Token::Bare(raw)) => {
                if let Some(value) = parse_date_time(raw.as_str()) {
                    return Ok(FilterLiteral::DateTime(value));
                }
                raw.parse::<f64>()
                    .map(FilterLiteral::Number)
                    .map_err(|_| invalid(format!("unsupported $filter literal '{raw}'")))
            }
            _ => Err(invalid("expected a literal in $filter".to_owned())),
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/').map(str::to_owned).collect()
}
