//! Turning schema names into Rust identifiers.
//!
//! Original names are kept for SQL and JSON keys; only the Rust side is
//! sanitized. Keywords become raw identifiers, and the path keywords that
//! cannot be raw get a trailing underscore.

use proc_macro2::{Ident, Span};
use std::collections::BTreeSet;
use toolsmith_core::sanitize_name;

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe",
    "unsized", "use", "virtual", "where", "while", "yield",
];

const PATH_KEYWORDS: &[&str] = &["self", "Self", "super", "crate"];

/// Identifier for a snake_case name. `name` is sanitized first.
pub fn snake(name: &str) -> Ident {
    let clean = sanitize_name(name);
    if PATH_KEYWORDS.contains(&clean.as_str()) {
        Ident::new(&format!("{}_", clean), Span::call_site())
    } else if KEYWORDS.contains(&clean.as_str()) {
        Ident::new_raw(&clean, Span::call_site())
    } else {
        Ident::new(&clean, Span::call_site())
    }
}

/// Identifier for an already-valid name such as `list_users`.
pub fn plain(name: &str) -> Ident {
    Ident::new(name, Span::call_site())
}

/// SCREAMING_CASE identifier built from a slug plus suffix, e.g. `USERS_COLUMNS`.
pub fn constant(slug: &str, suffix: &str) -> Ident {
    Ident::new(
        &format!("{}_{}", slug.to_uppercase(), suffix),
        Span::call_site(),
    )
}

/// Hands out unique names, appending `_2`, `_3`, ... on collision.
#[derive(Debug, Default)]
pub struct Namer {
    used: BTreeSet<String>,
}

impl Namer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve names that must never be handed out.
    pub fn reserve<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.used.extend(names.into_iter().map(str::to_string));
        self
    }

    pub fn claim(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Quote an identifier for SQL using `quote` as the delimiter, doubling any
/// embedded delimiter.
pub fn sql_quote(name: &str, quote: char) -> String {
    let escaped = name.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_handles_keywords() {
        assert_eq!(snake("First Name").to_string(), "first_name");
        assert_eq!(snake("type").to_string(), "r#type");
        assert_eq!(snake("self").to_string(), "self_");
        assert_eq!(snake("Self").to_string(), "self_");
        assert_eq!(snake("9lives").to_string(), "_9lives");
    }

    #[test]
    fn test_namer_dedupes() {
        let mut namer = Namer::new().reserve(["limit"]);
        assert_eq!(namer.claim("limit"), "limit_2");
        assert_eq!(namer.claim("a_b"), "a_b");
        assert_eq!(namer.claim("a_b"), "a_b_2");
        assert_eq!(namer.claim("a_b"), "a_b_3");
    }

    #[test]
    fn test_sql_quote() {
        assert_eq!(sql_quote("users", '"'), "\"users\"");
        assert_eq!(sql_quote("we\"ird", '"'), "\"we\"\"ird\"");
        assert_eq!(sql_quote("order", '`'), "`order`");
    }
}
