//! Centralized validation for names declared inside templates

use crate::expression::{is_ident_continue, is_ident_start};
use crate::token::is_reserved_word;

/// Validate an alias or variable name (`as item`, `{{#let total = ...}}`)
///
/// Rules:
/// - Must start with a letter or '_' and continue with letters, digits or '_'
/// - Cannot be a reserved word (true, false, null, this, as, in)
/// - Cannot start with '$' (reserved for special variables)
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.starts_with('$') {
        return Err(format!(
            "Name cannot start with '$' (reserved for special variables): {name}"
        ));
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => {}
        _ => return Err(format!("Invalid name: '{name}'")),
    }
    if !chars.all(is_ident_continue) {
        return Err(format!("Invalid name: '{name}'"));
    }
    if is_reserved_word(name) {
        return Err(format!("Reserved word '{name}' cannot be used as a name"));
    }
    Ok(())
}

/// Validate a partial name (`{{#declare name}}`, `{{#import 'name'}}`, partial stores)
///
/// Rules:
/// - Cannot be empty or all whitespace
/// - Cannot contain '..' (path traversal when resolved by a file store)
/// - Cannot contain '\' or ':' (platform path syntax)
pub fn validate_partial_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Partial name cannot be empty".to_string());
    }
    if name.contains("..") {
        return Err(format!("Partial name cannot contain '..': {name}"));
    }
    if name.contains('\\') || name.contains(':') {
        return Err(format!("Invalid partial name: {name}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod identifier_validation {
        use super::*;

        #[test]
        fn accepts_valid_identifiers() {
            assert!(validate_identifier("name").is_ok());
            assert!(validate_identifier("userName").is_ok());
            assert!(validate_identifier("_private").is_ok());
            assert!(validate_identifier("item123").is_ok());
        }

        #[test]
        fn rejects_reserved_words() {
            assert!(validate_identifier("true").is_err());
            assert!(validate_identifier("null").is_err());
            assert!(validate_identifier("in").is_err());
        }

        #[test]
        fn rejects_special_variable_prefix() {
            assert!(validate_identifier("$index").is_err());
        }

        #[test]
        fn rejects_invalid_characters() {
            assert!(validate_identifier("user-name").is_err());
            assert!(validate_identifier("1st").is_err());
            assert!(validate_identifier("").is_err());
        }
    }

    mod partial_name_validation {
        use super::*;

        #[test]
        fn accepts_valid_names() {
            assert!(validate_partial_name("header").is_ok());
            assert!(validate_partial_name("components/card").is_ok());
        }

        #[test]
        fn rejects_path_traversal() {
            assert!(validate_partial_name("../secret").is_err());
        }

        #[test]
        fn rejects_platform_syntax() {
            assert!(validate_partial_name("c:/windows").is_err());
            assert!(validate_partial_name("a\\b").is_err());
        }
    }
}
