//! SQL identifier validation.
//!
//! Table and column names cannot be bound as parameters, so every name that
//! reaches rendered SQL goes through [`validate`] first.
//!
//! - Each `.`-separated segment must match `[A-Za-z_][A-Za-z0-9_$]*`
//! - Empty segments and trailing dots are rejected

use crate::error::{CrudError, CrudResult};

/// Check that `ident` is a plain, optionally dotted, SQL identifier.
pub fn validate(ident: &str) -> CrudResult<()> {
    if ident.is_empty() {
        return Err(CrudError::validation("Identifier cannot be empty"));
    }

    for seg in ident.split('.') {
        let mut chars = seg.chars();
        let Some(first) = chars.next() else {
            return Err(CrudError::invalid_field(
                ident,
                None,
                "empty identifier segment",
            ));
        };
        if !(first == '_' || first.is_ascii_alphabetic()) {
            return Err(CrudError::invalid_field(
                ident,
                None,
                format!("invalid identifier start character '{first}'"),
            ));
        }
        if let Some(bad) = chars.find(|c| !(*c == '_' || *c == '$' || c.is_ascii_alphanumeric())) {
            return Err(CrudError::invalid_field(
                ident,
                None,
                format!("invalid character in identifier '{bad}'"),
            ));
        }
    }
    Ok(())
}

/// Returns `true` if `ident` would pass [`validate`].
pub fn is_valid(ident: &str) -> bool {
    validate(ident).is_ok()
}
