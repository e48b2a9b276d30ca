//! Procedure identifiers
//!
//! A procedure is named after its class and method (`Main_run`). Separators
//! common in AVM2 names map to `_`. Names that still are not bare
//! identifiers fall back to the method index (`m17`); without an index the
//! method cannot be named and is not compiled.

use crate::abc::MethodBody;

/// Errors deriving an identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("cannot derive an identifier from {0:?}")]
    Mangled(String),
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | ':' | '/' | '$' | '-' | '<' | '>' | ' ')
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Bare identifier for `body`, before collision handling
pub fn derive_identifier(body: &MethodBody) -> Result<String, NamingError> {
    let raw = match &body.class_name {
        Some(class) => format!("{class}_{}", body.name),
        None => body.name.clone(),
    };
    let mut ident: String = raw.chars().map(|c| if is_separator(c) { '_' } else { c }).collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if is_identifier(&ident) {
        return Ok(ident);
    }
    match body.method_index {
        Some(index) => Ok(format!("m{index}")),
        None => Err(NamingError::Mangled(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(class: Option<&str>, name: &str) -> MethodBody {
        let b = MethodBody::new(name, vec![0x47]);
        match class {
            Some(c) => b.with_class(c),
            None => b,
        }
    }

    #[test]
    fn test_class_and_method() {
        assert_eq!(derive_identifier(&body(Some("Main"), "run")).unwrap(), "Main_run");
    }

    #[test]
    fn test_separators_map_to_underscore() {
        let b = body(Some("flash.display:Sprite"), "get width");
        assert_eq!(derive_identifier(&b).unwrap(), "flash_display_Sprite_get_width");
    }

    #[test]
    fn test_leading_digit() {
        assert_eq!(derive_identifier(&body(None, "3d")).unwrap(), "_3d");
    }

    #[test]
    fn test_index_fallback_and_failure() {
        let b = body(Some("Ünïcode"), "f");
        assert_eq!(derive_identifier(&b.clone().with_index(17)).unwrap(), "m17");
        assert!(matches!(derive_identifier(&b), Err(NamingError::Mangled(_))));
        assert!(derive_identifier(&body(None, "")).is_err());
    }
}
