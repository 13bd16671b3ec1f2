//! Identifier sanitization.
//!
//! Every schema-qualified name that enters the planner passes through
//! this allow-list validator before it can appear in a generated
//! operation. Names are normalized to uppercase; anything that could
//! smuggle quoting or statement syntax is rejected outright.

use thiserror::Error;

/// Maximum identifier length in bytes, including derived suffixes.
pub const MAX_IDENT_LEN: usize = 128;

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentError {
    /// The identifier was empty.
    #[error("identifier is empty")]
    Empty,

    /// The identifier exceeded the maximum length.
    #[error("identifier '{ident}' exceeds {MAX_IDENT_LEN} bytes")]
    TooLong {
        /// The offending identifier.
        ident: String,
    },

    /// The identifier contained a disallowed character.
    #[error("identifier '{ident}' contains disallowed character '{ch}'")]
    DisallowedCharacter {
        /// The offending identifier.
        ident: String,
        /// The first disallowed character found.
        ch: char,
    },

    /// The identifier did not start with a letter.
    #[error("identifier '{ident}' must start with an ASCII letter")]
    BadLeadingCharacter {
        /// The offending identifier.
        ident: String,
    },

    /// A qualified name was not of the form OWNER.NAME.
    #[error("'{input}' is not a valid qualified name (expected OWNER.NAME)")]
    BadQualifiedName {
        /// The offending input.
        input: String,
    },
}

/// A validated, normalized identifier.
///
/// Guaranteed non-empty, at most [`MAX_IDENT_LEN`] bytes, uppercase,
/// starting with an ASCII letter and containing only ASCII
/// alphanumerics, `_`, `$` and `#`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate and normalize a raw identifier.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, IdentError> {
        let raw = raw.as_ref();
        if raw.len() > MAX_IDENT_LEN {
            return Err(IdentError::TooLong {
                ident: raw.to_string(),
            });
        }

        let mut chars = raw.chars();
        // First char gets a stricter rule than the remainder.
        let Some(first) = chars.next() else {
            return Err(IdentError::Empty);
        };
        if !first.is_ascii_alphabetic() {
            return Err(IdentError::BadLeadingCharacter {
                ident: raw.to_string(),
            });
        }
        for ch in chars {
            let ok = ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '#';
            if !ok {
                return Err(IdentError::DisallowedCharacter {
                    ident: raw.to_string(),
                    ch,
                });
            }
        }

        Ok(Ident(raw.to_ascii_uppercase()))
    }

    /// The normalized identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a new identifier by appending a suffix, re-validating
    /// the combined length.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, IdentError> {
        Ident::parse(format!("{}{}", self.0, suffix))
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// Owning schema.
    pub owner: Ident,
    /// Object name within the schema.
    pub name: Ident,
}

impl QualifiedName {
    /// Build a qualified name from raw owner and object names.
    pub fn new(owner: impl AsRef<str>, name: impl AsRef<str>) -> Result<Self, IdentError> {
        Ok(Self {
            owner: Ident::parse(owner)?,
            name: Ident::parse(name)?,
        })
    }

    /// Parse an `OWNER.NAME` string.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, IdentError> {
        let input = input.as_ref();
        let (owner, name) = input
            .split_once('.')
            .ok_or_else(|| IdentError::BadQualifiedName {
                input: input.to_string(),
            })?;
        Self::new(owner, name)
    }

    /// The working-copy name used while the replacement table is built.
    pub fn new_name(&self) -> Result<QualifiedName, IdentError> {
        Ok(QualifiedName {
            owner: self.owner.clone(),
            name: self.name.with_suffix("_NEW")?,
        })
    }

    /// The name the retired table is parked under after cutover.
    pub fn old_name(&self) -> Result<QualifiedName, IdentError> {
        Ok(QualifiedName {
            owner: self.owner.clone(),
            name: self.name.with_suffix("_OLD")?,
        })
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}
