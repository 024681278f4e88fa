//! Method shorties
//!
//! A shorty is the compact, ordered type-tag encoding of a method's return
//! type followed by its parameter types. It is created once when a method is
//! resolved and immutable thereafter; the marshaller walks it to decode
//! native arguments, the invoker consults it to type the result.
//!
//! The textual signature form is `params:return`, e.g. `IZ:J` (int, boolean
//! → long) or `Lstd/core/String;:V`. Reference entries carry the fully
//! qualified type name in a side table, indexed in parameter order.

use thiserror::Error;

/// One type tag in a shorty.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// No value (return position only)
    Void,
    /// Boolean (`Z`)
    Bool,
    /// 8-bit signed (`B`)
    I8,
    /// 8-bit unsigned (`H`)
    U8,
    /// 16-bit signed (`S`)
    I16,
    /// 16-bit unsigned char (`C`)
    U16,
    /// 32-bit signed (`I`)
    I32,
    /// 32-bit unsigned (`U`)
    U32,
    /// 64-bit signed (`J`)
    I64,
    /// 64-bit unsigned (`Q`)
    U64,
    /// 32-bit float (`F`)
    F32,
    /// 64-bit float (`D`)
    F64,
    /// Reference (`L<name>;`)
    Ref,
}

impl TypeTag {
    /// True for reference-typed slots.
    #[inline]
    pub fn is_ref(self) -> bool {
        self == TypeTag::Ref
    }

    /// True if a value of this type occupies a 64-bit ABI slot.
    #[inline]
    pub fn is_wide(self) -> bool {
        matches!(self, TypeTag::I64 | TypeTag::U64 | TypeTag::F64)
    }
}

/// Signature parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortyError {
    /// A character that is not a valid type tag
    #[error("invalid type tag {tag:?} in signature {signature:?}")]
    InvalidTag {
        /// Offending character
        tag: char,
        /// Full signature under parse
        signature: String,
    },
    /// Missing `:` separator or return tag
    #[error("malformed signature {signature:?}: {reason}")]
    Malformed {
        /// Full signature under parse
        signature: String,
        /// What was wrong
        reason: &'static str,
    },
}

/// Parsed, immutable method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shorty {
    /// Return tag first, then parameter tags in declaration order
    tags: Vec<TypeTag>,
    /// Fully qualified type names of reference-typed slots, in tag order
    /// (return included if reference-typed)
    ref_types: Vec<String>,
}

impl Shorty {
    /// Parse a `params:return` signature string.
    pub fn parse(signature: &str) -> Result<Self, ShortyError> {
        let (params, ret) = signature.split_once(':').ok_or_else(|| ShortyError::Malformed {
            signature: signature.to_string(),
            reason: "missing ':' separator",
        })?;

        let mut tags = Vec::new();
        let mut ref_types = Vec::new();

        // Return tag goes first
        Self::parse_seq(ret, signature, true, &mut tags, &mut ref_types)?;
        Self::parse_seq(params, signature, false, &mut tags, &mut ref_types)?;

        Ok(Self { tags, ref_types })
    }

    fn parse_seq(
        text: &str,
        signature: &str,
        is_return: bool,
        tags: &mut Vec<TypeTag>,
        ref_types: &mut Vec<String>,
    ) -> Result<(), ShortyError> {
        let mut chars = text.char_indices();
        let mut count = 0usize;
        while let Some((pos, c)) = chars.next() {
            let tag = match c {
                'V' => TypeTag::Void,
                'Z' => TypeTag::Bool,
                'B' => TypeTag::I8,
                'H' => TypeTag::U8,
                'S' => TypeTag::I16,
                'C' => TypeTag::U16,
                'I' => TypeTag::I32,
                'U' => TypeTag::U32,
                'J' => TypeTag::I64,
                'Q' => TypeTag::U64,
                'F' => TypeTag::F32,
                'D' => TypeTag::F64,
                'L' => {
                    let rest = &text[pos + 1..];
                    let end = rest.find(';').ok_or_else(|| ShortyError::Malformed {
                        signature: signature.to_string(),
                        reason: "unterminated reference type",
                    })?;
                    ref_types.push(rest[..end].to_string());
                    // Consume through the ';'
                    for _ in 0..=end {
                        chars.next();
                    }
                    TypeTag::Ref
                }
                other => {
                    return Err(ShortyError::InvalidTag {
                        tag: other,
                        signature: signature.to_string(),
                    })
                }
            };
            if tag == TypeTag::Void && !is_return {
                return Err(ShortyError::Malformed {
                    signature: signature.to_string(),
                    reason: "void parameter",
                });
            }
            tags.push(tag);
            count += 1;
        }
        if is_return && count != 1 {
            return Err(ShortyError::Malformed {
                signature: signature.to_string(),
                reason: "return position must hold exactly one tag",
            });
        }
        Ok(())
    }

    /// The return type tag.
    #[inline]
    pub fn return_tag(&self) -> TypeTag {
        self.tags[0]
    }

    /// Parameter tags in declaration order (return tag skipped).
    #[inline]
    pub fn params(&self) -> &[TypeTag] {
        &self.tags[1..]
    }

    /// Number of declared parameters.
    #[inline]
    pub fn num_params(&self) -> usize {
        self.tags.len() - 1
    }

    /// Fully qualified type name for the `n`-th reference-typed slot
    /// (counting the return slot first if it is reference-typed).
    pub fn ref_type(&self, n: usize) -> Option<&str> {
        self.ref_types.get(n).map(String::as_str)
    }
}
