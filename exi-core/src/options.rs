//! Coding options and fidelity flags.

use bitflags::bitflags;

use crate::error::{OptionError, Result, bail};
use crate::value::{BinaryKind, Datatype};

/// The EXI namespace; also the target namespace of the options document.
pub const EXI_NAMESPACE: &str = "http://www.w3.org/2009/exi";

bitflags! {
    /// Fidelity options: which non-essential XML information survives.
    ///
    /// Each enabled flag adds the corresponding implicit productions to the
    /// grammars in effect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fidelity: u8 {
        /// Preserve comments.
        const COMMENTS = 1;
        /// Preserve processing instructions.
        const PROCESSING_INSTRUCTIONS = 1 << 1;
        /// Preserve DOCTYPE and entity references.
        const DTD = 1 << 2;
        /// Preserve namespace prefixes and declarations.
        const PREFIXES = 1 << 3;
        /// Preserve the lexical form of typed values.
        const LEXICAL_VALUES = 1 << 4;
    }
}

/// Alignment of quantities in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// Fields pack tightly across byte boundaries.
    #[default]
    BitPacked,
    /// Every field starts on a byte boundary.
    BytePacked,
    /// Byte-aligned channels, reordered but not deflated. External.
    PreCompression,
    /// Deflated channels. External.
    Compression,
}

/// The schema identifier carried in the header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaId {
    /// No schema information is used (`xsi:nil` on the header element).
    #[default]
    SchemaLess,
    /// Only the built-in XML Schema datatypes are used (empty string).
    BuiltinTypes,
    /// A user schema, identified by an opaque string.
    Schema(String),
}

/// One `(schema type, representation type)` override pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtrMapEntry {
    /// Namespace of the overridden schema type.
    pub type_uri: String,
    /// Local name of the overridden schema type.
    pub type_local_name: String,
    /// Namespace of the representation; must be the EXI namespace.
    pub representation_uri: String,
    /// Local name of the representation.
    pub representation_local_name: String,
}

/// The full option set governing one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecOptions {
    /// Body alignment mode.
    pub alignment: Alignment,
    /// Disable all deviation events in schema-informed grammars.
    pub strict: bool,
    /// Preserved XML information items.
    pub fidelity: Fidelity,
    /// Enable the self-contained fragment production.
    pub self_contained: bool,
    /// Code the stream as a fragment rather than a document.
    pub fragment: bool,
    /// Channel block size for the compression modes.
    pub block_size: u64,
    /// Strings longer than this are never table-inserted.
    pub value_max_length: Option<usize>,
    /// Cap on the global value partition; `None` is unbounded.
    pub value_partition_capacity: Option<usize>,
    /// Keep per-qname value partitions.
    pub local_value_partitions: bool,
    /// Cap on built-in element grammars learned per run.
    pub max_builtin_element_grammars: Option<usize>,
    /// Cap on productions learned per built-in grammar.
    pub max_builtin_productions: Option<usize>,
    /// Datatype representation overrides.
    pub dtr_map: Vec<DtrMapEntry>,
    /// The schema identifier written to and read from the header.
    pub schema_id: SchemaId,
    /// Write the `$EXI` cookie ahead of the header.
    pub include_cookie: bool,
    /// Embed the options document in the header.
    pub include_options: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            alignment: Alignment::BitPacked,
            strict: false,
            fidelity: Fidelity::empty(),
            self_contained: false,
            fragment: false,
            block_size: 1_000_000,
            value_max_length: None,
            value_partition_capacity: None,
            local_value_partitions: true,
            max_builtin_element_grammars: None,
            max_builtin_productions: None,
            dtr_map: Vec::new(),
            schema_id: SchemaId::SchemaLess,
            include_cookie: false,
            include_options: false,
        }
    }
}

impl CodecOptions {
    /// Check the option set for combinations the core cannot honor.
    pub fn validate(&self) -> Result<()> {
        if matches!(
            self.alignment,
            Alignment::PreCompression | Alignment::Compression
        ) {
            bail!(OptionError::CompressionNotSupported);
        }

        if self.strict {
            let conflicting = Fidelity::COMMENTS
                | Fidelity::PROCESSING_INSTRUCTIONS
                | Fidelity::DTD
                | Fidelity::PREFIXES;
            if self.fidelity.intersects(conflicting) || self.self_contained {
                bail!(OptionError::StrictConflict);
            }
        }

        for entry in &self.dtr_map {
            representation_datatype(&entry.representation_uri, &entry.representation_local_name)?;
        }

        Ok(())
    }

    pub(crate) fn byte_packed(&self) -> bool {
        !matches!(self.alignment, Alignment::BitPacked)
    }

    pub(crate) fn preserve(&self, flag: Fidelity) -> bool {
        self.fidelity.contains(flag)
    }

    /// The wire representation for a typed term, after applying the
    /// datatype-representation map.
    pub(crate) fn effective_datatype(&self, datatype: &Datatype) -> Result<Datatype> {
        if self.preserve(Fidelity::LEXICAL_VALUES) {
            return Ok(Datatype::String);
        }

        for entry in &self.dtr_map {
            if entry.type_uri == crate::names::XSD_NAMESPACE
                && entry.type_local_name == datatype.xsd_name()
            {
                return representation_datatype(
                    &entry.representation_uri,
                    &entry.representation_local_name,
                );
            }
        }

        Ok(datatype.clone())
    }

    /// Apply a decoded profile parameter decimal.
    ///
    /// The sign selects local value partitions; the integral part minus one
    /// is the element-grammar cap and the reverse-fractional part minus one
    /// the per-grammar production cap, zero meaning unbounded in both.
    pub(crate) fn apply_profile_decimal(
        &mut self,
        negative: bool,
        integral: u64,
        rev_fractional: u64,
    ) {
        self.local_value_partitions = !negative;
        self.max_builtin_element_grammars = match integral {
            0 => None,
            n => Some((n - 1) as usize),
        };
        self.max_builtin_productions = match rev_fractional {
            0 => None,
            n => Some((n - 1) as usize),
        };
    }

    /// The profile parameter decimal, when any parameter deviates from the
    /// defaults.
    pub(crate) fn profile_decimal(&self) -> Option<(bool, u64, u64)> {
        if self.local_value_partitions
            && self.max_builtin_element_grammars.is_none()
            && self.max_builtin_productions.is_none()
        {
            return None;
        }

        let integral = self
            .max_builtin_element_grammars
            .map_or(0, |n| n as u64 + 1);
        let rev_fractional = self.max_builtin_productions.map_or(0, |n| n as u64 + 1);
        Some((!self.local_value_partitions, integral, rev_fractional))
    }
}

/// Resolve a representation qname from the datatype-representation map.
pub(crate) fn representation_datatype(uri: &str, local_name: &str) -> Result<Datatype> {
    if uri != EXI_NAMESPACE {
        bail!(OptionError::UnknownRepresentation);
    }

    Ok(match local_name {
        "string" => Datatype::String,
        "boolean" => Datatype::Boolean,
        "integer" => Datatype::Integer,
        "decimal" => Datatype::Decimal,
        "double" => Datatype::Float,
        "dateTime" => Datatype::DateTime(crate::value::DateTimeKind::DateTime),
        "base64Binary" => Datatype::Binary(BinaryKind::Base64),
        "hexBinary" => Datatype::Binary(BinaryKind::Hex),
        _ => bail!(OptionError::UnknownRepresentation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_rejects_preserved_structure() {
        let mut options = CodecOptions {
            strict: true,
            fidelity: Fidelity::COMMENTS,
            ..CodecOptions::default()
        };
        assert!(options.validate().is_err());

        options.fidelity = Fidelity::LEXICAL_VALUES;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn profile_decimal_round_trip() {
        let mut options = CodecOptions::default();
        assert_eq!(options.profile_decimal(), None);

        options.apply_profile_decimal(true, 0, 4);
        assert!(!options.local_value_partitions);
        assert_eq!(options.max_builtin_element_grammars, None);
        assert_eq!(options.max_builtin_productions, Some(3));
        assert_eq!(options.profile_decimal(), Some((true, 0, 4)));
    }

    #[test]
    fn dtr_unknown_representation() {
        let mut options = CodecOptions::default();
        options.dtr_map.push(DtrMapEntry {
            type_uri: crate::names::XSD_NAMESPACE.to_string(),
            type_local_name: "decimal".to_string(),
            representation_uri: "urn:other".to_string(),
            representation_local_name: "string".to_string(),
        });
        assert!(options.validate().is_err());
    }

    #[test]
    fn dtr_override() {
        let mut options = CodecOptions::default();
        options.dtr_map.push(DtrMapEntry {
            type_uri: crate::names::XSD_NAMESPACE.to_string(),
            type_local_name: "decimal".to_string(),
            representation_uri: EXI_NAMESPACE.to_string(),
            representation_local_name: "string".to_string(),
        });
        assert_eq!(
            options.effective_datatype(&Datatype::Decimal).unwrap(),
            Datatype::String
        );
        assert_eq!(
            options.effective_datatype(&Datatype::Boolean).unwrap(),
            Datatype::Boolean
        );
    }
}
