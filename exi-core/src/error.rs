//! Error types for EXI encoding and decoding.

use core::fmt;

/// The main error type for EXI coding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExiError {
    /// The underlying byte source was exhausted in the middle of a quantity.
    UnexpectedEndOfStream,
    /// The bit stream does not follow the EXI 1.0 layout.
    MalformedBitstream(BitstreamError),
    /// The header requests a feature this implementation does not provide.
    UnsupportedOption(OptionError),
    /// A schema identifier could not be resolved to a grammar set.
    SchemaMismatch(SchemaError),
    /// A datatype-specific value was out of range or lexically malformed.
    InvalidValue(ValueError),
    /// Internal: the grammar state is inconsistent with the event being coded.
    InvariantViolation(StateError),
    /// Writing to the output stream failed.
    Io(std::io::ErrorKind),
}

/// Errors related to the shape of the bit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamError {
    /// The distinguishing bits at the start of the stream are wrong.
    DistinguishingBits,
    /// A cookie was expected but the stream starts with something else.
    CookieMismatch,
    /// An event code lies outside the grammar's production count.
    EventCodeOutOfRange,
    /// A decoded quantity exceeds any sensible bound for its use.
    OversizedQuantity,
    /// A boolean byte held a value other than 0 or 1.
    InvalidBoolean,
    /// A compact identifier points past its table.
    UnknownCompactId,
}

/// Errors related to header options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionError {
    /// The version field announces a preview version of the format.
    PreviewVersion,
    /// The version field announces a version other than EXI 1.0.
    UnsupportedVersion,
    /// A datatype-representation map names an unknown representation.
    UnknownRepresentation,
    /// A datatype-representation map has unequal type and representation lists.
    UnbalancedRepresentationMap,
    /// The (pre-)compression coding modes are handled outside the core.
    CompressionNotSupported,
    /// Self-contained fragments require the external channel layer.
    SelfContainedNotSupported,
    /// The strict option conflicts with an enabled fidelity option.
    StrictConflict,
    /// An element in the options document is not recognized.
    UnknownOptionElement,
}

/// Errors related to schema-informed grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaError {
    /// The header names a schema but no resolver is configured.
    NoResolver,
    /// The configured resolver returned no grammar set for the schema.
    Unresolved,
}

/// Errors related to typed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueError {
    /// A length or other unsigned quantity was negative.
    NegativeLength,
    /// A year lies outside the representable range.
    YearOutOfRange,
    /// A month-day, time or timezone component is out of range.
    CalendarOutOfRange,
    /// A code point is not a Unicode scalar value.
    MalformedCodePoint,
    /// A decimal or float component does not fit its integer width.
    ComponentTooWide,
    /// A lexical value does not parse under the expected datatype.
    LexicalMismatch,
}

/// Errors related to internal coder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// No production of the current grammar accepts the event.
    NoProduction,
    /// An end-element without a matching start-element.
    StackUnderflow,
    /// An event arrived before start-document or after end-document.
    NotInDocument,
}

impl fmt::Display for ExiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEndOfStream => write!(f, "unexpected end of stream"),
            Self::MalformedBitstream(e) => write!(f, "{e}"),
            Self::UnsupportedOption(e) => write!(f, "{e}"),
            Self::SchemaMismatch(e) => write!(f, "{e}"),
            Self::InvalidValue(e) => write!(f, "{e}"),
            Self::InvariantViolation(e) => write!(f, "{e}"),
            Self::Io(kind) => write!(f, "i/o error: {kind:?}"),
        }
    }
}

impl fmt::Display for BitstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DistinguishingBits => write!(f, "wrong distinguishing bits"),
            Self::CookieMismatch => write!(f, "stream does not start with the EXI cookie"),
            Self::EventCodeOutOfRange => write!(f, "event code outside the grammar"),
            Self::OversizedQuantity => write!(f, "decoded quantity is implausibly large"),
            Self::InvalidBoolean => write!(f, "boolean byte is neither 0 nor 1"),
            Self::UnknownCompactId => write!(f, "compact identifier points past its table"),
        }
    }
}

impl fmt::Display for OptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreviewVersion => write!(f, "preview format versions are not supported"),
            Self::UnsupportedVersion => write!(f, "format version is not EXI 1.0"),
            Self::UnknownRepresentation => write!(f, "unknown datatype representation"),
            Self::UnbalancedRepresentationMap => {
                write!(f, "datatype representation map lists differ in length")
            }
            Self::CompressionNotSupported => write!(f, "compression modes are handled externally"),
            Self::SelfContainedNotSupported => {
                write!(f, "self-contained fragments are handled externally")
            }
            Self::StrictConflict => write!(f, "strict conflicts with an enabled fidelity option"),
            Self::UnknownOptionElement => write!(f, "unrecognized element in the options document"),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResolver => write!(f, "schema identifier present but no resolver configured"),
            Self::Unresolved => write!(f, "schema identifier did not resolve to a grammar set"),
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeLength => write!(f, "negative length"),
            Self::YearOutOfRange => write!(f, "year out of range"),
            Self::CalendarOutOfRange => write!(f, "calendar component out of range"),
            Self::MalformedCodePoint => write!(f, "code point is not a Unicode scalar value"),
            Self::ComponentTooWide => write!(f, "numeric component exceeds its integer width"),
            Self::LexicalMismatch => write!(f, "lexical value does not match its datatype"),
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProduction => write!(f, "no production accepts the event"),
            Self::StackUnderflow => write!(f, "end-element without matching start-element"),
            Self::NotInDocument => write!(f, "event outside the document"),
        }
    }
}

impl core::error::Error for ExiError {}
impl core::error::Error for BitstreamError {}
impl core::error::Error for OptionError {}
impl core::error::Error for SchemaError {}
impl core::error::Error for ValueError {}
impl core::error::Error for StateError {}

impl From<BitstreamError> for ExiError {
    fn from(e: BitstreamError) -> Self {
        Self::MalformedBitstream(e)
    }
}

impl From<OptionError> for ExiError {
    fn from(e: OptionError) -> Self {
        Self::UnsupportedOption(e)
    }
}

impl From<SchemaError> for ExiError {
    fn from(e: SchemaError) -> Self {
        Self::SchemaMismatch(e)
    }
}

impl From<ValueError> for ExiError {
    fn from(e: ValueError) -> Self {
        Self::InvalidValue(e)
    }
}

impl From<StateError> for ExiError {
    fn from(e: StateError) -> Self {
        Self::InvariantViolation(e)
    }
}

impl From<std::io::Error> for ExiError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.kind())
    }
}

/// Result type for EXI coding operations.
pub type Result<T> = core::result::Result<T, ExiError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

macro_rules! err {
    ($err:expr) => {
        Err($err.into())
    };
}

pub(crate) use bail;
pub(crate) use err;
