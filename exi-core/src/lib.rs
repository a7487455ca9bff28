/*!
A pure-Rust codec for the core of the Efficient XML Interchange (EXI) 1.0
format.

`exi-core` converts structured XML event streams to and from the compact
binary representation defined in the W3C EXI 1.0 Recommendation: the bit
channel and typed-value codec, the grammar state machine with runtime
learning, the string-table engine, and the header codec. Schema
compilation, SAX/DOM adapters and the compression layer are external;
the crate consumes pre-built [`Grammars`] descriptions and byte streams.

# Example
```rust
use std::sync::Arc;
use exi_core::{CodecOptions, ExiDecoder, ExiEncoder, ExiEvent, Grammars};

let grammars = Arc::new(Grammars::schema_less());
let mut out = Vec::new();

let mut encoder =
    ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
encoder.start_document().unwrap();
encoder.start_element("", "greeting", None).unwrap();
encoder.characters("hi").unwrap();
encoder.end_element().unwrap();
encoder.end_document().unwrap();
drop(encoder);

let mut decoder = ExiDecoder::new(&out, CodecOptions::default(), grammars);
while let Some(event) = decoder.next_event().unwrap() {
    if let ExiEvent::Characters(value) = &event {
        assert_eq!(value.lexical(), "hi");
    }
}
```

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

mod bit_reader;
mod bit_writer;
mod channel;
mod coder;
mod error;
mod grammar;
mod header;
mod names;
mod options;
mod string_table;
mod value;

pub use coder::{ExiDecoder, ExiEncoder, ExiEvent, QName, SchemaResolver};
pub use error::{
    BitstreamError, ExiError, OptionError, Result, SchemaError, StateError, ValueError,
};
pub use grammar::{Event, GrammarBuilder, GrammarHandle, Grammars};
pub use names::{
    NameSeed, QNameContext, QNameId, UriContext, UriSeed, XML_NAMESPACE, XSD_NAMESPACE,
    XSI_NAMESPACE,
};
pub use options::{Alignment, CodecOptions, DtrMapEntry, EXI_NAMESPACE, Fidelity, SchemaId};
pub use value::{
    BigUnsigned, BinaryKind, Datatype, DateTimeKind, DateTimeValue, DecimalValue, FloatValue,
    IntegerValue, QNameValue, Value,
};
