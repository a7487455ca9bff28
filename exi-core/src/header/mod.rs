//! The EXI header: cookie, distinguishing bits, version, and the embedded
//! options document.
//!
//! The options document is itself an EXI body over the pre-built options
//! grammar, coded by a nested instance of the event coder on the same
//! channel. The header is always bit-packed; the negotiated body alignment
//! takes effect right after it.

mod options_grammar;

use std::io::Write;
use std::sync::Arc;

use log::warn;

use crate::channel::{DecoderChannel, EncoderChannel};
use crate::coder::{BodyDecoder, BodyEncoder, ExiEvent, SchemaResolver};
use crate::error::{BitstreamError, OptionError, Result, SchemaError, bail};
use crate::grammar::Grammars;
use crate::options::{Alignment, CodecOptions, DtrMapEntry, EXI_NAMESPACE, Fidelity, SchemaId};
use crate::value::{DecimalValue, Value};

pub(crate) use options_grammar::options_grammars;

const COOKIE: &[u8; 4] = b"$EXI";
const DISTINGUISHING_BITS: u32 = 0b10;

/// Namespace of the profile parameters element carried through the
/// `uncommon` wildcard.
pub(crate) const PROFILE_NAMESPACE: &str = "http://www.w3.org/ns/exi-profile";

/// Options the embedded options document itself is coded with: bit-packed
/// and strict over the options schema.
fn document_options() -> CodecOptions {
    CodecOptions {
        strict: true,
        ..CodecOptions::default()
    }
}

pub(crate) fn write_header<W: Write>(
    ch: &mut EncoderChannel<W>,
    options: &CodecOptions,
) -> Result<()> {
    ch.set_byte_packed(false);

    if options.include_cookie {
        for &byte in COOKIE {
            ch.write_bits(u32::from(byte), 8)?;
        }
    }

    ch.write_bits(DISTINGUISHING_BITS, 2)?;
    ch.write_bits(u32::from(options.include_options), 1)?;
    // Final (non-preview) version 1.0: one flag bit, one 4-bit chunk.
    ch.write_bits(0, 1)?;
    ch.write_bits(0, 4)?;

    if options.include_options {
        write_options_document(ch, options)?;
    }

    ch.set_byte_packed(options.byte_packed());
    if options.byte_packed() {
        ch.align()?;
    }
    Ok(())
}

/// Read the header; returns the options and grammar set governing the
/// body.
pub(crate) fn read_header(
    ch: &mut DecoderChannel<'_>,
    fallback_options: &CodecOptions,
    fallback_grammars: &Arc<Grammars>,
    resolver: Option<&dyn SchemaResolver>,
) -> Result<(CodecOptions, Arc<Grammars>)> {
    ch.set_byte_packed(false);

    let mut saw_cookie = false;
    if ch.peek_byte()? == COOKIE[0] {
        ch.skip_bytes(1)?;
        for &expected in &COOKIE[1..] {
            if ch.read_bits(8)? != u32::from(expected) {
                bail!(BitstreamError::CookieMismatch);
            }
        }
        saw_cookie = true;
    }

    if ch.read_bits(2)? != DISTINGUISHING_BITS {
        bail!(BitstreamError::DistinguishingBits);
    }
    let options_present = ch.read_bits(1)? == 1;

    if ch.read_bits(1)? == 1 {
        bail!(OptionError::PreviewVersion);
    }
    let mut version = 0_u64;
    loop {
        let chunk = ch.read_bits(4)?;
        version += u64::from(chunk);
        if chunk < 15 {
            break;
        }
    }
    if version != 0 {
        bail!(OptionError::UnsupportedVersion);
    }

    let (options, grammars) = if options_present {
        let (mut options, schema_id) = read_options_document(ch)?;
        options.include_cookie = saw_cookie;

        let grammars = match &schema_id {
            None => fallback_grammars.clone(),
            Some(SchemaId::SchemaLess) => Arc::new(Grammars::schema_less()),
            Some(SchemaId::BuiltinTypes) => Arc::new(Grammars::builtin_types()),
            Some(SchemaId::Schema(id)) => resolver
                .ok_or(SchemaError::NoResolver)?
                .resolve(id)
                .ok_or(SchemaError::Unresolved)?,
        };
        if let Some(schema_id) = schema_id {
            options.schema_id = schema_id;
        }
        (options, grammars)
    } else {
        let mut options = fallback_options.clone();
        options.include_cookie = saw_cookie;
        (options, fallback_grammars.clone())
    };

    ch.set_byte_packed(options.byte_packed());
    if options.byte_packed() {
        ch.align();
    }
    Ok((options, grammars))
}

fn write_options_document<W: Write>(
    ch: &mut EncoderChannel<W>,
    options: &CodecOptions,
) -> Result<()> {
    let mut body = BodyEncoder::new(document_options(), options_grammars())?;
    let ns = EXI_NAMESPACE;

    let profile = options.profile_decimal();
    let uncommon = profile.is_some()
        || matches!(
            options.alignment,
            Alignment::BytePacked | Alignment::PreCompression
        )
        || options.self_contained
        || options.value_max_length.is_some()
        || options.value_partition_capacity.is_some()
        || !options.dtr_map.is_empty();
    let preserve = !options.fidelity.is_empty();
    let block_size = options.block_size != 1_000_000;

    body.start_document(ch)?;
    body.start_element(ch, ns, "header", None)?;

    if uncommon || preserve || block_size {
        body.start_element(ch, ns, "lesscommon", None)?;

        if uncommon {
            body.start_element(ch, ns, "uncommon", None)?;

            if let Some((negative, integral, rev_fractional)) = profile {
                // The profile parameters travel as a decimal: the sign
                // switches off local value partitions, the parts carry
                // the two caps biased by one.
                let fraction: String = rev_fractional.to_string().chars().rev().collect();
                let sign = if negative { "-" } else { "" };
                body.start_element(ch, PROFILE_NAMESPACE, "profile", None)?;
                body.characters(ch, &format!("{sign}{integral}.{fraction}"))?;
                body.end_element(ch)?;
            }

            match options.alignment {
                Alignment::BytePacked => {
                    body.start_element(ch, ns, "alignment", None)?;
                    body.start_element(ch, ns, "byte", None)?;
                    body.end_element(ch)?;
                    body.end_element(ch)?;
                }
                Alignment::PreCompression => {
                    body.start_element(ch, ns, "alignment", None)?;
                    body.start_element(ch, ns, "pre-compress", None)?;
                    body.end_element(ch)?;
                    body.end_element(ch)?;
                }
                _ => {}
            }

            if options.self_contained {
                body.start_element(ch, ns, "selfContained", None)?;
                body.end_element(ch)?;
            }
            if let Some(max) = options.value_max_length {
                body.start_element(ch, ns, "valueMaxLength", None)?;
                body.characters(ch, &max.to_string())?;
                body.end_element(ch)?;
            }
            if let Some(capacity) = options.value_partition_capacity {
                body.start_element(ch, ns, "valuePartitionCapacity", None)?;
                body.characters(ch, &capacity.to_string())?;
                body.end_element(ch)?;
            }
            for entry in &options.dtr_map {
                body.start_element(ch, ns, "datatypeRepresentationMap", None)?;
                body.start_element(ch, &entry.type_uri, &entry.type_local_name, None)?;
                body.end_element(ch)?;
                body.start_element(
                    ch,
                    &entry.representation_uri,
                    &entry.representation_local_name,
                    None,
                )?;
                body.end_element(ch)?;
                body.end_element(ch)?;
            }

            body.end_element(ch)?;
        }

        if preserve {
            body.start_element(ch, ns, "preserve", None)?;
            let flags = [
                (Fidelity::DTD, "dtd"),
                (Fidelity::PREFIXES, "prefixes"),
                (Fidelity::LEXICAL_VALUES, "lexicalValues"),
                (Fidelity::COMMENTS, "comments"),
                (Fidelity::PROCESSING_INSTRUCTIONS, "pis"),
            ];
            for (flag, local_name) in flags {
                if options.fidelity.contains(flag) {
                    body.start_element(ch, ns, local_name, None)?;
                    body.end_element(ch)?;
                }
            }
            body.end_element(ch)?;
        }

        if block_size {
            body.start_element(ch, ns, "blockSize", None)?;
            body.characters(ch, &options.block_size.to_string())?;
            body.end_element(ch)?;
        }

        body.end_element(ch)?;
    }

    // The schema identifier is always stated so the decoder needs no
    // out-of-band agreement on grammars.
    body.start_element(ch, ns, "common", None)?;
    if options.alignment == Alignment::Compression {
        body.start_element(ch, ns, "compression", None)?;
        body.end_element(ch)?;
    }
    if options.fragment {
        body.start_element(ch, ns, "fragment", None)?;
        body.end_element(ch)?;
    }
    body.start_element(ch, ns, "schemaId", None)?;
    match &options.schema_id {
        SchemaId::SchemaLess => body.xsi_nil(ch, true, None)?,
        SchemaId::BuiltinTypes => body.characters(ch, "")?,
        SchemaId::Schema(id) => body.characters(ch, id)?,
    }
    body.end_element(ch)?;
    body.end_element(ch)?;

    if options.strict {
        body.start_element(ch, ns, "strict", None)?;
        body.end_element(ch)?;
    }

    body.end_element(ch)?;
    body.end_document(ch)?;
    Ok(())
}

fn read_options_document(
    ch: &mut DecoderChannel<'_>,
) -> Result<(CodecOptions, Option<SchemaId>)> {
    let mut body = BodyDecoder::new(document_options(), options_grammars())?;

    let mut options = CodecOptions {
        include_options: true,
        ..CodecOptions::default()
    };
    let mut schema_id: Option<SchemaId> = None;
    let mut dtr_qnames: Vec<(String, String)> = Vec::new();
    let mut stack: Vec<(String, String)> = Vec::new();

    loop {
        match body.next_event(ch)? {
            ExiEvent::StartDocument => {}
            ExiEvent::EndDocument => break,
            ExiEvent::StartElement(name) => {
                let in_dtrm = stack
                    .last()
                    .is_some_and(|(_, local)| local == "datatypeRepresentationMap");

                if in_dtrm {
                    dtr_qnames.push((name.uri.clone(), name.local_name.clone()));
                } else if name.uri == EXI_NAMESPACE {
                    match name.local_name.as_str() {
                        "byte" => options.alignment = Alignment::BytePacked,
                        "pre-compress" => options.alignment = Alignment::PreCompression,
                        "compression" => options.alignment = Alignment::Compression,
                        "fragment" => options.fragment = true,
                        "strict" => options.strict = true,
                        "selfContained" => options.self_contained = true,
                        "comments" => options.fidelity |= Fidelity::COMMENTS,
                        "pis" => options.fidelity |= Fidelity::PROCESSING_INSTRUCTIONS,
                        "dtd" => options.fidelity |= Fidelity::DTD,
                        "prefixes" => options.fidelity |= Fidelity::PREFIXES,
                        "lexicalValues" => options.fidelity |= Fidelity::LEXICAL_VALUES,
                        "schemaId" => schema_id = Some(SchemaId::BuiltinTypes),
                        "header" | "lesscommon" | "uncommon" | "preserve" | "common"
                        | "alignment" | "blockSize" | "valueMaxLength"
                        | "valuePartitionCapacity" | "datatypeRepresentationMap" => {}
                        _ => bail!(OptionError::UnknownOptionElement),
                    }
                } else if name.local_name != "profile" {
                    warn!(
                        "ignoring unknown element {{{}}}{} in the options document",
                        name.uri, name.local_name
                    );
                }

                stack.push((name.uri, name.local_name));
            }
            ExiEvent::EndElement => {
                stack.pop();
            }
            ExiEvent::Attribute { name, value } => {
                let in_schema_id = stack.last().is_some_and(|(_, local)| local == "schemaId");
                if in_schema_id
                    && name.local_name == "nil"
                    && value == Value::Boolean(true)
                {
                    schema_id = Some(SchemaId::SchemaLess);
                }
            }
            ExiEvent::Characters(value) => {
                let Some((uri, local_name)) = stack.last() else {
                    continue;
                };
                match (uri.as_str(), local_name.as_str()) {
                    (EXI_NAMESPACE, "blockSize") => {
                        options.block_size = unsigned_content(&value)?;
                    }
                    (EXI_NAMESPACE, "valueMaxLength") => {
                        options.value_max_length = Some(unsigned_content(&value)? as usize);
                    }
                    (EXI_NAMESPACE, "valuePartitionCapacity") => {
                        options.value_partition_capacity =
                            Some(unsigned_content(&value)? as usize);
                    }
                    (EXI_NAMESPACE, "schemaId") => {
                        let id = value.lexical();
                        schema_id = Some(if id.is_empty() {
                            SchemaId::BuiltinTypes
                        } else {
                            SchemaId::Schema(id)
                        });
                    }
                    (_, "profile") => {
                        let lexical = value.lexical();
                        let Some(decimal) = DecimalValue::parse(&lexical) else {
                            bail!(OptionError::UnknownOptionElement);
                        };
                        let integral = decimal
                            .integral
                            .as_unsigned()
                            .ok_or(OptionError::UnknownOptionElement)?;
                        let rev_fractional = decimal
                            .rev_fractional
                            .as_unsigned()
                            .ok_or(OptionError::UnknownOptionElement)?;
                        options.apply_profile_decimal(decimal.negative, integral, rev_fractional);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    // Type and representation lists must pair up exactly.
    if dtr_qnames.len() % 2 != 0 {
        bail!(OptionError::UnbalancedRepresentationMap);
    }
    for pair in dtr_qnames.chunks(2) {
        options.dtr_map.push(DtrMapEntry {
            type_uri: pair[0].0.clone(),
            type_local_name: pair[0].1.clone(),
            representation_uri: pair[1].0.clone(),
            representation_local_name: pair[1].1.clone(),
        });
    }

    options.validate()?;
    Ok((options, schema_id))
}

fn unsigned_content(value: &Value) -> Result<u64> {
    match value {
        Value::Integer(v) => v
            .as_unsigned()
            .ok_or_else(|| BitstreamError::OversizedQuantity.into()),
        _ => bail!(BitstreamError::OversizedQuantity),
    }
}
