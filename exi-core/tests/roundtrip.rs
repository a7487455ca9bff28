//! End-to-end encode/decode scenarios over full documents.

use std::sync::Arc;

use exi_core::{
    Alignment, CodecOptions, Datatype, DtrMapEntry, EXI_NAMESPACE, Event, ExiDecoder, ExiEncoder,
    ExiEvent, Fidelity, GrammarBuilder, Grammars, IntegerValue, SchemaId, Value, XSD_NAMESPACE,
};

fn decode_all(data: &[u8], options: CodecOptions, grammars: Arc<Grammars>) -> Vec<ExiEvent> {
    let mut decoder = ExiDecoder::new(data, options, grammars);
    let mut events = Vec::new();
    while let Some(event) = decoder.next_event().unwrap() {
        events.push(event);
    }
    events
}

fn element(local_name: &str) -> ExiEvent {
    ExiEvent::StartElement(exi_core::QName {
        uri: String::new(),
        local_name: local_name.to_string(),
        prefix: None,
    })
}

#[test]
fn empty_element_document() {
    let grammars = Arc::new(Grammars::schema_less());
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "a", None).unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    // Header 10 0 0 0000, then SE(*) "a" and the undeclared EE.
    assert_eq!(out, [0x80, 0x40, 0x98, 0x40]);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    assert_eq!(
        events,
        vec![
            ExiEvent::StartDocument,
            element("a"),
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ]
    );
}

#[test]
fn repeated_text_is_a_local_hit() {
    let grammars = Arc::new(Grammars::schema_less());
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "r", None).unwrap();
    for _ in 0..2 {
        encoder.start_element("", "a", None).unwrap();
        encoder.characters("hi").unwrap();
        encoder.end_element().unwrap();
    }
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    let characters: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ExiEvent::Characters(_)))
        .collect();
    assert_eq!(characters.len(), 2);
    assert_eq!(
        characters[1],
        &ExiEvent::Characters(Value::String("hi".to_string()))
    );
}

#[test]
fn repeated_attribute_value_is_a_local_hit() {
    let grammars = Arc::new(Grammars::schema_less());
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "r", None).unwrap();
    for _ in 0..2 {
        encoder.start_element("", "a", None).unwrap();
        encoder.attribute("", "x", None, "1").unwrap();
        encoder.end_element().unwrap();
    }
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    let attributes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ExiEvent::Attribute { name, value } => Some((name.local_name.as_str(), value)),
            _ => None,
        })
        .collect();
    assert_eq!(attributes.len(), 2);
    assert_eq!(attributes[1].0, "x");
    assert_eq!(attributes[1].1, &Value::String("1".to_string()));
}

#[test]
fn encoding_is_deterministic() {
    let encode = || {
        let grammars = Arc::new(Grammars::schema_less());
        let mut out = Vec::new();
        let mut encoder =
            ExiEncoder::new(&mut out, CodecOptions::default(), grammars).unwrap();
        encoder.start_document().unwrap();
        encoder.start_element("urn:x", "doc", None).unwrap();
        encoder.attribute("", "version", None, "2").unwrap();
        encoder.characters("body").unwrap();
        encoder.end_element().unwrap();
        encoder.end_document().unwrap();
        drop(encoder);
        out
    };

    assert_eq!(encode(), encode());
}

#[test]
fn instance_reuse_reproduces_the_stream() {
    let grammars = Arc::new(Grammars::schema_less());
    let mut encoder =
        ExiEncoder::new(Vec::new(), CodecOptions::default(), grammars.clone()).unwrap();

    let mut drive = |encoder: &mut ExiEncoder<Vec<u8>>| {
        encoder.start_document().unwrap();
        encoder.start_element("", "a", None).unwrap();
        encoder.characters("text").unwrap();
        encoder.end_element().unwrap();
        encoder.end_document().unwrap();
    };

    drive(&mut encoder);
    let first = encoder.init_for_each_run(Vec::new());
    drive(&mut encoder);
    let second = encoder.init_for_each_run(Vec::new());

    assert_eq!(first, second);

    let mut decoder = ExiDecoder::new(&first, CodecOptions::default(), grammars);
    let mut count = 0;
    while decoder.next_event().unwrap().is_some() {
        count += 1;
    }
    decoder.init_for_each_run(&first);
    let mut again = 0;
    while decoder.next_event().unwrap().is_some() {
        again += 1;
    }
    assert_eq!(count, again);
}

#[test]
fn byte_packed_round_trip() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        alignment: Alignment::BytePacked,
        include_options: true,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options, grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "r", None).unwrap();
    encoder.characters("payload").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    // The decoder learns the alignment from the header.
    let events = decode_all(&out, CodecOptions::default(), grammars);
    assert_eq!(events.len(), 5);
    assert_eq!(
        events[2],
        ExiEvent::Characters(Value::String("payload".to_string()))
    );
}

#[test]
fn header_transports_the_options() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        include_options: true,
        include_cookie: true,
        fidelity: Fidelity::COMMENTS | Fidelity::PROCESSING_INSTRUCTIONS,
        block_size: 2048,
        value_max_length: Some(8),
        value_partition_capacity: Some(100),
        max_builtin_element_grammars: Some(4),
        max_builtin_productions: Some(2),
        local_value_partitions: false,
        dtr_map: vec![DtrMapEntry {
            type_uri: XSD_NAMESPACE.to_string(),
            type_local_name: "decimal".to_string(),
            representation_uri: EXI_NAMESPACE.to_string(),
            representation_local_name: "string".to_string(),
        }],
        schema_id: SchemaId::SchemaLess,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "a", None).unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    assert_eq!(&out[..4], b"$EXI");

    let mut decoder = ExiDecoder::new(&out, CodecOptions::default(), grammars);
    let mut events = Vec::new();
    while let Some(event) = decoder.next_event().unwrap() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);

    let decoded = decoder.options();
    assert_eq!(decoded.fidelity, options.fidelity);
    assert_eq!(decoded.block_size, 2048);
    assert_eq!(decoded.value_max_length, Some(8));
    assert_eq!(decoded.value_partition_capacity, Some(100));
    assert_eq!(decoded.max_builtin_element_grammars, Some(4));
    assert_eq!(decoded.max_builtin_productions, Some(2));
    assert!(!decoded.local_value_partitions);
    assert_eq!(decoded.dtr_map, options.dtr_map);
    assert_eq!(decoded.schema_id, SchemaId::SchemaLess);
}

#[test]
fn zero_capacity_makes_every_value_a_miss() {
    let encode = |capacity: Option<usize>| {
        let grammars = Arc::new(Grammars::schema_less());
        let options = CodecOptions {
            value_partition_capacity: capacity,
            ..CodecOptions::default()
        };
        let mut out = Vec::new();
        let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
        encoder.start_document().unwrap();
        encoder.start_element("", "r", None).unwrap();
        for _ in 0..8 {
            encoder.start_element("", "a", None).unwrap();
            encoder.characters("repeated-value").unwrap();
            encoder.end_element().unwrap();
        }
        encoder.end_element().unwrap();
        encoder.end_document().unwrap();
        drop(encoder);

        let events = decode_all(&out, options, grammars);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ExiEvent::Characters(_)))
                .count(),
            8
        );
        out.len()
    };

    let deduplicated = encode(None);
    let literal = encode(Some(0));
    assert!(literal > deduplicated);
}

#[test]
fn comments_and_processing_instructions() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        fidelity: Fidelity::COMMENTS | Fidelity::PROCESSING_INSTRUCTIONS,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "r", None).unwrap();
    encoder.comment(" note ").unwrap();
    encoder.processing_instruction("target", "data").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, options, grammars);
    assert_eq!(
        events,
        vec![
            ExiEvent::StartDocument,
            element("r"),
            ExiEvent::Comment(" note ".to_string()),
            ExiEvent::ProcessingInstruction {
                target: "target".to_string(),
                data: "data".to_string(),
            },
            ExiEvent::EndElement,
            ExiEvent::EndDocument,
        ]
    );
}

#[test]
fn doctype_and_entity_reference() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        fidelity: Fidelity::DTD,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.doctype("r", "", "", "").unwrap();
    encoder.start_element("", "r", None).unwrap();
    encoder.entity_reference("amp").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, options, grammars);
    assert_eq!(
        events[1],
        ExiEvent::DocType {
            name: "r".to_string(),
            public_id: String::new(),
            system_id: String::new(),
            text: String::new(),
        }
    );
    assert_eq!(events[3], ExiEvent::EntityReference("amp".to_string()));
}

#[test]
fn preserved_prefixes_travel_through_ns_events() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        fidelity: Fidelity::PREFIXES,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("urn:x", "r", Some("p")).unwrap();
    encoder.namespace_declaration("p", "urn:x", true).unwrap();
    encoder.start_element("urn:x", "c", Some("p")).unwrap();
    encoder.end_element().unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, options, grammars);
    assert_eq!(
        events[2],
        ExiEvent::NamespaceDeclaration {
            prefix: "p".to_string(),
            uri: "urn:x".to_string(),
            element_ns: true,
        }
    );
    let ExiEvent::StartElement(child) = &events[3] else {
        panic!("expected the child element");
    };
    assert_eq!(child.local_name, "c");
    assert_eq!(child.prefix.as_deref(), Some("p"));
}

fn item_grammars() -> Arc<Grammars> {
    let mut builder = GrammarBuilder::new();

    let content = builder.element_content();
    builder.production(content, Event::EndElement, None);

    let empty = builder.start_tag(true);
    builder.production(empty, Event::EndElement, None);
    builder.content_grammar(empty, content);

    let item = builder.start_tag(true);
    builder.production(
        item,
        Event::Characters {
            datatype: Datatype::Integer,
        },
        Some(content),
    );
    builder.content_grammar(item, content);
    builder.nillable(item, empty);

    builder.named_type("urn:test", "EmptyType", empty);
    builder.global_element("urn:test", "item", item);
    Arc::new(builder.finish(true))
}

#[test]
fn schema_informed_typed_characters() {
    let grammars = item_grammars();
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("urn:test", "item", None).unwrap();
    encoder.characters("42").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    assert_eq!(
        events[2],
        ExiEvent::Characters(Value::Integer(IntegerValue::Int(42)))
    );
}

#[test]
fn schema_informed_xsi_nil_skips_content() {
    let grammars = item_grammars();
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("urn:test", "item", None).unwrap();
    encoder.xsi_nil(true).unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    let ExiEvent::Attribute { name, value } = &events[2] else {
        panic!("expected the xsi:nil attribute");
    };
    assert_eq!(name.local_name, "nil");
    assert_eq!(value, &Value::Boolean(true));
    assert_eq!(events[3], ExiEvent::EndElement);
}

#[test]
fn schema_informed_xsi_type_cast() {
    let grammars = item_grammars();
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("urn:test", "item", None).unwrap();
    encoder.xsi_type("urn:test", "EmptyType", None).unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, CodecOptions::default(), grammars);
    let ExiEvent::Attribute { name, value } = &events[2] else {
        panic!("expected the xsi:type attribute");
    };
    assert_eq!(name.local_name, "type");
    let Value::QName(cast) = value else {
        panic!("expected a qname value");
    };
    assert_eq!(cast.local_name, "EmptyType");
}

#[test]
fn strict_schema_round_trip() {
    let grammars = item_grammars();
    let options = CodecOptions {
        strict: true,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("urn:test", "item", None).unwrap();
    encoder.characters("-7").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, options, grammars);
    assert_eq!(
        events[2],
        ExiEvent::Characters(Value::Integer(IntegerValue::Int(-7)))
    );
}

#[test]
fn fragments_carry_multiple_roots() {
    let grammars = Arc::new(Grammars::schema_less());
    let options = CodecOptions {
        fragment: true,
        ..CodecOptions::default()
    };

    let mut out = Vec::new();
    let mut encoder = ExiEncoder::new(&mut out, options.clone(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    for _ in 0..2 {
        encoder.start_element("", "a", None).unwrap();
        encoder.characters("hi").unwrap();
        encoder.end_element().unwrap();
    }
    encoder.end_document().unwrap();
    drop(encoder);

    let events = decode_all(&out, options, grammars);
    let roots = events
        .iter()
        .filter(|e| matches!(e, ExiEvent::StartElement(_)))
        .count();
    assert_eq!(roots, 2);
}

#[test]
fn dropped_fidelity_events_are_ignored() {
    let grammars = Arc::new(Grammars::schema_less());
    let mut out = Vec::new();

    let mut encoder =
        ExiEncoder::new(&mut out, CodecOptions::default(), grammars.clone()).unwrap();
    encoder.start_document().unwrap();
    encoder.start_element("", "a", None).unwrap();
    // Not preserved under the default fidelity: silently dropped.
    encoder.comment("gone").unwrap();
    encoder.processing_instruction("t", "d").unwrap();
    encoder.end_element().unwrap();
    encoder.end_document().unwrap();
    drop(encoder);

    assert_eq!(out, [0x80, 0x40, 0x98, 0x40]);
}
