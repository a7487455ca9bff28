//! The pre-built grammar set of the EXI options document.
//!
//! The options document is an EXI body informed by the options schema of
//! the EXI 1.0 Recommendation; this module ships that schema compiled by
//! hand, the way any external schema compiler would feed the core. States
//! follow the optional-element chains of the schema: each optional child
//! skipped removes one production from the next state.

use std::sync::{Arc, OnceLock};

use crate::grammar::{Event, GrammarBuilder, GrammarHandle, Grammars};
use crate::names::{XSD_LOCAL_NAMES, XSD_NAMESPACE};
use crate::options::EXI_NAMESPACE;
use crate::value::Datatype;

/// Local names of the options schema, sorted as the initial table order.
const OPTION_LOCAL_NAMES: &[&str] = &[
    "alignment",
    "blockSize",
    "byte",
    "comments",
    "common",
    "compression",
    "datatypeRepresentationMap",
    "dtd",
    "fragment",
    "header",
    "lesscommon",
    "lexicalValues",
    "pis",
    "pre-compress",
    "prefixes",
    "preserve",
    "schemaId",
    "selfContained",
    "strict",
    "uncommon",
    "valueMaxLength",
    "valuePartitionCapacity",
];

/// The shared, immutable grammar set for options documents.
pub(crate) fn options_grammars() -> Arc<Grammars> {
    static GRAMMARS: OnceLock<Arc<Grammars>> = OnceLock::new();
    GRAMMARS.get_or_init(|| Arc::new(build())).clone()
}

/// Wire a sequence of optional child elements: state `i` offers children
/// `i..` plus EE, and child `j` moves to the state offering `j + 1..`.
/// The final child moves to `last_tail`.
fn optional_sequence(
    b: &mut GrammarBuilder,
    start: GrammarHandle,
    chain: &[(&str, GrammarHandle)],
    last_tail: GrammarHandle,
) {
    let tails: Vec<GrammarHandle> = (1..chain.len()).map(|_| b.element_content()).collect();

    let states = core::iter::once(start).chain(tails.iter().copied());
    for (i, state) in states.enumerate() {
        for (j, &(local_name, grammar)) in chain.iter().enumerate().skip(i) {
            let event = Event::StartElement {
                qname: b.qname(EXI_NAMESPACE, local_name),
                grammar: Some(grammar),
            };
            let next = if j + 1 < chain.len() {
                tails[j]
            } else {
                last_tail
            };
            b.production(state, event, Some(next));
        }
        b.production(state, Event::EndElement, None);
    }
}

fn build() -> Grammars {
    let mut b = GrammarBuilder::new();

    // Preload the name tables in sorted order: the XML Schema types the
    // options schema imports, then the option element names.
    for name in XSD_LOCAL_NAMES {
        b.qname(XSD_NAMESPACE, name);
    }
    for name in OPTION_LOCAL_NAMES {
        b.qname(EXI_NAMESPACE, name);
    }

    // Content accepting only EE; shared by every simple element tail.
    let content_ee = b.element_content();
    b.production(content_ee, Event::EndElement, None);

    // An empty element: start tag that closes immediately.
    let empty = b.start_tag(true);
    b.production(empty, Event::EndElement, None);
    b.content_grammar(empty, content_ee);

    // An xsd:unsignedInt element.
    let uint = b.start_tag(true);
    b.production(
        uint,
        Event::Characters {
            datatype: Datatype::UnsignedInteger,
        },
        Some(content_ee),
    );
    b.content_grammar(uint, content_ee);

    // schemaId: nillable xsd:string.
    let schema_id = b.start_tag(true);
    b.production(
        schema_id,
        Event::Characters {
            datatype: Datatype::String,
        },
        Some(content_ee),
    );
    b.content_grammar(schema_id, content_ee);
    b.nillable(schema_id, empty);

    // alignment: (byte | pre-compress).
    let alignment = b.start_tag(true);
    for local_name in ["byte", "pre-compress"] {
        let event = Event::StartElement {
            qname: b.qname(EXI_NAMESPACE, local_name),
            grammar: Some(empty),
        };
        b.production(alignment, event, Some(content_ee));
    }
    b.content_grammar(alignment, content_ee);

    // datatypeRepresentationMap: two wildcard children.
    let dtrm_second = b.element_content();
    let dtrm = b.start_tag(true);
    b.production(dtrm, Event::StartElementGeneric, Some(dtrm_second));
    b.production(dtrm_second, Event::StartElementGeneric, Some(content_ee));
    b.content_grammar(dtrm, content_ee);

    // preserve: (dtd?, prefixes?, lexicalValues?, comments?, pis?).
    let preserve = b.start_tag(true);
    optional_sequence(
        &mut b,
        preserve,
        &[
            ("dtd", empty),
            ("prefixes", empty),
            ("lexicalValues", empty),
            ("comments", empty),
            ("pis", empty),
        ],
        content_ee,
    );
    b.content_grammar(preserve, content_ee);

    // uncommon: (any*, alignment?, selfContained?, valueMaxLength?,
    // valuePartitionCapacity?, datatypeRepresentationMap*).
    let uncommon = b.start_tag(true);
    // The wildcard may repeat before any named child.
    b.production(uncommon, Event::StartElementGeneric, Some(uncommon));
    let dtrm_repeat = b.element_content();
    {
        let event = Event::StartElement {
            qname: b.qname(EXI_NAMESPACE, "datatypeRepresentationMap"),
            grammar: Some(dtrm),
        };
        b.production(dtrm_repeat, event, Some(dtrm_repeat));
        b.production(dtrm_repeat, Event::EndElement, None);
    }
    optional_sequence(
        &mut b,
        uncommon,
        &[
            ("alignment", alignment),
            ("selfContained", empty),
            ("valueMaxLength", uint),
            ("valuePartitionCapacity", uint),
            ("datatypeRepresentationMap", dtrm),
        ],
        dtrm_repeat,
    );
    b.content_grammar(uncommon, content_ee);

    // lesscommon: (uncommon?, preserve?, blockSize?).
    let lesscommon = b.start_tag(true);
    optional_sequence(
        &mut b,
        lesscommon,
        &[
            ("uncommon", uncommon),
            ("preserve", preserve),
            ("blockSize", uint),
        ],
        content_ee,
    );
    b.content_grammar(lesscommon, content_ee);

    // common: (compression?, fragment?, schemaId?).
    let common = b.start_tag(true);
    optional_sequence(
        &mut b,
        common,
        &[
            ("compression", empty),
            ("fragment", empty),
            ("schemaId", schema_id),
        ],
        content_ee,
    );
    b.content_grammar(common, content_ee);

    // header: (lesscommon?, common?, strict?).
    let header = b.start_tag(true);
    optional_sequence(
        &mut b,
        header,
        &[
            ("lesscommon", lesscommon),
            ("common", common),
            ("strict", empty),
        ],
        content_ee,
    );
    b.content_grammar(header, content_ee);

    b.global_element(EXI_NAMESPACE, "header", header);
    b.finish(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameTable;

    #[test]
    fn tables_are_preloaded_in_order() {
        let grammars = options_grammars();
        assert!(grammars.is_schema_informed());

        let table = NameTable::new(grammars.seeds());
        assert_eq!(table.find_uri(XSD_NAMESPACE), Some(3));
        assert_eq!(table.find_uri(EXI_NAMESPACE), Some(4));
        assert_eq!(table.uri(4).qname_count(), OPTION_LOCAL_NAMES.len());
        assert_eq!(table.uri(4).find_qname("header"), Some(9));
        assert_eq!(table.uri(4).find_qname("pre-compress"), Some(13));
    }

    #[test]
    fn header_element_is_global() {
        let grammars = options_grammars();
        let table = NameTable::new(grammars.seeds());
        let header = table.uri(4).find_qname("header").unwrap();
        let ctx = table.uri(4).qname(header);
        assert!(ctx.schema_grammar.is_some());
    }
}
