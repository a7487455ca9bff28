//! Pre-built grammar sets and the builder the schema compiler targets.
//!
//! The core never compiles XML Schema itself; it consumes a [`Grammars`]
//! description with the document and fragment grammars, the schema-informed
//! element and type grammars, and the name-table seeds. [`GrammarBuilder`]
//! is the programmatic surface that produces such a description; the
//! header-options grammar is built through it as well.

use crate::grammar::{Event, GrammarHandle, GrammarKind, GrammarNode, Production, StartTagInfo};
use crate::names::{
    NameSeed, QNameId, UriSeed, XML_LOCAL_NAMES, XML_NAMESPACE, XSD_LOCAL_NAMES, XSD_NAMESPACE,
    XSI_LOCAL_NAMES, XSI_NAMESPACE,
};
use crate::value::Datatype;

/// A complete, immutable grammar description.
///
/// Read-only after construction; instances may be shared across codec
/// instances on different threads.
#[derive(Debug, Clone)]
pub struct Grammars {
    pub(crate) nodes: Vec<GrammarNode>,
    document: GrammarHandle,
    fragment: GrammarHandle,
    schema_informed: bool,
    seeds: Vec<UriSeed>,
}

impl Grammars {
    /// The grammar set of a schema-less stream: built-in document and
    /// fragment grammars, runtime element grammars.
    pub fn schema_less() -> Self {
        GrammarBuilder::new().finish(false)
    }

    /// A schema-informed set carrying only the built-in XML Schema types;
    /// the result of an empty `schemaId`.
    pub fn builtin_types() -> Self {
        let mut builder = GrammarBuilder::new();
        for name in XSD_LOCAL_NAMES {
            builder.qname(XSD_NAMESPACE, name);
        }
        builder.finish(true)
    }

    /// Handle of the document grammar.
    pub fn document_grammar(&self) -> GrammarHandle {
        self.document
    }

    /// Handle of the fragment grammar.
    pub fn fragment_grammar(&self) -> GrammarHandle {
        self.fragment
    }

    /// Whether this set was informed by a schema.
    pub fn is_schema_informed(&self) -> bool {
        self.schema_informed
    }

    pub(crate) fn seeds(&self) -> &[UriSeed] {
        &self.seeds
    }
}

/// Index of the document grammar within a builder's arena.
const DOCUMENT: GrammarHandle = GrammarHandle(0);
const DOC_CONTENT: GrammarHandle = GrammarHandle(1);
const DOC_END: GrammarHandle = GrammarHandle(2);
const FRAGMENT: GrammarHandle = GrammarHandle(3);
const FRAGMENT_CONTENT: GrammarHandle = GrammarHandle(4);

struct UriShadow {
    uri: String,
    /// Names fixed by the format; never emitted as seeds.
    preloaded: &'static [&'static str],
    names: Vec<NameSeed>,
}

/// Builds a [`Grammars`] description.
///
/// Handles issued by one builder are only meaningful within the resulting
/// description. Names interned here receive the ids the codec's name table
/// will assign, so productions can refer to them directly.
pub struct GrammarBuilder {
    nodes: Vec<GrammarNode>,
    uris: Vec<UriShadow>,
}

impl GrammarBuilder {
    /// A builder with the document and fragment grammars in place.
    pub fn new() -> Self {
        let mut nodes = Vec::new();

        let mut document = GrammarNode::new(GrammarKind::Document);
        document.productions.push(Production {
            event: Event::StartDocument,
            next: Some(DOC_CONTENT),
        });
        document.initial_productions = 1;
        nodes.push(document);

        nodes.push(GrammarNode::new(GrammarKind::DocContent));

        let mut doc_end = GrammarNode::new(GrammarKind::DocEnd);
        doc_end.productions.push(Production {
            event: Event::EndDocument,
            next: None,
        });
        doc_end.initial_productions = 1;
        nodes.push(doc_end);

        let mut fragment = GrammarNode::new(GrammarKind::Fragment);
        fragment.productions.push(Production {
            event: Event::StartDocument,
            next: Some(FRAGMENT_CONTENT),
        });
        fragment.initial_productions = 1;
        nodes.push(fragment);

        nodes.push(GrammarNode::new(GrammarKind::FragmentContent));

        let uris = vec![
            UriShadow {
                uri: String::new(),
                preloaded: &[],
                names: Vec::new(),
            },
            UriShadow {
                uri: XML_NAMESPACE.to_string(),
                preloaded: XML_LOCAL_NAMES,
                names: Vec::new(),
            },
            UriShadow {
                uri: XSI_NAMESPACE.to_string(),
                preloaded: XSI_LOCAL_NAMES,
                names: Vec::new(),
            },
        ];

        Self { nodes, uris }
    }

    /// Intern a qualified name, returning the id pair the codec will use.
    pub fn qname(&mut self, uri: &str, local_name: &str) -> QNameId {
        let uri_idx = match self.uris.iter().position(|u| u.uri == uri) {
            Some(idx) => idx,
            None => {
                self.uris.push(UriShadow {
                    uri: uri.to_string(),
                    preloaded: &[],
                    names: Vec::new(),
                });
                self.uris.len() - 1
            }
        };

        let shadow = &mut self.uris[uri_idx];
        let base = shadow.preloaded.len();
        let local = if let Some(i) = shadow.preloaded.iter().position(|n| *n == local_name) {
            i
        } else if let Some(i) = shadow
            .names
            .iter()
            .position(|n| n.local_name == local_name)
        {
            base + i
        } else {
            shadow.names.push(NameSeed {
                local_name: local_name.to_string(),
                ..NameSeed::default()
            });
            base + shadow.names.len() - 1
        };

        QNameId {
            uri: uri_idx as u32,
            local: local as u32,
        }
    }

    /// Create a schema-informed start-tag grammar.
    pub fn start_tag(&mut self, first: bool) -> GrammarHandle {
        self.push(GrammarNode::new(GrammarKind::SchemaStartTag(
            StartTagInfo::new(first),
        )))
    }

    /// Create a schema-informed element-content grammar.
    pub fn element_content(&mut self) -> GrammarHandle {
        self.push(GrammarNode::new(GrammarKind::SchemaElementContent))
    }

    /// Append a production to a grammar.
    pub fn production(
        &mut self,
        grammar: GrammarHandle,
        event: Event,
        next: Option<GrammarHandle>,
    ) {
        let node = &mut self.nodes[grammar.0 as usize];
        node.productions.push(Production { event, next });
        node.initial_productions = node.productions.len();
    }

    /// Mark a start-tag grammar nillable, entering `type_empty` on
    /// `xsi:nil="true"`.
    pub fn nillable(&mut self, grammar: GrammarHandle, type_empty: GrammarHandle) {
        if let GrammarKind::SchemaStartTag(info) = &mut self.nodes[grammar.0 as usize].kind {
            info.nillable = true;
            info.type_empty = Some(type_empty);
        }
    }

    /// Admit `xsi:type` casts on a start-tag grammar under strict coding.
    pub fn type_castable(&mut self, grammar: GrammarHandle) {
        if let GrammarKind::SchemaStartTag(info) = &mut self.nodes[grammar.0 as usize].kind {
            info.type_castable = true;
        }
    }

    /// Record where undeclared character content moves a start tag to.
    pub fn content_grammar(&mut self, grammar: GrammarHandle, content: GrammarHandle) {
        if let GrammarKind::SchemaStartTag(info) = &mut self.nodes[grammar.0 as usize].kind {
            info.content = Some(content);
        }
    }

    /// Declare a global element, adding it to the document grammar.
    pub fn global_element(&mut self, uri: &str, local_name: &str, grammar: GrammarHandle) {
        let qname = self.qname(uri, local_name);
        self.seed_mut(qname).global_element = Some(grammar);
        self.nodes[DOC_CONTENT.0 as usize]
            .productions
            .push(Production {
                event: Event::StartElement {
                    qname,
                    grammar: Some(grammar),
                },
                next: Some(DOC_END),
            });
    }

    /// Declare an element visible at fragment level.
    pub fn fragment_element(&mut self, uri: &str, local_name: &str, grammar: GrammarHandle) {
        let qname = self.qname(uri, local_name);
        if self.seed_mut(qname).global_element.is_none() {
            self.seed_mut(qname).global_element = Some(grammar);
        }
        self.nodes[FRAGMENT_CONTENT.0 as usize]
            .productions
            .push(Production {
                event: Event::StartElement {
                    qname,
                    grammar: Some(grammar),
                },
                next: Some(FRAGMENT_CONTENT),
            });
    }

    /// Declare a global attribute with its datatype.
    pub fn global_attribute(&mut self, uri: &str, local_name: &str, datatype: Datatype) {
        let qname = self.qname(uri, local_name);
        self.seed_mut(qname).global_attribute = Some(datatype);
    }

    /// Associate a named type with its grammar, for `xsi:type` casts.
    pub fn named_type(&mut self, uri: &str, local_name: &str, grammar: GrammarHandle) {
        let qname = self.qname(uri, local_name);
        self.seed_mut(qname).type_grammar = Some(grammar);
    }

    /// Close the description.
    pub fn finish(mut self, schema_informed: bool) -> Grammars {
        // The generic element wildcard follows the declared elements.
        self.nodes[DOC_CONTENT.0 as usize]
            .productions
            .push(Production {
                event: Event::StartElementGeneric,
                next: Some(DOC_END),
            });
        self.nodes[FRAGMENT_CONTENT.0 as usize]
            .productions
            .extend([
                Production {
                    event: Event::StartElementGeneric,
                    next: Some(FRAGMENT_CONTENT),
                },
                Production {
                    event: Event::EndDocument,
                    next: None,
                },
            ]);
        for handle in [DOC_CONTENT, FRAGMENT_CONTENT] {
            let node = &mut self.nodes[handle.0 as usize];
            node.initial_productions = node.productions.len();
        }

        // The three fixed URIs only appear as seeds when names were added
        // to them; new URIs always carry at least one name.
        let seeds = self
            .uris
            .iter()
            .filter(|shadow| !shadow.names.is_empty())
            .map(|shadow| UriSeed {
                uri: shadow.uri.clone(),
                names: shadow.names.clone(),
            })
            .collect();

        Grammars {
            nodes: self.nodes,
            document: DOCUMENT,
            fragment: FRAGMENT,
            schema_informed,
            seeds,
        }
    }

    fn push(&mut self, node: GrammarNode) -> GrammarHandle {
        let handle = GrammarHandle(self.nodes.len() as u32);
        self.nodes.push(node);
        handle
    }

    fn seed_mut(&mut self, qname: QNameId) -> &mut NameSeed {
        let shadow = &mut self.uris[qname.uri as usize];
        let idx = qname.local as usize - shadow.preloaded.len();
        &mut shadow.names[idx]
    }
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NameTable;

    #[test]
    fn schema_less_shape() {
        let grammars = Grammars::schema_less();
        assert!(!grammars.is_schema_informed());

        let doc = &grammars.nodes[grammars.document_grammar().0 as usize];
        assert_eq!(doc.productions.len(), 1);
        assert!(matches!(doc.productions[0].event, Event::StartDocument));

        let content = &grammars.nodes[DOC_CONTENT.0 as usize];
        assert_eq!(content.productions.len(), 1);
        assert!(matches!(
            content.productions[0].event,
            Event::StartElementGeneric
        ));

        let fragment_content = &grammars.nodes[FRAGMENT_CONTENT.0 as usize];
        assert_eq!(fragment_content.productions.len(), 2);
    }

    #[test]
    fn builder_ids_match_name_table() {
        let mut builder = GrammarBuilder::new();
        let nil = builder.qname(XSI_NAMESPACE, "nil");
        assert_eq!(nil, QNameId { uri: 2, local: 0 });

        let a = builder.qname("urn:example", "a");
        let b = builder.qname("urn:example", "b");
        let other = builder.qname("urn:other", "a");
        assert_eq!(a, QNameId { uri: 3, local: 0 });
        assert_eq!(b, QNameId { uri: 3, local: 1 });
        assert_eq!(other, QNameId { uri: 4, local: 0 });

        let grammars = builder.finish(true);
        let table = NameTable::new(grammars.seeds());
        assert_eq!(table.find_uri("urn:example"), Some(3));
        assert_eq!(table.uri(3).find_qname("b"), Some(1));
        assert_eq!(table.find_uri("urn:other"), Some(4));
    }

    #[test]
    fn builtin_types_preload_xsd_names() {
        let grammars = Grammars::builtin_types();
        assert!(grammars.is_schema_informed());
        let table = NameTable::new(grammars.seeds());
        assert_eq!(table.find_uri(XSD_NAMESPACE), Some(3));
        assert_eq!(table.uri(3).qname_count(), XSD_LOCAL_NAMES.len());
        assert_eq!(table.uri(3).find_qname("boolean"), Some(15));
    }

    #[test]
    fn global_elements_precede_the_wildcard() {
        let mut builder = GrammarBuilder::new();
        let start = builder.start_tag(true);
        builder.production(start, Event::EndElement, None);
        builder.global_element("urn:example", "root", start);
        let grammars = builder.finish(true);

        let content = &grammars.nodes[DOC_CONTENT.0 as usize];
        assert_eq!(content.productions.len(), 2);
        assert!(matches!(
            content.productions[0].event,
            Event::StartElement { .. }
        ));
        assert!(matches!(
            content.productions[1].event,
            Event::StartElementGeneric
        ));
        // Under strict coding the wildcard is not offered.
        assert_eq!(content.first_level_len(true), 1);
        assert_eq!(content.first_level_len(false), 2);
    }
}
