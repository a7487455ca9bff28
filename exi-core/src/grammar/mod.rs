//! Grammar state: production sets, transitions, learning.
//!
//! Grammars live in arenas and refer to each other by integer handle, so
//! cyclic derivations (repeated content, fragment loops) need no reference
//! counting. Schema-informed nodes are immutable and shared through
//! [`Grammars`]; built-in nodes are owned by the running coder and learn
//! as undeclared events arrive.

mod event;
mod schema;

pub use event::Event;
pub use schema::{GrammarBuilder, Grammars};

pub(crate) use event::Undeclared;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::options::{CodecOptions, Fidelity};

/// A stable handle to a grammar node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrammarHandle(pub(crate) u32);

/// A production: an event and the grammar that follows it.
///
/// End-element and end-document productions have no successor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Production {
    pub(crate) event: Event,
    pub(crate) next: Option<GrammarHandle>,
}

/// Schema-informed start-tag metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StartTagInfo {
    /// Whether this is the first start-tag grammar of its type, which is
    /// where `xsi:type` and `xsi:nil` may appear.
    pub(crate) first: bool,
    /// Whether the element declaration is nillable.
    pub(crate) nillable: bool,
    /// Whether an `xsi:type` cast is admitted under strict coding.
    pub(crate) type_castable: bool,
    /// Grammar of the empty type, entered on `xsi:nil="true"`.
    pub(crate) type_empty: Option<GrammarHandle>,
    /// Grammar representing "attributes done"; target of undeclared
    /// character content.
    pub(crate) content: Option<GrammarHandle>,
}

impl StartTagInfo {
    pub(crate) fn new(first: bool) -> Self {
        Self {
            first,
            nillable: false,
            type_castable: false,
            type_empty: None,
            content: None,
        }
    }
}

/// What role a grammar node plays; decides its implicit productions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GrammarKind {
    /// The document grammar: a single SD production.
    Document,
    /// Document content: global or generic elements.
    DocContent,
    /// After the root element: ED.
    DocEnd,
    /// The fragment grammar: a single SD production.
    Fragment,
    /// Fragment content: elements and ED, repeatable.
    FragmentContent,
    /// A built-in start-tag grammar; learns at runtime.
    BuiltinStartTag {
        /// The element-content grammar of the same element.
        content: GrammarHandle,
    },
    /// A built-in element-content grammar; learns at runtime.
    BuiltinElementContent,
    /// A schema-informed start-tag grammar.
    SchemaStartTag(StartTagInfo),
    /// A schema-informed element-content grammar.
    SchemaElementContent,
}

/// One grammar: a finite set of productions plus its role.
#[derive(Debug, Clone)]
pub(crate) struct GrammarNode {
    pub(crate) kind: GrammarKind,
    /// First-level productions in event-code order; learned productions
    /// sit at the front, pushing older codes up.
    pub(crate) productions: Vec<Production>,
    /// Number of productions present before any learning.
    pub(crate) initial_productions: usize,
    /// Whether undeclared events extend this grammar.
    pub(crate) learnable: bool,
}

impl GrammarNode {
    pub(crate) fn new(kind: GrammarKind) -> Self {
        Self {
            kind,
            productions: Vec::new(),
            initial_productions: 0,
            learnable: false,
        }
    }

    /// Number of first-level codes occupied by real productions.
    ///
    /// A strict schema-informed document drops its trailing element
    /// wildcard.
    pub(crate) fn first_level_len(&self, strict_schema: bool) -> usize {
        let mut len = self.productions.len();
        if strict_schema
            && self.kind == GrammarKind::DocContent
            && matches!(
                self.productions.last().map(|p| &p.event),
                Some(Event::StartElementGeneric)
            )
        {
            len -= 1;
        }
        len
    }

    pub(crate) fn has_end_element(&self) -> bool {
        self.productions.iter().any(|p| p.event.is_end_element())
    }

    /// Number of declared attribute productions; sizes the third-level
    /// code of schema-invalid attribute values.
    pub(crate) fn attribute_count(&self) -> usize {
        self.productions
            .iter()
            .filter(|p| p.event.is_attribute_like())
            .count()
    }

    pub(crate) fn learned_count(&self) -> usize {
        self.productions.len() - self.initial_productions
    }

    /// Append a learned production, newest first, subject to the cap.
    pub(crate) fn learn(&mut self, event: Event, next: Option<GrammarHandle>, cap: Option<usize>) {
        if !self.learnable {
            return;
        }
        if let Some(cap) = cap {
            if self.learned_count() >= cap {
                return;
            }
        }
        self.productions.insert(0, Production { event, next });
    }

    /// The implicit events reachable through this grammar's escape code.
    pub(crate) fn undeclared_events(&self, options: &CodecOptions) -> SmallVec<[Undeclared; 12]> {
        let mut events = SmallVec::new();

        let comments = options.preserve(Fidelity::COMMENTS);
        let pis = options.preserve(Fidelity::PROCESSING_INSTRUCTIONS);
        let dtd = options.preserve(Fidelity::DTD);
        let prefixes = options.preserve(Fidelity::PREFIXES);
        let strict = options.strict;

        match &self.kind {
            GrammarKind::Document | GrammarKind::Fragment => {}
            GrammarKind::DocContent => {
                if dtd && !strict {
                    events.push(Undeclared::DocType);
                }
                if (comments || pis) && !strict {
                    events.push(Undeclared::CommentPi);
                }
            }
            GrammarKind::DocEnd | GrammarKind::FragmentContent => {
                if (comments || pis) && !strict {
                    events.push(Undeclared::CommentPi);
                }
            }
            GrammarKind::BuiltinStartTag { .. } => {
                events.push(Undeclared::EndElement);
                events.push(Undeclared::Attribute);
                if prefixes {
                    events.push(Undeclared::NamespaceDecl);
                }
                if options.self_contained {
                    events.push(Undeclared::SelfContained);
                }
                events.push(Undeclared::StartElement);
                events.push(Undeclared::Characters);
                if dtd {
                    events.push(Undeclared::EntityReference);
                }
                if comments || pis {
                    events.push(Undeclared::CommentPi);
                }
            }
            GrammarKind::BuiltinElementContent => {
                events.push(Undeclared::StartElement);
                events.push(Undeclared::Characters);
                if dtd {
                    events.push(Undeclared::EntityReference);
                }
                if comments || pis {
                    events.push(Undeclared::CommentPi);
                }
            }
            GrammarKind::SchemaStartTag(info) => {
                if strict {
                    if info.first && info.type_castable {
                        events.push(Undeclared::AttributeXsiType);
                    }
                    if info.first && info.nillable {
                        events.push(Undeclared::AttributeXsiNil);
                    }
                } else {
                    if !self.has_end_element() {
                        events.push(Undeclared::EndElement);
                    }
                    if info.first {
                        events.push(Undeclared::AttributeXsiType);
                        events.push(Undeclared::AttributeXsiNil);
                    }
                    events.push(Undeclared::Attribute);
                    events.push(Undeclared::InvalidAttributes);
                    if prefixes {
                        events.push(Undeclared::NamespaceDecl);
                    }
                    if options.self_contained {
                        events.push(Undeclared::SelfContained);
                    }
                    events.push(Undeclared::StartElement);
                    events.push(Undeclared::Characters);
                    if dtd {
                        events.push(Undeclared::EntityReference);
                    }
                    if comments || pis {
                        events.push(Undeclared::CommentPi);
                    }
                }
            }
            GrammarKind::SchemaElementContent => {
                if !strict {
                    if !self.has_end_element() {
                        events.push(Undeclared::EndElement);
                    }
                    events.push(Undeclared::StartElement);
                    events.push(Undeclared::Characters);
                    if dtd {
                        events.push(Undeclared::EntityReference);
                    }
                    if comments || pis {
                        events.push(Undeclared::CommentPi);
                    }
                }
            }
        }

        events
    }
}

/// The per-run grammar store: immutable schema nodes plus the built-in
/// nodes created while coding.
#[derive(Debug)]
pub(crate) struct GrammarStore {
    schema: Arc<Grammars>,
    dynamic: Vec<GrammarNode>,
}

impl GrammarStore {
    pub(crate) fn new(schema: Arc<Grammars>) -> Self {
        Self {
            schema,
            dynamic: Vec::new(),
        }
    }

    pub(crate) fn schema(&self) -> &Grammars {
        &self.schema
    }

    pub(crate) fn node(&self, handle: GrammarHandle) -> &GrammarNode {
        let base = self.schema.nodes.len();
        let idx = handle.0 as usize;
        if idx < base {
            &self.schema.nodes[idx]
        } else {
            &self.dynamic[idx - base]
        }
    }

    /// Mutable access to a dynamic node; schema nodes never change.
    pub(crate) fn node_mut(&mut self, handle: GrammarHandle) -> Option<&mut GrammarNode> {
        let base = self.schema.nodes.len();
        let idx = handle.0 as usize;
        idx.checked_sub(base).map(|i| &mut self.dynamic[i])
    }

    /// Create a fresh built-in start-tag/element-content pair.
    pub(crate) fn new_builtin_element(&mut self, learnable: bool) -> GrammarHandle {
        let base = self.schema.nodes.len() as u32;
        let content_handle = GrammarHandle(base + self.dynamic.len() as u32 + 1);

        let mut start_tag = GrammarNode::new(GrammarKind::BuiltinStartTag {
            content: content_handle,
        });
        start_tag.learnable = learnable;

        let mut content = GrammarNode::new(GrammarKind::BuiltinElementContent);
        content.productions.push(Production {
            event: Event::EndElement,
            next: None,
        });
        content.initial_productions = 1;
        content.learnable = learnable;

        let start_handle = GrammarHandle(base + self.dynamic.len() as u32);
        self.dynamic.push(start_tag);
        self.dynamic.push(content);
        start_handle
    }

    /// Drop every grammar learned this run.
    pub(crate) fn clear(&mut self) {
        self.dynamic.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::QNameId;
    use crate::value::Datatype;

    fn store() -> GrammarStore {
        GrammarStore::new(Arc::new(Grammars::schema_less()))
    }

    #[test]
    fn builtin_element_shape() {
        let mut store = store();
        let start = store.new_builtin_element(true);
        let node = store.node(start);
        assert_eq!(node.first_level_len(false), 0);

        let GrammarKind::BuiltinStartTag { content } = node.kind else {
            panic!("expected a start-tag node");
        };
        let content_node = store.node(content);
        assert_eq!(content_node.first_level_len(false), 1);
        assert!(content_node.has_end_element());
    }

    #[test]
    fn learning_prepends() {
        let mut store = store();
        let start = store.new_builtin_element(true);
        let q = QNameId { uri: 3, local: 0 };

        let node = store.node_mut(start).unwrap();
        node.learn(
            Event::Attribute {
                qname: q,
                datatype: Datatype::String,
            },
            Some(start),
            None,
        );
        node.learn(
            Event::StartElement {
                qname: q,
                grammar: None,
            },
            Some(start),
            None,
        );

        let node = store.node(start);
        assert_eq!(node.learned_count(), 2);
        assert!(matches!(
            node.productions[0].event,
            Event::StartElement { .. }
        ));
        assert!(matches!(node.productions[1].event, Event::Attribute { .. }));
    }

    #[test]
    fn learning_respects_cap() {
        let mut store = store();
        let start = store.new_builtin_element(true);
        let q = QNameId { uri: 3, local: 0 };

        let node = store.node_mut(start).unwrap();
        node.learn(
            Event::Characters {
                datatype: Datatype::String,
            },
            Some(start),
            Some(1),
        );
        node.learn(
            Event::StartElement {
                qname: q,
                grammar: None,
            },
            Some(start),
            Some(1),
        );
        assert_eq!(store.node(start).learned_count(), 1);
    }

    #[test]
    fn schema_nodes_never_learn() {
        let mut store = store();
        let document = store.schema().document_grammar();
        assert!(store.node_mut(document).is_none());
    }

    #[test]
    fn undeclared_sets_follow_fidelity() {
        let mut options = CodecOptions::default();

        let content = GrammarNode::new(GrammarKind::DocContent);
        assert!(content.undeclared_events(&options).is_empty());

        options.fidelity = Fidelity::COMMENTS | Fidelity::DTD;
        assert_eq!(
            content.undeclared_events(&options).as_slice(),
            &[Undeclared::DocType, Undeclared::CommentPi]
        );

        let start = GrammarNode::new(GrammarKind::BuiltinStartTag {
            content: GrammarHandle(0),
        });
        let events = start.undeclared_events(&CodecOptions::default());
        assert_eq!(
            events.as_slice(),
            &[
                Undeclared::EndElement,
                Undeclared::Attribute,
                Undeclared::StartElement,
                Undeclared::Characters,
            ]
        );
    }
}
