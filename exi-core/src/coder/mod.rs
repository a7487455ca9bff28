//! The event coder: drives the grammar state machine, dispatches values
//! to the typed channel and the string table, and maintains the element
//! stack.
//!
//! Encoder and decoder share [`CoderCore`]; they perform identical grammar
//! transitions and identical table insertions for the same logical event
//! stream, which is what keeps the two ends in lock-step without any
//! synchronization on the wire.

mod decoder;
mod encoder;

pub use decoder::{ExiDecoder, SchemaResolver};
pub use encoder::ExiEncoder;

pub(crate) use decoder::BodyDecoder;
pub(crate) use encoder::BodyEncoder;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::channel::code_width;
use crate::error::{Result, StateError, bail};
use crate::grammar::{GrammarHandle, GrammarKind, GrammarStore, Grammars, Undeclared};
use crate::names::{NameTable, QNameId};
use crate::options::CodecOptions;
use crate::string_table::StringTable;
use crate::value::Value;

/// A resolved qualified name as delivered with decoded events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    /// Namespace URI; empty for unqualified names.
    pub uri: String,
    /// Local part of the name.
    pub local_name: String,
    /// Preserved or synthesized prefix; `None` for the default namespace.
    pub prefix: Option<String>,
}

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum ExiEvent {
    /// SD.
    StartDocument,
    /// ED.
    EndDocument,
    /// SE.
    StartElement(QName),
    /// EE.
    EndElement,
    /// AT.
    Attribute {
        /// The attribute name.
        name: QName,
        /// The decoded value.
        value: Value,
    },
    /// NS.
    NamespaceDeclaration {
        /// The declared prefix.
        prefix: String,
        /// The bound URI.
        uri: String,
        /// Whether the declaration applies to the element's own name.
        element_ns: bool,
    },
    /// CH.
    Characters(Value),
    /// CM.
    Comment(String),
    /// PI.
    ProcessingInstruction {
        /// The target of the instruction.
        target: String,
        /// The instruction data.
        data: String,
    },
    /// DT.
    DocType {
        /// The document type name.
        name: String,
        /// The public identifier.
        public_id: String,
        /// The system identifier.
        system_id: String,
        /// The internal subset text.
        text: String,
    },
    /// ER.
    EntityReference(String),
}

/// Where the coder stands relative to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DocState {
    BeforeDocument,
    InDocument,
    AfterDocument,
}

/// A stack frame: one open element.
#[derive(Debug)]
pub(crate) struct ElementContext {
    /// The element name.
    pub(crate) qname: QNameId,
    /// Grammar of the parent to resume when this element ends.
    pub(crate) resume: GrammarHandle,
    /// Preserved prefix of the element name.
    pub(crate) prefix: Option<String>,
    /// Namespace declarations on this element, when prefixes are preserved.
    pub(crate) ns_declarations: Vec<(String, u32)>,
    /// `xml:space` in effect on this element, when declared.
    pub(crate) xml_space_preserve: Option<bool>,
}

/// State shared by the encoding and decoding loops.
pub(crate) struct CoderCore {
    pub(crate) options: CodecOptions,
    pub(crate) store: GrammarStore,
    pub(crate) names: NameTable,
    pub(crate) strings: StringTable,
    pub(crate) stack: SmallVec<[ElementContext; 16]>,
    /// The grammar currently in effect.
    pub(crate) current: GrammarHandle,
    pub(crate) state: DocState,
    /// Built-in element grammars created this run.
    element_grammars_created: usize,
    /// Shared non-learning grammar used once the element-grammar cap is hit.
    scratch_element: Option<GrammarHandle>,
}

impl CoderCore {
    pub(crate) fn new(options: CodecOptions, grammars: Arc<Grammars>) -> Result<Self> {
        options.validate()?;

        let names = NameTable::new(grammars.seeds());
        let strings = StringTable::new(
            options.local_value_partitions,
            options.value_partition_capacity,
            options.value_max_length,
        );
        let start = if options.fragment {
            grammars.fragment_grammar()
        } else {
            grammars.document_grammar()
        };

        Ok(Self {
            store: GrammarStore::new(grammars),
            names,
            strings,
            stack: SmallVec::new(),
            current: start,
            state: DocState::BeforeDocument,
            element_grammars_created: 0,
            scratch_element: None,
            options,
        })
    }

    /// Reset runtime state for the next run, keeping the pre-built
    /// grammars and initial tables.
    pub(crate) fn init_for_each_run(&mut self) {
        self.names.clear_runtime();
        self.strings.clear();
        self.stack.clear();
        self.store.clear();
        self.element_grammars_created = 0;
        self.scratch_element = None;
        self.current = if self.options.fragment {
            self.store.schema().fragment_grammar()
        } else {
            self.store.schema().document_grammar()
        };
        self.state = DocState::BeforeDocument;
    }

    pub(crate) fn schema_informed(&self) -> bool {
        self.store.schema().is_schema_informed()
    }

    /// Strict coding over schema-informed grammars; the combination that
    /// removes wildcards from the document grammar.
    pub(crate) fn strict_schema(&self) -> bool {
        self.options.strict && self.schema_informed()
    }

    /// Number of first-level codes and the implicit event list of the
    /// current grammar. The escape code exists only when the list is
    /// non-empty.
    pub(crate) fn code_layout(&self) -> (usize, SmallVec<[Undeclared; 12]>) {
        let node = self.store.node(self.current);
        let first = node.first_level_len(self.strict_schema());
        let undeclared = node.undeclared_events(&self.options);
        (first, undeclared)
    }

    pub(crate) fn first_level_width(&self, first: usize, has_escape: bool) -> u32 {
        code_width(first + usize::from(has_escape))
    }

    /// The element grammar for a name: its schema grammar, the memoized
    /// built-in grammar, or a fresh one, subject to the grammar cap.
    pub(crate) fn element_grammar(&mut self, qname: QNameId) -> GrammarHandle {
        let ctx = self.names.context(qname);
        if let Some(grammar) = ctx.schema_grammar {
            return grammar;
        }
        if let Some(grammar) = ctx.builtin_grammar {
            return grammar;
        }

        if let Some(cap) = self.options.max_builtin_element_grammars {
            if self.element_grammars_created >= cap {
                // Past the cap, elements share one grammar that never
                // learns and is not memoized.
                return match self.scratch_element {
                    Some(grammar) => grammar,
                    None => {
                        let grammar = self.store.new_builtin_element(false);
                        self.scratch_element = Some(grammar);
                        grammar
                    }
                };
            }
        }

        let grammar = self.store.new_builtin_element(true);
        self.element_grammars_created += 1;
        self.names.context_mut(qname).builtin_grammar = Some(grammar);
        grammar
    }

    /// Learn a production on the current grammar, if it is built-in.
    pub(crate) fn learn(
        &mut self,
        event: crate::grammar::Event,
        next: Option<GrammarHandle>,
    ) {
        let cap = self.options.max_builtin_productions;
        if let Some(node) = self.store.node_mut(self.current) {
            node.learn(event, next, cap);
        }
    }

    /// Where content-producing implicit events (CH, ER, CM, PI) leave the
    /// current grammar.
    pub(crate) fn content_successor(&self) -> GrammarHandle {
        match self.store.node(self.current).kind {
            GrammarKind::BuiltinStartTag { content } => content,
            GrammarKind::SchemaStartTag(info) => info.content.unwrap_or(self.current),
            _ => self.current,
        }
    }

    pub(crate) fn push_element(
        &mut self,
        qname: QNameId,
        resume: GrammarHandle,
        prefix: Option<String>,
    ) {
        self.stack.push(ElementContext {
            qname,
            resume,
            prefix,
            ns_declarations: Vec::new(),
            xml_space_preserve: None,
        });
    }

    pub(crate) fn pop_element(&mut self) -> Result<ElementContext> {
        match self.stack.pop() {
            Some(frame) => {
                self.current = frame.resume;
                Ok(frame)
            }
            None => bail!(StateError::StackUnderflow),
        }
    }

    /// The qualified name owning character content: the enclosing element.
    pub(crate) fn element_qname(&self) -> Result<QNameId> {
        match self.stack.last() {
            Some(frame) => Ok(frame.qname),
            None => bail!(StateError::NotInDocument),
        }
    }

    /// Note an `xml:space` attribute on the open element.
    pub(crate) fn note_xml_space(&mut self, value: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame.xml_space_preserve = match value {
                "preserve" => Some(true),
                "default" => Some(false),
                _ => frame.xml_space_preserve,
            };
        }
    }

    /// Whether `xml:space="preserve"` is in effect at the current depth.
    pub(crate) fn xml_space_preserve(&self) -> bool {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.xml_space_preserve)
            .unwrap_or(false)
    }

    /// Resolve a prefix against the open namespace declarations.
    pub(crate) fn resolve_prefix(&self, prefix: &str) -> Option<u32> {
        self.stack.iter().rev().find_map(|frame| {
            frame
                .ns_declarations
                .iter()
                .find(|(p, _)| p == prefix)
                .map(|(_, uri)| *uri)
        })
    }

    pub(crate) fn resolved_qname(&self, qname: QNameId, prefix: Option<String>) -> QName {
        let uri = self.names.uri(qname.uri);
        let ctx = uri.qname(qname.local);
        // Prefixes are only synthesized when none were preserved.
        let prefix = prefix.or_else(|| {
            if self.options.preserve(crate::options::Fidelity::PREFIXES) {
                return None;
            }
            let synthesized = ctx.default_prefix();
            (!synthesized.is_empty()).then_some(synthesized)
        });

        QName {
            uri: uri.uri().to_string(),
            local_name: ctx.local_name().to_string(),
            prefix,
        }
    }
}
