//! The decoding side of the event coder.
//!
//! Every branch mirrors the encoder exactly: the same grammar transitions,
//! the same learning at the same production boundary, the same table
//! insertions. The bit stream has no internal framing, so any divergence
//! here desynchronizes the rest of the stream.

use std::sync::Arc;

use log::warn;

use crate::channel::{DecoderChannel, code_width};
use crate::coder::{CoderCore, DocState, ExiEvent, QName};
use crate::error::{BitstreamError, OptionError, Result, StateError, bail};
use crate::grammar::{Event, GrammarKind, Grammars, Undeclared};
use crate::header;
use crate::names::{QNameId, XML_NAMESPACE};
use crate::options::{CodecOptions, Fidelity};
use crate::value::{Datatype, IntegerValue, QNameValue, Value};

/// Resolves a header schema identifier to a pre-built grammar set.
pub trait SchemaResolver {
    /// Return the grammar set for `schema_id`, or `None` when unknown.
    fn resolve(&self, schema_id: &str) -> Option<Arc<Grammars>>;
}

/// Decodes an EXI body from a channel owned by the caller.
pub(crate) struct BodyDecoder {
    pub(crate) core: CoderCore,
}

impl BodyDecoder {
    pub(crate) fn new(options: CodecOptions, grammars: Arc<Grammars>) -> Result<Self> {
        Ok(Self {
            core: CoderCore::new(options, grammars)?,
        })
    }

    /// Read and deliver the next event.
    pub(crate) fn next_event(&mut self, ch: &mut DecoderChannel<'_>) -> Result<ExiEvent> {
        if self.core.state == DocState::AfterDocument {
            bail!(StateError::NotInDocument);
        }

        let (first, undeclared) = self.core.code_layout();
        let has_escape = !undeclared.is_empty();
        let width = self.core.first_level_width(first, has_escape);
        let code = ch.decode_n_bit(width)? as usize;

        if code < first {
            self.dispatch_production(ch, code)
        } else if code == first && has_escape {
            let second = ch.decode_n_bit(code_width(undeclared.len()))? as usize;
            let Some(&target) = undeclared.get(second) else {
                bail!(BitstreamError::EventCodeOutOfRange);
            };
            self.dispatch_undeclared(ch, target)
        } else {
            bail!(BitstreamError::EventCodeOutOfRange)
        }
    }

    fn dispatch_production(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        code: usize,
    ) -> Result<ExiEvent> {
        let production = self.core.store.node(self.core.current).productions[code].clone();

        match production.event {
            Event::StartDocument => {
                self.core.current = production.next.ok_or(StateError::NoProduction)?;
                self.core.state = DocState::InDocument;
                Ok(ExiEvent::StartDocument)
            }
            Event::EndDocument => {
                self.core.state = DocState::AfterDocument;
                Ok(ExiEvent::EndDocument)
            }
            Event::StartElement { qname, grammar } => {
                let resume = production.next.ok_or(StateError::NoProduction)?;
                let child = match grammar {
                    Some(grammar) => grammar,
                    None => self.core.element_grammar(qname),
                };
                self.enter_element(ch, qname, child, resume)
            }
            Event::StartElementNs { uri } => {
                let qname = self.decode_local_name(ch, uri)?;
                let resume = production.next.ok_or(StateError::NoProduction)?;
                let child = self.core.element_grammar(qname);
                self.enter_element(ch, qname, child, resume)
            }
            Event::StartElementGeneric => {
                let qname = self.decode_qname(ch)?;
                let resume = production.next.ok_or(StateError::NoProduction)?;
                let child = self.core.element_grammar(qname);
                self.enter_element(ch, qname, child, resume)
            }
            Event::EndElement => {
                self.core.pop_element()?;
                Ok(ExiEvent::EndElement)
            }
            Event::Attribute { qname, datatype } => {
                let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                let datatype = self.core.options.effective_datatype(&datatype)?;
                let value = self.decode_typed_value(ch, qname, &datatype)?;
                self.transition(production.next);
                Ok(self.attribute_event(qname, prefix, value))
            }
            Event::AttributeNs { uri } => {
                let qname = self.decode_local_name(ch, uri)?;
                let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                let value = self.decode_wildcard_attribute_value(ch, qname)?;
                self.transition(production.next);
                Ok(self.attribute_event(qname, prefix, value))
            }
            Event::AttributeGeneric => {
                let qname = self.decode_qname(ch)?;
                let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                let value = self.decode_wildcard_attribute_value(ch, qname)?;
                self.transition(production.next);
                Ok(self.attribute_event(qname, prefix, value))
            }
            Event::Characters { datatype } => {
                let owner = self.core.element_qname()?;
                let datatype = self.core.options.effective_datatype(&datatype)?;
                let value = self.decode_typed_value(ch, owner, &datatype)?;
                self.transition(production.next);
                Ok(ExiEvent::Characters(value))
            }
        }
    }

    fn dispatch_undeclared(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        target: Undeclared,
    ) -> Result<ExiEvent> {
        if self.core.schema_informed() && deviates(target) {
            warn!("decoding deviation event {target:?} in a schema-informed grammar");
        }

        match target {
            Undeclared::EndElement => {
                self.core.learn(Event::EndElement, None);
                self.core.pop_element()?;
                Ok(ExiEvent::EndElement)
            }
            Undeclared::AttributeXsiType => {
                let at_prefix = self.decode_qname_prefix(ch, 2)?;
                let qname = self.decode_qname(ch)?;
                let value_prefix = self.decode_qname_prefix(ch, qname.uri)?;

                match self.core.names.context(qname).type_grammar {
                    Some(grammar) => self.core.current = grammar,
                    None => warn!("xsi:type names an unknown type; grammar unchanged"),
                }

                let uri = self.core.names.uri(qname.uri).uri().to_string();
                let local_name = self.core.names.context(qname).local_name().to_string();
                let xsi_type = QNameId { uri: 2, local: 1 };
                Ok(self.attribute_event(
                    xsi_type,
                    at_prefix,
                    Value::QName(QNameValue {
                        uri,
                        local_name,
                        prefix: value_prefix,
                    }),
                ))
            }
            Undeclared::AttributeXsiNil => {
                let prefix = self.decode_qname_prefix(ch, 2)?;
                let nil = ch.decode_boolean()?;

                if nil {
                    if let GrammarKind::SchemaStartTag(info) =
                        self.core.store.node(self.core.current).kind
                    {
                        if let Some(empty) = info.type_empty {
                            self.core.current = empty;
                        }
                    }
                }

                let xsi_nil = QNameId { uri: 2, local: 0 };
                Ok(self.attribute_event(xsi_nil, prefix, Value::Boolean(nil)))
            }
            Undeclared::Attribute => {
                let qname = self.decode_qname(ch)?;
                let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                self.core.learn(
                    Event::Attribute {
                        qname,
                        datatype: Datatype::String,
                    },
                    Some(self.core.current),
                );
                let value = self.decode_string_value(ch, qname)?;
                Ok(self.attribute_event(qname, prefix, value))
            }
            Undeclared::InvalidAttributes => {
                let attribute_count = self.core.store.node(self.core.current).attribute_count();
                let third = ch.decode_n_bit(code_width(attribute_count + 1))? as usize;

                if third < attribute_count {
                    // The declared attribute at that position, value
                    // carried as a string.
                    let qname = {
                        let node = self.core.store.node(self.core.current);
                        let production = node
                            .productions
                            .iter()
                            .filter(|p| p.event.is_attribute_like())
                            .nth(third)
                            .ok_or(BitstreamError::EventCodeOutOfRange)?;
                        match &production.event {
                            Event::Attribute { qname, .. } => *qname,
                            _ => bail!(BitstreamError::EventCodeOutOfRange),
                        }
                    };
                    let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                    let value = self.decode_string_value(ch, qname)?;
                    Ok(self.attribute_event(qname, prefix, value))
                } else {
                    let qname = self.decode_qname(ch)?;
                    let prefix = self.decode_qname_prefix(ch, qname.uri)?;
                    let value = self.decode_string_value(ch, qname)?;
                    Ok(self.attribute_event(qname, prefix, value))
                }
            }
            Undeclared::NamespaceDecl => {
                let uri_id = self.decode_uri(ch)?;
                let prefix = self.decode_ns_prefix(ch, uri_id)?;
                let element_ns = ch.decode_boolean()?;

                let uri = self.core.names.uri(uri_id).uri().to_string();
                if let Some(frame) = self.core.stack.last_mut() {
                    frame.ns_declarations.push((prefix.clone(), uri_id));
                    if element_ns {
                        frame.prefix = Some(prefix.clone());
                    }
                }
                Ok(ExiEvent::NamespaceDeclaration {
                    prefix,
                    uri,
                    element_ns,
                })
            }
            Undeclared::SelfContained => bail!(OptionError::SelfContainedNotSupported),
            Undeclared::StartElement => {
                let qname = self.decode_qname(ch)?;
                let resume = self.core.content_successor();
                self.core.learn(
                    Event::StartElement {
                        qname,
                        grammar: None,
                    },
                    Some(resume),
                );
                let child = self.core.element_grammar(qname);
                self.enter_element(ch, qname, child, resume)
            }
            Undeclared::Characters => {
                let owner = self.core.element_qname()?;
                let successor = self.core.content_successor();
                self.core.learn(
                    Event::Characters {
                        datatype: Datatype::String,
                    },
                    Some(successor),
                );
                let value = self.decode_string_value(ch, owner)?;
                self.core.current = successor;
                Ok(ExiEvent::Characters(value))
            }
            Undeclared::EntityReference => {
                let name = ch.decode_string()?;
                self.core.current = self.core.content_successor();
                Ok(ExiEvent::EntityReference(name))
            }
            Undeclared::DocType => {
                let name = ch.decode_string()?;
                let public_id = ch.decode_string()?;
                let system_id = ch.decode_string()?;
                let text = ch.decode_string()?;
                Ok(ExiEvent::DocType {
                    name,
                    public_id,
                    system_id,
                    text,
                })
            }
            Undeclared::CommentPi => {
                let comments = self.core.options.preserve(Fidelity::COMMENTS);
                let pis = self
                    .core
                    .options
                    .preserve(Fidelity::PROCESSING_INSTRUCTIONS);
                let count = usize::from(comments) + usize::from(pis);
                let third = ch.decode_n_bit(code_width(count))?;

                let is_comment = comments && third == 0;
                self.core.current = self.core.content_successor();

                if is_comment {
                    Ok(ExiEvent::Comment(ch.decode_string()?))
                } else {
                    let target = ch.decode_string()?;
                    let data = ch.decode_string()?;
                    Ok(ExiEvent::ProcessingInstruction { target, data })
                }
            }
        }
    }

    fn enter_element(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        qname: QNameId,
        child: crate::grammar::GrammarHandle,
        resume: crate::grammar::GrammarHandle,
    ) -> Result<ExiEvent> {
        let prefix = self.decode_qname_prefix(ch, qname.uri)?;
        self.core.push_element(qname, resume, prefix.clone());
        self.core.current = child;
        Ok(ExiEvent::StartElement(
            self.core.resolved_qname(qname, prefix),
        ))
    }

    fn transition(&mut self, next: Option<crate::grammar::GrammarHandle>) {
        if let Some(next) = next {
            self.core.current = next;
        }
    }

    fn attribute_event(&mut self, qname: QNameId, prefix: Option<String>, value: Value) -> ExiEvent {
        let is_xml_space = self.core.names.uri(qname.uri).uri() == XML_NAMESPACE
            && self.core.names.context(qname).local_name() == "space";
        if is_xml_space {
            let lexical = value.lexical();
            self.core.note_xml_space(&lexical);
        }

        ExiEvent::Attribute {
            name: self.core.resolved_qname(qname, prefix),
            value,
        }
    }

    // ---- name decoding ----

    fn decode_uri(&mut self, ch: &mut DecoderChannel<'_>) -> Result<u32> {
        let count = self.core.names.uri_count();
        let width = code_width(count + 1);
        let value = ch.decode_n_bit(width)?;

        if value == 0 {
            let uri = ch.decode_string()?;
            Ok(self.core.names.add_uri(&uri))
        } else {
            let id = value - 1;
            if id as usize >= count {
                bail!(BitstreamError::UnknownCompactId);
            }
            Ok(id)
        }
    }

    fn decode_local_name(&mut self, ch: &mut DecoderChannel<'_>, uri_id: u32) -> Result<QNameId> {
        let length = ch.decode_unsigned_u64()?;

        if length == 0 {
            let uri = self.core.names.uri(uri_id);
            let width = code_width(uri.qname_count());
            let local = ch.decode_n_bit(width)?;
            if local as usize >= uri.qname_count() {
                bail!(BitstreamError::UnknownCompactId);
            }
            Ok(QNameId {
                uri: uri_id,
                local,
            })
        } else {
            let local_name = ch.decode_chars((length - 1) as usize)?;
            Ok(self.core.names.add_local(uri_id, &local_name))
        }
    }

    fn decode_qname(&mut self, ch: &mut DecoderChannel<'_>) -> Result<QNameId> {
        let uri_id = self.decode_uri(ch)?;
        self.decode_local_name(ch, uri_id)
    }

    fn decode_qname_prefix(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        uri_id: u32,
    ) -> Result<Option<String>> {
        if !self.core.options.preserve(Fidelity::PREFIXES) {
            return Ok(None);
        }

        let uri = self.core.names.uri(uri_id);
        let count = uri.prefix_count();
        if count == 0 {
            return Ok(None);
        }

        let id = ch.decode_n_bit(code_width(count))?;
        let prefix = uri
            .prefix(id)
            .ok_or(BitstreamError::UnknownCompactId)?
            .to_string();
        Ok((!prefix.is_empty()).then_some(prefix))
    }

    fn decode_ns_prefix(&mut self, ch: &mut DecoderChannel<'_>, uri_id: u32) -> Result<String> {
        let count = self.core.names.uri(uri_id).prefix_count();
        let width = code_width(count + 1);
        let value = ch.decode_n_bit(width)?;

        if value == 0 {
            let prefix = ch.decode_string()?;
            self.core.names.uri_mut(uri_id).add_prefix(&prefix);
            Ok(prefix)
        } else {
            let id = value - 1;
            self.core
                .names
                .uri(uri_id)
                .prefix(id)
                .map(str::to_string)
                .ok_or_else(|| BitstreamError::UnknownCompactId.into())
        }
    }

    // ---- value decoding ----

    fn decode_string_value(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        owner: QNameId,
    ) -> Result<Value> {
        let selector = ch.decode_unsigned_u64()?;

        match selector {
            0 => {
                let width = code_width(self.core.strings.local_size(owner));
                let id = ch.decode_n_bit(width)?;
                let value = self
                    .core
                    .strings
                    .local_value(owner, id)
                    .ok_or(BitstreamError::UnknownCompactId)?;
                Ok(Value::String(value.to_string()))
            }
            1 => {
                let width = code_width(self.core.strings.global_size());
                let id = ch.decode_n_bit(width)?;
                let value = self
                    .core
                    .strings
                    .global_value(id)
                    .ok_or(BitstreamError::UnknownCompactId)?;
                Ok(Value::String(value.to_string()))
            }
            length => {
                let value = ch.decode_chars((length - 2) as usize)?;
                self.core.strings.insert(owner, &value);
                Ok(Value::String(value))
            }
        }
    }

    fn decode_typed_value(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        owner: QNameId,
        datatype: &Datatype,
    ) -> Result<Value> {
        Ok(match datatype {
            Datatype::String => self.decode_string_value(ch, owner)?,
            Datatype::Boolean => Value::Boolean(ch.decode_boolean()?),
            Datatype::Integer => Value::Integer(ch.decode_integer()?),
            Datatype::UnsignedInteger => Value::Integer(ch.decode_unsigned_integer()?),
            Datatype::NBitInteger { lower, bits } => {
                let offset = i64::from(ch.decode_n_bit(*bits)?);
                Value::Integer(IntegerValue::from_i64(lower + offset))
            }
            Datatype::Decimal => Value::Decimal(ch.decode_decimal()?),
            Datatype::Float => Value::Float(ch.decode_float()?),
            Datatype::DateTime(kind) => Value::DateTime(ch.decode_datetime(*kind)?),
            Datatype::Binary(kind) => Value::Binary(*kind, ch.decode_binary()?),
        })
    }

    /// A wildcard attribute is typed by its global declaration when one
    /// exists; the invalid-value case arrives through a different code.
    fn decode_wildcard_attribute_value(
        &mut self,
        ch: &mut DecoderChannel<'_>,
        qname: QNameId,
    ) -> Result<Value> {
        match self.core.names.context(qname).attribute_datatype.clone() {
            Some(datatype) => {
                let datatype = self.core.options.effective_datatype(&datatype)?;
                self.decode_typed_value(ch, qname, &datatype)
            }
            None => self.decode_string_value(ch, qname),
        }
    }
}

fn deviates(target: Undeclared) -> bool {
    matches!(
        target,
        Undeclared::EndElement
            | Undeclared::Attribute
            | Undeclared::StartElement
            | Undeclared::Characters
    )
}

/// Streaming EXI decoder: header plus body over a byte slice.
pub struct ExiDecoder<'a> {
    channel: DecoderChannel<'a>,
    body: Option<BodyDecoder>,
    options: CodecOptions,
    grammars: Arc<Grammars>,
    resolver: Option<Box<dyn SchemaResolver>>,
    finished: bool,
}

impl<'a> ExiDecoder<'a> {
    /// Create a decoder over `data`. `options` and `grammars` apply when
    /// the header carries no options document of its own.
    pub fn new(data: &'a [u8], options: CodecOptions, grammars: Arc<Grammars>) -> Self {
        Self {
            channel: DecoderChannel::new(data, false),
            body: None,
            options,
            grammars,
            resolver: None,
            finished: false,
        }
    }

    /// Attach a resolver for header schema identifiers.
    pub fn with_resolver(mut self, resolver: Box<dyn SchemaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Read and deliver the next event; `None` after end-document.
    pub fn next_event(&mut self) -> Result<Option<ExiEvent>> {
        if self.finished {
            return Ok(None);
        }

        if self.body.is_none() {
            let (options, grammars) = header::read_header(
                &mut self.channel,
                &self.options,
                &self.grammars,
                self.resolver.as_deref(),
            )?;
            self.channel.set_byte_packed(options.byte_packed());
            self.body = Some(BodyDecoder::new(options, grammars)?);
        }

        let body = self.body.as_mut().expect("created above");
        let event = body.next_event(&mut self.channel)?;
        if event == ExiEvent::EndDocument {
            self.finished = true;
        }
        Ok(Some(event))
    }

    /// The options in effect: the header's, once it has been read.
    pub fn options(&self) -> &CodecOptions {
        match &self.body {
            Some(body) => &body.core.options,
            None => &self.options,
        }
    }

    /// Whether `xml:space="preserve"` applies at the current depth.
    pub fn xml_space_preserve(&self) -> bool {
        self.body
            .as_ref()
            .is_some_and(|body| body.core.xml_space_preserve())
    }

    /// The name of the innermost open element, if any.
    pub fn current_element(&self) -> Option<QName> {
        let body = self.body.as_ref()?;
        let frame = body.core.stack.last()?;
        Some(body.core.resolved_qname(frame.qname, frame.prefix.clone()))
    }

    /// Prepare the instance for another stream. Pre-built grammars and
    /// initial tables are retained; everything learned is dropped.
    pub fn init_for_each_run(&mut self, data: &'a [u8]) {
        self.channel = DecoderChannel::new(data, false);
        self.body = None;
        self.finished = false;
    }
}
