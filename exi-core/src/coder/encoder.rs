//! The encoding side of the event coder.

use std::io::Write;
use std::sync::Arc;

use log::warn;

use crate::channel::{EncoderChannel, code_width};
use crate::coder::{CoderCore, DocState};
use crate::error::{OptionError, Result, StateError, ValueError, bail};
use crate::grammar::{Event, GrammarHandle, GrammarKind, Grammars, Undeclared};
use crate::header;
use crate::names::{QNameId, XML_NAMESPACE, XSI_NAMESPACE};
use crate::options::{CodecOptions, Fidelity};
use crate::string_table::Lookup;
use crate::value::{Datatype, Value};

/// Encodes an EXI body onto a channel owned by the caller.
///
/// The header codec drives a second instance of this over the same channel
/// for the embedded options document.
pub(crate) struct BodyEncoder {
    pub(crate) core: CoderCore,
}

impl BodyEncoder {
    pub(crate) fn new(options: CodecOptions, grammars: Arc<Grammars>) -> Result<Self> {
        Ok(Self {
            core: CoderCore::new(options, grammars)?,
        })
    }

    pub(crate) fn start_document<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
    ) -> Result<()> {
        if self.core.state != DocState::BeforeDocument {
            bail!(StateError::NotInDocument);
        }

        // The document grammar holds a single SD production; its event
        // code occupies no bits.
        let Some((code, production)) = self.find_first_level(|e| e == &Event::StartDocument)
        else {
            bail!(StateError::NoProduction);
        };
        self.emit_first_level(ch, code)?;
        self.core.current = production.next.ok_or(StateError::NoProduction)?;
        self.core.state = DocState::InDocument;
        Ok(())
    }

    pub(crate) fn end_document<W: Write>(&mut self, ch: &mut EncoderChannel<W>) -> Result<()> {
        if self.core.state != DocState::InDocument || !self.core.stack.is_empty() {
            bail!(StateError::NotInDocument);
        }

        let Some((code, _)) = self.find_first_level(|e| e == &Event::EndDocument) else {
            bail!(StateError::NoProduction);
        };
        self.emit_first_level(ch, code)?;
        self.core.state = DocState::AfterDocument;
        Ok(())
    }

    pub(crate) fn start_element<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri: &str,
        local_name: &str,
        prefix: Option<&str>,
    ) -> Result<()> {
        if self.core.state != DocState::InDocument {
            bail!(StateError::NotInDocument);
        }

        // Ids only exist for names seen before; a fresh name can only
        // match the wildcard paths.
        let known_uri = self.core.names.find_uri(uri);
        let known = known_uri.and_then(|u| {
            self.core
                .names
                .uri(u)
                .find_qname(local_name)
                .map(|l| QNameId { uri: u, local: l })
        });

        let qname;
        let resume;

        if let Some((code, production)) = self.find_first_level(|e| {
            matches!(e, Event::StartElement { qname: q, .. } if Some(*q) == known)
        }) {
            self.emit_first_level(ch, code)?;
            qname = known.expect("matched a declared element");
            resume = production.next.ok_or(StateError::NoProduction)?;
            let child = match production.event {
                Event::StartElement {
                    grammar: Some(grammar),
                    ..
                } => grammar,
                _ => self.core.element_grammar(qname),
            };
            self.finish_start_element(ch, qname, child, resume, prefix)?;
        } else if let Some((code, production)) = self.find_first_level(
            |e| matches!(e, Event::StartElementNs { uri: u } if Some(*u) == known_uri),
        ) {
            self.emit_first_level(ch, code)?;
            let uri_id = known_uri.expect("matched a namespace wildcard");
            qname = self.encode_local_name(ch, uri_id, local_name)?;
            resume = production.next.ok_or(StateError::NoProduction)?;
            let child = self.core.element_grammar(qname);
            self.finish_start_element(ch, qname, child, resume, prefix)?;
        } else if let Some((code, production)) =
            self.find_first_level(|e| e == &Event::StartElementGeneric)
        {
            self.emit_first_level(ch, code)?;
            qname = self.encode_qname(ch, uri, local_name)?;
            resume = production.next.ok_or(StateError::NoProduction)?;
            let child = self.core.element_grammar(qname);
            self.finish_start_element(ch, qname, child, resume, prefix)?;
        } else {
            if !self.emit_undeclared(ch, Undeclared::StartElement)? {
                bail!(StateError::NoProduction);
            }
            qname = self.encode_qname(ch, uri, local_name)?;
            resume = self.core.content_successor();
            self.core.learn(
                Event::StartElement {
                    qname,
                    grammar: None,
                },
                Some(resume),
            );
            let child = self.core.element_grammar(qname);
            self.finish_start_element(ch, qname, child, resume, prefix)?;
        }

        Ok(())
    }

    pub(crate) fn end_element<W: Write>(&mut self, ch: &mut EncoderChannel<W>) -> Result<()> {
        if let Some((code, _)) = self.find_first_level(Event::is_end_element) {
            self.emit_first_level(ch, code)?;
        } else if self.emit_undeclared(ch, Undeclared::EndElement)? {
            self.core.learn(Event::EndElement, None);
        } else {
            bail!(StateError::NoProduction);
        }

        self.core.pop_element()?;
        Ok(())
    }

    pub(crate) fn attribute<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri: &str,
        local_name: &str,
        prefix: Option<&str>,
        value: &str,
    ) -> Result<()> {
        if uri == XML_NAMESPACE && local_name == "space" {
            self.core.note_xml_space(value);
        }

        // xsi:nil and xsi:type steer the grammar when schema-informed.
        if uri == XSI_NAMESPACE && self.core.schema_informed() {
            if local_name == "nil" && self.undeclared_admits(Undeclared::AttributeXsiNil) {
                if let Some(Value::Boolean(nil)) = Value::parse_typed(value, &Datatype::Boolean) {
                    return self.xsi_nil(ch, nil, prefix);
                }
            } else if local_name == "type" && self.undeclared_admits(Undeclared::AttributeXsiType)
            {
                if let Some((type_uri, type_local, type_prefix)) = self.resolve_qname_value(value)
                {
                    return self.xsi_type(ch, &type_uri, &type_local, type_prefix.as_deref());
                }
            }
        }

        let known_uri = self.core.names.find_uri(uri);
        let known = known_uri.and_then(|u| {
            self.core
                .names
                .uri(u)
                .find_qname(local_name)
                .map(|l| QNameId { uri: u, local: l })
        });

        if let Some((code, production)) = self.find_first_level(
            |e| matches!(e, Event::Attribute { qname: q, .. } if Some(*q) == known),
        ) {
            let qname = known.expect("matched a declared attribute");
            let Event::Attribute { datatype, .. } = &production.event else {
                unreachable!("filtered on attribute events");
            };
            let datatype = self.core.options.effective_datatype(datatype)?;

            match Value::parse_typed(value, &datatype) {
                Some(typed) => {
                    self.emit_first_level(ch, code)?;
                    self.encode_qname_prefix(ch, qname.uri, prefix)?;
                    self.encode_typed_value(ch, qname, &datatype, &typed)?;
                    self.transition(production.next);
                }
                None => {
                    // Schema-invalid value: third-level code picks the
                    // declared attribute, the value is carried as a string.
                    self.encode_invalid_attribute(ch, Some((code, qname)), prefix, value)?;
                }
            }
            return Ok(());
        }

        // A wildcard match types the value by the global attribute
        // declaration; decide conformance before any bits are emitted,
        // since a non-conforming value takes a different event code.
        let wildcard_typed = match known
            .and_then(|q| self.core.names.context(q).attribute_datatype.clone())
        {
            Some(datatype) => {
                let datatype = self.core.options.effective_datatype(&datatype)?;
                match Value::parse_typed(value, &datatype) {
                    Some(typed) => Some(Some((datatype, typed))),
                    None if self.core.options.strict => bail!(ValueError::LexicalMismatch),
                    None => Some(None),
                }
            }
            None => None,
        };

        if let Some(None) = wildcard_typed {
            // AT(*) with a schema-invalid value for its declaration.
            let qname = known.expect("declaration implies a known name");
            if self.has_wildcard_attribute_match(known_uri) {
                return self.encode_invalid_wildcard_attribute(ch, qname, prefix, value);
            }
        }

        if let Some((code, production)) = self.find_first_level(
            |e| matches!(e, Event::AttributeNs { uri: u } if Some(*u) == known_uri),
        ) {
            self.emit_first_level(ch, code)?;
            let uri_id = known_uri.expect("matched a namespace wildcard");
            let qname = self.encode_local_name(ch, uri_id, local_name)?;
            self.encode_qname_prefix(ch, qname.uri, prefix)?;
            match &wildcard_typed {
                Some(Some((datatype, typed))) => {
                    self.encode_typed_value(ch, qname, &datatype.clone(), &typed.clone())?;
                }
                _ => self.encode_string_value(ch, qname, value)?,
            }
            self.transition(production.next);
            return Ok(());
        }

        if let Some((code, production)) = self.find_first_level(|e| e == &Event::AttributeGeneric)
        {
            self.emit_first_level(ch, code)?;
            let qname = self.encode_qname(ch, uri, local_name)?;
            self.encode_qname_prefix(ch, qname.uri, prefix)?;
            match &wildcard_typed {
                Some(Some((datatype, typed))) => {
                    self.encode_typed_value(ch, qname, &datatype.clone(), &typed.clone())?;
                }
                _ => self.encode_string_value(ch, qname, value)?,
            }
            self.transition(production.next);
            return Ok(());
        }

        if self.emit_undeclared(ch, Undeclared::Attribute)? {
            let qname = self.encode_qname(ch, uri, local_name)?;
            self.encode_qname_prefix(ch, qname.uri, prefix)?;
            self.core.learn(
                Event::Attribute {
                    qname,
                    datatype: Datatype::String,
                },
                Some(self.core.current),
            );
            self.encode_string_value(ch, qname, value)?;
            return Ok(());
        }

        bail!(StateError::NoProduction);
    }

    pub(crate) fn xsi_nil<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        nil: bool,
        prefix: Option<&str>,
    ) -> Result<()> {
        if !self.emit_undeclared(ch, Undeclared::AttributeXsiNil)? {
            // Outside a nillable start tag this is an ordinary attribute.
            let lexical = if nil { "true" } else { "false" };
            return self.attribute(ch, XSI_NAMESPACE, "nil", prefix, lexical);
        }

        self.encode_qname_prefix(ch, 2, prefix)?;
        ch.encode_boolean(nil)?;

        if nil {
            if let GrammarKind::SchemaStartTag(info) = self.core.store.node(self.core.current).kind
            {
                if let Some(empty) = info.type_empty {
                    self.core.current = empty;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn xsi_type<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        type_uri: &str,
        type_local_name: &str,
        prefix: Option<&str>,
    ) -> Result<()> {
        if !self.emit_undeclared(ch, Undeclared::AttributeXsiType)? {
            bail!(StateError::NoProduction);
        }

        self.encode_qname_prefix(ch, 2, None)?;
        let qname = self.encode_qname(ch, type_uri, type_local_name)?;
        self.encode_qname_prefix(ch, qname.uri, prefix)?;

        match self.core.names.context(qname).type_grammar {
            Some(grammar) => self.core.current = grammar,
            None => warn!("xsi:type names an unknown type; grammar unchanged"),
        }
        Ok(())
    }

    pub(crate) fn characters<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        text: &str,
    ) -> Result<()> {
        let owner = self.core.element_qname()?;

        if let Some((code, production)) =
            self.find_first_level(|e| matches!(e, Event::Characters { .. }))
        {
            let Event::Characters { datatype } = &production.event else {
                unreachable!("filtered on character events");
            };
            let datatype = self.core.options.effective_datatype(datatype)?;

            if let Some(typed) = Value::parse_typed(text, &datatype) {
                self.emit_first_level(ch, code)?;
                self.encode_typed_value(ch, owner, &datatype, &typed)?;
                self.transition(production.next);
                return Ok(());
            }
            if self.core.options.strict {
                bail!(ValueError::LexicalMismatch);
            }
        }

        if self.emit_undeclared(ch, Undeclared::Characters)? {
            let successor = self.core.content_successor();
            self.core.learn(
                Event::Characters {
                    datatype: Datatype::String,
                },
                Some(successor),
            );
            self.encode_string_value(ch, owner, text)?;
            self.core.current = successor;
            return Ok(());
        }

        bail!(StateError::NoProduction);
    }

    pub(crate) fn namespace_declaration<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        prefix: &str,
        uri: &str,
        element_ns: bool,
    ) -> Result<()> {
        if !self.core.options.preserve(Fidelity::PREFIXES) {
            return Ok(());
        }
        if !self.emit_undeclared(ch, Undeclared::NamespaceDecl)? {
            bail!(StateError::NoProduction);
        }

        let uri_id = self.encode_uri(ch, uri)?;
        self.encode_ns_prefix(ch, uri_id, prefix)?;
        ch.encode_boolean(element_ns)?;

        if let Some(frame) = self.core.stack.last_mut() {
            frame.ns_declarations.push((prefix.to_string(), uri_id));
            if element_ns {
                frame.prefix = Some(prefix.to_string());
            }
        }
        Ok(())
    }

    pub(crate) fn comment<W: Write>(&mut self, ch: &mut EncoderChannel<W>, text: &str) -> Result<()> {
        if !self.core.options.preserve(Fidelity::COMMENTS) {
            return Ok(());
        }
        if !self.emit_undeclared(ch, Undeclared::CommentPi)? {
            bail!(StateError::NoProduction);
        }
        self.emit_comment_pi_code(ch, false)?;
        ch.encode_string(text)?;
        self.core.current = self.core.content_successor();
        Ok(())
    }

    pub(crate) fn processing_instruction<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        target: &str,
        data: &str,
    ) -> Result<()> {
        if !self
            .core
            .options
            .preserve(Fidelity::PROCESSING_INSTRUCTIONS)
        {
            return Ok(());
        }
        if !self.emit_undeclared(ch, Undeclared::CommentPi)? {
            bail!(StateError::NoProduction);
        }
        self.emit_comment_pi_code(ch, true)?;
        ch.encode_string(target)?;
        ch.encode_string(data)?;
        self.core.current = self.core.content_successor();
        Ok(())
    }

    pub(crate) fn doctype<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        name: &str,
        public_id: &str,
        system_id: &str,
        text: &str,
    ) -> Result<()> {
        if !self.core.options.preserve(Fidelity::DTD) {
            return Ok(());
        }
        if !self.emit_undeclared(ch, Undeclared::DocType)? {
            bail!(StateError::NoProduction);
        }
        ch.encode_string(name)?;
        ch.encode_string(public_id)?;
        ch.encode_string(system_id)?;
        ch.encode_string(text)?;
        Ok(())
    }

    pub(crate) fn entity_reference<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        name: &str,
    ) -> Result<()> {
        if !self.core.options.preserve(Fidelity::DTD) {
            return Ok(());
        }
        if !self.emit_undeclared(ch, Undeclared::EntityReference)? {
            bail!(StateError::NoProduction);
        }
        ch.encode_string(name)?;
        self.core.current = self.core.content_successor();
        Ok(())
    }

    /// Self-contained fragments need the external channel layer.
    pub(crate) fn self_contained(&mut self) -> Result<()> {
        bail!(OptionError::SelfContainedNotSupported);
    }

    // ---- event code emission ----

    fn find_first_level(
        &self,
        matches: impl Fn(&Event) -> bool,
    ) -> Option<(usize, crate::grammar::Production)> {
        let node = self.core.store.node(self.core.current);
        let len = node.first_level_len(self.core.strict_schema());
        node.productions[..len]
            .iter()
            .enumerate()
            .find(|(_, p)| matches(&p.event))
            .map(|(i, p)| (i, p.clone()))
    }

    fn emit_first_level<W: Write>(&mut self, ch: &mut EncoderChannel<W>, code: usize) -> Result<()> {
        let (first, undeclared) = self.core.code_layout();
        let width = self.core.first_level_width(first, !undeclared.is_empty());
        ch.encode_n_bit(code as u32, width)
    }

    /// Emit the escape code plus the second-level code for `target`.
    /// Returns `false` when the current grammar does not admit it.
    fn emit_undeclared<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        target: Undeclared,
    ) -> Result<bool> {
        let (first, undeclared) = self.core.code_layout();
        let Some(position) = undeclared.iter().position(|u| *u == target) else {
            return Ok(false);
        };

        if self.core.schema_informed() && deviates(target) {
            warn!("encoding deviation event {target:?} in a schema-informed grammar");
        }

        let width = self.core.first_level_width(first, true);
        ch.encode_n_bit(first as u32, width)?;
        ch.encode_n_bit(position as u32, code_width(undeclared.len()))?;
        Ok(true)
    }

    fn emit_comment_pi_code<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        pi: bool,
    ) -> Result<()> {
        let comments = self.core.options.preserve(Fidelity::COMMENTS);
        let pis = self
            .core
            .options
            .preserve(Fidelity::PROCESSING_INSTRUCTIONS);
        let count = usize::from(comments) + usize::from(pis);
        let code = u32::from(pi && comments);
        ch.encode_n_bit(code, code_width(count))
    }

    fn transition(&mut self, next: Option<GrammarHandle>) {
        if let Some(next) = next {
            self.core.current = next;
        }
    }

    fn finish_start_element<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        qname: QNameId,
        child: GrammarHandle,
        resume: GrammarHandle,
        prefix: Option<&str>,
    ) -> Result<()> {
        self.encode_qname_prefix(ch, qname.uri, prefix)?;
        self.core
            .push_element(qname, resume, prefix.map(str::to_string));
        self.core.current = child;
        Ok(())
    }

    // ---- name coding ----

    fn encode_uri<W: Write>(&mut self, ch: &mut EncoderChannel<W>, uri: &str) -> Result<u32> {
        let count = self.core.names.uri_count();
        let width = code_width(count + 1);

        match self.core.names.find_uri(uri) {
            Some(id) => {
                ch.encode_n_bit(id + 1, width)?;
                Ok(id)
            }
            None => {
                ch.encode_n_bit(0, width)?;
                ch.encode_string(uri)?;
                Ok(self.core.names.add_uri(uri))
            }
        }
    }

    fn encode_local_name<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri_id: u32,
        local_name: &str,
    ) -> Result<QNameId> {
        let uri = self.core.names.uri(uri_id);
        match uri.find_qname(local_name) {
            Some(local) => {
                let width = code_width(uri.qname_count());
                ch.encode_unsigned_u64(0)?;
                ch.encode_n_bit(local, width)?;
                Ok(QNameId {
                    uri: uri_id,
                    local,
                })
            }
            None => {
                ch.encode_unsigned_u64(local_name.chars().count() as u64 + 1)?;
                ch.encode_chars(local_name)?;
                Ok(self.core.names.add_local(uri_id, local_name))
            }
        }
    }

    fn encode_qname<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri: &str,
        local_name: &str,
    ) -> Result<QNameId> {
        let uri_id = self.encode_uri(ch, uri)?;
        self.encode_local_name(ch, uri_id, local_name)
    }

    /// The prefix component of a qualified name: an index into the URI's
    /// prefix partition, present only when prefixes are preserved.
    fn encode_qname_prefix<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri_id: u32,
        prefix: Option<&str>,
    ) -> Result<()> {
        if !self.core.options.preserve(Fidelity::PREFIXES) {
            return Ok(());
        }

        let uri = self.core.names.uri(uri_id);
        let count = uri.prefix_count();
        if count == 0 {
            return Ok(());
        }

        let id = match prefix.and_then(|p| uri.find_prefix(p)) {
            Some(id) => id,
            None => {
                if prefix.is_some() {
                    warn!("undeclared prefix on a qualified name; using the first entry");
                }
                0
            }
        };
        ch.encode_n_bit(id, code_width(count))
    }

    /// The prefix of an NS declaration: a compact-id partition with a
    /// literal escape, like the URI table.
    fn encode_ns_prefix<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        uri_id: u32,
        prefix: &str,
    ) -> Result<()> {
        let count = self.core.names.uri(uri_id).prefix_count();
        let width = code_width(count + 1);

        match self.core.names.uri(uri_id).find_prefix(prefix) {
            Some(id) => ch.encode_n_bit(id + 1, width),
            None => {
                ch.encode_n_bit(0, width)?;
                ch.encode_string(prefix)?;
                self.core.names.uri_mut(uri_id).add_prefix(prefix);
                Ok(())
            }
        }
    }

    // ---- value coding ----

    fn encode_string_value<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        owner: QNameId,
        value: &str,
    ) -> Result<()> {
        match self.core.strings.lookup(owner, value) {
            Lookup::LocalHit(id) => {
                ch.encode_unsigned_u64(0)?;
                let width = code_width(self.core.strings.local_size(owner));
                ch.encode_n_bit(id, width)
            }
            Lookup::GlobalHit(id) => {
                ch.encode_unsigned_u64(1)?;
                let width = code_width(self.core.strings.global_size());
                ch.encode_n_bit(id, width)
            }
            Lookup::Miss => {
                ch.encode_unsigned_u64(value.chars().count() as u64 + 2)?;
                ch.encode_chars(value)?;
                self.core.strings.insert(owner, value);
                Ok(())
            }
        }
    }

    fn encode_typed_value<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        owner: QNameId,
        datatype: &Datatype,
        value: &Value,
    ) -> Result<()> {
        match (datatype, value) {
            (Datatype::String, value) => {
                let lexical = value.lexical();
                self.encode_string_value(ch, owner, &lexical)
            }
            (Datatype::Boolean, Value::Boolean(v)) => ch.encode_boolean(*v),
            (Datatype::Integer, Value::Integer(v)) => ch.encode_integer(v),
            (Datatype::UnsignedInteger, Value::Integer(v)) => ch.encode_unsigned_integer(v),
            (Datatype::NBitInteger { lower, bits }, Value::Integer(v)) => {
                let v = match v {
                    crate::value::IntegerValue::Int(v) => i64::from(*v),
                    crate::value::IntegerValue::Long(v) => *v,
                    crate::value::IntegerValue::Big { .. } => {
                        bail!(ValueError::ComponentTooWide)
                    }
                };
                ch.encode_n_bit((v - lower) as u32, *bits)
            }
            (Datatype::Decimal, Value::Decimal(v)) => {
                ch.encode_decimal(v.negative, &v.integral, &v.rev_fractional)
            }
            (Datatype::Float, Value::Float(v)) => ch.encode_float(v),
            (Datatype::DateTime(_), Value::DateTime(v)) => ch.encode_datetime(v),
            (Datatype::Binary(_), Value::Binary(_, v)) => ch.encode_binary(v),
            _ => bail!(ValueError::LexicalMismatch),
        }
    }

    fn has_wildcard_attribute_match(&self, known_uri: Option<u32>) -> bool {
        self.find_first_level(|e| {
            matches!(e, Event::AttributeNs { uri: u } if Some(*u) == known_uri)
                || e == &Event::AttributeGeneric
        })
        .is_some()
    }

    /// A declared attribute whose value does not conform: escape, the
    /// invalid-attributes second-level code, a third-level code naming
    /// the attribute, then the value as a string.
    fn encode_invalid_attribute<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        declared: Option<(usize, QNameId)>,
        prefix: Option<&str>,
        value: &str,
    ) -> Result<()> {
        let Some((code, qname)) = declared else {
            bail!(ValueError::LexicalMismatch);
        };

        if !self.emit_undeclared(ch, Undeclared::InvalidAttributes)? {
            bail!(ValueError::LexicalMismatch);
        }

        let (attribute_count, position) = {
            let node = self.core.store.node(self.core.current);
            // Third-level position of this attribute among the declared
            // attribute productions.
            let position = node.productions[..code]
                .iter()
                .filter(|p| p.event.is_attribute_like())
                .count();
            (node.attribute_count(), position)
        };

        ch.encode_n_bit(position as u32, code_width(attribute_count + 1))?;
        self.encode_qname_prefix(ch, qname.uri, prefix)?;
        self.encode_string_value(ch, qname, value)
    }

    /// A wildcard attribute whose value does not conform to its global
    /// declaration: the last third-level code, then the generic name.
    fn encode_invalid_wildcard_attribute<W: Write>(
        &mut self,
        ch: &mut EncoderChannel<W>,
        qname: QNameId,
        prefix: Option<&str>,
        value: &str,
    ) -> Result<()> {
        if !self.emit_undeclared(ch, Undeclared::InvalidAttributes)? {
            bail!(ValueError::LexicalMismatch);
        }

        let attribute_count = self.core.store.node(self.core.current).attribute_count();
        ch.encode_n_bit(attribute_count as u32, code_width(attribute_count + 1))?;

        let uri = self.core.names.uri(qname.uri).uri().to_string();
        let local_name = self
            .core
            .names
            .context(qname)
            .local_name()
            .to_string();
        let qname = self.encode_qname(ch, &uri, &local_name)?;
        self.encode_qname_prefix(ch, qname.uri, prefix)?;
        self.encode_string_value(ch, qname, value)
    }

    fn undeclared_admits(&self, target: Undeclared) -> bool {
        let (_, undeclared) = self.core.code_layout();
        undeclared.contains(&target)
    }

    /// Best-effort resolution of a `pfx:local` lexical qname against the
    /// open namespace declarations.
    fn resolve_qname_value(&self, lexical: &str) -> Option<(String, String, Option<String>)> {
        let (prefix, local) = match lexical.split_once(':') {
            Some((p, l)) => (p, l),
            None => ("", lexical),
        };

        let uri = match self.core.resolve_prefix(prefix) {
            Some(uri_id) => self.core.names.uri(uri_id).uri().to_string(),
            None if prefix.is_empty() => String::new(),
            None => return None,
        };

        let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        Some((uri, local.to_string(), prefix))
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

/// Streaming EXI encoder: header plus body over a byte sink.
pub struct ExiEncoder<W: Write> {
    channel: EncoderChannel<W>,
    body: BodyEncoder,
}

impl<W: Write> ExiEncoder<W> {
    /// Create an encoder writing to `sink` under the given options and
    /// grammar set.
    pub fn new(sink: W, options: CodecOptions, grammars: Arc<Grammars>) -> Result<Self> {
        let body = BodyEncoder::new(options, grammars)?;
        let byte_packed = body.core.options.byte_packed();
        Ok(Self {
            channel: EncoderChannel::new(sink, byte_packed),
            body,
        })
    }

    /// Write the header and the SD event.
    pub fn start_document(&mut self) -> Result<()> {
        if self.body.core.state == DocState::BeforeDocument {
            header::write_header(&mut self.channel, &self.body.core.options)?;
        }
        self.body.start_document(&mut self.channel)
    }

    /// Write the ED event, align and flush.
    pub fn end_document(&mut self) -> Result<()> {
        self.body.end_document(&mut self.channel)?;
        self.channel.align()?;
        self.channel.flush()
    }

    /// Write an SE event.
    pub fn start_element(
        &mut self,
        uri: &str,
        local_name: &str,
        prefix: Option<&str>,
    ) -> Result<()> {
        self.body
            .start_element(&mut self.channel, uri, local_name, prefix)
    }

    /// Write an EE event.
    pub fn end_element(&mut self) -> Result<()> {
        self.body.end_element(&mut self.channel)
    }

    /// Write an AT event; `xsi:nil` and `xsi:type` are recognized.
    pub fn attribute(
        &mut self,
        uri: &str,
        local_name: &str,
        prefix: Option<&str>,
        value: &str,
    ) -> Result<()> {
        self.body
            .attribute(&mut self.channel, uri, local_name, prefix, value)
    }

    /// Write an `xsi:nil` attribute, entering the empty-type grammar when
    /// `nil` is true.
    pub fn xsi_nil(&mut self, nil: bool) -> Result<()> {
        self.body.xsi_nil(&mut self.channel, nil, None)
    }

    /// Write an `xsi:type` attribute, casting to the named type's grammar.
    pub fn xsi_type(
        &mut self,
        type_uri: &str,
        type_local_name: &str,
        prefix: Option<&str>,
    ) -> Result<()> {
        self.body
            .xsi_type(&mut self.channel, type_uri, type_local_name, prefix)
    }

    /// Write a CH event.
    pub fn characters(&mut self, text: &str) -> Result<()> {
        self.body.characters(&mut self.channel, text)
    }

    /// Write an NS event. Dropped when prefixes are not preserved.
    pub fn namespace_declaration(
        &mut self,
        prefix: &str,
        uri: &str,
        element_ns: bool,
    ) -> Result<()> {
        self.body
            .namespace_declaration(&mut self.channel, prefix, uri, element_ns)
    }

    /// Write a CM event. Dropped when comments are not preserved.
    pub fn comment(&mut self, text: &str) -> Result<()> {
        self.body.comment(&mut self.channel, text)
    }

    /// Write a PI event. Dropped when processing instructions are not
    /// preserved.
    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.body
            .processing_instruction(&mut self.channel, target, data)
    }

    /// Write a DT event. Dropped when DTD information is not preserved.
    pub fn doctype(
        &mut self,
        name: &str,
        public_id: &str,
        system_id: &str,
        text: &str,
    ) -> Result<()> {
        self.body
            .doctype(&mut self.channel, name, public_id, system_id, text)
    }

    /// Write an ER event. Dropped when DTD information is not preserved.
    pub fn entity_reference(&mut self, name: &str) -> Result<()> {
        self.body.entity_reference(&mut self.channel, name)
    }

    /// Self-contained fragments are handled by the external channel layer.
    pub fn self_contained(&mut self) -> Result<()> {
        self.body.self_contained()
    }

    /// Flush buffered whole bytes to the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.channel.flush()
    }

    /// Number of whole bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.channel.len()
    }

    /// Number of bits buffered ahead of the next whole byte.
    pub fn buffered_bits(&self) -> u32 {
        self.channel.pending_bits()
    }

    /// Prepare the instance for another run, swapping in a fresh sink and
    /// returning the previous one. Pre-built grammars and initial tables
    /// are retained.
    pub fn init_for_each_run(&mut self, sink: W) -> W {
        self.body.core.init_for_each_run();
        let byte_packed = self.body.core.options.byte_packed();
        let old = core::mem::replace(&mut self.channel, EncoderChannel::new(sink, byte_packed));
        old.into_sink()
    }
}
