//! The closed union of terminal symbols bound by productions.

use crate::grammar::GrammarHandle;
use crate::names::QNameId;
use crate::value::Datatype;

/// A terminal symbol a production binds.
///
/// Only events that can appear at the first level of an event code live
/// here; comments, processing instructions and the other fidelity-gated
/// events are implicit and selected through [`Undeclared`] codes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// SD.
    StartDocument,
    /// ED.
    EndDocument,
    /// SE(qname): a declared or learned element.
    StartElement {
        /// The element name.
        qname: QNameId,
        /// Grammar of the element's content when declared locally;
        /// `None` resolves through the name's global association.
        grammar: Option<GrammarHandle>,
    },
    /// SE(uri:*): a namespace-qualified element wildcard.
    StartElementNs {
        /// The namespace the wildcard is bound to.
        uri: u32,
    },
    /// SE(*): the fully generic element wildcard.
    StartElementGeneric,
    /// EE.
    EndElement,
    /// AT(qname): a declared or learned attribute.
    Attribute {
        /// The attribute name.
        qname: QNameId,
        /// Wire representation of the attribute value.
        datatype: Datatype,
    },
    /// AT(uri:*): a namespace-qualified attribute wildcard.
    AttributeNs {
        /// The namespace the wildcard is bound to.
        uri: u32,
    },
    /// AT(*): the fully generic attribute wildcard.
    AttributeGeneric,
    /// CH: character content.
    Characters {
        /// Wire representation of the content.
        datatype: Datatype,
    },
}

impl Event {
    pub(crate) fn is_end_element(&self) -> bool {
        matches!(self, Self::EndElement)
    }

    pub(crate) fn is_attribute_like(&self) -> bool {
        matches!(
            self,
            Self::Attribute { .. } | Self::AttributeNs { .. } | Self::AttributeGeneric
        )
    }
}

/// Implicit events reached through the escape code of a grammar.
///
/// The entries present depend on the grammar kind, the fidelity options and
/// the strict flag; their order here is their order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Undeclared {
    /// EE where the grammar has no declared end-element.
    EndElement,
    /// AT(xsi:type), casting the element to a named type.
    AttributeXsiType,
    /// AT(xsi:nil).
    AttributeXsiNil,
    /// AT(*) deviation.
    Attribute,
    /// AT with a schema-invalid value; third level picks the name.
    InvalidAttributes,
    /// NS declaration.
    NamespaceDecl,
    /// SC fragment.
    SelfContained,
    /// SE(*) deviation.
    StartElement,
    /// CH deviation (untyped).
    Characters,
    /// ER entity reference.
    EntityReference,
    /// DT document type declaration.
    DocType,
    /// CM or PI; third level distinguishes them.
    CommentPi,
}
