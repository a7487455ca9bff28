//! URI and local-name tables, and qualified-name identity.
//!
//! Names are interned per codec instance. The first three URI entries and
//! their local names are fixed by the format; schema-informed entries follow
//! and are immutable, runtime entries come last and are cleared at the
//! start of each run.

use rustc_hash::FxHashMap;

use crate::grammar::GrammarHandle;
use crate::value::Datatype;

/// The XML namespace, always URI id 1.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
/// The XML Schema instance namespace, always URI id 2.
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// The XML Schema namespace; id 3 in schema-informed tables.
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Local names preloaded for the XML namespace, sorted.
pub(crate) const XML_LOCAL_NAMES: &[&str] = &["base", "id", "lang", "space"];
/// Local names preloaded for the XSI namespace, sorted.
pub(crate) const XSI_LOCAL_NAMES: &[&str] = &["nil", "type"];

/// The built-in XML Schema type names, sorted; preloaded for the XSD
/// namespace in schema-informed tables.
pub(crate) const XSD_LOCAL_NAMES: &[&str] = &[
    "ENTITIES",
    "ENTITY",
    "ID",
    "IDREF",
    "IDREFS",
    "NCName",
    "NMTOKEN",
    "NMTOKENS",
    "NOTATION",
    "Name",
    "QName",
    "anySimpleType",
    "anyType",
    "anyURI",
    "base64Binary",
    "boolean",
    "byte",
    "date",
    "dateTime",
    "decimal",
    "double",
    "duration",
    "float",
    "gDay",
    "gMonth",
    "gMonthDay",
    "gYear",
    "gYearMonth",
    "hexBinary",
    "int",
    "integer",
    "language",
    "long",
    "negativeInteger",
    "nonNegativeInteger",
    "nonPositiveInteger",
    "normalizedString",
    "positiveInteger",
    "short",
    "string",
    "time",
    "token",
    "unsignedByte",
    "unsignedInt",
    "unsignedLong",
    "unsignedShort",
];

/// Identity of a qualified name within one codec run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QNameId {
    /// Index into the URI table.
    pub uri: u32,
    /// Index into the URI's local-name list.
    pub local: u32,
}

/// Interned identity of a qualified XML name.
///
/// Equality and hashing are defined over the two integer ids only.
#[derive(Debug, Clone)]
pub struct QNameContext {
    id: QNameId,
    local_name: String,
    /// Global element grammar from the schema, if any.
    pub(crate) schema_grammar: Option<GrammarHandle>,
    /// Built-in element grammar memoized at runtime; cleared per run.
    pub(crate) builtin_grammar: Option<GrammarHandle>,
    /// Datatype of the global attribute declaration, if any.
    pub(crate) attribute_datatype: Option<Datatype>,
    /// Grammar of the named type, for `xsi:type` casts.
    pub(crate) type_grammar: Option<GrammarHandle>,
}

impl QNameContext {
    fn new(id: QNameId, local_name: String) -> Self {
        Self {
            id,
            local_name,
            schema_grammar: None,
            builtin_grammar: None,
            attribute_datatype: None,
            type_grammar: None,
        }
    }

    /// The id pair of this name.
    pub fn id(&self) -> QNameId {
        self.id
    }

    /// The local part of the name.
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// The prefix synthesized when none was preserved.
    pub fn default_prefix(&self) -> String {
        default_prefix_for_uri(self.id.uri)
    }

    /// The default printable form of the name.
    pub fn default_qname(&self) -> String {
        let prefix = self.default_prefix();
        if prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{prefix}:{}", self.local_name)
        }
    }
}

impl PartialEq for QNameContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QNameContext {}

impl core::hash::Hash for QNameContext {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

pub(crate) fn default_prefix_for_uri(uri_id: u32) -> String {
    match uri_id {
        0 => String::new(),
        1 => "xml".to_string(),
        2 => "xsi".to_string(),
        id => format!("ns{id}"),
    }
}

/// Per-namespace container of local names and prefixes.
#[derive(Debug, Clone)]
pub struct UriContext {
    uri: String,
    qnames: Vec<QNameContext>,
    qname_index: FxHashMap<String, u32>,
    prefixes: Vec<String>,
    initial_qnames: usize,
    initial_prefixes: usize,
}

impl UriContext {
    fn new(uri: String) -> Self {
        Self {
            uri,
            qnames: Vec::new(),
            qname_index: FxHashMap::default(),
            prefixes: Vec::new(),
            initial_qnames: 0,
            initial_prefixes: 0,
        }
    }

    /// The namespace URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn qname_count(&self) -> usize {
        self.qnames.len()
    }

    pub(crate) fn qname(&self, local_id: u32) -> &QNameContext {
        &self.qnames[local_id as usize]
    }

    pub(crate) fn find_qname(&self, local_name: &str) -> Option<u32> {
        self.qname_index.get(local_name).copied()
    }

    pub(crate) fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub(crate) fn prefix(&self, id: u32) -> Option<&str> {
        self.prefixes.get(id as usize).map(String::as_str)
    }

    pub(crate) fn find_prefix(&self, prefix: &str) -> Option<u32> {
        self.prefixes.iter().position(|p| p == prefix).map(|i| i as u32)
    }

    pub(crate) fn add_prefix(&mut self, prefix: &str) -> u32 {
        let id = self.prefixes.len() as u32;
        self.prefixes.push(prefix.to_string());
        id
    }
}

/// The registry of URIs and qualified names for one codec instance.
#[derive(Debug, Clone)]
pub(crate) struct NameTable {
    uris: Vec<UriContext>,
    uri_index: FxHashMap<String, u32>,
    initial_uris: usize,
}

impl NameTable {
    /// Build the initial tables: the three fixed URIs, then the seeds.
    pub(crate) fn new(seeds: &[UriSeed]) -> Self {
        let mut table = Self {
            uris: Vec::new(),
            uri_index: FxHashMap::default(),
            initial_uris: 0,
        };

        let empty = table.push_uri("");
        table.uris[empty as usize].prefixes.push(String::new());

        let xml = table.push_uri(XML_NAMESPACE);
        table.uris[xml as usize].prefixes.push("xml".to_string());
        for name in XML_LOCAL_NAMES {
            table.push_qname(xml, name);
        }

        let xsi = table.push_uri(XSI_NAMESPACE);
        table.uris[xsi as usize].prefixes.push("xsi".to_string());
        for name in XSI_LOCAL_NAMES {
            table.push_qname(xsi, name);
        }

        for seed in seeds {
            let uri_id = match table.find_uri(&seed.uri) {
                Some(id) => id,
                None => table.push_uri(&seed.uri),
            };
            for name in &seed.names {
                let id = match table.uri(uri_id).find_qname(&name.local_name) {
                    Some(local) => QNameId {
                        uri: uri_id,
                        local,
                    },
                    None => table.push_qname(uri_id, &name.local_name),
                };
                let ctx = table.context_mut(id);
                ctx.schema_grammar = name.global_element;
                ctx.attribute_datatype = name.global_attribute.clone();
                ctx.type_grammar = name.type_grammar;
            }
        }

        // Everything present now is immutable for the instance's lifetime.
        table.initial_uris = table.uris.len();
        for uri in &mut table.uris {
            uri.initial_qnames = uri.qnames.len();
            uri.initial_prefixes = uri.prefixes.len();
        }

        table
    }

    pub(crate) fn uri_count(&self) -> usize {
        self.uris.len()
    }

    pub(crate) fn uri(&self, id: u32) -> &UriContext {
        &self.uris[id as usize]
    }

    pub(crate) fn uri_mut(&mut self, id: u32) -> &mut UriContext {
        &mut self.uris[id as usize]
    }

    pub(crate) fn find_uri(&self, uri: &str) -> Option<u32> {
        self.uri_index.get(uri).copied()
    }

    pub(crate) fn add_uri(&mut self, uri: &str) -> u32 {
        self.push_uri(uri)
    }

    pub(crate) fn context(&self, id: QNameId) -> &QNameContext {
        self.uris[id.uri as usize].qname(id.local)
    }

    pub(crate) fn context_mut(&mut self, id: QNameId) -> &mut QNameContext {
        &mut self.uris[id.uri as usize].qnames[id.local as usize]
    }

    pub(crate) fn add_local(&mut self, uri_id: u32, local_name: &str) -> QNameId {
        self.push_qname(uri_id, local_name)
    }

    /// Find or add the qualified name.
    pub(crate) fn intern(&mut self, uri: &str, local_name: &str) -> QNameId {
        let uri_id = match self.find_uri(uri) {
            Some(id) => id,
            None => self.push_uri(uri),
        };
        match self.uri(uri_id).find_qname(local_name) {
            Some(local) => QNameId {
                uri: uri_id,
                local,
            },
            None => self.push_qname(uri_id, local_name),
        }
    }

    /// Drop all runtime entries, keeping the initial and schema-informed
    /// tables. Built-in grammar memos die with the run.
    pub(crate) fn clear_runtime(&mut self) {
        let keep = self.initial_uris;
        self.uris.truncate(keep);
        self.uri_index.retain(|_, id| (*id as usize) < keep);

        for uri in &mut self.uris {
            let keep = uri.initial_qnames;
            uri.qnames.truncate(keep);
            uri.qname_index.retain(|_, id| (*id as usize) < keep);
            uri.prefixes.truncate(uri.initial_prefixes);
            for qname in &mut uri.qnames {
                qname.builtin_grammar = None;
            }
        }
    }

    fn push_uri(&mut self, uri: &str) -> u32 {
        let id = self.uris.len() as u32;
        self.uris.push(UriContext::new(uri.to_string()));
        self.uri_index.insert(uri.to_string(), id);
        id
    }

    fn push_qname(&mut self, uri_id: u32, local_name: &str) -> QNameId {
        let uri = &mut self.uris[uri_id as usize];
        let local = uri.qnames.len() as u32;
        let id = QNameId {
            uri: uri_id,
            local,
        };
        uri.qnames.push(QNameContext::new(id, local_name.to_string()));
        uri.qname_index.insert(local_name.to_string(), local);
        id
    }
}

/// Seed data for one namespace, produced by the schema compiler.
#[derive(Debug, Clone, Default)]
pub struct UriSeed {
    /// The namespace URI.
    pub uri: String,
    /// Local names in table order, with their grammar associations.
    pub names: Vec<NameSeed>,
}

/// Seed data for one qualified name.
#[derive(Debug, Clone, Default)]
pub struct NameSeed {
    /// The local part of the name.
    pub local_name: String,
    /// Grammar of the global element declaration with this name.
    pub global_element: Option<GrammarHandle>,
    /// Datatype of the global attribute declaration with this name.
    pub global_attribute: Option<Datatype>,
    /// Grammar of the named type, for `xsi:type` casts.
    pub type_grammar: Option<GrammarHandle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_tables() {
        let table = NameTable::new(&[]);
        assert_eq!(table.uri_count(), 3);
        assert_eq!(table.find_uri(""), Some(0));
        assert_eq!(table.find_uri(XML_NAMESPACE), Some(1));
        assert_eq!(table.find_uri(XSI_NAMESPACE), Some(2));
        assert_eq!(table.uri(1).qname_count(), 4);
        assert_eq!(table.uri(2).qname_count(), 2);
        assert_eq!(table.uri(2).find_qname("nil"), Some(0));
        assert_eq!(table.uri(2).find_qname("type"), Some(1));
        assert_eq!(table.uri(2).prefix(0), Some("xsi"));
    }

    #[test]
    fn runtime_entries_are_cleared() {
        let mut table = NameTable::new(&[]);
        let id = table.intern("urn:example", "doc");
        assert_eq!(id, QNameId { uri: 3, local: 0 });
        assert_eq!(table.context(id).default_prefix(), "ns3");

        table.clear_runtime();
        assert_eq!(table.uri_count(), 3);
        assert_eq!(table.find_uri("urn:example"), None);

        // Re-interning after a reset reproduces the same ids.
        let again = table.intern("urn:example", "doc");
        assert_eq!(again, QNameId { uri: 3, local: 0 });
    }

    #[test]
    fn qname_identity_is_id_based() {
        let mut table = NameTable::new(&[]);
        let a = table.intern("urn:a", "x");
        let b = table.intern("urn:b", "x");
        assert_ne!(table.context(a), table.context(b));
        assert_eq!(table.context(a), table.context(a));
    }

    #[test]
    fn runtime_names_on_initial_uris_are_cleared() {
        let mut table = NameTable::new(&[]);
        let id = table.intern(XSI_NAMESPACE, "other");
        assert_eq!(id, QNameId { uri: 2, local: 2 });
        table.clear_runtime();
        assert_eq!(table.uri(2).qname_count(), 2);
    }
}
