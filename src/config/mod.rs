//! Connection configuration: the parsed form of a connection string.
//!
//! A connection string such as
//! `tcp(host=localhost,port=4228);file(filename="a b.swl",append=true)`
//! parses into an ordered list of [`TransportSpec`] values, one per clause.
//! Specs are parsed once at configure time and immutable afterwards.

mod options;
mod parser;

pub use options::OptionMap;
pub use parser::parse;

/// One parsed clause: a transport name plus its option set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSpec {
    /// Lower-cased transport identifier, e.g. `tcp` or `file`.
    pub name: String,
    /// Byte offset of the clause within the connection string, kept for
    /// error reporting.
    pub position: usize,
    pub options: OptionMap,
}
