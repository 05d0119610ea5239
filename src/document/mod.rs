// src/document/mod.rs
// Document access and the parsed in-memory IR

pub mod store;
pub mod structured;

pub use store::{DocumentRequest, DocumentStore, InMemoryDocStore, ReadDocumentFn, RemoteDocStore};
pub use structured::{
    parse_structured_document, ColumnRef, DocFormat, ParseOptions, Projection, RowComparator,
    Section, StructuredDocument,
};
