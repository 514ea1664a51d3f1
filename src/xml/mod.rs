//! Minimal XML document model: an arena tree, a quick-xml backed parser and
//! a deterministic serializer.

mod parser;
mod tree;
mod writer;

pub use parser::{parse_file, parse_str, XmlError};
pub use tree::{local_name, prefix, Document, NodeId, NodeKind};
pub use writer::{write_document, OutputMethod, OutputOptions};
