//! XSLT 1.0 processor covering the instructions and XPath functions the
//! bundled stylesheets need.

mod eval;
mod processor;
mod stylesheet;
mod xpath;

pub use stylesheet::Stylesheet;

use crate::error::{ImportError, Result};
use crate::xml::Document;

/// Runs `sheet` over `source`, returning the result tree.
pub fn transform(sheet: &Stylesheet, source: Document) -> Result<Document> {
    processor::apply(sheet, source).map_err(ImportError::Transform)
}
