use std::path::Path;

use crate::converter;
use crate::error::{ImportError, Result};

pub fn run(source: &str, destination: Option<&str>) -> Result<()> {
    let source_path = Path::new(source);
    if !source_path.exists() {
        return Err(ImportError::MissingSource(source.to_string()));
    }
    converter::convert(source_path, destination.map(Path::new))
}
