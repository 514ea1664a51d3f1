use std::fs::File;
use std::io::{self, BufWriter, StdoutLock, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ImportError, Result};
use crate::resources::{load_stylesheet, ICASH_STYLESHEET};
use crate::xml::{parse_file, write_document, Document};
use crate::xslt::{transform, Stylesheet};

/// Where the converted document goes.
pub enum Sink {
    File(BufWriter<File>),
    Stdout(StdoutLock<'static>),
}

impl Sink {
    /// Creates (or truncates) `dest`, or locks stdout when there is none.
    pub fn open(dest: Option<&Path>) -> Result<Self> {
        match dest {
            Some(path) => Ok(Sink::File(BufWriter::new(File::create(path)?))),
            None => Ok(Sink::Stdout(io::stdout().lock())),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(w) => w.write(buf),
            Sink::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(w) => w.flush(),
            Sink::Stdout(w) => w.flush(),
        }
    }
}

fn load_source(source: &Path) -> Result<Document> {
    parse_file(source).map_err(|e| ImportError::Parse {
        path: source.display().to_string(),
        source: e,
    })
}

fn transform_source(sheet: &Stylesheet, source: &Path) -> Result<Document> {
    let doc = load_source(source)?;
    debug!(path = %source.display(), "source parsed");
    transform(sheet, doc)
}

/// Converts `source` and writes the result to any writer.
pub fn convert_to_writer<W: Write>(source: &Path, writer: &mut W) -> Result<()> {
    let sheet = load_stylesheet(ICASH_STYLESHEET)?;
    let result = transform_source(&sheet, source)?;
    write_document(&result, &sheet.output, writer)?;
    writer.flush()?;
    Ok(())
}

/// Converts `source` into `dest`, or to stdout when `dest` is `None`.
/// Nothing is written unless the whole transform succeeds.
pub fn convert(source: &Path, dest: Option<&Path>) -> Result<()> {
    let mut bytes = Vec::new();
    convert_to_writer(source, &mut bytes)?;
    let mut sink = Sink::open(dest)?;
    sink.write_all(&bytes)?;
    sink.flush()?;
    match dest {
        Some(path) => info!(bytes = bytes.len(), dest = %path.display(), "conversion written"),
        None => info!(bytes = bytes.len(), "conversion written to stdout"),
    }
    Ok(())
}
