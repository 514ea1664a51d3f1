pub mod convert;

use std::ffi::OsString;

use clap::error::ErrorKind;
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "icash-import",
    version,
    about = "Convert an icash XML export into the Money import format."
)]
pub struct Cli {
    /// Source icash export, then an optional destination (stdout when omitted)
    #[arg(value_name = "FILE", allow_hyphen_values = true)]
    pub files: Vec<String>,

    /// Log more to stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// What a command line asks for once positional arguments are counted.
#[derive(Debug, PartialEq)]
pub enum Invocation {
    Usage,
    Convert {
        source: String,
        destination: Option<String>,
    },
}

impl Cli {
    /// Parses `args` like [`Parser::try_parse_from`], except that anything
    /// clap rejects, apart from `--help` and `--version`, yields a command
    /// line without files and so prints the usage.
    pub fn parse_lenient<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(cli) => Ok(cli),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => Err(e),
            Err(_) => Ok(Self {
                files: Vec::new(),
                verbose: 0,
            }),
        }
    }

    pub fn invocation(&self) -> Invocation {
        match self.files.as_slice() {
            [source] => Invocation::Convert {
                source: source.clone(),
                destination: None,
            },
            [source, destination] => Invocation::Convert {
                source: source.clone(),
                destination: Some(destination.clone()),
            },
            _ => Invocation::Usage,
        }
    }
}
