use tracing::debug;

use crate::error::{ImportError, Result};
use crate::xslt::Stylesheet;

pub const ICASH_STYLESHEET: &str = "icash.xslt";

/// Stylesheets compiled into the binary, by name.
const BUNDLED: &[(&str, &str)] = &[(ICASH_STYLESHEET, include_str!("../resources/icash.xslt"))];

fn bundled_text(name: &str) -> Option<&'static str> {
    BUNDLED.iter().find(|(n, _)| *n == name).map(|(_, text)| *text)
}

pub fn load_stylesheet(name: &str) -> Result<Stylesheet> {
    let text = bundled_text(name).ok_or_else(|| ImportError::ResourceLoad {
        name: name.to_string(),
        reason: "no such bundled resource".to_string(),
    })?;
    let sheet = Stylesheet::parse(text).map_err(|reason| ImportError::ResourceLoad {
        name: name.to_string(),
        reason,
    })?;
    debug!(resource = name, rules = sheet.rules.len(), "stylesheet loaded");
    Ok(sheet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_stylesheet_compiles() {
        let sheet = load_stylesheet(ICASH_STYLESHEET).unwrap();
        assert!(sheet.output.indent);
        assert!(sheet.named.contains_key("accounts"));
        assert!(sheet.strips_space("entries"));
    }

    #[test]
    fn test_unknown_resource() {
        let err = load_stylesheet("gnucash.xslt").unwrap_err();
        assert!(matches!(err, ImportError::ResourceLoad { ref name, .. } if name == "gnucash.xslt"));
    }
}
