//! XSL stylesheets as transforms.
//!
//! Stylesheets run through libxslt and need the `xslt` feature, which links
//! the system libxml2 and libxslt. Without it, loading a stylesheet fails
//! with a transform error naming the file.

use crate::transform::Transform;
use crate::xml::XmlDocument;
use crate::MetaError;
use std::path::{Path, PathBuf};

/// Whether `path` names a stylesheet rather than a rule file.
pub fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xsl") || ext.eq_ignore_ascii_case("xslt"))
}

#[derive(Debug, Clone)]
pub struct XsltTransform {
    name: String,
    path: PathBuf,
}

impl XsltTransform {
    pub fn from_file(path: &Path) -> Result<Self, MetaError> {
        let name = path.display().to_string();
        if !path.is_file() {
            return Err(MetaError::Transform {
                name,
                message: "cannot read stylesheet: no such file".to_owned(),
            });
        }
        Ok(Self {
            name,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn failure(&self, message: String) -> MetaError {
        MetaError::Transform {
            name: self.name.clone(),
            message,
        }
    }

    #[cfg(feature = "xslt")]
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, MetaError> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| self.failure("stylesheet path is not valid UTF-8".to_owned()))?;
        let mut stylesheet = libxslt::parser::parse_file(path)
            .map_err(|e| self.failure(format!("cannot load stylesheet: {e:?}")))?;
        let source = libxml::parser::Parser::default()
            .parse_string(input)
            .map_err(|e| self.failure(format!("cannot read document: {e:?}")))?;
        let output = stylesheet
            .transform(&source, Vec::new())
            .map_err(|e| self.failure(format!("{e:?}")))?;
        Ok(output.to_string().into_bytes())
    }

    #[cfg(not(feature = "xslt"))]
    fn run(&self, _input: &[u8]) -> Result<Vec<u8>, MetaError> {
        Err(self.failure(
            "XSL stylesheets need geosync built with the `xslt` feature".to_owned(),
        ))
    }
}

impl Transform for XsltTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, doc: &mut XmlDocument) -> Result<(), MetaError> {
        let input = doc.to_bytes();
        let output = self.run(&input)?;
        let result = XmlDocument::parse(&output).map_err(|e| self.failure(e.to_string()))?;
        tracing::debug!(
            "stylesheet {}: {} -> {} byte(s)",
            self.name,
            input.len(),
            output.len()
        );
        *doc = result;
        Ok(())
    }
}
