//! Document transforms applied to a record before upload.
//!
//! A transform file is a YAML rule list:
//!
//! ```yaml
//! description: Tag copied records
//! rules:
//!   - op: replace_text
//!     path: gmd:title/gco:CharacterString
//!     from: "Rennes"
//!     to: "Rennes (copie)"
//!   - op: remove
//!     path: gmd:MD_DataIdentification/gmd:abstract
//! ```
//!
//! Paths are `/`-separated element names. A step with a prefix matches the
//! qualified name, a step without one matches the local name, and `*` matches
//! any element. A leading `/` anchors the path at the root; otherwise it
//! matches the tail of an element's ancestor chain.
//!
//! Files ending in `.xsl` or `.xslt` are XSL stylesheets instead, see
//! [`crate::xslt`].

use crate::xml::{Element, Node, XmlDocument};
use crate::xslt::{is_stylesheet, XsltTransform};
use crate::MetaError;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Something that rewrites a document tree in place.
pub trait Transform {
    fn name(&self) -> &str;
    fn apply(&self, doc: &mut XmlDocument) -> Result<(), MetaError>;
}

/// Load a transform file, picking its kind from the extension.
pub fn load(path: &Path) -> Result<Box<dyn Transform>, MetaError> {
    if is_stylesheet(path) {
        Ok(Box::new(XsltTransform::from_file(path)?))
    } else {
        Ok(Box::new(RuleTransform::from_file(path)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ElementPath {
    anchored: bool,
    steps: Vec<String>,
}

impl ElementPath {
    /// `chain` is the qualified names from the root down to the candidate.
    pub fn matches<S: AsRef<str>>(&self, chain: &[S]) -> bool {
        if chain.len() < self.steps.len() || (self.anchored && chain.len() != self.steps.len()) {
            return false;
        }
        let tail = &chain[chain.len() - self.steps.len()..];
        self.steps
            .iter()
            .zip(tail)
            .all(|(step, name)| step_matches(step, name.as_ref()))
    }
}

fn step_matches(step: &str, qualified: &str) -> bool {
    if step == "*" {
        return true;
    }
    if step.contains(':') {
        return step == qualified;
    }
    qualified
        .split_once(':')
        .map_or(qualified, |(_, local)| local)
        == step
}

impl FromStr for ElementPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let anchored = trimmed.starts_with('/');
        let steps: Vec<String> = trimmed
            .split('/')
            .filter(|step| !step.is_empty())
            .map(str::to_owned)
            .collect();
        if steps.is_empty() {
            return Err(format!("empty element path '{s}'"));
        }
        Ok(Self { anchored, steps })
    }
}

impl TryFrom<String> for ElementPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anchored {
            f.write_str("/")?;
        }
        f.write_str(&self.steps.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Rule {
    SetText {
        path: ElementPath,
        value: String,
    },
    ReplaceText {
        path: ElementPath,
        from: String,
        to: String,
    },
    Remove {
        path: ElementPath,
    },
    Rename {
        path: ElementPath,
        to: String,
    },
    SetAttribute {
        path: ElementPath,
        name: String,
        value: String,
    },
}

impl Rule {
    pub fn path(&self) -> &ElementPath {
        match self {
            Self::SetText { path, .. }
            | Self::ReplaceText { path, .. }
            | Self::Remove { path }
            | Self::Rename { path, .. }
            | Self::SetAttribute { path, .. } => path,
        }
    }

    fn edit(&self, el: &mut Element) {
        match self {
            Self::SetText { value, .. } => el.set_text(value.clone()),
            Self::ReplaceText { from, to, .. } => {
                if !from.is_empty() {
                    el.map_text_deep(&mut |text| {
                        if text.contains(from.as_str()) {
                            *text = text.replace(from.as_str(), to);
                        }
                    });
                }
            }
            Self::Rename { to, .. } => el.name.clone_from(to),
            Self::SetAttribute { name, value, .. } => el.set_attribute(name, value.clone()),
            Self::Remove { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    description: Option<String>,
    rules: Vec<Rule>,
}

/// A named list of rules, applied in order.
#[derive(Debug, Clone)]
pub struct RuleTransform {
    name: String,
    description: Option<String>,
    rules: Vec<Rule>,
}

impl RuleTransform {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            description: None,
            rules,
        }
    }

    pub fn parse(name: &str, yaml: &str) -> Result<Self, MetaError> {
        let file: RuleFile = serde_yaml::from_str(yaml).map_err(|e| MetaError::Transform {
            name: name.to_owned(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_owned(),
            description: file.description,
            rules: file.rules,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, MetaError> {
        let name = path.display().to_string();
        let yaml = std::fs::read_to_string(path).map_err(|e| MetaError::Transform {
            name: name.clone(),
            message: format!("cannot read transform file: {e}"),
        })?;
        Self::parse(&name, &yaml)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Transform for RuleTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, doc: &mut XmlDocument) -> Result<(), MetaError> {
        for rule in &self.rules {
            if matches!(rule, Rule::Remove { .. }) && rule.path().matches(&[&doc.root.name]) {
                return Err(MetaError::Transform {
                    name: self.name.clone(),
                    message: format!("rule would remove the root element ({})", rule.path()),
                });
            }
            let mut chain = Vec::new();
            let hits = visit(&mut doc.root, &mut chain, rule);
            tracing::debug!("transform {}: {} matched {hits} element(s)", self.name, rule.path());
        }
        Ok(())
    }
}

fn visit(el: &mut Element, chain: &mut Vec<String>, rule: &Rule) -> usize {
    chain.push(el.name.clone());
    let mut hits = 0;
    if let Rule::Remove { path } = rule {
        let before = el.children.len();
        el.children.retain(|node| match node {
            Node::Element(child) => {
                chain.push(child.name.clone());
                let matched = path.matches(chain.as_slice());
                chain.pop();
                !matched
            }
            _ => true,
        });
        hits += before - el.children.len();
    } else if rule.path().matches(chain.as_slice()) {
        rule.edit(el);
        hits += 1;
    }
    for child in el.child_elements_mut() {
        hits += visit(child, chain, rule);
    }
    chain.pop();
    hits
}
