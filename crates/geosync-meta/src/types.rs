//! Value types shared across the copy pipeline.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const NS_GMD: &str = "http://www.isotc211.org/2005/gmd";
pub const NS_MDB: &str = "http://standards.iso.org/iso/19115/-3/mdb/2.0";
pub const NS_MRI: &str = "http://standards.iso.org/iso/19115/-3/mri/1.0";
pub const NS_CIT: &str = "http://standards.iso.org/iso/19115/-3/cit/2.0";

/// Protocol prefixes of links that point at map-service layers.
const OGC_PROTOCOLS: [&str; 3] = ["ogc:wms", "ogc:wfs", "ogc:wcs"];

/// Layer identity on a map-service: `workspace:layer`, or bare `layer` when
/// the layer is not scoped to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GsLayer {
    pub workspace: Option<String>,
    pub name: String,
}

impl GsLayer {
    pub fn new(workspace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            workspace: workspace.map(str::to_owned),
            name: name.into(),
        }
    }
}

impl fmt::Display for GsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workspace {
            Some(ws) => write!(f, "{ws}:{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for GsLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (workspace, name) = match s.split_once(':') {
            Some((ws, name)) => (Some(ws), name),
            None => (None, s),
        };
        if name.is_empty() || workspace.is_some_and(str::is_empty) {
            return Err(format!("invalid layer key '{s}'"));
        }
        Ok(Self::new(workspace, name))
    }
}

impl Serialize for GsLayer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GsLayer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One OGC service link published by a metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedLayer {
    pub server_url: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub protocol: String,
}

impl LinkedLayer {
    pub fn is_ogc_protocol(protocol: &str) -> bool {
        let lower = protocol.to_ascii_lowercase();
        OGC_PROTOCOLS.iter().any(|p| lower.starts_with(p))
    }
}

/// Metadata schema dialect, as named in the package index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Schema {
    #[default]
    Iso19139,
    Iso19115_3,
    Other(String),
}

impl Schema {
    pub fn from_id(id: &str) -> Self {
        match id {
            "iso19139" => Self::Iso19139,
            "iso19115-3.2018" => Self::Iso19115_3,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Iso19139 => "iso19139",
            Self::Iso19115_3 => "iso19115-3.2018",
            Self::Other(id) => id,
        }
    }

    /// Namespace of `CI_OnlineResource` and its property elements.
    pub fn link_namespace(&self) -> Option<&'static str> {
        match self {
            Self::Iso19139 => Some(NS_GMD),
            Self::Iso19115_3 => Some(NS_CIT),
            Self::Other(_) => None,
        }
    }

    /// Namespaced steps from the root to the title property element:
    /// `identificationInfo / * / citation / CI_Citation / title`.
    /// `None` in a step matches any element.
    pub(crate) fn title_path(&self) -> Option<[(Option<&'static str>, &'static str); 5]> {
        match self {
            Self::Iso19139 => Some([
                (Some(NS_GMD), "identificationInfo"),
                (None, "*"),
                (Some(NS_GMD), "citation"),
                (Some(NS_GMD), "CI_Citation"),
                (Some(NS_GMD), "title"),
            ]),
            Self::Iso19115_3 => Some([
                (Some(NS_MDB), "identificationInfo"),
                (None, "*"),
                (Some(NS_MRI), "citation"),
                (Some(NS_CIT), "CI_Citation"),
                (Some(NS_CIT), "title"),
            ]),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}
