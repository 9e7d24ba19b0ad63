//! The mutable metadata document at the center of a copy.

use crate::package::RecordPackage;
use crate::transform::{self, Transform};
use crate::types::{GsLayer, LinkedLayer, Schema};
use crate::xml::{Element, XmlDocument};
use crate::MetaError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Source and destination URL lists for `MetaDocument::rewrite_urls`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMapping {
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
}

/// Size and linkage URLs of the document at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSummary {
    pub xml_bytes: usize,
    pub linkage_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub before: LinkSummary,
    pub after: LinkSummary,
    /// Number of substring substitutions performed.
    pub replacements: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    pub before: usize,
    pub after: usize,
    pub applied: Vec<String>,
}

/// A metadata record: its parsed tree, its serialized bytes, and the package
/// it came from, if any.
///
/// `xml_bytes` always reflects `tree`; every mutating method re-serializes
/// before returning.
#[derive(Debug, Clone)]
pub struct MetaDocument {
    tree: XmlDocument,
    xml_bytes: Vec<u8>,
    schema: Schema,
    package: Option<RecordPackage>,
}

impl MetaDocument {
    /// Parse a record package fetched from a catalog.
    pub fn from_package(bytes: Vec<u8>) -> Result<Self, MetaError> {
        let package = RecordPackage::open(bytes)?;
        let xml_bytes = package.document()?;
        let tree = XmlDocument::parse(&xml_bytes)?;
        Ok(Self {
            tree,
            xml_bytes,
            schema: package.index().schema.clone(),
            package: Some(package),
        })
    }

    /// Parse a bare XML document.
    pub fn from_xml(bytes: Vec<u8>, schema: Schema) -> Result<Self, MetaError> {
        let tree = XmlDocument::parse(&bytes)?;
        Ok(Self {
            tree,
            xml_bytes: bytes,
            schema,
            package: None,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn uuid(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.index().uuid.as_str())
    }

    pub fn xml_bytes(&self) -> &[u8] {
        &self.xml_bytes
    }

    pub fn tree(&self) -> &XmlDocument {
        &self.tree
    }

    /// Record title, or an empty string when the record has none.
    pub fn title(&self) -> String {
        let Some(path) = self.schema.title_path() else {
            return String::new();
        };
        let mut level: Vec<&Element> = vec![&self.tree.root];
        for (ns, local) in path {
            level = level
                .into_iter()
                .flat_map(Element::child_elements)
                .filter(|e| match ns {
                    Some(ns) => e.is(ns, local),
                    None => true,
                })
                .collect();
        }
        level
            .first()
            .and_then(|title| title.first_child_text())
            .unwrap_or_default()
    }

    /// OGC service links in document order, undeduplicated.
    pub fn linked_layers(&self) -> Vec<LinkedLayer> {
        let Some(ns) = self.schema.link_namespace() else {
            return Vec::new();
        };
        self.tree
            .root
            .descendants()
            .into_iter()
            .filter(|e| e.is(ns, "CI_OnlineResource"))
            .filter_map(|link| {
                let prop = |local: &str| link.find(ns, local).and_then(Element::first_child_text);
                let protocol = prop("protocol")?;
                if !LinkedLayer::is_ogc_protocol(&protocol) {
                    return None;
                }
                Some(LinkedLayer {
                    server_url: prop("linkage").unwrap_or_default(),
                    name: prop("name").filter(|n| !n.is_empty()),
                    description: prop("description").filter(|d| !d.is_empty()),
                    protocol,
                })
            })
            .collect()
    }

    /// Group layer keys by the configured map-service URL their links point
    /// at.
    ///
    /// A link belongs to every base URL that is a substring of its server
    /// URL. A name carrying `workspace:layer` is split; otherwise the
    /// workspace is the first path segment left after stripping the base URL
    /// (and any query string), when at least two segments remain.
    pub fn resolve_layer_keys(
        &self,
        map_service_urls: &[String],
    ) -> BTreeMap<String, BTreeSet<GsLayer>> {
        let links = self.linked_layers();
        map_service_urls
            .iter()
            .map(|base| {
                let keys = links
                    .iter()
                    .filter(|link| link.server_url.contains(base.as_str()))
                    .filter_map(|link| layer_key(link, base))
                    .collect();
                (base.clone(), keys)
            })
            .collect()
    }

    fn linkage_elements_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        let Some(ns) = self.schema.link_namespace() else {
            return;
        };
        self.tree.root.walk_mut(&mut |e| {
            if e.is(ns, "linkage") {
                f(e);
            }
        });
    }

    fn link_summary(&self) -> LinkSummary {
        let linkage_urls = match self.schema.link_namespace() {
            Some(ns) => self
                .tree
                .root
                .descendants()
                .into_iter()
                .filter(|e| e.is(ns, "linkage"))
                .filter_map(Element::first_child_text)
                .collect(),
            None => Vec::new(),
        };
        LinkSummary {
            xml_bytes: self.xml_bytes.len(),
            linkage_urls,
        }
    }

    /// Replace source URLs with destination URLs in every linkage text.
    ///
    /// Every source is paired with every destination, in list order: the
    /// first destination consumes all occurrences of a source, and later
    /// destinations only apply if an earlier replacement reintroduced it.
    /// Never fails; a mapping that matches nothing leaves the document as is.
    pub fn rewrite_urls(&mut self, mapping: &UrlMapping) -> RewriteReport {
        let before = self.link_summary();
        let mut replacements = 0;
        self.linkage_elements_mut(&mut |linkage| {
            linkage.map_text_deep(&mut |text| {
                for src in mapping.sources.iter().filter(|s| !s.is_empty()) {
                    for dst in &mapping.destinations {
                        let hits = text.matches(src.as_str()).count();
                        if hits > 0 {
                            replacements += hits;
                            *text = text.replace(src.as_str(), dst);
                        }
                    }
                }
            });
        });
        self.refresh();
        let after = self.link_summary();
        tracing::debug!(
            "rewrote {replacements} linkage URL occurrence(s), {} -> {} bytes",
            before.xml_bytes,
            after.xml_bytes
        );
        RewriteReport {
            before,
            after,
            replacements,
        }
    }

    pub fn apply_transform(&mut self, transform: &dyn Transform) -> Result<(), MetaError> {
        transform.apply(&mut self.tree)?;
        self.tree.resolve_namespaces();
        self.refresh();
        Ok(())
    }

    pub fn apply_transform_file(&mut self, path: &Path) -> Result<(), MetaError> {
        let loaded = transform::load(path)?;
        self.apply_transform(loaded.as_ref())
    }

    /// Apply the transform files in order. An empty chain is a no-op.
    pub fn apply_transform_chain<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
    ) -> Result<TransformReport, MetaError> {
        let before = self.xml_bytes.len();
        let mut applied = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            self.apply_transform_file(path)?;
            applied.push(path.display().to_string());
        }
        Ok(TransformReport {
            before,
            after: self.xml_bytes.len(),
            applied,
        })
    }

    /// The record as it should be uploaded: the rebuilt package when the
    /// document came from one, the bare XML otherwise.
    pub fn serialize_package(&self) -> Result<Vec<u8>, MetaError> {
        match &self.package {
            Some(package) => package.with_document(&self.xml_bytes),
            None => Ok(self.xml_bytes.clone()),
        }
    }

    fn refresh(&mut self) {
        self.xml_bytes = self.tree.to_bytes();
    }
}

fn layer_key(link: &LinkedLayer, base: &str) -> Option<GsLayer> {
    let name = link.name.as_deref()?;
    if let Some((ws, layer)) = name.split_once(':') {
        return Some(GsLayer::new(Some(ws), layer));
    }
    let rest = link.server_url.replacen(base, "", 1);
    let path = rest.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let workspace = if segments.len() >= 2 {
        segments.first().copied()
    } else {
        None
    };
    Some(GsLayer::new(workspace, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::test_support::record_zip;
    use std::io::Write;

    const VELO: &str = include_str!("../testdata/iso19139_velo.xml");
    const VOIES: &str = include_str!("../testdata/iso19115-3_voies.xml");
    const TAG_AS_COPY: &str = include_str!("../testdata/tag_as_copy.yaml");

    fn velo() -> MetaDocument {
        MetaDocument::from_package(record_zip("ef6fe5e6", "iso19139", VELO.as_bytes())).unwrap()
    }

    fn voies() -> MetaDocument {
        MetaDocument::from_package(record_zip("f2a1", "iso19115-3.2018", VOIES.as_bytes()))
            .unwrap()
    }

    fn doc_with_links(links: &[(&str, &str)]) -> MetaDocument {
        let mut xml = String::from(
            r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">"#,
        );
        for (url, name) in links {
            xml.push_str(&format!(
                "<gmd:onLine><gmd:CI_OnlineResource>\
                 <gmd:linkage><gmd:URL>{url}</gmd:URL></gmd:linkage>\
                 <gmd:protocol><gco:CharacterString>OGC:WMS</gco:CharacterString></gmd:protocol>\
                 <gmd:name><gco:CharacterString>{name}</gco:CharacterString></gmd:name>\
                 </gmd:CI_OnlineResource></gmd:onLine>"
            ));
        }
        xml.push_str("</gmd:MD_Metadata>");
        MetaDocument::from_xml(xml.into_bytes(), Schema::Iso19139).unwrap()
    }

    #[test]
    fn titles_for_both_dialects() {
        assert_eq!(
            velo().title(),
            "Stations de réparation et gonflage pour vélo"
        );
        assert_eq!(voies().title(), "Voies vertes et chemins");
    }

    #[test]
    fn untitled_and_unknown_schema_records() {
        let doc = doc_with_links(&[]);
        assert_eq!(doc.title(), "");
        let other = MetaDocument::from_xml(VELO.as_bytes().to_vec(), Schema::from_id("dc")).unwrap();
        assert_eq!(other.title(), "");
        assert!(other.linked_layers().is_empty());
    }

    #[test]
    fn linked_layers_keep_ogc_links_in_order() {
        let links = velo().linked_layers();
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].server_url,
            "https://public.sig.example.org/geoserver/ows?service=wms&request=GetCapabilities"
        );
        assert_eq!(links[0].name.as_deref(), Some("ws:velo"));
        assert_eq!(links[0].protocol, "OGC:WMS");
        assert_eq!(links[1].protocol, "ogc:wfs-1.1.0-http-get-capabilities");

        let links = voies().linked_layers();
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].name.as_deref(),
            Some("mel_espacepublic:voies_vertes_chemins")
        );
    }

    #[test]
    fn layer_keys_are_deduplicated_per_service() {
        let keys = velo().resolve_layer_keys(&[
            "https://public.sig.example.org/geoserver".to_owned(),
            "https://other.example.org/geoserver".to_owned(),
        ]);
        assert_eq!(
            keys["https://public.sig.example.org/geoserver"],
            BTreeSet::from([GsLayer::new(Some("ws"), "velo")])
        );
        assert!(keys["https://other.example.org/geoserver"].is_empty());
    }

    #[test]
    fn layer_key_workspace_from_url_path() {
        let doc = doc_with_links(&[
            ("https://gs.example.org/geoserver/mobility/wms?request=GetCapabilities", "stations"),
            ("https://gs.example.org/geoserver/wms", "global_layer"),
        ]);
        let keys = doc.resolve_layer_keys(&["https://gs.example.org/geoserver".to_owned()]);
        let keys = &keys["https://gs.example.org/geoserver"];
        assert!(keys.contains(&GsLayer::new(Some("mobility"), "stations")));
        assert!(keys.contains(&GsLayer::new(None, "global_layer")));
    }

    #[test]
    fn layer_key_matching_is_by_substring() {
        // A base URL that prefixes another one also claims its links.
        let doc = doc_with_links(&[("https://gs.example.org/geoserver-test/ows", "ws:a")]);
        let bases = [
            "https://gs.example.org/geoserver".to_owned(),
            "https://gs.example.org/geoserver-test".to_owned(),
        ];
        let keys = doc.resolve_layer_keys(&bases);
        assert_eq!(keys[&bases[0]], keys[&bases[1]]);
        assert_eq!(keys[&bases[0]].len(), 1);
    }

    #[test]
    fn links_without_name_are_skipped() {
        let doc = doc_with_links(&[("https://gs.example.org/geoserver/ows", "")]);
        assert_eq!(doc.linked_layers().len(), 1);
        let keys = doc.resolve_layer_keys(&["https://gs.example.org/geoserver".to_owned()]);
        assert!(keys["https://gs.example.org/geoserver"].is_empty());
    }

    #[test]
    fn rewrite_urls_replaces_every_source() {
        let mut doc = velo();
        // Settle the serialized form so byte counts only reflect the rewrite.
        doc.rewrite_urls(&UrlMapping::default());

        let src = "https://public.sig.example.org/geoserver";
        let data = "https://data.example.org";
        let dst = "https://dest.example.org/geoserver";
        let report = doc.rewrite_urls(&UrlMapping {
            sources: vec![src.to_owned(), data.to_owned()],
            destinations: vec![dst.to_owned()],
        });

        assert_eq!(report.replacements, 3);
        let xml = String::from_utf8(doc.xml_bytes().to_vec()).unwrap();
        assert!(!xml.contains(src));
        assert!(!xml.contains(data));
        assert!(xml.contains("https://dest.example.org/geoserver/ows?service=wms&amp;request"));
        assert_eq!(
            report.after.xml_bytes + 2 * src.len() + data.len(),
            report.before.xml_bytes + 3 * dst.len()
        );
        assert_eq!(report.after.linkage_urls.len(), 3);
        assert!(report.after.linkage_urls.iter().all(|u| u.starts_with(dst)));
    }

    #[test]
    fn rewrite_urls_pairs_every_source_with_every_destination() {
        let mut doc = doc_with_links(&[("https://a.example/geoserver/ows", "ws:a")]);
        let report = doc.rewrite_urls(&UrlMapping {
            sources: vec!["https://a.example".to_owned()],
            destinations: vec![
                "https://b.example".to_owned(),
                "https://c.example".to_owned(),
            ],
        });
        // The first destination consumes the match; the second finds nothing.
        assert_eq!(report.replacements, 1);
        assert_eq!(
            report.after.linkage_urls,
            vec!["https://b.example/geoserver/ows".to_owned()]
        );
    }

    #[test]
    fn rewrite_urls_without_match_is_a_noop() {
        let mut doc = velo();
        let report = doc.rewrite_urls(&UrlMapping {
            sources: vec!["https://nowhere.example".to_owned(), String::new()],
            destinations: vec!["https://dest.example".to_owned()],
        });
        assert_eq!(report.replacements, 0);
        assert_eq!(report.before.linkage_urls, report.after.linkage_urls);
    }

    #[test]
    fn transform_chain_matches_sequential_application() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(TAG_AS_COPY.as_bytes())
            .unwrap();
        std::fs::write(
            &b,
            "rules:\n  - op: set_attribute\n    path: /gmd:MD_Metadata\n    name: xml:lang\n    value: fr\n",
        )
        .unwrap();

        let mut chained = velo();
        let report = chained.apply_transform_chain(&[&a, &b]).unwrap();
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.after, chained.xml_bytes().len());

        let mut stepwise = velo();
        stepwise.apply_transform_file(&a).unwrap();
        stepwise.apply_transform_file(&b).unwrap();
        assert_eq!(chained.xml_bytes(), stepwise.xml_bytes());

        assert_eq!(
            chained.title(),
            "Stations de réparation et gonflage pour vélo (copie)"
        );
        let xml = String::from_utf8(chained.xml_bytes().to_vec()).unwrap();
        assert!(!xml.contains("gmd:abstract"));
        assert!(xml.contains("xml:lang=\"fr\""));
    }

    #[test]
    fn empty_chain_is_a_noop() {
        let mut doc = velo();
        let before = doc.xml_bytes().to_vec();
        let report = doc.apply_transform_chain::<&Path>(&[]).unwrap();
        assert_eq!(report.before, report.after);
        assert_eq!(doc.xml_bytes(), before.as_slice());
    }

    #[test]
    fn missing_transform_file_is_fatal() {
        let mut doc = velo();
        let err = doc
            .apply_transform_chain(&[Path::new("/nonexistent/geosync/transform.yaml")])
            .unwrap_err();
        assert!(matches!(err, MetaError::Transform { .. }));
    }

    #[test]
    fn stylesheet_extension_selects_xslt() {
        let dir = tempfile::tempdir().unwrap();
        let xsl = dir.path().join("tag_as_copy.xsl");
        std::fs::write(&xsl, include_str!("../testdata/tag_as_copy.xsl")).unwrap();
        let mut doc = velo();
        let title = doc.title();
        let result = doc.apply_transform_chain(&[xsl.as_path()]);
        if cfg!(feature = "xslt") {
            let report = result.unwrap();
            assert_eq!(report.applied, vec![xsl.display().to_string()]);
            assert_eq!(doc.title(), format!("{title} (copie)"));
        } else {
            let err = result.unwrap_err();
            assert!(err.to_string().contains("`xslt` feature"), "{err}");
            assert_eq!(doc.title(), title);
        }
    }

    #[test]
    fn serialize_package_embeds_transformed_document() {
        let mut doc = velo();
        doc.rewrite_urls(&UrlMapping {
            sources: vec!["https://public.sig.example.org".to_owned()],
            destinations: vec!["https://dest.example.org".to_owned()],
        });
        let bytes = doc.serialize_package().unwrap();
        let reopened = MetaDocument::from_package(bytes).unwrap();
        assert_eq!(reopened.xml_bytes(), doc.xml_bytes());
        assert_eq!(reopened.uuid(), Some("ef6fe5e6"));
        assert!(reopened.linked_layers()[0]
            .server_url
            .starts_with("https://dest.example.org"));
    }

    #[test]
    fn bare_xml_serializes_to_itself() {
        let doc = MetaDocument::from_xml(VELO.as_bytes().to_vec(), Schema::Iso19139).unwrap();
        assert_eq!(doc.serialize_package().unwrap(), VELO.as_bytes());
        assert_eq!(doc.uuid(), None);
    }
}
