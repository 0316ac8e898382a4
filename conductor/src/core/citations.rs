//! Referential-integrity checks for derived documents.
//!
//! Two independent checks, both pure and total:
//! - every citation string resolves against a reference set
//! - every source entry a document declares exists in the raw reference set
//!
//! An empty violation list is the success signal. A document is trustworthy
//! only when both lists are empty.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A titled block of text carrying zero or more citation strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    #[serde(default)]
    pub body: String,
    /// Source ids or URLs.
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsections: Vec<Section>,
}

/// A declared source the document relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SourceEntry {
    /// Strings a citation may use to refer to this entry.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.url.as_deref())
    }
}

/// Anything shaped like a section tree plus a source list.
pub trait CitedDocument {
    fn sections(&self) -> &[Section];
    fn sources(&self) -> &[SourceEntry];
}

/// Generic cited document, used where no richer report type applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl CitedDocument for Document {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }
}

/// Set of citation identifiers known to exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSet {
    pub identifiers: BTreeSet<String>,
}

impl ReferenceSet {
    pub fn from_sources(sources: &[SourceEntry]) -> Self {
        Self {
            identifiers: sources
                .iter()
                .flat_map(|entry| entry.identifiers())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            identifiers: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// A citation string that does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationViolation {
    /// Section path, e.g. `sections[1].subsections[0]`.
    pub location: String,
    pub citation: String,
}

/// A declared source entry missing from the raw reference set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceViolation {
    /// Source path, e.g. `sources[2]`.
    pub location: String,
    pub id: String,
}

/// Report every citation in `document` that is absent from `references`.
///
/// Violations are listed in document order (depth-first over sections).
pub fn check_citations_resolve<D: CitedDocument + ?Sized>(
    document: &D,
    references: &ReferenceSet,
) -> Vec<CitationViolation> {
    let mut violations = Vec::new();
    for (idx, section) in document.sections().iter().enumerate() {
        collect_unresolved(
            section,
            &format!("sections[{idx}]"),
            references,
            &mut violations,
        );
    }
    violations
}

fn collect_unresolved(
    section: &Section,
    location: &str,
    references: &ReferenceSet,
    violations: &mut Vec<CitationViolation>,
) {
    for citation in &section.citations {
        if !references.contains(citation) {
            violations.push(CitationViolation {
                location: location.to_string(),
                citation: citation.clone(),
            });
        }
    }
    for (idx, child) in section.subsections.iter().enumerate() {
        let child_location = format!("{location}.subsections[{idx}]");
        collect_unresolved(child, &child_location, references, violations);
    }
}

/// Report every source entry in `document` whose id is absent from `raw`.
/// An entry that also carries a URL must use a URL from `raw` as well, so a
/// known URL cannot vouch for an invented id.
pub fn check_subset_constraint<D: CitedDocument + ?Sized>(
    document: &D,
    raw: &ReferenceSet,
) -> Vec<SourceViolation> {
    document
        .sources()
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.identifiers().all(|id| raw.contains(id)))
        .map(|(idx, entry)| SourceViolation {
            location: format!("sources[{idx}]"),
            id: entry.id.clone(),
        })
        .collect()
}

/// Both checks together. Citations must resolve against sources that are both
/// declared by the document and present in `raw`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub unresolved_citations: Vec<CitationViolation>,
    pub unknown_sources: Vec<SourceViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved_citations.is_empty() && self.unknown_sources.is_empty()
    }

    /// One line per violation, suitable for error messages and CLI output.
    pub fn describe(&self) -> Vec<String> {
        let citations = self.unresolved_citations.iter().map(|v| {
            format!(
                "{}: citation '{}' does not resolve to a known source",
                v.location, v.citation
            )
        });
        let sources = self.unknown_sources.iter().map(|v| {
            format!(
                "{}: source '{}' is not in the reference set",
                v.location, v.id
            )
        });
        citations.chain(sources).collect()
    }
}

pub fn check_integrity<D: CitedDocument + ?Sized>(
    document: &D,
    raw: &ReferenceSet,
) -> IntegrityReport {
    let own = ReferenceSet::from_sources(document.sources());
    let trusted: ReferenceSet = own
        .identifiers
        .intersection(&raw.identifiers)
        .cloned()
        .collect();
    IntegrityReport {
        unresolved_citations: check_citations_resolve(document, &trusted),
        unknown_sources: check_subset_constraint(document, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str) -> SourceEntry {
        SourceEntry {
            id: id.to_string(),
            url: Some(format!("https://example.com/{id}")),
            title: None,
        }
    }

    fn section(heading: &str, citations: &[&str]) -> Section {
        Section {
            heading: heading.to_string(),
            body: String::new(),
            citations: citations.iter().map(|c| c.to_string()).collect(),
            subsections: Vec::new(),
        }
    }

    fn document(sections: Vec<Section>, sources: Vec<SourceEntry>) -> Document {
        Document {
            title: "doc".to_string(),
            sections,
            sources,
        }
    }

    #[test]
    fn citations_subset_of_references_is_clean() {
        let doc = document(
            vec![section("a", &["s1", "s2"]), section("b", &["s1"])],
            vec![source("s1"), source("s2")],
        );
        let refs: ReferenceSet = ["s1", "s2", "s3"].into_iter().collect();
        assert!(check_citations_resolve(&doc, &refs).is_empty());
    }

    #[test]
    fn single_unknown_citation_is_reported_once() {
        let doc = document(
            vec![section("a", &["s1"]), section("b", &["s1", "ghost"])],
            vec![source("s1")],
        );
        let refs: ReferenceSet = ["s1"].into_iter().collect();
        let violations = check_citations_resolve(&doc, &refs);
        assert_eq!(
            violations,
            vec![CitationViolation {
                location: "sections[1]".to_string(),
                citation: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn nested_sections_report_their_path() {
        let mut parent = section("parent", &[]);
        parent.subsections.push(section("child", &["missing"]));
        let doc = document(vec![section("first", &[]), parent], Vec::new());
        let violations = check_citations_resolve(&doc, &ReferenceSet::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].location, "sections[1].subsections[0]");
    }

    #[test]
    fn urls_resolve_as_citations() {
        let doc = document(
            vec![section("a", &["https://example.com/s1"])],
            vec![source("s1")],
        );
        let refs = ReferenceSet::from_sources(&doc.sources);
        assert!(check_citations_resolve(&doc, &refs).is_empty());
    }

    #[test]
    fn subset_constraint_reports_only_invented_entry() {
        let doc = document(Vec::new(), vec![source("s1"), source("invented"), source("s2")]);
        let raw = ReferenceSet::from_sources(&[source("s1"), source("s2")]);
        let violations = check_subset_constraint(&doc, &raw);
        assert_eq!(
            violations,
            vec![SourceViolation {
                location: "sources[1]".to_string(),
                id: "invented".to_string(),
            }]
        );
    }

    #[test]
    fn known_url_does_not_vouch_for_invented_id() {
        let derived = SourceEntry {
            id: "renamed".to_string(),
            url: Some("https://example.com/s1".to_string()),
            title: None,
        };
        let doc = document(Vec::new(), vec![derived]);
        let raw = ReferenceSet::from_sources(&[source("s1")]);
        let violations = check_subset_constraint(&doc, &raw);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].id, "renamed");
    }

    #[test]
    fn known_id_with_foreign_url_is_rejected() {
        let derived = SourceEntry {
            id: "s1".to_string(),
            url: Some("https://elsewhere.example/s1".to_string()),
            title: None,
        };
        let doc = document(Vec::new(), vec![derived]);
        let raw = ReferenceSet::from_sources(&[source("s1")]);
        assert_eq!(check_subset_constraint(&doc, &raw).len(), 1);
    }

    #[test]
    fn citation_of_invented_source_fails_both_checks() {
        let doc = document(vec![section("a", &["made-up"])], vec![source("made-up")]);
        let raw = ReferenceSet::from_sources(&[source("s1")]);
        let report = check_integrity(&doc, &raw);
        assert_eq!(report.unresolved_citations.len(), 1);
        assert_eq!(report.unknown_sources.len(), 1);
        assert_eq!(
            report.describe(),
            vec![
                "sections[0]: citation 'made-up' does not resolve to a known source".to_string(),
                "sources[0]: source 'made-up' is not in the reference set".to_string(),
            ]
        );
    }

    #[test]
    fn citation_must_be_declared_and_raw() {
        // Present in raw but dropped from the document's own sources.
        let doc = document(vec![section("a", &["s1", "s2"])], vec![source("s1")]);
        let raw = ReferenceSet::from_sources(&[source("s1"), source("s2")]);
        let report = check_integrity(&doc, &raw);
        assert!(report.unknown_sources.is_empty());
        assert_eq!(report.unresolved_citations.len(), 1);
        assert_eq!(report.unresolved_citations[0].citation, "s2");
    }

    #[test]
    fn empty_document_is_clean() {
        let report = check_integrity(&Document::default(), &ReferenceSet::default());
        assert!(report.is_clean());
        assert!(report.describe().is_empty());
    }
}
