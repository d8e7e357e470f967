//! GFF3 interchange codec: bidirectional mapping between feature trees and
//! nine-column GFF3 records.
//!
//! Internal coordinates are interbase; GFF3 is 1-based inclusive. The `+1`/
//! `-1` conversion happens exactly once, here. Reserved attributes live under
//! a `gff_` prefix internally and under their public names ("ID", "Name", ...)
//! in the interchange form.

use crate::error::Gff3Error;
use crate::feature::{Feature, FeatureId, ATTR_ID, ATTR_SCORE, ATTR_SOURCE};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Internal attribute key carrying GFF3 phase column values (one per record
/// of a discontinuous group, in sub-location order).
pub const ATTR_PHASE: &str = "gff_phase";

/// Reserved attribute keys, internal prefixed form paired with the public
/// GFF3 form.
const RESERVED_ATTRIBUTES: &[(&str, &str)] = &[
    (ATTR_ID, "ID"),
    ("gff_name", "Name"),
    ("gff_alias", "Alias"),
    ("gff_target", "Target"),
    ("gff_gap", "Gap"),
    ("gff_derives_from", "Derives_from"),
    ("gff_note", "Note"),
    ("gff_dbxref", "Dbxref"),
    ("gff_is_circular", "Is_circular"),
];

/// The two internal ontology-term buckets merged into the public
/// "Ontology_term" list on export. Import puts everything back into the
/// first bucket.
const ONTOLOGY_BUCKETS: &[&str] = &["gff_ontology_term", "go"];

/// One logical GFF3 feature line. Coordinates are 1-based inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gff3Record {
    pub seq_id: String,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: i64,
    pub end: i64,
    pub score: Option<f64>,
    pub strand: Option<i8>,
    pub phase: Option<u8>,
    /// Ordered for stable output; keys repeat never, values may.
    pub attributes: Vec<(String, Vec<String>)>,
}

impl Gff3Record {
    pub fn attribute(&self, key: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Parse one tab-separated feature line.
    pub fn parse_line(line: &str) -> Result<Self, Gff3Error> {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != 9 {
            return Err(Gff3Error::MissingColumn {
                column: "all nine",
                line: line.to_string(),
            });
        }
        let mandatory = |idx: usize, name: &'static str| -> Result<&str, Gff3Error> {
            let v = columns[idx];
            if v.is_empty() || v == "." {
                return Err(Gff3Error::MissingColumn {
                    column: name,
                    line: line.to_string(),
                });
            }
            Ok(v)
        };
        let seq_id = unescape(mandatory(0, "seqid")?);
        let kind = mandatory(2, "type")?.to_string();
        let start: i64 = mandatory(3, "start")?
            .parse()
            .map_err(|_| Gff3Error::BadCoordinate {
                value: columns[3].to_string(),
                line: line.to_string(),
            })?;
        let end: i64 = mandatory(4, "end")?
            .parse()
            .map_err(|_| Gff3Error::BadCoordinate {
                value: columns[4].to_string(),
                line: line.to_string(),
            })?;
        let source = match columns[1] {
            "." | "" => None,
            s => Some(unescape(s)),
        };
        let score = match columns[5] {
            "." | "" => None,
            s => s.parse::<f64>().ok(),
        };
        let strand = match columns[6] {
            "+" => Some(1),
            "-" => Some(-1),
            "." | "?" => None,
            other => return Err(Gff3Error::BadStrand(other.to_string())),
        };
        let phase = match columns[7] {
            "0" => Some(0),
            "1" => Some(1),
            "2" => Some(2),
            "." => None,
            other => return Err(Gff3Error::BadPhase(other.to_string())),
        };
        let mut attributes = Vec::new();
        if columns[8] != "." && !columns[8].is_empty() {
            for pair in columns[8].split(';').filter(|p| !p.is_empty()) {
                let (key, values) = match pair.split_once('=') {
                    Some((k, v)) => (k, v),
                    None => (pair, ""),
                };
                let values: Vec<String> = values.split(',').map(unescape).collect();
                attributes.push((unescape(key), values));
            }
        }
        Ok(Self {
            seq_id,
            source,
            kind,
            start,
            end,
            score,
            strand,
            phase,
            attributes,
        })
    }

    pub fn to_line(&self) -> String {
        let attributes = if self.attributes.is_empty() {
            ".".to_string()
        } else {
            self.attributes
                .iter()
                .map(|(k, values)| {
                    let values = values.iter().map(|v| escape(v)).join(",");
                    format!("{}={}", escape(k), values)
                })
                .join(";")
        };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            escape(&self.seq_id),
            self.source.as_deref().map(escape).unwrap_or_else(|| ".".to_string()),
            self.kind,
            self.start,
            self.end,
            self.score.map(|s| s.to_string()).unwrap_or_else(|| ".".to_string()),
            match self.strand {
                Some(1) => "+",
                Some(-1) => "-",
                _ => ".",
            },
            self.phase.map(|p| p.to_string()).unwrap_or_else(|| ".".to_string()),
            attributes,
        )
    }
}

/// Percent-escape the characters GFF3 reserves inside columns and attribute
/// values.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            '&' => out.push_str("%26"),
            ',' => out.push_str("%2C"),
            '\t' => out.push_str("%09"),
            '\n' => out.push_str("%0A"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let hex: String = chars.by_ref().take(2).collect();
        match u8::from_str_radix(&hex, 16) {
            Ok(byte) => out.push(byte as char),
            Err(_) => {
                out.push('%');
                out.push_str(&hex);
            }
        }
    }
    out
}

/// Map one feature to its interchange records. Normally one record; a feature
/// carrying discontinuous locations (split CDS) maps to N records sharing the
/// same attributes and type. Side-effect-free.
pub fn feature_to_records(
    feature: &Feature,
    parent_external_id: Option<&str>,
    refseq_name: Option<&str>,
) -> Result<Vec<Gff3Record>, Gff3Error> {
    let mut attributes: Vec<(String, Vec<String>)> = Vec::new();

    // Public ID: an explicit gff_id wins; a feature with children but no
    // explicit identifier gets its internal identifier as the public ID so
    // children can reference it as Parent; a childless feature without an
    // explicit identifier gets no ID at all.
    let external_id = match feature.attribute_values(ATTR_ID) {
        Some(values) if !values.is_empty() => Some(values[0].clone()),
        _ if !feature.children().is_empty() => Some(feature.id().clone()),
        _ => None,
    };
    if let Some(id) = &external_id {
        attributes.push(("ID".to_string(), vec![id.clone()]));
    }
    if let Some(parent) = parent_external_id {
        attributes.push(("Parent".to_string(), vec![parent.to_string()]));
    }

    for (internal, public) in RESERVED_ATTRIBUTES {
        if *internal == ATTR_ID {
            continue; // handled above
        }
        if let Some(values) = feature.attribute_values(internal) {
            attributes.push((public.to_string(), values.to_vec()));
        }
    }

    let mut ontology_terms = Vec::new();
    for bucket in ONTOLOGY_BUCKETS {
        if let Some(values) = feature.attribute_values(bucket) {
            ontology_terms.extend(values.to_vec());
        }
    }
    if !ontology_terms.is_empty() {
        attributes.push(("Ontology_term".to_string(), ontology_terms));
    }

    // Everything else passes through as-is, in sorted order for stable
    // output. Internal bookkeeping attributes stay out of the interchange.
    let custom = feature
        .attributes()
        .iter()
        .filter(|(k, _)| {
            !RESERVED_ATTRIBUTES.iter().any(|(internal, _)| internal == k)
                && !ONTOLOGY_BUCKETS.contains(&k.as_str())
                && *k != ATTR_SOURCE
                && *k != ATTR_SCORE
                && *k != ATTR_PHASE
        })
        .sorted_by(|a, b| a.0.cmp(b.0));
    for (key, values) in custom {
        attributes.push((key.clone(), values.clone()));
    }

    let score = match feature.attribute_values(ATTR_SCORE) {
        None => None,
        Some([single]) => single.parse::<f64>().ok(),
        Some(_) => {
            return Err(Gff3Error::MultipleScoreValues {
                id: feature.id().clone(),
            })
        }
    };
    let source = feature
        .attribute_values(ATTR_SOURCE)
        .and_then(|v| v.first())
        .cloned();
    let seq_id = refseq_name.unwrap_or(feature.refseq()).to_string();

    let phases = feature.attribute_values(ATTR_PHASE).unwrap_or(&[]);
    let phase_at = |idx: usize, count: usize| -> Option<u8> {
        let raw = if phases.len() == count {
            phases.get(idx)
        } else {
            None
        };
        raw.and_then(|p| p.parse::<u8>().ok()).filter(|p| *p <= 2)
    };

    let locations = feature.discontinuous_locations();
    if locations.is_empty() {
        return Ok(vec![Gff3Record {
            seq_id,
            source,
            kind: feature.kind().to_string(),
            start: feature.min() + 1,
            end: feature.max(),
            score,
            strand: feature.strand(),
            phase: phase_at(0, 1),
            attributes,
        }]);
    }

    Ok(locations
        .iter()
        .enumerate()
        .map(|(idx, loc)| Gff3Record {
            seq_id: seq_id.clone(),
            source: source.clone(),
            kind: feature.kind().to_string(),
            start: loc.start + 1,
            end: loc.end,
            score,
            strand: feature.strand(),
            phase: phase_at(idx, locations.len()),
            attributes: attributes.clone(),
        })
        .collect())
}

/// Inverse direction: build one feature from a record group (one record, or
/// several records sharing an ID).
///
/// A group with more than one location is only valid for type "CDS"; the
/// resulting feature spans the envelope and `discontinuous_locations` stays
/// empty: export expands discontinuity, import collapses it. Every created
/// feature receives a freshly generated identifier; `id_accumulator` collects
/// them across a recursive import.
pub fn feature_from_records(
    records: &[Gff3Record],
    inherited_refseq: Option<&str>,
    mut id_accumulator: Option<&mut Vec<FeatureId>>,
) -> Result<Feature, Gff3Error> {
    let first = records.first().ok_or(Gff3Error::MissingColumn {
        column: "record",
        line: String::new(),
    })?;
    if records.len() > 1 && first.kind != "CDS" {
        return Err(Gff3Error::MultiLocationNonCds {
            kind: first.kind.clone(),
            id: first
                .attribute("ID")
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_default(),
        });
    }

    let start = records.iter().map(|r| r.start).min().unwrap_or(first.start);
    let end = records.iter().map(|r| r.end).max().unwrap_or(first.end);
    let refseq = inherited_refseq.unwrap_or(&first.seq_id);
    let mut feature = Feature::new(refseq, &first.kind, start - 1, end).map_err(|_| {
        Gff3Error::BadCoordinate {
            value: format!("{start}..{end}"),
            line: first.to_line(),
        }
    })?;
    feature.set_strand(first.strand);

    for (key, values) in &first.attributes {
        // Parentage is structural in the internal tree, not an attribute.
        if key == "Parent" {
            continue;
        }
        if key == "Ontology_term" {
            feature.set_attribute(ONTOLOGY_BUCKETS[0], values.clone());
            continue;
        }
        match RESERVED_ATTRIBUTES.iter().find(|(_, public)| public == key) {
            Some((internal, _)) => feature.set_attribute(internal, values.clone()),
            None => feature.set_attribute(key, values.clone()),
        }
    }
    if let Some(source) = &first.source {
        feature.set_attribute(ATTR_SOURCE, vec![source.clone()]);
    }
    if let Some(score) = first.score {
        feature.set_attribute(ATTR_SCORE, vec![score.to_string()]);
    }
    let phases: Vec<String> = records
        .iter()
        .filter_map(|r| r.phase)
        .map(|p| p.to_string())
        .collect();
    if phases.len() == records.len() {
        feature.set_attribute(ATTR_PHASE, phases);
    }

    if let Some(acc) = id_accumulator.as_deref_mut() {
        acc.push(feature.id().clone());
    }
    Ok(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::SubLocation;

    fn gene(min: i64, max: i64) -> Feature {
        Feature::new("chr1", "gene", min, max).unwrap()
    }

    #[test]
    fn test_line_round_trip_with_escaping() {
        let line = "chr1\ttest\tgene\t11\t90\t0.5\t+\t.\tID=g1;Name=my%3Bgene;Dbxref=db:1,db:2";
        let record = Gff3Record::parse_line(line).unwrap();
        assert_eq!(record.start, 11);
        assert_eq!(record.strand, Some(1));
        assert_eq!(record.attribute("Name").unwrap(), ["my;gene"]);
        assert_eq!(record.attribute("Dbxref").unwrap(), ["db:1", "db:2"]);
        assert_eq!(record.to_line(), line);
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(matches!(
            Gff3Record::parse_line("chr1\t.\tgene\t1\t10\t.\t*\t.\t."),
            Err(Gff3Error::BadStrand(_))
        ));
        assert!(matches!(
            Gff3Record::parse_line("chr1\t.\tgene\t1\t10\t.\t+\t7\t."),
            Err(Gff3Error::BadPhase(_))
        ));
        assert!(matches!(
            Gff3Record::parse_line("chr1\t.\t.\t1\t10\t.\t+\t.\t."),
            Err(Gff3Error::MissingColumn { column: "type", .. })
        ));
        assert!(matches!(
            Gff3Record::parse_line("chr1\t.\tgene\tx\t10\t.\t+\t.\t."),
            Err(Gff3Error::BadCoordinate { .. })
        ));
    }

    #[test]
    fn test_export_interbase_conversion_and_id_rules() {
        let mut parent = gene(10, 90);
        parent.add_child(Feature::new("chr1", "exon", 10, 20).unwrap());
        let records = feature_to_records(&parent, None, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].start, 11);
        assert_eq!(records[0].end, 90);
        // Parented feature without explicit gff_id uses its internal id.
        assert_eq!(records[0].attribute("ID").unwrap(), [parent.id().clone()]);

        let leaf = gene(0, 5);
        let records = feature_to_records(&leaf, None, None).unwrap();
        assert!(records[0].attribute("ID").is_none());
    }

    #[test]
    fn test_export_reserved_renames_and_ontology_merge() {
        let mut f = gene(0, 10);
        f.set_attribute("gff_name", vec!["abc".into()]);
        f.set_attribute("gff_dbxref", vec!["db:1".into()]);
        f.set_attribute("gff_ontology_term", vec!["SO:0000001".into()]);
        f.set_attribute("go", vec!["GO:0008150".into()]);
        f.set_attribute("custom", vec!["x".into()]);
        let records = feature_to_records(&f, Some("parent-1"), None).unwrap();
        let r = &records[0];
        assert_eq!(r.attribute("Name").unwrap(), ["abc"]);
        assert_eq!(r.attribute("Dbxref").unwrap(), ["db:1"]);
        assert_eq!(r.attribute("Parent").unwrap(), ["parent-1"]);
        assert_eq!(
            r.attribute("Ontology_term").unwrap(),
            ["SO:0000001", "GO:0008150"]
        );
        assert_eq!(r.attribute("custom").unwrap(), ["x"]);
        assert!(r.attribute("gff_name").is_none());
    }

    #[test]
    fn test_score_semantics() {
        let mut f = gene(0, 10);
        f.set_attribute(ATTR_SCORE, vec!["1.5".into()]);
        let records = feature_to_records(&f, None, None).unwrap();
        assert_eq!(records[0].score, Some(1.5));

        // Non-numeric score yields a null score rather than raising.
        f.set_attribute(ATTR_SCORE, vec!["n/a".into()]);
        let records = feature_to_records(&f, None, None).unwrap();
        assert_eq!(records[0].score, None);

        // Multiple values is an error.
        f.set_attribute(ATTR_SCORE, vec!["1".into(), "2".into()]);
        assert!(matches!(
            feature_to_records(&f, None, None),
            Err(Gff3Error::MultipleScoreValues { .. })
        ));
    }

    #[test]
    fn test_discontinuous_cds_expands_to_n_records() {
        let mut cds = Feature::new("chr1", "CDS", 100, 225).unwrap();
        cds.set_strand(Some(1));
        cds.set_discontinuous_locations(vec![
            SubLocation { start: 100, end: 130 },
            SubLocation { start: 200, end: 225 },
        ]);
        cds.set_attribute(ATTR_PHASE, vec!["0".into(), "0".into()]);
        let records = feature_to_records(&cds, Some("t1"), None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].start, records[0].end), (101, 130));
        assert_eq!((records[1].start, records[1].end), (201, 225));
        assert_eq!(records[0].phase, Some(0));
        assert_eq!(records[0].attribute("Parent"), records[1].attribute("Parent"));
    }

    #[test]
    fn test_import_round_trip_modulo_ids() {
        let mut f = gene(10, 90);
        f.set_strand(Some(-1));
        f.set_attribute("gff_name", vec!["abc".into()]);
        f.set_attribute("custom", vec!["x".into(), "y".into()]);
        let records = feature_to_records(&f, None, None).unwrap();

        let mut ids = Vec::new();
        let imported = feature_from_records(&records, None, Some(&mut ids)).unwrap();
        assert_ne!(imported.id(), f.id());
        assert_eq!(ids, vec![imported.id().clone()]);
        assert_eq!(imported.kind(), "gene");
        assert_eq!((imported.min(), imported.max()), (10, 90));
        assert_eq!(imported.strand(), Some(-1));
        assert_eq!(imported.attribute_values("gff_name").unwrap(), ["abc"]);
        assert_eq!(imported.attribute_values("custom").unwrap(), ["x", "y"]);
    }

    #[test]
    fn test_import_multi_location_collapses_to_envelope() {
        let lines = [
            "chr1\t.\tCDS\t101\t130\t.\t+\t0\tID=c1;Parent=t1",
            "chr1\t.\tCDS\t201\t225\t.\t+\t0\tID=c1;Parent=t1",
        ];
        let records: Vec<Gff3Record> = lines
            .iter()
            .map(|l| Gff3Record::parse_line(l).unwrap())
            .collect();
        let feature = feature_from_records(&records, None, None).unwrap();
        assert_eq!((feature.min(), feature.max()), (100, 225));
        // Import reconstructs only the envelope.
        assert!(feature.discontinuous_locations().is_empty());
        // Parent is structural, not an attribute.
        assert!(feature.attribute_values("Parent").is_none());
        assert_eq!(feature.attribute_values(ATTR_PHASE).unwrap(), ["0", "0"]);
    }

    #[test]
    fn test_import_multi_location_non_cds_rejected() {
        let lines = [
            "chr1\t.\texon\t101\t130\t.\t+\t.\tID=e1",
            "chr1\t.\texon\t201\t225\t.\t+\t.\tID=e1",
        ];
        let records: Vec<Gff3Record> = lines
            .iter()
            .map(|l| Gff3Record::parse_line(l).unwrap())
            .collect();
        assert!(matches!(
            feature_from_records(&records, None, None),
            Err(Gff3Error::MultiLocationNonCds { .. })
        ));
    }
}
