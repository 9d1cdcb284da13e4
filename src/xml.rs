//! Reactivity XML documents, one per transcript. The writer wraps the
//! sequence at 60 characters and the per-base vectors at 60 comma-separated
//! values per line, with `NaN` as the masked sentinel.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::errs::{RfError, RfResult};

const WRAP: usize = 60;

pub const TOOL_NORM: &str = "rf-norm";
pub const TOOL_SILICO: &str = "rf-silico";
pub const TOOL_MODCALL: &str = "rf-modcall";

/// Attributes of the `data` root element.
#[derive(Debug, Clone, Default)]
pub struct ProfileHeader {
    pub combined: bool,
    pub tool: String,
    /// The reactive-set attribute is spelled `keep` for rf-modcall documents
    /// and `reactive` for everything else.
    pub keep_attr: bool,
    pub reactive: String,
    pub scoring: Option<String>,
    pub norm: Option<String>,
    pub win: Option<String>,
    pub offset: Option<String>,
    pub remap: Option<String>,
    pub max: Option<String>,
    pub pseudo: Option<String>,
    pub maxumut: Option<String>,
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NamedVector {
    pub name: String,
    pub values: Vec<f64>,
}

/// One per-transcript reactivity document.
#[derive(Debug, Clone)]
pub struct ProfileDocument {
    pub header: ProfileHeader,
    pub id: String,
    pub sequence: String,
    /// Per-base value elements in document order (`reactivity`, or
    /// `probability`+`shannon`, or `score`+`ratio`).
    pub vectors: Vec<NamedVector>,
    /// Parallel `*-error` stdev elements, present on combined documents.
    pub errors: Vec<NamedVector>,
}

impl ProfileDocument {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn primary(&self) -> Option<&NamedVector> {
        self.vectors.first()
    }

    pub fn secondary(&self) -> Option<&NamedVector> {
        self.vectors.get(1)
    }
}

pub fn format_value(value: f64, decimals: usize) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else {
        format!("{value:.decimals$}")
    }
}

/// TRUE/FALSE attribute spelling.
pub(crate) fn tf(flag: bool) -> &'static str {
    if flag {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn wrap_sequence(sequence: &str, indent: &str) -> String {
    let mut block = String::new();
    for chunk in sequence.as_bytes().chunks(WRAP) {
        block.push('\n');
        block.push_str(indent);
        block.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    block
}

fn wrap_values(values: &[f64], decimals: usize, indent: &str) -> String {
    let mut block = String::new();
    for chunk in values.chunks(WRAP) {
        let line = chunk
            .iter()
            .map(|&v| format_value(v, decimals))
            .collect::<Vec<String>>()
            .join(",");
        block.push('\n');
        block.push_str(indent);
        block.push_str(&line);
    }
    block
}

fn write_block<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    content: String,
) -> RfResult<()> {
    let xml_err =
        |e: quick_xml::Error| RfError::MalformedDocument(e.to_string());
    writer
        .write_event(Event::Text(BytesText::new("\n\t\t")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    let body = format!("{content}\n\t\t");
    writer.write_event(Event::Text(BytesText::new(&body))).map_err(xml_err)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_err)?;
    Ok(())
}

/// Write one reactivity document, values formatted to `decimals` digits.
pub fn write_profile<P: AsRef<Path>>(
    doc: &ProfileDocument,
    path: P,
    decimals: usize,
) -> RfResult<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut writer = Writer::new(file);
    let xml_err = |e: quick_xml::Error| RfError::MalformedDocument(e.to_string());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new("\n")))
        .map_err(xml_err)?;

    let header = &doc.header;
    let mut data = BytesStart::new("data");
    data.push_attribute(("combined", tf(header.combined)));
    data.push_attribute(("tool", header.tool.as_str()));
    let reactive_attr = if header.keep_attr { "keep" } else { "reactive" };
    data.push_attribute((reactive_attr, header.reactive.as_str()));
    for (key, value) in [
        ("scoring", &header.scoring),
        ("norm", &header.norm),
        ("win", &header.win),
        ("offset", &header.offset),
        ("remap", &header.remap),
        ("max", &header.max),
        ("pseudo", &header.pseudo),
        ("maxumut", &header.maxumut),
        ("algorithm", &header.algorithm),
    ] {
        if let Some(value) = value {
            data.push_attribute((key, value.as_str()));
        }
    }
    writer.write_event(Event::Start(data)).map_err(xml_err)?;

    writer
        .write_event(Event::Text(BytesText::new("\n\t")))
        .map_err(xml_err)?;
    let mut transcript = BytesStart::new("transcript");
    transcript.push_attribute(("id", doc.id.as_str()));
    transcript.push_attribute(("length", doc.len().to_string().as_str()));
    writer.write_event(Event::Start(transcript)).map_err(xml_err)?;

    write_block(
        &mut writer,
        "sequence",
        wrap_sequence(&doc.sequence, "\t\t\t"),
    )?;
    for (i, vector) in doc.vectors.iter().enumerate() {
        write_block(
            &mut writer,
            &vector.name,
            wrap_values(&vector.values, decimals, "\t\t\t"),
        )?;
        if let Some(errors) = doc.errors.get(i) {
            write_block(
                &mut writer,
                &errors.name,
                wrap_values(&errors.values, decimals, "\t\t\t"),
            )?;
        }
    }

    writer
        .write_event(Event::Text(BytesText::new("\n\t")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("transcript")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new("\n")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("data")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new("\n")))
        .map_err(xml_err)?;
    Ok(())
}

fn parse_values(raw: &str) -> RfResult<Vec<f64>> {
    raw.split([',', '\n', '\t', ' ', '\r'])
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| RfError::NonNumeric)
        })
        .collect()
}

/// Parse one reactivity document back into memory.
pub fn read_profile<P: AsRef<Path>>(path: P) -> RfResult<ProfileDocument> {
    let path = path.as_ref();
    let mut reader = Reader::from_file(path)
        .map_err(|e| RfError::MalformedDocument(e.to_string()))?;
    reader.trim_text(true);

    let mut header = ProfileHeader::default();
    let mut id = String::new();
    let mut declared_len: Option<usize> = None;
    let mut sequence = String::new();
    let mut vectors: Vec<NamedVector> = Vec::new();
    let mut errors: Vec<NamedVector> = Vec::new();
    let mut text = String::new();

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| RfError::MalformedDocument(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name =
                    String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "data" => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| {
                                RfError::MalformedDocument(e.to_string())
                            })?;
                            let key = String::from_utf8_lossy(
                                attr.key.as_ref(),
                            )
                            .to_string();
                            let value = attr
                                .unescape_value()
                                .map_err(|e| {
                                    RfError::MalformedDocument(e.to_string())
                                })?
                                .to_string();
                            match key.as_str() {
                                "combined" => {
                                    header.combined = value == "TRUE"
                                }
                                "tool" => header.tool = value,
                                "reactive" => header.reactive = value,
                                "keep" => {
                                    header.keep_attr = true;
                                    header.reactive = value;
                                }
                                "scoring" => header.scoring = Some(value),
                                "norm" => header.norm = Some(value),
                                "win" => header.win = Some(value),
                                "offset" => header.offset = Some(value),
                                "remap" => header.remap = Some(value),
                                "max" => header.max = Some(value),
                                "pseudo" => header.pseudo = Some(value),
                                "maxumut" => header.maxumut = Some(value),
                                "algorithm" => {
                                    header.algorithm = Some(value)
                                }
                                _ => {}
                            }
                        }
                    }
                    "transcript" => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| {
                                RfError::MalformedDocument(e.to_string())
                            })?;
                            let value = attr
                                .unescape_value()
                                .map_err(|e| {
                                    RfError::MalformedDocument(e.to_string())
                                })?
                                .to_string();
                            match attr.key.as_ref() {
                                b"id" => id = value,
                                b"length" => {
                                    declared_len =
                                        Some(value.parse().map_err(|_| {
                                            RfError::MalformedDocument(
                                                format!(
                                                    "invalid length \
                                                     {value:?}"
                                                ),
                                            )
                                        })?)
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {
                        text.clear();
                    }
                }
            }
            Event::Text(e) => {
                let chunk = e.unescape().map_err(|e| {
                    RfError::MalformedDocument(e.to_string())
                })?;
                text.push_str(&chunk);
                text.push('\n');
            }
            Event::End(e) => {
                let name =
                    String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "data" | "transcript" => {}
                    "sequence" => {
                        sequence = text
                            .chars()
                            .filter(|c| !c.is_whitespace())
                            .collect();
                        text.clear();
                    }
                    element => {
                        let vector = NamedVector {
                            name: element.to_owned(),
                            values: parse_values(&text)?,
                        };
                        if element.ends_with("-error") {
                            errors.push(vector);
                        } else {
                            vectors.push(vector);
                        }
                        text.clear();
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if id.is_empty() || header.tool.is_empty() {
        return Err(RfError::MalformedDocument(format!(
            "{} is missing transcript id or tool",
            path.display()
        )));
    }
    let length = declared_len.unwrap_or(sequence.len());
    if sequence.len() != length
        || vectors.is_empty()
        || vectors.iter().any(|v| v.values.len() != length)
        || errors.iter().any(|v| v.values.len() != length)
    {
        return Err(RfError::MalformedDocument(format!(
            "{} has inconsistent vector lengths",
            path.display()
        )));
    }

    Ok(ProfileDocument { header, id, sequence, vectors, errors })
}

#[cfg(test)]
mod xml_tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    fn scratch_doc() -> ProfileDocument {
        let header = ProfileHeader {
            combined: false,
            tool: TOOL_NORM.to_owned(),
            keep_attr: false,
            reactive: "N".to_owned(),
            scoring: Some("Rouskin".to_owned()),
            norm: Some("90% Winsorize".to_owned()),
            win: Some("70".to_owned()),
            offset: Some("70".to_owned()),
            remap: Some("FALSE".to_owned()),
            ..Default::default()
        };
        let values = (0..70)
            .map(|i| if i % 7 == 0 { f64::NAN } else { i as f64 / 70f64 })
            .collect::<Vec<f64>>();
        ProfileDocument {
            header,
            id: "tx1".to_owned(),
            sequence: "ACGT".repeat(17) + "AC",
            vectors: vec![NamedVector {
                name: "reactivity".to_owned(),
                values,
            }],
            errors: vec![],
        }
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx1.xml");
        let doc = scratch_doc();
        write_profile(&doc, &path, 3).unwrap();

        let restored = read_profile(&path).unwrap();
        assert_eq!(restored.id, "tx1");
        assert_eq!(restored.sequence, doc.sequence);
        assert_eq!(restored.header.tool, TOOL_NORM);
        assert_eq!(restored.header.scoring.as_deref(), Some("Rouskin"));
        assert!(!restored.header.combined);
        let values = &restored.primary().unwrap().values;
        assert_eq!(values.len(), 70);
        assert!(values[0].is_nan());
        assert_approx_eq!(values[1], 1f64 / 70f64, 1e-3);
    }

    #[test]
    fn test_wrapping_at_sixty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx1.xml");
        write_profile(&scratch_doc(), &path, 3).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let seq_lines = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.chars().all(|c| "ACGT".contains(c)))
            .collect::<Vec<&str>>();
        assert_eq!(seq_lines.len(), 2);
        assert_eq!(seq_lines[0].len(), 60);
        assert_eq!(seq_lines[1].len(), 10);
        let value_lines = raw
            .lines()
            .map(str::trim)
            .filter(|l| l.contains(','))
            .collect::<Vec<&str>>();
        assert_eq!(value_lines.len(), 2);
        assert_eq!(value_lines[0].split(',').count(), 60);
        assert_eq!(value_lines[1].split(',').count(), 10);
    }

    #[test]
    fn test_keep_attribute_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tx2.xml");
        let mut doc = scratch_doc();
        doc.header.tool = TOOL_MODCALL.to_owned();
        doc.header.keep_attr = true;
        doc.header.reactive = "A".to_owned();
        doc.vectors[0].name = "score".to_owned();
        write_profile(&doc, &path, 3).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("keep=\"A\""));
        let restored = read_profile(&path).unwrap();
        assert!(restored.header.keep_attr);
        assert_eq!(restored.header.reactive, "A");
    }

    #[test]
    fn test_inconsistent_lengths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xml");
        let mut doc = scratch_doc();
        doc.vectors[0].values.truncate(10);
        write_profile(&doc, &path, 3).unwrap();
        match read_profile(&path) {
            Err(RfError::MalformedDocument(_)) => {}
            other => panic!("expected malformed document, got {other:?}"),
        }
    }
}
