//! OFX v1 tag-stream dialect.
//!
//! Expected layout:
//!   OFXHEADER:100
//!   DATA:OFXSGML
//!   ...
//!
//!   <OFX>
//!   <SIGNONMSGSRSV1>
//!   <SONRS>
//!   <DTSERVER>20230115143000[0:GMT]
//!   ...
//!
//! One tag per line. Leaf elements usually have no closing tag, so the
//! grammar cannot tell a single aggregate from a repeated one; repeated
//! aggregates are recognised through [`ARRAY_FIELDS`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use ofxmemo_core::{
    AliasRules, DocumentBuilder, Headers, Node, OfxError, OfxVersion, ParsedOfx, ParserOptions,
    ROOT_TAG, Result, Segment, coerce,
};
use regex::Regex;
use tracing::{debug, trace, warn};

/// Parent aggregate => the child aggregate that is always a sequence under it.
pub const ARRAY_FIELDS: [(&str, &str); 5] = [
    ("BANKMSGSRSV1", "STMTTRNRS"),
    ("STMTTRNRS", "STMTRS"),
    ("BANKTRANLIST", "STMTTRN"),
    ("CREDITCARDMSGSRSV1", "CCSTMTTRNRS"),
    ("CCSTMTTRNRS", "CCSTMTRS"),
];

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<key>.*):(?P<value>.*)$").expect("header pattern is valid"));

static TAG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?P<closing>/)?(?P<tag>.+?)>(?P<value>[^<]+)?").expect("tag pattern is valid")
});

/// Sequence child forced under `parent`, if any.
pub fn array_child(parent: &str) -> Option<&'static str> {
    ARRAY_FIELDS
        .iter()
        .find(|(p, _)| *p == parent)
        .map(|(_, c)| *c)
}

pub fn is_array_child(tag: &str) -> bool {
    ARRAY_FIELDS.iter().any(|(_, c)| *c == tag)
}

pub fn parse(text: &str, aliases: &AliasRules, opts: &ParserOptions) -> Result<ParsedOfx> {
    let mut in_header = true;
    let mut headers = Headers::new();
    let mut builder = DocumentBuilder::new(aliases, opts);
    let mut path: Vec<Segment> = Vec::new();
    let mut next_index: HashMap<&str, usize> = ARRAY_FIELDS.iter().map(|(_, c)| (*c, 0)).collect();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if in_header {
            if let Some(caps) = HEADER_LINE.captures(line) {
                headers.insert(&caps["key"], coerce(&caps["value"], opts));
                continue;
            }
            // This line already belongs to the body.
            in_header = false;
        }

        let Some(caps) = TAG_LINE.captures(line) else {
            trace!(line, "skipping line without a tag");
            continue;
        };
        let tag = &caps["tag"];
        let value = caps.name("value").map(|m| m.as_str()).unwrap_or("");

        if caps.name("closing").is_some() {
            if path.pop().is_none() {
                warn!(tag, "closing tag with nothing open");
            }
            if let Some(child) = array_child(tag) {
                next_index.insert(child, 0);
            }
            // an array child also leaves its name frame behind its index
            if is_array_child(tag) {
                path.pop();
            }
        } else if value.is_empty() {
            path.push(Segment::name(tag));
            if let Some(next) = next_index.get_mut(tag) {
                path.push(Segment::Index(*next));
                *next += 1;
            }
        } else {
            path.push(Segment::name(tag));
            builder.assign(&path, value);
            path.pop();
        }
    }

    let mut body = builder.finish();
    let document = body
        .remove(ROOT_TAG)
        .ok_or_else(|| OfxError::MissingRoot(ROOT_TAG.to_string()))?;
    debug!(headers = headers.len(), "parsed OFX v1");

    Ok(ParsedOfx {
        version: OfxVersion::V1,
        headers,
        document,
    })
}

/// Render a document as v1 text: `key:value` headers, a blank line, then
/// the tag tree indented two spaces per level.
pub fn serialize(parsed: &ParsedOfx) -> String {
    let mut out = String::new();
    for (key, value) in parsed.headers.iter() {
        let _ = writeln!(out, "{key}:{value}");
    }
    out.push('\n');
    write_node(&mut out, ROOT_TAG, &parsed.document, 0);
    out
}

fn write_node(out: &mut String, tag: &str, node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    match node {
        // Sequence items reuse the field's tag at the same depth.
        Node::Sequence(items) => {
            if items.is_empty() {
                warn!(tag, "empty sequence has no v1 rendering, omitting");
            } else if !is_array_child(tag) {
                debug!(tag, "sequence outside the array-field table");
            }
            for item in items {
                write_node(out, tag, item, depth);
            }
        }
        Node::Record(rec) => {
            let _ = writeln!(out, "{indent}<{tag}>");
            for (key, child) in rec.iter() {
                write_node(out, key, child, depth + 1);
            }
            let _ = writeln!(out, "{indent}</{tag}>");
        }
        Node::Scalar(value) => {
            let _ = writeln!(out, "{indent}<{tag}>{value}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"OFXHEADER:100
DATA:OFXSGML
VERSION:102

<OFX>
<SIGNONMSGSRSV1>
<SONRS>
<STATUS>
<CODE>0
<SEVERITY>INFO
</STATUS>
<DTSERVER>20230115143000[0:GMT]
<LANGUAGE>ENG
</SONRS>
</SIGNONMSGSRSV1>
<BANKMSGSRSV1>
<STMTTRNRS>
<TRNUID>1
<STMTRS>
<CURDEF>GBP
<BANKACCTFROM>
<BANKID>200000
<ACCTID>12345678
<ACCTTYPE>CHECKING
</BANKACCTFROM>
<BANKTRANLIST>
<DTSTART>20230101000000[0:GMT]
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20230110000000[0:GMT]
<TRNAMT>-10.00
<FITID>AAA</FITID>
<NAME>Coffee
</STMTTRN>
<STMTTRN>
<TRNTYPE>CREDIT
<DTPOSTED>20230111000000[0:GMT]
<TRNAMT>500.00
<FITID>BBB</FITID>
<NAME>Salary
</STMTTRN>
</BANKTRANLIST>
</STMTRS>
</STMTTRNRS>
</BANKMSGSRSV1>
</OFX>
"#;

    fn parse_default(text: &str) -> ParsedOfx {
        parse(text, &AliasRules::default(), &ParserOptions::default()).unwrap()
    }

    fn seg(parts: &[&str]) -> Vec<Segment> {
        parts
            .iter()
            .map(|p| match p.parse::<usize>() {
                Ok(i) => Segment::Index(i),
                Err(_) => Segment::name(*p),
            })
            .collect()
    }

    #[test]
    fn test_headers_in_order() {
        let parsed = parse_default(SAMPLE);
        let keys: Vec<_> = parsed.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["OFXHEADER", "DATA", "VERSION"]);
        assert_eq!(parsed.headers.get("VERSION").unwrap().to_string(), "102");
    }

    #[test]
    fn test_table_children_become_sequences() {
        let parsed = parse_default(SAMPLE);
        let rs = parsed.document.at(&seg(&["BANKMSGSRSV1", "STMTTRNRS"])).unwrap();
        assert_eq!(rs.as_sequence().unwrap().len(), 1);

        let txns = parsed
            .document
            .at(&seg(&["BANKMSGSRSV1", "STMTTRNRS", "0", "STMTRS", "0", "BANKTRANLIST", "STMTTRN"]))
            .and_then(Node::as_sequence)
            .unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[1].as_record().unwrap().text("FITID"), Some("BBB"));
        assert_eq!(txns[1].as_record().unwrap().text("NAME"), Some("Salary"));
    }

    #[test]
    fn test_non_table_aggregates_stay_records() {
        let parsed = parse_default(SAMPLE);
        let status = parsed
            .document
            .at(&seg(&["SIGNONMSGSRSV1", "SONRS", "STATUS"]))
            .unwrap();
        assert_eq!(status.as_record().unwrap().text("CODE"), Some("0"));
        let dt = parsed
            .document
            .at(&seg(&["SIGNONMSGSRSV1", "SONRS", "DTSERVER"]))
            .unwrap();
        assert_eq!(dt.as_scalar().unwrap().to_string(), "2023-01-15 14:30:00");
    }

    #[test]
    fn test_index_resets_when_parent_closes() {
        let text = "OFXHEADER:100\n\n<OFX>\n<BANKTRANLIST>\n<STMTTRN>\n<FITID>1\n</STMTTRN>\n</BANKTRANLIST>\n<X>\n<BANKTRANLIST>\n<STMTTRN>\n<FITID>2\n</STMTTRN>\n</BANKTRANLIST>\n</X>\n</OFX>\n";
        let parsed = parse_default(text);
        let second = parsed
            .document
            .at(&seg(&["X", "BANKTRANLIST", "STMTTRN"]))
            .and_then(Node::as_sequence)
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_record().unwrap().text("FITID"), Some("2"));
    }

    #[test]
    fn test_missing_root() {
        let err = parse(
            "OFXHEADER:100\n\n<NOTOFX>\n<A>1\n</NOTOFX>\n",
            &AliasRules::default(),
            &ParserOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OfxError::MissingRoot(_)));
    }

    #[test]
    fn test_header_line_can_start_body() {
        // no blank line between the header block and the body
        let parsed = parse_default("OFXHEADER:100\n<OFX>\n<A>1\n</OFX>\n");
        assert_eq!(parsed.headers.len(), 1);
        assert_eq!(parsed.document.as_record().unwrap().text("A"), Some("1"));
    }

    #[test]
    fn test_unmatched_lines_are_skipped() {
        let parsed = parse_default("OFXHEADER:100\n\n<OFX>\njunk without tags\n<A>1\n</OFX>\n");
        assert_eq!(parsed.document.as_record().unwrap().len(), 1);
    }

    #[test]
    fn test_serialize_shape() {
        let parsed = parse(SAMPLE, &AliasRules::default(), &ParserOptions::raw()).unwrap();
        let out = serialize(&parsed);
        assert!(out.starts_with("OFXHEADER:100\nDATA:OFXSGML\nVERSION:102\n\n<OFX>\n"));
        assert!(out.contains("\n      <TRNUID>1\n"));
        assert!(out.contains("\n  <SIGNONMSGSRSV1>\n"));
        assert_eq!(out.matches("<STMTTRN>").count(), 2);
        assert_eq!(out.matches("</STMTTRN>").count(), 2);
        assert!(out.contains("<FITID>AAA\n"));
        assert!(out.contains("<DTSERVER>20230115143000[0:GMT]\n"));
        assert!(out.ends_with("</OFX>\n"));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let opts = ParserOptions::raw();
        let first = parse(SAMPLE, &AliasRules::default(), &opts).unwrap();
        let text = serialize(&first);
        let second = parse(&text, &AliasRules::default(), &opts).unwrap();
        assert_eq!(first, second);
        assert_eq!(serialize(&second), text);
    }
}
