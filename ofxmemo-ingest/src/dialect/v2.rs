//! OFX v2 XML dialect.
//!
//! Headers live in a `<?OFX OFXHEADER="200" VERSION="211" ...?>` processing
//! instruction after the XML declaration. Unlike v1, repeated aggregates
//! are inferred per parent: a child name seen more than once under the
//! same element becomes a sequence at that level only.

use std::collections::HashMap;
use std::sync::LazyLock;

use ofxmemo_core::{
    AliasRules, DocumentBuilder, Headers, Node, OfxError, OfxVersion, ParsedOfx, ParserOptions,
    ROOT_TAG, Result, Segment, coerce,
};
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use regex::Regex;
use tracing::debug;

const XML_DECL: &str = r#"<?xml version="1.0"?>"#;

static HEADER_PI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\?OFX (?P<attrs>.+?)\?>").expect("header PI pattern is valid"));

static HEADER_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>\w+)="(?P<value>.*?)""#).expect("header attribute pattern is valid")
});

/// Minimal element tree; attributes are not part of OFX.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(start: &BytesStart<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Self::default()
        }
    }
}

pub fn parse(text: &str, aliases: &AliasRules, opts: &ParserOptions) -> Result<ParsedOfx> {
    let headers = parse_headers(text, opts);
    let root = read_tree(text)?;
    if root.name != ROOT_TAG {
        return Err(OfxError::MissingRoot(ROOT_TAG.to_string()));
    }

    let mut builder = DocumentBuilder::new(aliases, opts);
    let mut path = vec![Segment::name(ROOT_TAG)];
    walk(&root, &mut path, &mut builder);

    let mut body = builder.finish();
    let document = body
        .remove(ROOT_TAG)
        .ok_or_else(|| OfxError::MissingRoot(ROOT_TAG.to_string()))?;
    debug!(headers = headers.len(), "parsed OFX v2");

    Ok(ParsedOfx {
        version: OfxVersion::V2,
        headers,
        document,
    })
}

fn parse_headers(text: &str, opts: &ParserOptions) -> Headers {
    let mut headers = Headers::new();
    if let Some(pi) = HEADER_PI.captures(text) {
        for attr in HEADER_ATTR.captures_iter(&pi["attrs"]) {
            headers.insert(&attr["key"], coerce(&attr["value"], opts));
        }
    }
    headers
}

fn read_tree(text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(xml)? {
            Event::Start(e) => stack.push(Element::named(&e)),
            Event::Empty(e) => attach(&mut stack, &mut root, Element::named(&e)),
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| OfxError::Xml("unbalanced closing tag".to_string()))?;
                attach(&mut stack, &mut root, done);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(xml)?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(OfxError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| OfxError::MissingRoot(ROOT_TAG.to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn walk(element: &Element, path: &mut Vec<Segment>, builder: &mut DocumentBuilder<'_>) {
    if element.children.is_empty() {
        builder.assign(path, &element.text);
        return;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for child in &element.children {
        *counts.entry(child.name.as_str()).or_default() += 1;
    }

    let mut next_index: HashMap<&str, usize> = HashMap::new();
    for child in &element.children {
        let name = child.name.as_str();
        let repeated = counts[name] > 1;

        path.push(Segment::name(name));
        if repeated {
            let next = next_index.entry(name).or_default();
            path.push(Segment::Index(*next));
            *next += 1;
        }
        walk(child, path, builder);
        if repeated {
            path.pop();
        }
        path.pop();
    }
}

/// Render a document as v2 XML with the OFX header instruction spliced in
/// right after the XML declaration.
pub fn serialize(parsed: &ParsedOfx) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(xml)?;
    write_node(&mut writer, ROOT_TAG, &parsed.document).map_err(xml)?;

    let mut out = String::from_utf8(writer.into_inner()).map_err(xml)?;
    if !parsed.headers.is_empty() {
        let spliced = format!("{XML_DECL}\n{}", header_instruction(&parsed.headers));
        out = out.replacen(XML_DECL, &spliced, 1);
    }
    out.push('\n');
    Ok(out)
}

fn header_instruction(headers: &Headers) -> String {
    let mut pi = String::from("<?OFX");
    for (key, value) in headers.iter() {
        pi.push_str(&format!(" {key}=\"{value}\""));
    }
    pi.push_str("?>");
    pi
}

fn write_node<W: std::io::Write>(
    wr: &mut Writer<W>,
    tag: &str,
    node: &Node,
) -> std::result::Result<(), quick_xml::Error> {
    match node {
        Node::Sequence(items) => {
            for item in items {
                write_node(wr, tag, item)?;
            }
        }
        Node::Record(rec) if rec.is_empty() => {
            wr.write_event(Event::Empty(BytesStart::new(tag)))?;
        }
        Node::Record(rec) => {
            wr.write_event(Event::Start(BytesStart::new(tag)))?;
            for (key, child) in rec.iter() {
                write_node(wr, key, child)?;
            }
            wr.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        Node::Scalar(value) => {
            let text = value.to_string();
            if text.is_empty() {
                wr.write_event(Event::Empty(BytesStart::new(tag)))?;
            } else {
                wr.write_event(Event::Start(BytesStart::new(tag)))?;
                wr.write_event(Event::Text(BytesText::new(&text)))?;
                wr.write_event(Event::End(BytesEnd::new(tag)))?;
            }
        }
    }
    Ok(())
}

fn xml<E: std::fmt::Display>(e: E) -> OfxError {
    OfxError::Xml(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<?OFX OFXHEADER="200" VERSION="211" SECURITY="NONE" OLDFILEUID="NONE" NEWFILEUID="NONE"?>
<OFX>
  <SIGNONMSGSRSV1>
    <SONRS>
      <STATUS><CODE>0</CODE><SEVERITY>INFO</SEVERITY></STATUS>
      <DTSERVER>20230115143000[-5:EST]</DTSERVER>
    </SONRS>
  </SIGNONMSGSRSV1>
  <CREDITCARDMSGSRSV1>
    <CCSTMTTRNRS>
      <TRNUID>1</TRNUID>
      <CCSTMTRS>
        <CURDEF>USD</CURDEF>
        <CCACCTFROM><ACCTID>4111</ACCTID></CCACCTFROM>
        <BANKTRANLIST>
          <STMTTRN><FITID>A1</FITID><TRNAMT>-1.00</TRNAMT><NAME>Tom &amp; Jerry</NAME></STMTTRN>
          <STMTTRN><FITID>A2</FITID><TRNAMT>-2.00</TRNAMT></STMTTRN>
          <STMTTRN><FITID>A3</FITID><TRNAMT>-3.00</TRNAMT></STMTTRN>
        </BANKTRANLIST>
      </CCSTMTRS>
    </CCSTMTTRNRS>
  </CREDITCARDMSGSRSV1>
</OFX>
"#;

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
    fn test_headers_from_instruction() {
        let parsed = parse(SAMPLE, &AliasRules::default(), &ParserOptions::default()).unwrap();
        let keys: Vec<_> = parsed.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["OFXHEADER", "VERSION", "SECURITY", "OLDFILEUID", "NEWFILEUID"]
        );
        assert_eq!(parsed.headers.get("VERSION").unwrap().to_string(), "211");
    }

    #[test]
    fn test_sibling_cardinality_decides_sequences() {
        let parsed = parse(SAMPLE, &AliasRules::default(), &ParserOptions::default()).unwrap();
        // one CCSTMTTRNRS: a plain record, even though v1 would force a sequence
        let rs = parsed
            .document
            .at(&seg(&["CREDITCARDMSGSRSV1", "CCSTMTTRNRS"]))
            .unwrap();
        assert!(rs.as_record().is_some());

        let txns = parsed
            .document
            .at(&seg(&["CREDITCARDMSGSRSV1", "CCSTMTTRNRS", "CCSTMTRS", "BANKTRANLIST", "STMTTRN"]))
            .and_then(Node::as_sequence)
            .unwrap();
        assert_eq!(txns.len(), 3);
        assert_eq!(txns[0].as_record().unwrap().text("NAME"), Some("Tom & Jerry"));
        assert_eq!(txns[2].as_record().unwrap().text("FITID"), Some("A3"));
    }

    #[test]
    fn test_single_transaction_is_a_record() {
        let text = r#"<?xml version="1.0"?>
<OFX><BANKTRANLIST><STMTTRN><FITID>only</FITID></STMTTRN></BANKTRANLIST></OFX>"#;
        let parsed = parse(text, &AliasRules::default(), &ParserOptions::default()).unwrap();
        let txn = parsed.document.at(&seg(&["BANKTRANLIST", "STMTTRN"])).unwrap();
        assert_eq!(txn.as_record().unwrap().text("FITID"), Some("only"));
    }

    #[test]
    fn test_values_coerced() {
        let parsed = parse(SAMPLE, &AliasRules::default(), &ParserOptions::default()).unwrap();
        let dt = parsed
            .document
            .at(&seg(&["SIGNONMSGSRSV1", "SONRS", "DTSERVER"]))
            .unwrap();
        assert_eq!(dt.as_scalar().unwrap().to_string(), "2023-01-15 19:30:00");
    }

    #[test]
    fn test_wrong_root() {
        let err = parse(
            "<?xml version=\"1.0\"?>\n<NOTOFX><A>1</A></NOTOFX>",
            &AliasRules::default(),
            &ParserOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OfxError::MissingRoot(_)));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse(
            "<?xml version=\"1.0\"?>\n<OFX><A>1</B></OFX>",
            &AliasRules::default(),
            &ParserOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OfxError::Xml(_)));
    }

    #[test]
    fn test_serialize_splices_header() {
        let parsed = parse(SAMPLE, &AliasRules::default(), &ParserOptions::raw()).unwrap();
        let out = serialize(&parsed).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(XML_DECL));
        assert_eq!(
            lines.next(),
            Some(r#"<?OFX OFXHEADER="200" VERSION="211" SECURITY="NONE" OLDFILEUID="NONE" NEWFILEUID="NONE"?>"#)
        );
        assert_eq!(lines.next(), Some("<OFX>"));
        assert_eq!(out.matches("<STMTTRN>").count(), 3);
        assert!(out.contains("<NAME>Tom &amp; Jerry</NAME>"));
    }

    #[test]
    fn test_round_trip_is_stable() {
        let opts = ParserOptions::raw();
        let first = parse(SAMPLE, &AliasRules::default(), &opts).unwrap();
        let text = serialize(&first).unwrap();
        let second = parse(&text, &AliasRules::default(), &opts).unwrap();
        assert_eq!(first, second);
        assert_eq!(serialize(&second).unwrap(), text);
    }
}
