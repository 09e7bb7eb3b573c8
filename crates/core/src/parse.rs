//! Deserializer for the XML report wire format.
//!
//! The format is a fixed tree: an `<analysis>` root with `<metadata>`
//! (generator, sut, file, stats) and `<results>` holding `<issue>`,
//! `<failure>` and `<info>` records with nested locations. Example:
//!
//! ```xml
//! <analysis>
//!   <metadata>
//!     <generator name="cppcheck" version="1.0"/>
//!     <sut><debian-source name="foo" version="2.0"/></sut>
//!   </metadata>
//!   <results>
//!     <issue cwe="79" severity="warning">
//!       <message>xss</message>
//!       <location>
//!         <file given-path="src/a.c"/>
//!         <point line="10" column="5"/>
//!       </location>
//!     </issue>
//!   </results>
//! </analysis>
//! ```
//!
//! Parsing happens in two stages: a small generic element tree is read off
//! the `quick-xml` event stream, then mapped onto the typed document
//! model. Malformed input surfaces as [`ParseError`]; the import driver
//! treats that as a per-document failure, never a batch abort.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::model::{
    Analysis, Checksum, CustomField, CustomFields, Failure, File, Finding, Function, Generator,
    Info, Issue, Location, Message, Metadata, Notes, Point, Range, State, Stats, Sut, Trace,
};

/// Error type for report deserialization.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Input held no root element at all (empty file, whitespace only).
    #[error("empty document")]
    Empty,

    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed attribute syntax.
    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    /// The root element was not `<analysis>`.
    #[error("unexpected root element <{found}>, expected <analysis>")]
    UnexpectedRoot { found: String },

    /// A required child element was absent.
    #[error("<{parent}> is missing required child <{child}>")]
    MissingElement { parent: String, child: String },

    /// A required attribute was absent.
    #[error("<{element}> is missing required attribute '{attr}'")]
    MissingAttr { element: String, attr: String },

    /// An attribute value failed to parse as its expected type.
    #[error("<{element}> attribute '{attr}' has invalid value '{value}'")]
    InvalidAttr { element: String, attr: String, value: String },

    /// An element this format does not define.
    #[error("unknown element <{found}> under <{parent}>")]
    UnknownElement { parent: String, found: String },
}

/// Convenience result type for parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse one report document into an `Analysis` tree.
///
/// The returned tree is un-idified; run [`crate::hash::Idify::idify`] on
/// it before resolution.
pub fn parse_report(xml: &str) -> ParseResult<Analysis> {
    let root = read_tree(xml)?;
    if root.name != "analysis" {
        return Err(ParseError::UnexpectedRoot { found: root.name });
    }
    parse_analysis(&root)
}

/// Generic element: name, attributes, ordered children, accumulated text.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn require_attr(&self, name: &str) -> ParseResult<&str> {
        self.attr(name).ok_or_else(|| ParseError::MissingAttr {
            element: self.name.clone(),
            attr: name.to_string(),
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require_child(&self, name: &str) -> ParseResult<&Element> {
        self.child(name).ok_or_else(|| ParseError::MissingElement {
            parent: self.name.clone(),
            child: name.to_string(),
        })
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn int_attr(&self, name: &str) -> ParseResult<Option<i64>> {
        match self.attr(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| ParseError::InvalidAttr {
                element: self.name.clone(),
                attr: name.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn require_int_attr(&self, name: &str) -> ParseResult<i64> {
        let raw = self.require_attr(name)?;
        raw.parse::<i64>().map_err(|_| ParseError::InvalidAttr {
            element: self.name.clone(),
            attr: name.to_string(),
            value: raw.to_string(),
        })
    }

    fn opt_string(&self, name: &str) -> Option<String> {
        self.attr(name).map(|s| s.to_string())
    }
}

/// Read the whole event stream into one element tree.
fn read_tree(xml: &str) -> ParseResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                // quick-xml validates start/end pairing, so the stack is
                // never empty here for well-formed input.
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(ParseError::Empty)
}

fn element_from(start: &BytesStart<'_>) -> ParseResult<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element { name, attrs, ..Element::default() })
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn parse_analysis(el: &Element) -> ParseResult<Analysis> {
    let metadata = parse_metadata(el.require_child("metadata")?)?;

    let mut results = Vec::new();
    if let Some(results_el) = el.child("results") {
        for child in &results_el.children {
            results.push(parse_finding(child)?);
        }
    }

    let customfields = el.child("custom-fields").map(parse_customfields).transpose()?;

    Ok(Analysis::new(metadata, results).with_customfields(customfields))
}

fn parse_metadata(el: &Element) -> ParseResult<Metadata> {
    let generator_el = el.require_child("generator")?;
    let generator =
        Generator::new(generator_el.require_attr("name")?, generator_el.opt_string("version"));

    let sut = el.child("sut").map(parse_sut).transpose()?;
    let file = el.child("file").map(parse_file).transpose()?;
    let stats = el.child("stats").map(parse_stats).transpose()?;

    Ok(Metadata::new(generator, sut, file, stats))
}

/// `<sut>` wraps exactly one variant element; the element name is the
/// variant tag.
fn parse_sut(el: &Element) -> ParseResult<Sut> {
    let inner = el.children.first().ok_or_else(|| ParseError::MissingElement {
        parent: el.name.clone(),
        child: "source-rpm | debian-binary | debian-source".to_string(),
    })?;

    let name = inner.require_attr("name")?.to_string();
    let version = inner.require_attr("version")?.to_string();
    let release = inner.opt_string("release");
    let buildarch = inner.opt_string("build-arch");

    match inner.name.as_str() {
        "source-rpm" => Ok(Sut::source_rpm(name, version, release, buildarch)),
        "debian-binary" => Ok(Sut::debian_binary(name, version, release, buildarch)),
        "debian-source" => Ok(Sut::debian_source(name, version, release)),
        _ => Err(ParseError::UnknownElement {
            parent: el.name.clone(),
            found: inner.name.clone(),
        }),
    }
}

fn parse_stats(el: &Element) -> ParseResult<Stats> {
    let raw = el.require_attr("wall-clock-time")?;
    let wallclocktime = raw.parse::<f64>().map_err(|_| ParseError::InvalidAttr {
        element: el.name.clone(),
        attr: "wall-clock-time".to_string(),
        value: raw.to_string(),
    })?;
    Ok(Stats::new(wallclocktime))
}

fn parse_finding(el: &Element) -> ParseResult<Finding> {
    match el.name.as_str() {
        "issue" => Ok(Finding::Issue(parse_issue(el)?)),
        "failure" => Ok(Finding::Failure(parse_failure(el)?)),
        "info" => Ok(Finding::Info(parse_info(el)?)),
        _ => Err(ParseError::UnknownElement {
            parent: "results".to_string(),
            found: el.name.clone(),
        }),
    }
}

fn parse_issue(el: &Element) -> ParseResult<Issue> {
    Ok(Issue {
        id: String::new(),
        cwe: el.int_attr("cwe")?,
        testid: el.opt_string("test-id"),
        severity: el.opt_string("severity"),
        message: parse_message(el.require_child("message")?),
        notes: el.child("notes").map(parse_notes),
        location: parse_location(el.require_child("location")?)?,
        trace: el.child("trace").map(parse_trace).transpose()?,
        customfields: el.child("custom-fields").map(parse_customfields).transpose()?,
    })
}

fn parse_failure(el: &Element) -> ParseResult<Failure> {
    Ok(Failure {
        id: String::new(),
        failureid: el.opt_string("failure-id"),
        location: el.child("location").map(parse_location).transpose()?,
        message: el.child("message").map(parse_message),
        customfields: el.child("custom-fields").map(parse_customfields).transpose()?,
    })
}

fn parse_info(el: &Element) -> ParseResult<Info> {
    Ok(Info {
        id: String::new(),
        infoid: el.opt_string("info-id"),
        location: el.child("location").map(parse_location).transpose()?,
        message: el.child("message").map(parse_message),
        customfields: el.child("custom-fields").map(parse_customfields).transpose()?,
    })
}

fn parse_message(el: &Element) -> Message {
    Message::new(el.text.clone())
}

fn parse_notes(el: &Element) -> Notes {
    Notes::new(el.text.clone())
}

fn parse_trace(el: &Element) -> ParseResult<Trace> {
    let mut states = Vec::new();
    for state_el in el.children_named("state") {
        states.push(State::new(
            parse_location(state_el.require_child("location")?)?,
            state_el.child("notes").map(parse_notes),
        ));
    }
    Ok(Trace::new(states))
}

fn parse_location(el: &Element) -> ParseResult<Location> {
    let file = parse_file(el.require_child("file")?)?;
    let function =
        el.child("function").map(|f| f.require_attr("name").map(Function::new)).transpose()?;
    let point = el.child("point").map(parse_point).transpose()?;
    let range = el.child("range").map(parse_range).transpose()?;
    Ok(Location::new(file, function, point, range))
}

fn parse_file(el: &Element) -> ParseResult<File> {
    let hash = el
        .child("hash")
        .map(|h| -> ParseResult<Checksum> {
            Ok(Checksum::new(h.require_attr("alg")?, h.require_attr("hexdigest")?))
        })
        .transpose()?;
    Ok(File::new(el.require_attr("given-path")?, el.opt_string("absolute-path"), hash))
}

fn parse_point(el: &Element) -> ParseResult<Point> {
    Ok(Point::new(el.require_int_attr("line")?, el.require_int_attr("column")?))
}

/// `<range>` holds exactly two `<point>` children: start, then end.
fn parse_range(el: &Element) -> ParseResult<Range> {
    let mut points = el.children_named("point");
    let start = points.next().ok_or_else(|| ParseError::MissingElement {
        parent: el.name.clone(),
        child: "point".to_string(),
    })?;
    let end = points.next().ok_or_else(|| ParseError::MissingElement {
        parent: el.name.clone(),
        child: "point".to_string(),
    })?;
    Ok(Range::new(parse_point(start)?, parse_point(end)?))
}

/// `<int-field>` and `<str-field>` carry the name as an attribute and the
/// value as text content, in document order.
fn parse_customfields(el: &Element) -> ParseResult<CustomFields> {
    let mut fields = Vec::new();
    for child in &el.children {
        match child.name.as_str() {
            "int-field" => {
                let raw = child.text.trim();
                let value = raw.parse::<i64>().map_err(|_| ParseError::InvalidAttr {
                    element: child.name.clone(),
                    attr: "value".to_string(),
                    value: raw.to_string(),
                })?;
                fields.push(CustomField::int(child.require_attr("name")?, value));
            }
            "str-field" => {
                fields.push(CustomField::str(child.require_attr("name")?, child.text.clone()));
            }
            _ => {
                return Err(ParseError::UnknownElement {
                    parent: el.name.clone(),
                    found: child.name.clone(),
                })
            }
        }
    }
    Ok(CustomFields::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_tree_preserves_attrs_and_nesting() {
        let tree = read_tree(r#"<a x="1"><b/><c y="2">hi</c></a>"#).expect("tree");
        assert_eq!(tree.name, "a");
        assert_eq!(tree.attr("x"), Some("1"));
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[1].attr("y"), Some("2"));
        assert_eq!(tree.children[1].text, "hi");
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        assert!(matches!(read_tree(""), Err(ParseError::Empty)));
        assert!(matches!(read_tree("   \n  "), Err(ParseError::Empty)));
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = parse_report("<report/>").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedRoot { .. }));
    }
}
