//! Document model for one static-analysis report.
//!
//! A report is a tree rooted at [`Analysis`]. Every composite node carries
//! an `id`: its content hash, assigned bottom-up by [`crate::hash`]. The
//! `id` starts empty and is a pure function of the subtree's content once
//! assigned.
//!
//! The order in which a node's attributes are enumerated is part of the
//! content-hash contract. It is fixed per type and documented on each
//! struct; [`crate::hash`] and [`crate::unique`] both follow it. Changing
//! an order changes every stored content id, so treat these as wire
//! format.
//!
//! The two polymorphic hierarchies of the report format (system-under-test
//! and finding) are closed tagged variants: [`SutKind`] and [`Finding`].

use serde::{Deserialize, Serialize};

/// Content id of a tree node: a hex digest string.
///
/// Empty until the hash engine has run over the tree.
pub type NodeId = String;

/// Root of a report tree: one run of one analysis tool.
///
/// Attribute order: `metadata`, `results`, `customfields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: NodeId,
    pub metadata: Metadata,
    pub results: Vec<Finding>,
    pub customfields: Option<CustomFields>,
}

impl Analysis {
    pub fn new(metadata: Metadata, results: Vec<Finding>) -> Self {
        Self { id: NodeId::new(), metadata, results, customfields: None }
    }

    pub fn with_customfields(mut self, customfields: Option<CustomFields>) -> Self {
        self.customfields = customfields;
        self
    }
}

/// Run metadata: the generating tool plus what it was pointed at.
///
/// Attribute order: `generator`, `sut`, `file`, `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: NodeId,
    pub generator: Generator,
    /// System under test (package-level), if the tool reported one.
    pub sut: Option<Sut>,
    /// Single file under test, for tools run against one file.
    pub file: Option<File>,
    pub stats: Option<Stats>,
}

impl Metadata {
    pub fn new(generator: Generator, sut: Option<Sut>, file: Option<File>, stats: Option<Stats>) -> Self {
        Self { id: NodeId::new(), generator, sut, file, stats }
    }
}

/// The analysis tool that produced the report.
///
/// Attribute order: `name`, `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub id: NodeId,
    pub name: String,
    pub version: Option<String>,
}

impl Generator {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self { id: NodeId::new(), name: name.into(), version }
    }
}

/// Variant tag for the system-under-test hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SutKind {
    SourceRpm,
    DebianBinary,
    DebianSource,
}

impl SutKind {
    /// Stable tag string, used both on the wire and as the storage
    /// discriminator column.
    pub fn as_str(self) -> &'static str {
        match self {
            SutKind::SourceRpm => "source-rpm",
            SutKind::DebianBinary => "debian-binary",
            SutKind::DebianSource => "debian-source",
        }
    }
}

/// System under test: the package the tool analysed.
///
/// One flat struct for the whole hierarchy; the variants share every
/// column and differ only in which are meaningful (`DebianSource` carries
/// no buildarch, enforced by the constructors).
///
/// Attribute order: `name`, `version`, `release`, `buildarch`, with the
/// kind tag folded into the content hash ahead of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sut {
    pub id: NodeId,
    pub kind: SutKind,
    pub name: String,
    pub version: String,
    pub release: Option<String>,
    pub buildarch: Option<String>,
}

impl Sut {
    pub fn source_rpm(
        name: impl Into<String>,
        version: impl Into<String>,
        release: Option<String>,
        buildarch: Option<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind: SutKind::SourceRpm,
            name: name.into(),
            version: version.into(),
            release,
            buildarch,
        }
    }

    pub fn debian_binary(
        name: impl Into<String>,
        version: impl Into<String>,
        release: Option<String>,
        buildarch: Option<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind: SutKind::DebianBinary,
            name: name.into(),
            version: version.into(),
            release,
            buildarch,
        }
    }

    pub fn debian_source(
        name: impl Into<String>,
        version: impl Into<String>,
        release: Option<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind: SutKind::DebianSource,
            name: name.into(),
            version: version.into(),
            release,
            buildarch: None,
        }
    }
}

/// Tool run statistics.
///
/// Attribute order: `wallclocktime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub id: NodeId,
    pub wallclocktime: f64,
}

impl Stats {
    pub fn new(wallclocktime: f64) -> Self {
        Self { id: NodeId::new(), wallclocktime }
    }
}

/// One finding reported by the tool.
///
/// The report format calls this hierarchy "result"; renamed here to avoid
/// the `std::result::Result` clash. Closed variant set, discriminated in
/// storage by a `kind` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finding {
    Issue(Issue),
    Failure(Failure),
    Info(Info),
}

impl Finding {
    /// Stable tag string, used in the content hash and as the storage
    /// discriminator column.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Finding::Issue(_) => "issue",
            Finding::Failure(_) => "failure",
            Finding::Info(_) => "info",
        }
    }

    /// Content id of the underlying variant.
    pub fn id(&self) -> &NodeId {
        match self {
            Finding::Issue(issue) => &issue.id,
            Finding::Failure(failure) => &failure.id,
            Finding::Info(info) => &info.id,
        }
    }
}

/// A code defect reported at a source location.
///
/// Attribute order: `cwe`, `testid`, `severity`, `message`, `notes`,
/// `location`, `trace`, `customfields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: NodeId,
    /// CWE number, without the "CWE-" prefix.
    pub cwe: Option<i64>,
    /// Tool-specific check identifier.
    pub testid: Option<String>,
    pub severity: Option<String>,
    pub message: Message,
    pub notes: Option<Notes>,
    pub location: Location,
    pub trace: Option<Trace>,
    pub customfields: Option<CustomFields>,
}

/// The tool itself failed while analysing.
///
/// Attribute order: `failureid`, `location`, `message`, `customfields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub id: NodeId,
    pub failureid: Option<String>,
    pub location: Option<Location>,
    pub message: Option<Message>,
    pub customfields: Option<CustomFields>,
}

/// Informational record, not a defect.
///
/// Attribute order: `infoid`, `location`, `message`, `customfields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub id: NodeId,
    pub infoid: Option<String>,
    pub location: Option<Location>,
    pub message: Option<Message>,
    pub customfields: Option<CustomFields>,
}

/// Human-readable finding text. Attribute order: `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: NodeId,
    pub text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { id: NodeId::new(), text: text.into() }
    }
}

/// Free-form notes attached to a finding or state. Attribute order: `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notes {
    pub id: NodeId,
    pub text: String,
}

impl Notes {
    pub fn new(text: impl Into<String>) -> Self {
        Self { id: NodeId::new(), text: text.into() }
    }
}

/// Execution trace: an ordered list of states. Order is preserved through
/// hashing and storage, never deduplicated by reordering.
///
/// Attribute order: `states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: NodeId,
    pub states: Vec<State>,
}

impl Trace {
    pub fn new(states: Vec<State>) -> Self {
        Self { id: NodeId::new(), states }
    }
}

/// One step of an execution trace.
///
/// Attribute order: `location`, `notes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: NodeId,
    pub location: Location,
    pub notes: Option<Notes>,
}

impl State {
    pub fn new(location: Location, notes: Option<Notes>) -> Self {
        Self { id: NodeId::new(), location, notes }
    }
}

/// Source location of a finding: a file, optionally a function within it,
/// and either a point or a range.
///
/// Attribute order: `file`, `function`, `point`, `range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: NodeId,
    pub file: File,
    pub function: Option<Function>,
    pub point: Option<Point>,
    pub range: Option<Range>,
}

impl Location {
    pub fn new(
        file: File,
        function: Option<Function>,
        point: Option<Point>,
        range: Option<Range>,
    ) -> Self {
        Self { id: NodeId::new(), file, function, point, range }
    }
}

/// A source file, as named by the tool.
///
/// Attribute order: `givenpath`, `abspath`, `hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: NodeId,
    /// Path as given in the tool invocation.
    pub givenpath: String,
    /// Absolute path, if the tool resolved one.
    pub abspath: Option<String>,
    /// Checksum of the file contents, if reported.
    pub hash: Option<Checksum>,
}

impl File {
    pub fn new(givenpath: impl Into<String>, abspath: Option<String>, hash: Option<Checksum>) -> Self {
        Self { id: NodeId::new(), givenpath: givenpath.into(), abspath, hash }
    }
}

/// Checksum record for a file (the report format calls this "hash";
/// renamed to stay out of the way of the content-hash vocabulary).
///
/// Attribute order: `alg`, `hexdigest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checksum {
    pub id: NodeId,
    pub alg: String,
    pub hexdigest: String,
}

impl Checksum {
    pub fn new(alg: impl Into<String>, hexdigest: impl Into<String>) -> Self {
        Self { id: NodeId::new(), alg: alg.into(), hexdigest: hexdigest.into() }
    }
}

/// A named function within a file. Attribute order: `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: NodeId,
    pub name: String,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: NodeId::new(), name: name.into() }
    }
}

/// A single source position. Attribute order: `line`, `column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: NodeId,
    pub line: i64,
    pub column: i64,
}

impl Point {
    pub fn new(line: i64, column: i64) -> Self {
        Self { id: NodeId::new(), line, column }
    }
}

/// A span between two points, inclusive. Attribute order: `start`, `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub id: NodeId,
    pub start: Point,
    pub end: Point,
}

impl Range {
    pub fn new(start: Point, end: Point) -> Self {
        Self { id: NodeId::new(), start, end }
    }
}

/// Ordered bag of tool-specific key/value fields.
///
/// Attribute order: `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFields {
    pub id: NodeId,
    pub fields: Vec<CustomField>,
}

impl CustomFields {
    pub fn new(fields: Vec<CustomField>) -> Self {
        Self { id: NodeId::new(), fields }
    }
}

/// One custom field. Attribute order: `name`, `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: NodeId,
    pub name: String,
    pub value: FieldValue,
}

impl CustomField {
    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self { id: NodeId::new(), name: name.into(), value: FieldValue::Int(value) }
    }

    pub fn str(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { id: NodeId::new(), name: name.into(), value: FieldValue::Str(value.into()) }
    }
}

/// Typed value of a custom field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Int(i64),
    Str(String),
}
