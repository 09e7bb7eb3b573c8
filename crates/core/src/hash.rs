//! Content-hash engine: deterministic, recursive id assignment.
//!
//! Every composite node's id is the SHA-256 (hex) of the concatenation of
//! one `"<attr_name> <child_id> "` token per attribute, in the fixed order
//! documented on each [`crate::model`] type. List attributes contribute
//! one token per element under the same attribute name, so list order is
//! part of the hash. Leaves hash as `str_hash` of their canonical string
//! form; an absent optional hashes as `str_hash("")`.
//!
//! Two structurally identical subtrees therefore always share an id,
//! regardless of when or where they were built. The engine walks bottom-up
//! and fills `id` in place; callers should treat [`Idify::idify`] as
//! consuming the un-annotated tree.

use std::fmt::Display;

use sha2::{Digest, Sha256};

use crate::model::{
    Analysis, Checksum, CustomField, CustomFields, Failure, FieldValue, File, Finding, Function,
    Generator, Info, Issue, Location, Message, Metadata, NodeId, Notes, Point, Range, State,
    Stats, Sut, Trace,
};

/// Hex SHA-256 of a string's UTF-8 bytes.
///
/// Single choke point for the digest algorithm; everything in the hash
/// chain goes through here.
pub fn str_hash(s: &str) -> NodeId {
    format!("{:x}", Sha256::digest(s.as_bytes()))
}

/// Hash of the absent value: `str_hash("")`.
pub fn null_hash() -> NodeId {
    str_hash("")
}

/// Bottom-up content id assignment.
///
/// Fills `self.id` for this node and every descendant, and returns this
/// node's id.
pub trait Idify {
    fn idify(&mut self) -> NodeId;
}

/// Accumulates `"<attr_name> <id> "` tokens for one composite node.
///
/// Leaf values are stringified with `Display`; for integers that is the
/// plain decimal form and for `f64` the shortest round-trip decimal form,
/// which is the canonical numeric format of the hash contract.
struct TokenStream {
    buf: String,
}

impl TokenStream {
    fn new() -> Self {
        Self { buf: String::new() }
    }

    fn token(&mut self, name: &str, id: &str) {
        self.buf.push_str(name);
        self.buf.push(' ');
        self.buf.push_str(id);
        self.buf.push(' ');
    }

    fn leaf<T: Display>(&mut self, name: &str, value: &T) {
        self.token(name, &str_hash(&value.to_string()));
    }

    fn opt_leaf<T: Display>(&mut self, name: &str, value: Option<&T>) {
        match value {
            Some(v) => self.leaf(name, v),
            None => self.token(name, &null_hash()),
        }
    }

    fn child<C: Idify>(&mut self, name: &str, child: &mut C) {
        let id = child.idify();
        self.token(name, &id);
    }

    fn opt_child<C: Idify>(&mut self, name: &str, child: Option<&mut C>) {
        match child {
            Some(c) => self.child(name, c),
            None => self.token(name, &null_hash()),
        }
    }

    /// One token per element, same attribute name repeated. An empty list
    /// contributes nothing, which keeps it distinct from a null child only
    /// through the surrounding attributes.
    fn list<C: Idify>(&mut self, name: &str, children: &mut [C]) {
        for child in children {
            self.child(name, child);
        }
    }

    fn finish(self) -> NodeId {
        str_hash(&self.buf)
    }
}

impl Idify for Analysis {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.child("metadata", &mut self.metadata);
        ts.list("results", &mut self.results);
        ts.opt_child("customfields", self.customfields.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Metadata {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.child("generator", &mut self.generator);
        ts.opt_child("sut", self.sut.as_mut());
        ts.opt_child("file", self.file.as_mut());
        ts.opt_child("stats", self.stats.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Generator {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("name", &self.name);
        ts.opt_leaf("version", self.version.as_ref());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Sut {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        // The variants share one attribute list, so the kind tag has to
        // participate in the hash or two different variants with equal
        // fields would collide to one id.
        ts.leaf("type", &self.kind.as_str());
        ts.leaf("name", &self.name);
        ts.leaf("version", &self.version);
        ts.opt_leaf("release", self.release.as_ref());
        ts.opt_leaf("buildarch", self.buildarch.as_ref());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Stats {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("wallclocktime", &self.wallclocktime);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Finding {
    fn idify(&mut self) -> NodeId {
        match self {
            Finding::Issue(issue) => issue.idify(),
            Finding::Failure(failure) => failure.idify(),
            Finding::Info(info) => info.idify(),
        }
    }
}

impl Idify for Issue {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("type", &"issue");
        ts.opt_leaf("cwe", self.cwe.as_ref());
        ts.opt_leaf("testid", self.testid.as_ref());
        ts.opt_leaf("severity", self.severity.as_ref());
        ts.child("message", &mut self.message);
        ts.opt_child("notes", self.notes.as_mut());
        ts.child("location", &mut self.location);
        ts.opt_child("trace", self.trace.as_mut());
        ts.opt_child("customfields", self.customfields.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Failure {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("type", &"failure");
        ts.opt_leaf("failureid", self.failureid.as_ref());
        ts.opt_child("location", self.location.as_mut());
        ts.opt_child("message", self.message.as_mut());
        ts.opt_child("customfields", self.customfields.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Info {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("type", &"info");
        ts.opt_leaf("infoid", self.infoid.as_ref());
        ts.opt_child("location", self.location.as_mut());
        ts.opt_child("message", self.message.as_mut());
        ts.opt_child("customfields", self.customfields.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Message {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("text", &self.text);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Notes {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("text", &self.text);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Trace {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.list("states", &mut self.states);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for State {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.child("location", &mut self.location);
        ts.opt_child("notes", self.notes.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Location {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.child("file", &mut self.file);
        ts.opt_child("function", self.function.as_mut());
        ts.opt_child("point", self.point.as_mut());
        ts.opt_child("range", self.range.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for File {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("givenpath", &self.givenpath);
        ts.opt_leaf("abspath", self.abspath.as_ref());
        ts.opt_child("hash", self.hash.as_mut());
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Checksum {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("alg", &self.alg);
        ts.leaf("hexdigest", &self.hexdigest);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Function {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("name", &self.name);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Point {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("line", &self.line);
        ts.leaf("column", &self.column);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for Range {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.child("start", &mut self.start);
        ts.child("end", &mut self.end);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for CustomFields {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.list("fields", &mut self.fields);
        self.id = ts.finish();
        self.id.clone()
    }
}

impl Idify for CustomField {
    fn idify(&mut self) -> NodeId {
        let mut ts = TokenStream::new();
        ts.leaf("name", &self.name);
        match &self.value {
            FieldValue::Int(v) => ts.leaf("value", v),
            FieldValue::Str(v) => ts.leaf("value", v),
        }
        self.id = ts.finish();
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_hash_of_empty_is_the_well_known_sha256() {
        assert_eq!(
            str_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(null_hash(), str_hash(""));
    }

    #[test]
    fn generator_hash_matches_the_token_layout() {
        let mut generator = Generator::new("cppcheck", Some("1.0".to_string()));
        let id = generator.idify();

        let expected = str_hash(&format!(
            "name {} version {} ",
            str_hash("cppcheck"),
            str_hash("1.0")
        ));
        assert_eq!(id, expected);
        assert_eq!(generator.id, expected);
    }

    #[test]
    fn missing_version_hashes_as_empty_string() {
        let mut generator = Generator::new("cppcheck", None);
        let id = generator.idify();

        let expected =
            str_hash(&format!("name {} version {} ", str_hash("cppcheck"), null_hash()));
        assert_eq!(id, expected);
    }

    #[test]
    fn sut_variants_with_equal_fields_do_not_collide() {
        let mut rpm = Sut::source_rpm("pkg", "1.0", None, None);
        let mut deb = Sut::debian_binary("pkg", "1.0", None, None);
        assert_ne!(rpm.idify(), deb.idify());
    }

    #[test]
    fn point_hash_uses_decimal_leaf_form() {
        let mut point = Point::new(10, 5);
        let id = point.idify();

        let expected =
            str_hash(&format!("line {} column {} ", str_hash("10"), str_hash("5")));
        assert_eq!(id, expected);
    }
}
