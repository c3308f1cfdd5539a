//! Manifest parsing.
//!
//! Turns source file records into typed domain objects. Every rejected
//! document becomes an [`InvalidObject`] carrying the reason; parsing never
//! fails as a whole.

use platform_org::{ApiVersion, ObjectKind, Project, RoleBinding};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ReconcileError;

/// A file handed over by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path the file was read from
    pub path: PathBuf,

    /// Raw file contents
    pub contents: Vec<u8>,

    /// Whether discovery selected this file for processing
    pub is_target: bool,

    /// Why the file could not be read, if it could not
    pub read_error: Option<String>,
}

impl SourceFile {
    /// A readable target file.
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            is_target: true,
            read_error: None,
        }
    }

    /// A target file that could not be read.
    pub fn unreadable(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: Vec::new(),
            is_target: true,
            read_error: Some(error.into()),
        }
    }

    /// Mark the file as not selected for processing.
    pub fn skipped(mut self) -> Self {
        self.is_target = false;
        self
    }
}

/// A typed declarative object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainObject {
    /// A project
    Project(Project),
    /// A role binding
    RoleBinding(RoleBinding),
}

impl DomainObject {
    /// The object kind.
    pub fn kind(&self) -> ObjectKind {
        match self {
            DomainObject::Project(_) => ObjectKind::Project,
            DomainObject::RoleBinding(_) => ObjectKind::RoleBinding,
        }
    }

    /// The object name.
    pub fn name(&self) -> &str {
        match self {
            DomainObject::Project(p) => p.name(),
            DomainObject::RoleBinding(rb) => rb.name(),
        }
    }
}

/// A successfully decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedObject {
    /// Decoded object
    pub object: DomainObject,

    /// File the document came from
    pub source: PathBuf,

    /// Zero-based position of the document within the file
    pub document_index: usize,

    /// Declared API version
    pub api_version: ApiVersion,
}

impl ParsedObject {
    /// The object kind.
    pub fn kind(&self) -> ObjectKind {
        self.object.kind()
    }
}

/// A rejected document.
#[derive(Debug)]
pub struct InvalidObject {
    /// File the document came from
    pub source: PathBuf,

    /// Position within the file, when the failure is tied to a document
    pub document_index: Option<usize>,

    /// Document text, when it could be decoded as YAML
    pub raw: Option<String>,

    /// Why the document was rejected
    pub error: ReconcileError,
}

/// Everything parsed from a set of files.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Decoded objects in file and document order
    pub objects: Vec<ParsedObject>,

    /// Rejected documents in file and document order
    pub invalid: Vec<InvalidObject>,
}

impl ParseOutcome {
    fn reject(
        &mut self,
        source: &Path,
        document_index: Option<usize>,
        raw: Option<String>,
        message: impl Into<String>,
    ) {
        let error = ReconcileError::parse(source.display(), message);
        warn!(
            path = %source.display(),
            document = ?document_index,
            error = %error,
            "Rejected manifest document"
        );
        self.invalid.push(InvalidObject {
            source: source.to_path_buf(),
            document_index,
            raw,
            error,
        });
    }

    fn merge(&mut self, other: ParseOutcome) {
        self.objects.extend(other.objects);
        self.invalid.extend(other.invalid);
    }
}

/// Parse a batch of files in order.
pub fn parse_files(files: &[SourceFile]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for file in files {
        outcome.merge(parse_file(file));
    }
    outcome
}

/// Parse a single file.
///
/// Files with a read error yield one invalid object without decoding.
/// Non-target files are skipped. A YAML syntax error rejects the rest of
/// the file, since the document boundaries after it cannot be trusted.
pub fn parse_file(file: &SourceFile) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let path = file.path.as_path();

    if let Some(ref reason) = file.read_error {
        outcome.reject(path, None, None, format!("could not read file: {}", reason));
        return outcome;
    }

    if !file.is_target {
        debug!(path = %path.display(), "Skipping non-target file");
        return outcome;
    }

    let text = match std::str::from_utf8(&file.contents) {
        Ok(text) => text,
        Err(e) => {
            outcome.reject(path, None, None, format!("file is not valid UTF-8: {}", e));
            return outcome;
        }
    };

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = match Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                outcome.reject(path, Some(index), None, format!("invalid YAML: {}", e));
                break;
            }
        };

        if value.is_null() {
            continue;
        }

        match decode(value) {
            Ok((object, api_version)) => {
                debug!(
                    path = %path.display(),
                    document = index,
                    kind = %object.kind(),
                    name = object.name(),
                    "Parsed manifest"
                );
                outcome.objects.push(ParsedObject {
                    object,
                    source: path.to_path_buf(),
                    document_index: index,
                    api_version,
                });
            }
            Err((raw, message)) => outcome.reject(path, Some(index), raw, message),
        }
    }

    outcome
}

/// Decode one YAML document into a domain object.
///
/// On failure returns the document text (when it can be rendered) and the
/// reason.
fn decode(value: Value) -> Result<(DomainObject, ApiVersion), (Option<String>, String)> {
    let raw = serde_yaml::to_string(&value).ok();

    if !value.is_mapping() {
        return Err((raw, "document is not a mapping".to_string()));
    }

    let api_version = match value.get("apiVersion").and_then(Value::as_str) {
        Some(s) => match ApiVersion::parse(s) {
            Some(v) => v,
            None => return Err((raw, format!("unsupported apiVersion '{}'", s))),
        },
        None => return Err((raw, "missing apiVersion".to_string())),
    };

    let kind = match value.get("kind").and_then(Value::as_str) {
        Some(s) => match ObjectKind::parse(s) {
            Some(k) => k,
            None => return Err((raw, format!("unsupported kind '{}'", s))),
        },
        None => return Err((raw, "missing kind".to_string())),
    };

    let object = match kind {
        ObjectKind::Project => serde_yaml::from_value(value).map(DomainObject::Project),
        ObjectKind::RoleBinding => serde_yaml::from_value(value).map(DomainObject::RoleBinding),
    };

    match object {
        Ok(object) => Ok((object, api_version)),
        Err(e) => Err((raw, format!("invalid {}: {}", kind, e))),
    }
}
