//! Schema resolution.
//!
//! Loads a root `.proto` file and every file it transitively imports from an
//! ordered list of search directories, builds the immutable [`SchemaGraph`],
//! and resolves one message type in it.
//!
//! Resolution runs in two passes. The import pass locates each file across
//! the search directories and walks its `import` statements, so missing
//! files and import cycles are reported precisely. The parse pass then hands
//! the located root to `protobuf_parse` with the same search directories as
//! include paths and converts the typechecked descriptors into our graph.

use kafka_types::{
    EnumDescriptor, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind, SchemaError,
    SchemaFile, SchemaGraph,
};
use protobuf::descriptor::field_descriptor_proto::{Label, Type};
use protobuf::descriptor::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};
use protobuf_parse::Parser;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Imports under this prefix may be served by the parser's bundled copies.
const WELL_KNOWN_PREFIX: &str = "google/protobuf/";

/// A message type resolved once at startup, together with the graph that
/// owns it. Cloning shares both.
#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    graph: Arc<SchemaGraph>,
    descriptor: Arc<MessageDescriptor>,
}

impl ResolvedMessage {
    pub fn graph(&self) -> &Arc<SchemaGraph> {
        &self.graph
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Resolves schema files against an ordered list of search directories.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    search_dirs: Vec<PathBuf>,
}

impl SchemaResolver {
    pub fn new<I, P>(search_dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_dirs: search_dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Load `root_file` and its imports, then look up `type_name`.
    pub fn resolve(&self, root_file: &str, type_name: &str) -> Result<ResolvedMessage, SchemaError> {
        let graph = Arc::new(self.load(root_file)?);
        let descriptor = find_message(&graph, type_name)?;
        debug!(
            "Resolved message type {} with {} fields",
            descriptor.name,
            descriptor.fields.len()
        );
        Ok(ResolvedMessage { graph, descriptor })
    }

    /// Build the schema graph rooted at `root_file`.
    pub fn load(&self, root_file: &str) -> Result<SchemaGraph, SchemaError> {
        let root_file = normalize_logical(root_file);
        let mut located = BTreeMap::new();
        let mut stack = Vec::new();
        self.collect_imports(&root_file, &mut stack, &mut located)?;

        let root_path = located
            .get(&root_file)
            .cloned()
            .ok_or_else(|| self.not_found(&root_file))?;

        let mut parser = Parser::new();
        parser.pure();
        for dir in &self.search_dirs {
            parser.include(dir);
        }
        parser.input(&root_path);

        let parsed = parser
            .parse_and_typecheck()
            .map_err(|e| syntax_error(&format!("{e:#}"), &root_file, located.keys()))?;

        let mut descriptors = parsed.file_descriptors;
        add_missing_well_known(&mut descriptors);

        let graph = build_graph(&descriptors)?;
        debug!(
            "Loaded {} schema files with {} message types",
            graph.files().count(),
            graph.list_messages().len()
        );
        Ok(graph)
    }

    /// Depth-first walk over `import` statements. `stack` holds the current
    /// import chain; `located` collects every file found on disk.
    fn collect_imports(
        &self,
        logical: &str,
        stack: &mut Vec<String>,
        located: &mut BTreeMap<String, PathBuf>,
    ) -> Result<(), SchemaError> {
        if let Some(start) = stack.iter().position(|p| p == logical) {
            let mut chain = stack[start..].to_vec();
            chain.push(logical.to_string());
            return Err(SchemaError::ImportCycle { chain });
        }
        if located.contains_key(logical) {
            return Ok(());
        }

        let path = match self.locate(logical) {
            Some(path) => path,
            None if logical.starts_with(WELL_KNOWN_PREFIX) => {
                debug!("Using bundled definition for {logical}");
                return Ok(());
            }
            None => return Err(self.not_found(logical)),
        };

        let source = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
            path: path.clone(),
            source,
        })?;

        stack.push(logical.to_string());
        for import in scan_imports(&source) {
            self.collect_imports(&normalize_logical(&import), stack, located)?;
        }
        stack.pop();

        located.insert(logical.to_string(), path);
        Ok(())
    }

    /// First search directory containing `logical`.
    fn locate(&self, logical: &str) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(logical))
            .find(|candidate| candidate.is_file())
    }

    fn not_found(&self, logical: &str) -> SchemaError {
        SchemaError::FileNotFound {
            path: logical.to_string(),
            search_dirs: self.search_dirs.clone(),
        }
    }
}

fn normalize_logical(path: &str) -> String {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract the target of every `import` statement, skipping comments and
/// string contents elsewhere in the file. Malformed imports are left for the
/// parser to report.
pub(crate) fn scan_imports(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    let mut imports = Vec::new();

    for statement in stripped.split([';', '{', '}']) {
        let mut rest = statement.trim_start();
        match rest.strip_prefix("import") {
            Some(after) if after.starts_with(char::is_whitespace) || after.starts_with(['"', '\'']) => {
                rest = after.trim_start();
            }
            _ => continue,
        }
        for modifier in ["public", "weak"] {
            if let Some(after) = rest.strip_prefix(modifier) {
                if after.starts_with(char::is_whitespace) || after.starts_with(['"', '\'']) {
                    rest = after.trim_start();
                }
            }
        }
        let rest = rest.trim_end();
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => continue,
        };
        if rest.len() >= 2 && rest.ends_with(quote) {
            imports.push(rest[1..rest.len() - 1].to_string());
        }
    }

    imports
}

/// Replace comments with whitespace, leaving string literals intact so a
/// `//` inside a quoted path is not mistaken for a comment.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Turn a parser failure into a syntax error, attributing it to the first
/// known file the message mentions and pulling out a `line:col` location
/// when present.
fn syntax_error<'a>(
    message: &str,
    root_file: &str,
    known_files: impl Iterator<Item = &'a String>,
) -> SchemaError {
    let file = known_files
        .filter(|f| message.contains(f.as_str()))
        .max_by_key(|f| f.len())
        .cloned()
        .unwrap_or_else(|| root_file.to_string());
    SchemaError::Syntax {
        file,
        line: extract_line(message),
        message: message.to_string(),
    }
}

/// Find the first `<line>:<col>` pair in a parser message.
fn extract_line(message: &str) -> Option<u32> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric()) {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < bytes.len() && bytes[i] == b':' && bytes[i + 1].is_ascii_digit() {
                return message[start..i].parse().ok();
            }
        }
        i += 1;
    }
    None
}

/// Append bundled well-known files that some file depends on but the parser
/// did not return.
fn add_missing_well_known(descriptors: &mut Vec<FileDescriptorProto>) {
    let present: HashSet<String> = descriptors.iter().filter_map(|f| f.name.clone()).collect();
    let wanted: Vec<String> = descriptors
        .iter()
        .flat_map(|f| f.dependency.iter())
        .filter(|d| d.starts_with(WELL_KNOWN_PREFIX) && !present.contains(*d))
        .cloned()
        .collect();

    for name in wanted {
        if descriptors.iter().any(|f| f.name.as_deref() == Some(name.as_str())) {
            continue;
        }
        match bundled_well_known(&name) {
            Some(file) => descriptors.push(file),
            None => warn!("No bundled definition for {name}"),
        }
    }
}

fn bundled_well_known(name: &str) -> Option<FileDescriptorProto> {
    use protobuf::well_known_types as wkt;

    let file = match name.strip_prefix(WELL_KNOWN_PREFIX)? {
        "any.proto" => wkt::any::file_descriptor(),
        "api.proto" => wkt::api::file_descriptor(),
        "duration.proto" => wkt::duration::file_descriptor(),
        "empty.proto" => wkt::empty::file_descriptor(),
        "field_mask.proto" => wkt::field_mask::file_descriptor(),
        "source_context.proto" => wkt::source_context::file_descriptor(),
        "struct.proto" => wkt::struct_::file_descriptor(),
        "timestamp.proto" => wkt::timestamp::file_descriptor(),
        "type.proto" => wkt::type_::file_descriptor(),
        "wrappers.proto" => wkt::wrappers::file_descriptor(),
        "descriptor.proto" => protobuf::descriptor::file_descriptor(),
        _ => return None,
    };
    Some(file.proto().clone())
}

/// Message collected during the walk, before map fields are marked.
struct PendingMessage {
    name: String,
    fields: Vec<FieldDescriptor>,
    is_map_entry: bool,
}

/// Convert typechecked file descriptors into the schema graph.
pub(crate) fn build_graph(descriptors: &[FileDescriptorProto]) -> Result<SchemaGraph, SchemaError> {
    let mut files = Vec::new();
    let mut pending = Vec::new();
    let mut enums = Vec::new();

    for file in descriptors {
        let path = file.name.clone().unwrap_or_default();
        let package = file.package.clone().filter(|p| !p.is_empty());
        let proto3 = file.syntax.as_deref() == Some("proto3");
        let scope = package.clone().unwrap_or_default();

        let first = pending.len();
        for message in &file.message_type {
            collect_message(&path, &scope, message, proto3, &mut pending, &mut enums)?;
        }
        for enum_type in &file.enum_type {
            enums.push(convert_enum(&scope, enum_type));
        }

        files.push(SchemaFile {
            path,
            package,
            imports: file.dependency.clone(),
            messages: pending[first..].iter().map(|m| m.name.clone()).collect(),
        });
    }

    let map_entries: HashSet<String> = pending
        .iter()
        .filter(|m| m.is_map_entry)
        .map(|m| m.name.clone())
        .collect();

    let messages: Vec<MessageDescriptor> = pending
        .into_iter()
        .map(|m| {
            let fields = m
                .fields
                .into_iter()
                .map(|mut field| {
                    field.is_map = field.is_repeated
                        && matches!(&field.kind, FieldKind::Message(target) if map_entries.contains(target));
                    field
                })
                .collect();
            MessageDescriptor::new(m.name, fields, m.is_map_entry)
        })
        .collect();

    let graph = SchemaGraph::new(files, messages, enums);
    check_references(&graph)?;
    Ok(graph)
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

fn collect_message(
    file: &str,
    scope: &str,
    message: &DescriptorProto,
    proto3: bool,
    pending: &mut Vec<PendingMessage>,
    enums: &mut Vec<EnumDescriptor>,
) -> Result<(), SchemaError> {
    let name = qualify(scope, message.name.as_deref().unwrap_or_default());
    let is_map_entry = message
        .options
        .as_ref()
        .and_then(|o| o.map_entry)
        .unwrap_or(false);

    let mut fields = Vec::new();
    for field in &message.field {
        let field_name = field.name.clone().unwrap_or_default();
        if field_name.is_empty() {
            continue;
        }
        let Some(kind) = convert_field_type(file, field)? else {
            warn!("Skipping group field {name}.{field_name}: groups are not supported");
            continue;
        };
        let is_repeated = field.label == Some(Label::LABEL_REPEATED.into());
        let is_packed = field
            .options
            .as_ref()
            .and_then(|o| o.packed)
            .unwrap_or(proto3 && is_repeated && kind.is_packable());

        fields.push(FieldDescriptor {
            name: field_name,
            number: field.number.unwrap_or(0) as u32,
            kind,
            is_repeated,
            is_map: false,
            is_packed,
        });
    }

    pending.push(PendingMessage {
        name: name.clone(),
        fields,
        is_map_entry,
    });

    for nested in &message.nested_type {
        collect_message(file, &name, nested, proto3, pending, enums)?;
    }
    for enum_type in &message.enum_type {
        enums.push(convert_enum(&name, enum_type));
    }
    Ok(())
}

fn convert_enum(scope: &str, enum_type: &protobuf::descriptor::EnumDescriptorProto) -> EnumDescriptor {
    EnumDescriptor {
        name: qualify(scope, enum_type.name.as_deref().unwrap_or_default()),
        values: enum_type
            .value
            .iter()
            .map(|v| (v.name.clone().unwrap_or_default(), v.number.unwrap_or(0)))
            .collect(),
    }
}

/// Map a descriptor field type. Returns `None` for groups.
fn convert_field_type(file: &str, field: &FieldDescriptorProto) -> Result<Option<FieldKind>, SchemaError> {
    let field_type = field
        .type_
        .ok_or_else(|| SchemaError::Syntax {
            file: file.to_string(),
            line: None,
            message: format!(
                "field {} is missing its type",
                field.name.as_deref().unwrap_or_default()
            ),
        })?
        .enum_value_or_default();

    let type_name = || {
        let raw = field.type_name.clone().unwrap_or_default();
        raw.strip_prefix('.').map(str::to_string).unwrap_or(raw)
    };

    Ok(Some(match field_type {
        Type::TYPE_DOUBLE => FieldKind::Scalar(ScalarKind::Double),
        Type::TYPE_FLOAT => FieldKind::Scalar(ScalarKind::Float),
        Type::TYPE_INT64 => FieldKind::Scalar(ScalarKind::Int64),
        Type::TYPE_UINT64 => FieldKind::Scalar(ScalarKind::Uint64),
        Type::TYPE_INT32 => FieldKind::Scalar(ScalarKind::Int32),
        Type::TYPE_FIXED64 => FieldKind::Scalar(ScalarKind::Fixed64),
        Type::TYPE_FIXED32 => FieldKind::Scalar(ScalarKind::Fixed32),
        Type::TYPE_BOOL => FieldKind::Scalar(ScalarKind::Bool),
        Type::TYPE_STRING => FieldKind::Scalar(ScalarKind::String),
        Type::TYPE_BYTES => FieldKind::Scalar(ScalarKind::Bytes),
        Type::TYPE_UINT32 => FieldKind::Scalar(ScalarKind::Uint32),
        Type::TYPE_SFIXED32 => FieldKind::Scalar(ScalarKind::Sfixed32),
        Type::TYPE_SFIXED64 => FieldKind::Scalar(ScalarKind::Sfixed64),
        Type::TYPE_SINT32 => FieldKind::Scalar(ScalarKind::Sint32),
        Type::TYPE_SINT64 => FieldKind::Scalar(ScalarKind::Sint64),
        Type::TYPE_MESSAGE => FieldKind::Message(type_name()),
        Type::TYPE_ENUM => FieldKind::Enum(type_name()),
        Type::TYPE_GROUP => return Ok(None),
    }))
}

/// Every message and enum reference must point into the graph, so the
/// decoder never meets a dangling name.
fn check_references(graph: &SchemaGraph) -> Result<(), SchemaError> {
    for message in graph.messages() {
        for field in &message.fields {
            let (target, present) = match &field.kind {
                FieldKind::Message(target) => (target, graph.message(target).is_some()),
                FieldKind::Enum(target) => (target, graph.enum_type(target).is_some()),
                FieldKind::Scalar(_) => continue,
            };
            if !present {
                return Err(SchemaError::TypeNotFound {
                    type_name: target.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Exact match on the fully qualified name first, then a unique match on a
/// trailing name such as `Order` or `Order.Line`.
pub(crate) fn find_message(
    graph: &SchemaGraph,
    type_name: &str,
) -> Result<Arc<MessageDescriptor>, SchemaError> {
    let wanted = type_name.strip_prefix('.').unwrap_or(type_name);
    if let Some(message) = graph.message_arc(wanted) {
        return Ok(Arc::clone(message));
    }

    let candidates = graph.messages_named(wanted);
    match candidates.as_slice() {
        [only] => Ok(Arc::clone(only)),
        [] => Err(SchemaError::TypeNotFound {
            type_name: type_name.to_string(),
        }),
        _ => {
            let mut names: Vec<&str> = candidates.iter().map(|m| m.name.as_str()).collect();
            names.sort();
            warn!("Message name {type_name} is ambiguous: {}", names.join(", "));
            Err(SchemaError::TypeNotFound {
                type_name: type_name.to_string(),
            })
        }
    }
}
