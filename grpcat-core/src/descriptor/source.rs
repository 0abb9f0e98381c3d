//! # Descriptor Sources
//!
//! A [`DescriptorSource`] supplies Protobuf descriptors to the rest of the
//! engine. Three interchangeable backends exist:
//!
//! 1. **Protoset files** — serialized `FileDescriptorSet`s, e.g. produced by
//!    `protoc --descriptor_set_out --include_imports` ([`FileSource::from_protoset_files`]).
//! 2. **Proto sources** — `.proto` files compiled on the fly with `protox`
//!    ([`FileSource::from_proto_files`]).
//! 3. **Server reflection** — live queries against the server's
//!    `grpc.reflection.v1alpha.ServerReflection` service ([`ServerSource`]).
//!
//! Every other component depends only on the [`DescriptorSource`] trait, so
//! backends can be swapped freely. Symbol lookup is case-sensitive on the
//! fully-qualified name; callers strip any leading `.` before lookup.
use crate::BoxError;
use crate::reflection::client::{ReflectionClient, ReflectionError};
use async_trait::async_trait;
use http_body::Body as HttpBody;
use prost::Message as _;
use prost_reflect::{
    DescriptorPool, EnumDescriptor, EnumValueDescriptor, ExtensionDescriptor, FieldDescriptor,
    FileDescriptor, MessageDescriptor, MethodDescriptor, OneofDescriptor, ServiceDescriptor,
};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;

/// Errors raised while loading descriptors into a source.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("could not load protoset file '{path}': {source}")]
    ReadProtoset {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse contents of protoset file '{path}': {source}")]
    ParseProtoset {
        path: PathBuf,
        source: prost::DecodeError,
    },
    #[error("could not parse given files: {0}")]
    Compile(#[from] protox::Error),
    #[error("no descriptor found for '{0}'")]
    MissingDependency(String),
    #[error("cycle found in dependencies of '{0}'")]
    DependencyCycle(String),
    #[error("invalid file descriptors: {0}")]
    InvalidDescriptors(#[from] prost_reflect::DescriptorError),
}

/// Errors raised by [`DescriptorSource`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The server answered a reflection RPC with `UNIMPLEMENTED`. Once seen,
    /// every subsequent operation on the source reports this error, letting
    /// callers switch to a protoset fallback.
    #[error("server does not support the reflection API")]
    ReflectionNotSupported,
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("reflection request failed: '{0}'")]
    Reflection(#[from] ReflectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A descriptor resolved by fully-qualified name.
#[derive(Debug, Clone)]
pub enum Symbol {
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Message(MessageDescriptor),
    Field(FieldDescriptor),
    Oneof(OneofDescriptor),
    Enum(EnumDescriptor),
    EnumValue(EnumValueDescriptor),
}

impl Symbol {
    pub fn full_name(&self) -> String {
        match self {
            Symbol::Service(d) => d.full_name().to_string(),
            Symbol::Method(d) => format!("{}.{}", d.parent_service().full_name(), d.name()),
            Symbol::Message(d) => d.full_name().to_string(),
            Symbol::Field(d) => format!("{}.{}", d.parent_message().full_name(), d.name()),
            Symbol::Oneof(d) => format!("{}.{}", d.parent_message().full_name(), d.name()),
            Symbol::Enum(d) => d.full_name().to_string(),
            Symbol::EnumValue(d) => format!("{}.{}", d.parent_enum().full_name(), d.name()),
        }
    }

    /// The file this symbol was declared in.
    pub fn file(&self) -> FileDescriptor {
        match self {
            Symbol::Service(d) => d.parent_file(),
            Symbol::Method(d) => d.parent_service().parent_file(),
            Symbol::Message(d) => d.parent_file(),
            Symbol::Field(d) => d.parent_message().parent_file(),
            Symbol::Oneof(d) => d.parent_message().parent_file(),
            Symbol::Enum(d) => d.parent_file(),
            Symbol::EnumValue(d) => d.parent_enum().parent_file(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Symbol::Service(_) => "service",
            Symbol::Method(_) => "method",
            Symbol::Message(_) => "message",
            Symbol::Field(_) => "field",
            Symbol::Oneof(_) => "oneof",
            Symbol::Enum(_) => "enum",
            Symbol::EnumValue(_) => "enum value",
        }
    }
}

/// A source of Protobuf descriptor information.
///
/// Invariant: the file of every symbol returned by [`find_symbol`], along
/// with all of that file's transitive dependencies, is reachable through
/// [`all_files`].
///
/// [`find_symbol`]: DescriptorSource::find_symbol
/// [`all_files`]: DescriptorSource::all_files
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Lists the fully-qualified names of all known services. Order is
    /// unspecified; callers sort.
    async fn list_services(&self) -> Result<Vec<String>, SourceError>;

    /// Resolves a fully-qualified symbol name to its descriptor.
    async fn find_symbol(&self, fully_qualified_name: &str) -> Result<Symbol, SourceError>;

    /// Returns all known extension fields that extend the given message type.
    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError>;

    /// Returns every file reachable through this source.
    async fn all_files(&self) -> Result<Vec<FileDescriptor>, SourceError>;
}

fn find_symbol_in_pool(pool: &DescriptorPool, fqn: &str) -> Option<Symbol> {
    if let Some(service) = pool.get_service_by_name(fqn) {
        return Some(Symbol::Service(service));
    }
    if let Some(message) = pool.get_message_by_name(fqn) {
        return Some(Symbol::Message(message));
    }
    if let Some(enumeration) = pool.get_enum_by_name(fqn) {
        return Some(Symbol::Enum(enumeration));
    }

    // Dotted children: a method of a service, a field or oneof of a message,
    // or a value of an enum.
    let (parent, child) = fqn.rsplit_once('.')?;
    if let Some(service) = pool.get_service_by_name(parent) {
        return service
            .methods()
            .find(|m| m.name() == child)
            .map(Symbol::Method);
    }
    if let Some(message) = pool.get_message_by_name(parent) {
        if let Some(field) = message.get_field_by_name(child) {
            return Some(Symbol::Field(field));
        }
        if let Some(oneof) = message.oneofs().find(|o| o.name() == child) {
            return Some(Symbol::Oneof(oneof));
        }
    }
    if let Some(enumeration) = pool.get_enum_by_name(parent) {
        return enumeration
            .values()
            .find(|v| v.name() == child)
            .map(Symbol::EnumValue);
    }
    None
}

fn extensions_in_pool(pool: &DescriptorPool, type_name: &str) -> Vec<ExtensionDescriptor> {
    pool.all_extensions()
        .filter(|ext| ext.containing_message().full_name() == type_name)
        .collect()
}

/// Orders the given file descriptor protos so that every file appears after
/// all of its dependencies. Files for which `is_known` returns true are
/// treated as already satisfied and skipped. Duplicate entries keep the
/// first occurrence; cycles and unsatisfiable imports are fatal.
pub(crate) fn topological_file_order(
    files: Vec<FileDescriptorProto>,
    is_known: impl Fn(&str) -> bool,
) -> Result<Vec<FileDescriptorProto>, SchemaError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut order = Vec::with_capacity(files.len());
    let mut pending: HashMap<String, FileDescriptorProto> = HashMap::new();
    for file in files {
        let name = file.name().to_string();
        if !pending.contains_key(&name) && !is_known(&name) {
            order.push(name.clone());
            pending.insert(name, file);
        }
    }

    fn visit(
        name: &str,
        pending: &HashMap<String, FileDescriptorProto>,
        is_known: &impl Fn(&str) -> bool,
        marks: &mut HashMap<String, Mark>,
        sorted: &mut Vec<FileDescriptorProto>,
    ) -> Result<(), SchemaError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(SchemaError::DependencyCycle(name.to_string())),
            None => {}
        }
        if is_known(name) {
            marks.insert(name.to_string(), Mark::Done);
            return Ok(());
        }
        let file = pending
            .get(name)
            .ok_or_else(|| SchemaError::MissingDependency(name.to_string()))?;
        marks.insert(name.to_string(), Mark::Visiting);
        for dep in &file.dependency {
            visit(dep, pending, is_known, marks, sorted)?;
        }
        marks.insert(name.to_string(), Mark::Done);
        sorted.push(file.clone());
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut sorted = Vec::with_capacity(order.len());
    for name in &order {
        visit(name, &pending, &is_known, &mut marks, &mut sorted)?;
    }
    Ok(sorted)
}

fn register_files(
    pool: &mut DescriptorPool,
    files: Vec<FileDescriptorProto>,
) -> Result<(), SchemaError> {
    let snapshot: HashSet<String> = pool.files().map(|f| f.name().to_string()).collect();
    let ordered = topological_file_order(files, |name| snapshot.contains(name))?;
    for file in ordered {
        pool.add_file_descriptor_proto(file)?;
    }
    Ok(())
}

/// A descriptor source backed by a fixed set of files.
#[derive(Debug)]
pub struct FileSource {
    pool: DescriptorPool,
}

impl FileSource {
    /// Builds a source from protoset files, each a serialized
    /// `FileDescriptorSet`. File entries keep their input order so that
    /// downstream exports are reproducible.
    pub fn from_protoset_files(paths: &[PathBuf]) -> Result<Self, SchemaError> {
        let mut merged = FileDescriptorSet::default();
        for path in paths {
            let bytes = std::fs::read(path).map_err(|source| SchemaError::ReadProtoset {
                path: path.clone(),
                source,
            })?;
            let set = FileDescriptorSet::decode(bytes.as_slice()).map_err(|source| {
                SchemaError::ParseProtoset {
                    path: path.clone(),
                    source,
                }
            })?;
            merged.file.extend(set.file);
        }
        Self::from_file_descriptor_set(merged)
    }

    /// Builds a source from an in-memory `FileDescriptorSet`.
    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, SchemaError> {
        let ordered = topological_file_order(set.file, |_| false)?;
        let mut pool = DescriptorPool::new();
        for file in ordered {
            pool.add_file_descriptor_proto(file)?;
        }
        Ok(Self { pool })
    }

    /// Builds a source by compiling `.proto` sources.
    ///
    /// Imports are resolved against `import_paths`; when none are given, the
    /// parent directories of the input files are inferred as roots.
    /// Well-known types come from the compiler's embedded copies. The result
    /// is equivalent to a `protoc --include_imports` descriptor set fed into
    /// [`FileSource::from_file_descriptor_set`].
    pub fn from_proto_files(
        import_paths: &[PathBuf],
        files: &[PathBuf],
    ) -> Result<Self, SchemaError> {
        let (roots, names) = resolve_file_names(import_paths, files);
        let mut compiler = protox::Compiler::new(&roots)?;
        compiler.include_imports(true).include_source_info(true);
        compiler.open_files(names)?;
        Self::from_file_descriptor_set(compiler.file_descriptor_set())
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

/// Maps the given proto file paths to (import roots, root-relative names).
///
/// A file under one of the import roots is referred to by its path relative
/// to that root (its canonical name). With no roots configured, each file's
/// parent directory becomes a root and the file is referred to by its base
/// name.
fn resolve_file_names(import_paths: &[PathBuf], files: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    if import_paths.is_empty() {
        let mut roots: Vec<PathBuf> = Vec::new();
        let mut names = Vec::with_capacity(files.len());
        for file in files {
            let parent = match file.parent() {
                Some(p) if p != Path::new("") => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !roots.contains(&parent) {
                roots.push(parent);
            }
            names.push(PathBuf::from(file.file_name().unwrap_or(file.as_os_str())));
        }
        return (roots, names);
    }

    let names = files
        .iter()
        .map(|file| {
            for root in import_paths {
                if let Ok(relative) = file.strip_prefix(root) {
                    return relative.to_path_buf();
                }
            }
            file.clone()
        })
        .collect();
    (import_paths.to_vec(), names)
}

#[async_trait]
impl DescriptorSource for FileSource {
    async fn list_services(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .pool
            .services()
            .map(|s| s.full_name().to_string())
            .collect())
    }

    async fn find_symbol(&self, fully_qualified_name: &str) -> Result<Symbol, SourceError> {
        find_symbol_in_pool(&self.pool, fully_qualified_name)
            .ok_or_else(|| SourceError::SymbolNotFound(fully_qualified_name.to_string()))
    }

    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        Ok(extensions_in_pool(&self.pool, type_name))
    }

    async fn all_files(&self) -> Result<Vec<FileDescriptor>, SourceError> {
        Ok(self.pool.files().collect())
    }
}

/// A descriptor source that interrogates the server's reflection service.
///
/// All requests share one reflection stream, serialized behind a mutex so at
/// most one reflection RPC is outstanding at a time. Fetched files accumulate
/// in a descriptor-pool cache that only ever grows and always holds complete
/// dependency closures. The stream stays open until [`ServerSource::reset`].
pub struct ServerSource<S = Channel> {
    inner: Mutex<ServerSourceInner<S>>,
}

struct ServerSourceInner<S> {
    client: ReflectionClient<S>,
    pool: DescriptorPool,
    services: Option<Vec<String>>,
    unsupported: bool,
}

impl<S> ServerSource<S>
where
    S: tonic::client::GrpcService<tonic::body::Body> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a reflection-backed source over the given service (usually a
    /// connected `Channel`). No reflection RPC happens until the first use.
    pub fn new(service: S) -> Self {
        Self {
            inner: Mutex::new(ServerSourceInner {
                client: ReflectionClient::new(service),
                pool: DescriptorPool::new(),
                services: None,
                unsupported: false,
            }),
        }
    }

    /// Attaches extra request metadata to the reflection stream.
    pub fn with_headers(self, metadata: MetadataMap) -> Self {
        let ServerSourceInner {
            client,
            pool,
            services,
            unsupported,
        } = self.inner.into_inner();
        Self {
            inner: Mutex::new(ServerSourceInner {
                client: client.with_metadata(metadata),
                pool,
                services,
                unsupported,
            }),
        }
    }

    /// Closes the reflection stream and clears the descriptor cache.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.client.reset();
        inner.pool = DescriptorPool::new();
        inner.services = None;
    }
}

impl<S> ServerSourceInner<S>
where
    S: tonic::client::GrpcService<tonic::body::Body> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    fn check_supported(&self) -> Result<(), SourceError> {
        if self.unsupported {
            Err(SourceError::ReflectionNotSupported)
        } else {
            Ok(())
        }
    }

    fn map_reflection_error(&mut self, err: ReflectionError, symbol: &str) -> SourceError {
        if err.is_unimplemented() {
            self.unsupported = true;
            return SourceError::ReflectionNotSupported;
        }
        if err.is_not_found() {
            return SourceError::SymbolNotFound(symbol.to_string());
        }
        SourceError::Reflection(err)
    }

    fn known_files(&self) -> HashSet<String> {
        self.pool.files().map(|f| f.name().to_string()).collect()
    }

    /// Makes sure the file defining `symbol` (and its dependency closure) is
    /// present in the cache, fetching it from the server if necessary.
    async fn ensure_symbol(&mut self, symbol: &str) -> Result<(), SourceError> {
        if find_symbol_in_pool(&self.pool, symbol).is_some() {
            return Ok(());
        }
        let known = self.known_files();
        let files = match self.client.files_containing_symbol(symbol, &known).await {
            Ok(files) => files,
            Err(err) => return Err(self.map_reflection_error(err, symbol)),
        };
        register_files(&mut self.pool, files)?;
        Ok(())
    }
}

#[async_trait]
impl<S> DescriptorSource for ServerSource<S>
where
    S: tonic::client::GrpcService<tonic::body::Body> + Send + Sync,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&self) -> Result<Vec<String>, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.check_supported()?;
        if let Some(services) = &inner.services {
            return Ok(services.clone());
        }
        let services = match inner.client.list_services().await {
            Ok(services) => services,
            Err(err) => return Err(inner.map_reflection_error(err, "")),
        };
        inner.services = Some(services.clone());
        Ok(services)
    }

    async fn find_symbol(&self, fully_qualified_name: &str) -> Result<Symbol, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.check_supported()?;
        inner.ensure_symbol(fully_qualified_name).await?;
        find_symbol_in_pool(&inner.pool, fully_qualified_name)
            .ok_or_else(|| SourceError::SymbolNotFound(fully_qualified_name.to_string()))
    }

    async fn all_extensions_for_type(
        &self,
        type_name: &str,
    ) -> Result<Vec<ExtensionDescriptor>, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.check_supported()?;
        inner.ensure_symbol(type_name).await?;
        let numbers = match inner.client.extension_numbers_for_type(type_name).await {
            Ok(numbers) => numbers,
            Err(err) => return Err(inner.map_reflection_error(err, type_name)),
        };
        for number in numbers {
            let already_known = extensions_in_pool(&inner.pool, type_name)
                .iter()
                .any(|ext| ext.number() == number as u32);
            if already_known {
                continue;
            }
            let known = inner.known_files();
            let files = match inner
                .client
                .files_containing_extension(type_name, number, &known)
                .await
            {
                Ok(files) => files,
                Err(err) => return Err(inner.map_reflection_error(err, type_name)),
            };
            register_files(&mut inner.pool, files)?;
        }
        Ok(extensions_in_pool(&inner.pool, type_name))
    }

    async fn all_files(&self) -> Result<Vec<FileDescriptor>, SourceError> {
        // Pull in the closure of every advertised service, then hand out the
        // cache. Used to seed Any resolution before formatting.
        let services = self.list_services().await?;
        let mut inner = self.inner.lock().await;
        for service in &services {
            inner.ensure_symbol(service).await?;
        }
        Ok(inner.pool.files().collect())
    }
}
