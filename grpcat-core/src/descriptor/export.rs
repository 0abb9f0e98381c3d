//! # Schema Export
//!
//! Writes the schema behind a set of symbols back out, either as one
//! serialized `FileDescriptorSet` or as a directory tree of pretty-printed
//! `.proto` files. The output covers the file of every requested symbol plus
//! all transitive dependencies, topologically sorted so a file always
//! appears after its imports, with duplicates removed by canonical name.
use super::print;
use super::source::{DescriptorSource, SourceError};
use prost::Message as _;
use prost_reflect::FileDescriptor;
use prost_types::FileDescriptorSet;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to find descriptor for '{symbol}': {source}")]
    Resolve {
        symbol: String,
        source: SourceError,
    },
    #[error("failed to write file descriptor set: '{0}'")]
    Write(#[from] io::Error),
    #[error("failed to create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write file '{path}': {source}")]
    WriteFile { path: PathBuf, source: io::Error },
}

/// Resolves every symbol to its file, in order, dropping duplicates.
async fn symbol_files(
    source: &dyn DescriptorSource,
    symbols: &[String],
) -> Result<Vec<FileDescriptor>, ExportError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for symbol in symbols {
        let resolved =
            source
                .find_symbol(symbol)
                .await
                .map_err(|source| ExportError::Resolve {
                    symbol: symbol.clone(),
                    source,
                })?;
        let file = resolved.file();
        if seen.insert(file.name().to_string()) {
            files.push(file);
        }
    }
    Ok(files)
}

/// Expands the files to their transitive dependency closure, dependencies
/// first.
fn topological_closure(files: &[FileDescriptor]) -> Vec<FileDescriptor> {
    fn add(file: &FileDescriptor, seen: &mut HashSet<String>, out: &mut Vec<FileDescriptor>) {
        if !seen.insert(file.name().to_string()) {
            return;
        }
        let pool = file.parent_pool();
        for dep_name in &file.file_descriptor_proto().dependency {
            if let Some(dep) = pool.get_file_by_name(dep_name) {
                add(&dep, seen, out);
            }
        }
        out.push(file.clone());
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for file in files {
        add(file, &mut seen, &mut out);
    }
    out
}

/// Serializes the descriptors for the given symbols (and their dependency
/// closure) as a `FileDescriptorSet` into `out`.
pub async fn write_protoset<W: io::Write>(
    out: &mut W,
    source: &dyn DescriptorSource,
    symbols: &[String],
) -> Result<(), ExportError> {
    let files = symbol_files(source, symbols).await?;
    let set = FileDescriptorSet {
        file: topological_closure(&files)
            .iter()
            .map(|fd| fd.file_descriptor_proto().clone())
            .collect(),
    };
    out.write_all(&set.encode_to_vec())?;
    Ok(())
}

/// Writes the descriptors for the given symbols (and their dependency
/// closure) as `.proto` source files under `out_dir`, preserving the
/// canonical file-path hierarchy.
pub async fn write_proto_files(
    out_dir: &Path,
    source: &dyn DescriptorSource,
    symbols: &[String],
) -> Result<(), ExportError> {
    let files = symbol_files(source, symbols).await?;
    for file in topological_closure(&files) {
        let target = out_dir.join(file.name());
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let rendered = print::file_to_proto(file.file_descriptor_proto());
        std::fs::write(&target, rendered).map_err(|source| ExportError::WriteFile {
            path: target,
            source,
        })?;
    }
    Ok(())
}
