//! Benchmark file discovery and loading: the CLI's only filesystem
//! responsibility is finding files matching `*_bench.<ext>` and loading them.
//!
//! Traversal uses `walkdir`, the filename pattern uses `regex`, and
//! `libloading` loads each match: a benchmark file is a compiled shared
//! library exporting one `extern "C"` registration symbol that builds and
//! returns a [`crate::describe::Spec`].

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::describe::Spec;
use crate::error::LoaderError;

/// Symbol every benchmark shared library must export:
/// `extern "C" fn benchkit_spec() -> *mut Spec`. Ownership of the returned
/// pointer transfers to the caller, which reclaims it with `Box::from_raw`.
pub const REGISTRATION_SYMBOL: &[u8] = b"benchkit_spec\0";

static BENCH_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)_bench\.(so|dylib|dll)$").expect("valid regex literal"));

/// Returns `true` if `path`'s filename matches `*_bench.<ext>` for a
/// platform dynamic-library extension.
pub fn is_bench_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| BENCH_FILE_PATTERN.is_match(name))
}

/// Discover benchmark files under `root`. If `root` is itself a file
/// matching the pattern, returns just that file; if it's a directory, walks
/// it recursively. Fails with [`LoaderError::NoFilesFound`] if nothing
/// matches.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    if !root.exists() {
        return Err(LoaderError::Io {
            path: root.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        });
    }

    let mut found = Vec::new();
    if root.is_file() {
        if is_bench_file(root) {
            found.push(root.to_path_buf());
        }
    } else {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_bench_file(entry.path()) {
                found.push(entry.path().to_path_buf());
            }
        }
    }

    if found.is_empty() {
        return Err(LoaderError::NoFilesFound(root.display().to_string()));
    }
    found.sort();
    Ok(found)
}

/// A loaded benchmark module: the dynamic library kept alive for the
/// lifetime of the [`Spec`] it produced (the `Spec`'s closures are compiled
/// into the library and would dangle if it were dropped first).
pub struct LoadedModule {
    /// The benchmark file's spec.
    pub spec: Spec,
    _library: libloading::Library,
}

/// Load one benchmark file, calling its `benchkit_spec` registration
/// symbol.
///
/// # Safety contract
///
/// The loaded library must export `benchkit_spec` with the exact signature
/// `extern "C" fn() -> *mut Spec`, matching [`REGISTRATION_SYMBOL`], and
/// that pointer must have been produced by `Box::into_raw` on this crate's
/// `Spec` type (ABI mismatch is undefined behavior — the same contract any
/// `dlopen`-based plugin loader carries).
pub fn load(path: &Path) -> Result<LoadedModule, LoaderError> {
    let library = unsafe { libloading::Library::new(path) }.map_err(|e| LoaderError::Module {
        path: path.display().to_string(),
        message: format!("failed to open shared library: {e}"),
    })?;

    let spec = unsafe {
        let register: libloading::Symbol<unsafe extern "C" fn() -> *mut Spec> =
            library.get(REGISTRATION_SYMBOL).map_err(|e| LoaderError::Module {
                path: path.display().to_string(),
                message: format!("missing `benchkit_spec` export: {e}"),
            })?;
        let raw = register();
        if raw.is_null() {
            return Err(LoaderError::Module {
                path: path.display().to_string(),
                message: "benchkit_spec returned a null pointer".to_string(),
            });
        }
        *Box::from_raw(raw)
    };

    Ok(LoadedModule {
        spec,
        _library: library,
    })
}
