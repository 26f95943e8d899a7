//! Class file handling for the command line: reading, inspecting,
//! instrumenting, and loading into an engine.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use reprise_ir::{ClassFile, Fingerprint, Listing};
use reprise_passes::{AnalysisError, analyze, instrument_class, transform};
use reprise_runtime::Engine;

use crate::error::{Error, Result};

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(Error::file(path))
}

/// Descriptor, original listing and instrumented listing of one method.
pub fn inspect(bytes: &[u8], method: &str) -> Result<String> {
    let class = ClassFile::decode(bytes).map_err(AnalysisError::from)?;
    let descriptor = analyze(&class, method, Fingerprint::of(bytes))?;
    let instrumented = transform(&class, method, &descriptor)?;
    let original = class
        .method(method)
        .ok_or_else(|| AnalysisError::MissingMethod {
            class: class.name.clone(),
            method: method.to_owned(),
        })?;

    let mut report = String::new();
    let _ = writeln!(report, "== descriptor ==\n{descriptor}\n");
    let _ = writeln!(report, "== original ==\n{}\n", Listing(original));
    let _ = writeln!(report, "== instrumented ==\n{}", Listing(&instrumented.method));
    Ok(report)
}

/// Write the instrumented form of `input` to `output`.
pub fn instrument(input: &Path, output: &Path, method: &str) -> Result<()> {
    let bytes = read_bytes(input)?;
    let instrumented = instrument_class(&bytes, method)?;
    fs::write(output, instrumented).map_err(Error::file(output))?;
    tracing::info!("instrumented {} into {}", input.display(), output.display());
    Ok(())
}

/// Load every class file into `engine`, stopping at the first failure.
pub fn load_all<P: AsRef<Path>>(engine: &Engine, paths: &[P]) -> Result<Vec<String>> {
    let mut loaded = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let id = engine.load(&read_bytes(path)?)?;
        tracing::debug!("loaded {id} from {}", path.display());
        loaded.push(id.class);
    }
    Ok(loaded)
}
