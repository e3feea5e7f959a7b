//! Writes generated artifacts to an output directory.
//!
//! The tools module is machine output and is overwritten on every run. The
//! entry point is created only when absent so hand edits survive
//! regeneration. Both artifacts are verified before anything is written.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use toolsmith_core::{DataSourceSchema, GeneratorConfig, LockRecord, SchemaDiff};
use tracing::{debug, info, warn};

use crate::env_template::{self, ENV_TEMPLATE_NAME};
use crate::error::WriteError;
use crate::{synthesize, tools_module_name, verify};

/// Writer settings.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Entry point file name, a bare `<stem>.rs`.
    pub filename: String,
    /// Compare against the previous lock file and report drift.
    pub report_drift: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            filename: "main.rs".to_string(),
            report_drift: true,
        }
    }
}

/// What a write did.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub entry_point_path: PathBuf,
    pub tools_path: PathBuf,
    pub lock_path: PathBuf,
    pub env_path: PathBuf,
    /// False when an existing entry point was left untouched.
    pub entry_point_created: bool,
    /// Changes since the previous generation, when it was different.
    pub drift: Option<SchemaDiff>,
    pub tool_names: Vec<String>,
}

/// Writes with default options.
pub fn write(
    schema: &DataSourceSchema,
    config: &GeneratorConfig,
    output: impl AsRef<Path>,
) -> Result<WriteOutcome, WriteError> {
    write_with(schema, config, output, &WriteOptions::default())
}

fn entry_stem(filename: &str) -> Result<&str, WriteError> {
    let stem = filename
        .strip_suffix(".rs")
        .filter(|stem| !stem.is_empty())
        .filter(|stem| stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .filter(|stem| !stem.starts_with(|c: char| c.is_ascii_digit()))
        .filter(|stem| !stem.starts_with("autogen_"));
    stem.ok_or_else(|| WriteError::InvalidFilename(filename.to_string()))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn write_with(
    schema: &DataSourceSchema,
    config: &GeneratorConfig,
    output: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<WriteOutcome, WriteError> {
    let output = output.as_ref();
    let stem = entry_stem(&options.filename)?;
    let synthesized = synthesize(schema, config, stem)?;

    let entry_point_path = output.join(&options.filename);
    let tools_path = output.join(tools_module_name(stem));
    let broken_path = tools_path.with_extension("rs.broken");
    let lock_path = LockRecord::path_in(output);
    let env_path = output.join(ENV_TEMPLATE_NAME);

    fs::create_dir_all(output).map_err(io_error(output))?;

    let previous = LockRecord::load(&lock_path)?;
    let drift = match (&previous, options.report_drift) {
        (Some(previous), true) => previous.drift(schema),
        _ => None,
    };
    match (&previous, &drift) {
        (None, _) => debug!(path = %lock_path.display(), "No previous lock file; first generation"),
        (Some(_), Some(diff)) => {
            for change in diff.describe() {
                warn!(change = %change, "Schema changed since last generation");
            }
        }
        (Some(_), None) => debug!("Schema unchanged since last generation"),
    }

    let tools_file = match verify::verify(&synthesized.tools.source, synthesized.tools.name) {
        Ok(file) => file,
        Err(e) => {
            fs::write(&broken_path, &synthesized.tools.source).map_err(io_error(&broken_path))?;
            warn!(path = %broken_path.display(), "Generated tools module does not parse; kept for diagnosis");
            return Err(WriteError::Synthesis {
                artifact: synthesized.tools.name.to_string(),
                message: e.to_string(),
                diagnostic_path: Some(broken_path),
            });
        }
    };
    let entry_file = verify::verify(&synthesized.entry_point.source, synthesized.entry_point.name)
        .map_err(|e| WriteError::Synthesis {
            artifact: synthesized.entry_point.name.to_string(),
            message: e.to_string(),
            diagnostic_path: None,
        })?;

    let tools = verify::format(&synthesized.tools.source, &tools_file, config.format);
    fs::write(&tools_path, tools).map_err(io_error(&tools_path))?;
    if broken_path.exists() {
        if let Err(e) = fs::remove_file(&broken_path) {
            debug!(path = %broken_path.display(), error = %e, "Could not remove stale diagnostic file");
        }
    }

    let entry = verify::format(&synthesized.entry_point.source, &entry_file, config.format);
    let entry_point_created = match OpenOptions::new().write(true).create_new(true).open(&entry_point_path) {
        Ok(mut file) => {
            file.write_all(entry.as_bytes()).map_err(io_error(&entry_point_path))?;
            true
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!(path = %entry_point_path.display(), "Entry point exists; leaving it untouched");
            false
        }
        Err(e) => return Err(io_error(&entry_point_path)(e)),
    };

    LockRecord::from_schema(schema).save(&lock_path)?;

    let kind = synthesized.plan.kind;
    let template = env_template::render(schema, config, kind);
    fs::write(&env_path, template).map_err(io_error(&env_path))?;

    info!(
        tools_path = %tools_path.display(),
        tools = synthesized.plan.tools.len(),
        entry_point_created,
        "Wrote generated tool server"
    );

    Ok(WriteOutcome {
        entry_point_path,
        tools_path,
        lock_path,
        env_path,
        entry_point_created,
        drift,
        tool_names: synthesized.plan.tool_names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_stem_validation() {
        assert_eq!(entry_stem("main.rs").unwrap(), "main");
        assert_eq!(entry_stem("server_1.rs").unwrap(), "server_1");
        for bad in ["main", ".rs", "src/main.rs", "1st.rs", "my-server.rs", "autogen_main.rs"] {
            assert!(entry_stem(bad).is_err(), "{bad} should be rejected");
        }
    }
}
