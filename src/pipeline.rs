//! The seal and open pipelines.
//!
//! - seal: archive the input, seal under a fresh key, write the blob.
//! - open: read the blob, open it, restore into the restore directory.
//!
//! Each run is independent. The pipeline owns the key only for the length of
//! one `seal_path` call and hands it straight back to the caller.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::archive::{self, ArchiveEntry};
use crate::audit::{AuditLog, AuditSink, Operation, OperationRecord};
use crate::crypto;
use crate::error::{EurekaError, Result};
use crate::keys::SymmetricKey;

/// Appended to the input's base name to name the sealed blob.
pub const SEALED_SUFFIX: &str = ".encrypted";

/// Where `open_path` restores to unless configured otherwise.
pub const DEFAULT_RESTORE_DIR: &str = "decrypted";

/// Where the pipeline writes its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Directory that receives `<name>.encrypted`.
    pub output_dir: PathBuf,
    /// Directory created by `open_path`. Must not exist beforehand.
    pub restore_dir: PathBuf,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            restore_dir: PathBuf::from(DEFAULT_RESTORE_DIR),
        }
    }
}

/// The result of sealing: where the blob went and the key that opens it.
#[derive(Debug)]
pub struct SealOutcome {
    pub output: PathBuf,
    pub key: SymmetricKey,
}

/// Runs seal and open operations and keeps an audit trail of them.
#[derive(Debug, Default)]
pub struct Pipeline {
    options: PipelineOptions,
    audit: AuditLog,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            audit: AuditLog::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Forward every audit record to `sink` as well.
    pub fn add_audit_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.audit.add_forward_sink(sink);
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// The blob path `seal_path` would write for `input`.
    pub fn sealed_path_for(&self, input: &Path) -> Result<PathBuf> {
        let name = archive::base_name(input)?;
        Ok(self.options.output_dir.join(format!("{name}{SEALED_SUFFIX}")))
    }

    /// Archive `input`, seal it under a freshly generated key, and write the
    /// blob with owner-only permissions.
    ///
    /// The blob only appears at its final path once fully written.
    pub fn seal_path(&mut self, input: &Path) -> Result<SealOutcome> {
        let packed = archive::pack(input)?;
        let stream = Zeroizing::new(packed.bytes);
        let output = self.sealed_path_for(input)?;

        let key = SymmetricKey::generate()?;
        let blob = crypto::seal(&stream, &key)?;

        if output.exists() {
            warn!(path = %output.display(), "replacing existing sealed file");
        }
        write_private(&output, blob.as_bytes())?;

        info!(
            input = %input.display(),
            output = %output.display(),
            entries = packed.entries,
            bytes = blob.len(),
            "sealed"
        );
        self.audit.append(OperationRecord::new(
            Operation::Seal,
            input,
            &output,
            packed.entries,
            stream.len(),
        ));

        Ok(SealOutcome { output, key })
    }

    /// Open the blob at `input` with `key` and restore it into the restore
    /// directory, which must not exist yet.
    ///
    /// Everything is decrypted and validated before the directory is
    /// created. If writing fails afterwards, the directory is removed along
    /// with any of its parents this call created.
    pub fn open_path(&mut self, input: &Path, key: &SymmetricKey) -> Result<PathBuf> {
        let dest = self.options.restore_dir.clone();
        if fs::symlink_metadata(&dest).is_ok() {
            return Err(EurekaError::Collision(dest));
        }

        let blob = fs::read(input).map_err(|e| EurekaError::input(input, e))?;
        let stream = Zeroizing::new(crypto::open(&blob, key)?);
        let entries = archive::decode(&stream)?;

        restore_into(&entries, &dest)?;

        info!(
            input = %input.display(),
            output = %dest.display(),
            entries = entries.len(),
            "opened"
        );
        self.audit.append(OperationRecord::new(
            Operation::Open,
            input,
            &dest,
            entries.len(),
            stream.len(),
        ));

        Ok(dest)
    }
}

/// The highest ancestor of `dest` that does not exist yet, if any.
fn first_missing_ancestor(dest: &Path) -> Option<PathBuf> {
    dest.ancestors()
        .skip(1)
        .filter(|a| !a.as_os_str().is_empty())
        .take_while(|a| fs::symlink_metadata(a).is_err())
        .last()
        .map(Path::to_path_buf)
}

/// Create `dest` and write `entries` into it, removing everything created
/// here if any step fails.
fn restore_into(entries: &[ArchiveEntry], dest: &Path) -> Result<()> {
    let created_root = first_missing_ancestor(dest);
    let cleanup = |err: EurekaError| {
        let partial = created_root.as_deref().unwrap_or(dest);
        if partial.exists() {
            if let Err(cleanup) = fs::remove_dir_all(partial) {
                warn!(path = %partial.display(), error = %cleanup, "failed to remove partial restore");
            }
        }
        err
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| cleanup(e.into()))?;
    }
    match fs::create_dir(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(EurekaError::Collision(dest.to_path_buf()));
        }
        Err(e) => return Err(cleanup(e.into())),
    }

    archive::unpack(entries, dest).map_err(cleanup)
}

/// Write `bytes` to a uniquely named owner-only temp file next to `path`,
/// then move it over `path`. The temp file is removed on any failure.
fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut builder = tempfile::Builder::new();
    builder.prefix(".eureka-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o600));
    }

    let mut temp = builder.tempfile_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
