//! Archiving a file or directory tree into one byte stream, and back.
//!
//! The stream is self-delimiting. It opens with the number of entries, and
//! every entry carries its own lengths, so a truncated or padded stream is
//! rejected instead of restoring a partial tree.
//!
//! # Stream layout
//! ```text
//! stream := count:u64 entry*count
//! entry  := path_len:u32 path:utf8 tag:u8 [content_len:u64 content]
//! ```
//! All integers are big-endian. `tag` is `0x01` for a directory and `0x02`
//! for a regular file; only files carry content. Paths use `/` separators and
//! start with the base name of the archived root.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{EurekaError, Result};

/// Tag byte for a directory entry.
pub const TAG_DIRECTORY: u8 = 0x01;

/// Tag byte for a regular file entry.
pub const TAG_FILE: u8 = 0x02;

/// What an archive entry holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File(Vec<u8>),
}

/// One item of an archive stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `/`-separated path relative to the restore destination.
    pub path: String,
    pub kind: EntryKind,
}

impl ArchiveEntry {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn file(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File(content.into()),
        }
    }
}

/// A serialized stream together with its entry count.
pub(crate) struct Packed {
    pub bytes: Vec<u8>,
    pub entries: usize,
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

struct StreamWriter {
    bytes: Vec<u8>,
    entries: u64,
}

impl StreamWriter {
    const COUNT_LEN: usize = 8;

    fn new() -> Self {
        Self {
            bytes: vec![0u8; Self::COUNT_LEN],
            entries: 0,
        }
    }

    fn entry_header(&mut self, path: &str, tag: u8) -> Result<()> {
        let path_len = u32::try_from(path.len())
            .map_err(|_| EurekaError::Format(format!("path too long: {path}")))?;
        self.bytes.extend_from_slice(&path_len.to_be_bytes());
        self.bytes.extend_from_slice(path.as_bytes());
        self.bytes.push(tag);
        self.entries += 1;
        Ok(())
    }

    fn directory(&mut self, path: &str) -> Result<()> {
        self.entry_header(path, TAG_DIRECTORY)
    }

    fn file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        self.entry_header(path, TAG_FILE)?;
        self.bytes
            .extend_from_slice(&(content.len() as u64).to_be_bytes());
        self.bytes.extend_from_slice(content);
        Ok(())
    }

    fn finish(mut self) -> Packed {
        self.bytes[..Self::COUNT_LEN].copy_from_slice(&self.entries.to_be_bytes());
        Packed {
            entries: self.entries as usize,
            bytes: self.bytes,
        }
    }
}

/// Encode a list of entries into a stream, in the given order.
///
/// Paths are written as-is; `serialize` is the entry point that walks the
/// filesystem and checks every path it produces.
pub fn encode(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::new();
    for entry in entries {
        match &entry.kind {
            EntryKind::Directory => writer.directory(&entry.path)?,
            EntryKind::File(content) => writer.file(&entry.path, content)?,
        }
    }
    Ok(writer.finish().bytes)
}

/// Serialize the file or directory at `root` into an archive stream.
///
/// Directories are walked in lexicographic order, parents before children,
/// and every directory is recorded so empty ones survive the round trip.
/// Symlinks and special files below the root are skipped.
pub fn serialize(root: &Path) -> Result<Vec<u8>> {
    Ok(pack(root)?.bytes)
}

pub(crate) fn pack(root: &Path) -> Result<Packed> {
    let metadata = fs::metadata(root).map_err(|e| EurekaError::input(root, e))?;
    let name = base_name(root)?;
    check_portable(&name, root)?;

    let mut writer = StreamWriter::new();

    if metadata.is_file() {
        let content = fs::read(root).map_err(|e| EurekaError::input(root, e))?;
        debug!(path = %name, bytes = content.len(), "archiving file");
        writer.file(&name, &content)?;
        return Ok(writer.finish());
    }

    if !metadata.is_dir() {
        return Err(EurekaError::input(
            root,
            io::Error::new(io::ErrorKind::InvalidInput, "not a file or directory"),
        ));
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            EurekaError::input(path, io::Error::from(e))
        })?;

        if entry.depth() == 0 {
            writer.directory(&name)?;
            continue;
        }

        let relative = entry.path().strip_prefix(root).map_err(|_| {
            EurekaError::input(
                entry.path(),
                io::Error::new(io::ErrorKind::InvalidInput, "entry outside archive root"),
            )
        })?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            warn!(path = %entry.path().display(), "skipping entry that is neither a file nor a directory");
            continue;
        }
        let path = entry_path(&name, relative, entry.path())?;
        check_portable(&path, entry.path())?;

        if file_type.is_dir() {
            debug!(path = %path, "archiving directory");
            writer.directory(&path)?;
        } else {
            let content =
                fs::read(entry.path()).map_err(|e| EurekaError::input(entry.path(), e))?;
            debug!(path = %path, bytes = content.len(), "archiving file");
            writer.file(&path, &content)?;
        }
    }

    Ok(writer.finish())
}

/// The final path component of `path`, resolving `.` and `..` if needed.
pub(crate) fn base_name(path: &Path) -> Result<String> {
    let resolved;
    let name = match path.file_name() {
        Some(name) => name,
        None => {
            resolved = fs::canonicalize(path).map_err(|e| EurekaError::input(path, e))?;
            resolved.file_name().ok_or_else(|| {
                EurekaError::input(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no base name"),
                )
            })?
        }
    };
    name.to_str()
        .map(str::to_owned)
        .ok_or_else(|| not_utf8(path))
}

fn entry_path(root_name: &str, relative: &Path, full: &Path) -> Result<String> {
    let mut path = root_name.to_owned();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| not_utf8(full))?;
        path.push('/');
        path.push_str(part);
    }
    Ok(path)
}

/// Reject names that `decode` would refuse, such as a Unix file name
/// containing `\`, before anything is sealed.
fn check_portable(path: &str, source: &Path) -> Result<()> {
    validate_path(path).map_err(|err| {
        EurekaError::input(
            source,
            io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
        )
    })
}

fn not_utf8(path: &Path) -> EurekaError {
    EurekaError::input(
        path,
        io::Error::new(io::ErrorKind::InvalidData, "name is not valid UTF-8"),
    )
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct StreamReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                EurekaError::Format(format!("truncated {what} at offset {}", self.pos))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_array::<1>(what)?[0])
    }

    fn read_len_u32(&mut self, what: &str) -> Result<usize> {
        let len = u32::from_be_bytes(self.read_array(what)?);
        usize::try_from(len).map_err(|_| EurekaError::Format(format!("{what} too large")))
    }

    fn read_len_u64(&mut self, what: &str) -> Result<usize> {
        let len = u64::from_be_bytes(self.read_array(what)?);
        usize::try_from(len).map_err(|_| EurekaError::Format(format!("{what} too large")))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decode and validate a complete archive stream without touching disk.
///
/// Fails with `Format` on any framing problem, including trailing bytes,
/// duplicate paths, and entries nested below a file. Fails with `Path` when
/// an entry path could escape the destination.
pub fn decode(stream: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut reader = StreamReader::new(stream);
    let count = reader.read_len_u64("entry count")?;
    if count == 0 {
        return Err(EurekaError::Format("archive has no entries".to_string()));
    }

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut files = HashSet::new();
    let mut parents = HashSet::new();

    for _ in 0..count {
        let path_len = reader.read_len_u32("path length")?;
        let raw = reader.take(path_len, "path")?;
        let path = std::str::from_utf8(raw)
            .map_err(|_| EurekaError::Format("entry path is not UTF-8".to_string()))?
            .to_owned();
        validate_path(&path)?;

        if !seen.insert(path.clone()) {
            return Err(EurekaError::Format(format!("duplicate entry {path}")));
        }
        for (idx, _) in path.match_indices('/') {
            let parent = &path[..idx];
            if files.contains(parent) {
                return Err(EurekaError::Format(format!("{path} is nested under a file")));
            }
            parents.insert(parent.to_owned());
        }

        let kind = match reader.read_u8("entry tag")? {
            TAG_DIRECTORY => EntryKind::Directory,
            TAG_FILE => {
                if parents.contains(&path) {
                    return Err(EurekaError::Format(format!("{path} is both a file and a parent")));
                }
                let len = reader.read_len_u64("content length")?;
                let content = reader.take(len, "file content")?.to_vec();
                files.insert(path.clone());
                EntryKind::File(content)
            }
            other => {
                return Err(EurekaError::Format(format!(
                    "unknown entry tag {other:#04x} for {path}"
                )))
            }
        };
        entries.push(ArchiveEntry { path, kind });
    }

    if reader.remaining() != 0 {
        return Err(EurekaError::Format(format!(
            "{} trailing bytes after last entry",
            reader.remaining()
        )));
    }

    Ok(entries)
}

/// Check that an entry path stays inside the destination.
///
/// Only plain relative names joined by `/` pass: no empty segments, `.`,
/// `..`, leading `/`, backslashes, NUL bytes, or platform path prefixes.
pub fn validate_path(path: &str) -> Result<()> {
    let unsafe_path =
        |reason: &str| -> Result<()> { Err(EurekaError::Path(format!("{path:?}: {reason}"))) };

    if path.is_empty() {
        return unsafe_path("empty path");
    }
    if path.contains('\0') {
        return unsafe_path("NUL byte");
    }
    if path.contains('\\') {
        return unsafe_path("backslash separator");
    }
    if path.starts_with('/') {
        return unsafe_path("absolute path");
    }
    for segment in path.split('/') {
        match segment {
            "" => return unsafe_path("empty segment"),
            "." | ".." => return unsafe_path("traversal segment"),
            _ => {}
        }
    }
    if !Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return unsafe_path("not a plain relative path");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Restoring
// ---------------------------------------------------------------------------

fn target_path(dest: &Path, path: &str) -> PathBuf {
    path.split('/').fold(dest.to_path_buf(), |acc, part| acc.join(part))
}

/// Write already-validated entries below `dest`, which must exist.
///
/// Files are created with `create_new`, so nothing already on disk is
/// overwritten.
pub(crate) fn unpack(entries: &[ArchiveEntry], dest: &Path) -> Result<()> {
    for entry in entries {
        let target = target_path(dest, &entry.path);
        match &entry.kind {
            EntryKind::Directory => fs::create_dir_all(&target)?,
            EntryKind::File(content) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)?;
                file.write_all(content)?;
            }
        }
        debug!(path = %entry.path, "restored entry");
    }
    Ok(())
}

/// Restore an archive stream below `dest`, creating `dest` if needed.
///
/// The whole stream is decoded and validated before anything is written.
pub fn restore(stream: &[u8], dest: &Path) -> Result<()> {
    let entries = decode(stream)?;
    fs::create_dir_all(dest)?;
    unpack(&entries, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_single_file_layout() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("note.txt");
        fs::write(&file, b"hi").unwrap();

        let stream = serialize(&file).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&1u64.to_be_bytes());
        expected.extend_from_slice(&8u32.to_be_bytes());
        expected.extend_from_slice(b"note.txt");
        expected.push(TAG_FILE);
        expected.extend_from_slice(&2u64.to_be_bytes());
        expected.extend_from_slice(b"hi");
        assert_eq!(stream, expected);
    }

    #[test]
    fn test_directory_order_is_lexicographic() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub/empty")).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("sub/c.txt"), b"c").unwrap();

        let entries = decode(&serialize(&root).unwrap()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            ["tree", "tree/a.txt", "tree/b.txt", "tree/sub", "tree/sub/c.txt", "tree/sub/empty"]
        );
        assert_eq!(entries[5].kind, EntryKind::Directory);
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::write(root.join("x/y/z"), b"zzz").unwrap();
        fs::write(root.join("top"), b"t").unwrap();

        assert_eq!(serialize(&root).unwrap(), serialize(&root).unwrap());
    }

    #[test]
    fn test_serialize_missing_root() {
        let dir = tempdir().unwrap();
        let result = serialize(&dir.path().join("absent"));
        assert!(matches!(result, Err(EurekaError::Input { .. })));
    }

    #[test]
    fn test_every_strict_prefix_is_rejected() {
        let stream = encode(&[
            ArchiveEntry::directory("d"),
            ArchiveEntry::file("d/f", b"content".to_vec()),
        ])
        .unwrap();
        assert!(decode(&stream).is_ok());
        for len in 0..stream.len() {
            assert!(
                matches!(decode(&stream[..len]), Err(EurekaError::Format(_))),
                "prefix of {len} bytes decoded"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut stream = encode(&[ArchiveEntry::file("f", b"x".to_vec())]).unwrap();
        stream.push(0);
        assert!(matches!(decode(&stream), Err(EurekaError::Format(_))));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut stream = encode(&[ArchiveEntry::directory("d")]).unwrap();
        let last = stream.len() - 1;
        stream[last] = 0x7f;
        assert!(matches!(decode(&stream), Err(EurekaError::Format(_))));
    }

    #[test]
    fn test_structural_conflicts_rejected() {
        let duplicate = encode(&[ArchiveEntry::directory("d"), ArchiveEntry::directory("d")]).unwrap();
        assert!(matches!(decode(&duplicate), Err(EurekaError::Format(_))));

        let under_file = encode(&[
            ArchiveEntry::file("f", b"x".to_vec()),
            ArchiveEntry::file("f/g", b"y".to_vec()),
        ])
        .unwrap();
        assert!(matches!(decode(&under_file), Err(EurekaError::Format(_))));

        let file_over_parent = encode(&[
            ArchiveEntry::file("f/g", b"y".to_vec()),
            ArchiveEntry::file("f", b"x".to_vec()),
        ])
        .unwrap();
        assert!(matches!(decode(&file_over_parent), Err(EurekaError::Format(_))));
    }

    #[test]
    fn test_validate_path() {
        for ok in ["a", "a/b.txt", "dir/sub/..hidden", "10:30 notes"] {
            assert!(validate_path(ok).is_ok(), "{ok} rejected");
        }
        for bad in ["", "/etc/passwd", "../x", "a/../../x", "a/./b", "a//b", "a/", "a\\b", "a\0b", ".."] {
            assert!(
                matches!(validate_path(bad), Err(EurekaError::Path(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_restore_round_trip_with_empty_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub/empty")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("sub/b.txt"), b"beta").unwrap();

        let out = dir.path().join("out");
        restore(&serialize(&root).unwrap(), &out).unwrap();

        assert_eq!(fs::read(out.join("tree/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.join("tree/sub/b.txt")).unwrap(), b"beta");
        assert!(out.join("tree/sub/empty").is_dir());
    }

    #[test]
    fn test_restore_does_not_overwrite() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"original").unwrap();
        let stream = encode(&[ArchiveEntry::file("f", b"new".to_vec())]).unwrap();

        assert!(matches!(restore(&stream, dir.path()), Err(EurekaError::Io(_))));
        assert_eq!(fs::read(dir.path().join("f")).unwrap(), b"original");
    }

    #[cfg(unix)]
    #[test]
    fn test_backslash_name_is_an_input_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("ok.txt"), b"fine").unwrap();
        fs::write(root.join("win\\style.txt"), b"legal on unix").unwrap();

        match serialize(&root) {
            Err(EurekaError::Input { path, .. }) => {
                assert_eq!(path, root.join("win\\style.txt"));
            }
            other => panic!("expected Input error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("real.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), root.join("dangling")).unwrap();

        let entries = decode(&serialize(&root).unwrap()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["tree", "tree/real.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_an_input_error() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join(OsStr::from_bytes(b"bad\xffname")), b"x").unwrap();

        assert!(matches!(serialize(&root), Err(EurekaError::Input { .. })));
    }
}
