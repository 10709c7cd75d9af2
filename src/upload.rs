//! Staged, validated file uploads.
//!
//! [`UploadSanitizer::accept_upload`] is all-or-nothing:
//!
//! 1. Every part is validated and streamed into a randomly named staging
//!    file, with the size ceiling enforced while streaming.
//! 2. Every staged file goes through the [`ContentScanner`].
//! 3. Only then are files moved into the final directory. If a move fails,
//!    files already moved are removed again.
//!
//! Staging files are removed on every path, including early returns and
//! panics, by an RAII guard.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::config::UploadConfig;
use crate::error::{Error, Result};
use crate::random::{random_bytes, OsRandom, RandomSource};
use crate::sanitizer::Sanitizer;
use crate::{Tainted, Verified};

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_NAME_ATTEMPTS: usize = 1000;

/// One part of a multipart body, as delivered by the transport.
pub struct UploadPart {
    /// Client-supplied file name.
    pub filename: Tainted<String>,
    /// Client-declared content type.
    pub content_type: Tainted<String>,
    /// Part body.
    pub body: Box<dyn Read + Send>,
}

/// Source of multipart parts. Wire parsing belongs to the transport.
pub trait MultipartStream {
    /// Returns the next part, or `None` when the body is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot produce the part.
    fn next_part(&mut self) -> Result<Option<UploadPart>>;
}

/// Parts held in memory, for tests and small buffered bodies.
#[derive(Debug, Default)]
pub struct MemoryMultipart {
    parts: Vec<(String, String, Vec<u8>)>,
}

impl MemoryMultipart {
    /// Creates an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a part.
    pub fn with_part(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts
            .push((filename.into(), content_type.into(), body.into()));
        self
    }
}

impl MultipartStream for MemoryMultipart {
    fn next_part(&mut self) -> Result<Option<UploadPart>> {
        if self.parts.is_empty() {
            return Ok(None);
        }
        let (filename, content_type, body) = self.parts.remove(0);
        Ok(Some(UploadPart {
            filename: Tainted::new(filename),
            content_type: Tainted::new(content_type),
            body: Box::new(io::Cursor::new(body)),
        }))
    }
}

/// Inspects staged files before they are accepted (antivirus, content
/// sniffing).
pub trait ContentScanner: Send + Sync {
    /// Rejects the file by returning an error.
    ///
    /// # Errors
    ///
    /// Any error rejects the entire upload.
    fn scan(&self, staged: &Path, content_type: &str) -> Result<()>;
}

/// Accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScanner;

impl ContentScanner for NoopScanner {
    fn scan(&self, _staged: &Path, _content_type: &str) -> Result<()> {
        Ok(())
    }
}

/// A file that passed every check and now lives in the final directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Where the file was staged.
    pub staging_path: PathBuf,
    /// Where the file now lives.
    pub final_path: PathBuf,
    /// File name as presented by the client.
    pub original_name: String,
    /// File name on disk, with a collision suffix if one was needed.
    pub stored_name: String,
    /// Declared content type, normalized.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
}

/// Validates client-supplied file names.
///
/// Rejects, in the raw and percent-decoded forms: path separators, `..`,
/// NUL and control characters, drive letters, leading dots, Windows device
/// names, trailing dots or spaces, and any character outside
/// `[A-Za-z0-9._- ]`. The extension must be on the allow-list.
///
/// # Examples
///
/// ```
/// use http_guard::{FilenameSanitizer, Sanitizer, Tainted};
///
/// let names = FilenameSanitizer::new(vec!["pdf".to_string()], 255);
/// assert!(names.sanitize(Tainted::new("report.pdf".to_string())).is_ok());
/// assert!(names.sanitize(Tainted::new("../../etc/passwd".to_string())).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct FilenameSanitizer {
    allowed_extensions: Vec<String>,
    max_len: usize,
}

impl FilenameSanitizer {
    /// Creates a sanitizer for the given extensions (case-insensitive).
    pub fn new(allowed_extensions: Vec<String>, max_len: usize) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_len,
        }
    }

    fn check(&self, name: &str) -> Result<()> {
        let decoded = percent_decode_str(name)
            .decode_utf8()
            .map_err(|_| Error::validation("file name is not valid UTF-8"))?;

        for candidate in [name, decoded.as_ref()] {
            if candidate.is_empty() {
                return Err(Error::validation("file name is empty"));
            }
            if candidate.len() > self.max_len {
                return Err(Error::validation("file name is too long"));
            }
            if candidate.contains(['/', '\\', '\0']) || candidate.contains("..") {
                return Err(Error::validation("file name contains a path"));
            }
            let bytes = candidate.as_bytes();
            if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
                return Err(Error::validation("file name contains a drive letter"));
            }
            if candidate.starts_with('.') || candidate.ends_with(['.', ' ']) {
                return Err(Error::validation("file name has a leading or trailing dot"));
            }
            if !candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
            {
                return Err(Error::validation("file name contains a disallowed character"));
            }
            let stem = candidate.split('.').next().unwrap_or_default().trim_end();
            if RESERVED_NAMES
                .iter()
                .any(|r| r.eq_ignore_ascii_case(stem))
            {
                return Err(Error::validation("file name is a reserved device name"));
            }
        }

        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .ok_or_else(|| Error::validation("file name has no extension"))?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(Error::validation("file extension not allowed"));
        }
        Ok(())
    }
}

impl Sanitizer<String> for FilenameSanitizer {
    fn sanitize(&self, input: Tainted<String>) -> Result<Verified<String>> {
        self.check(input.peek())?;
        Ok(Verified::new_unchecked(input.into_inner()))
    }
}

/// Removes its file on drop unless disarmed.
#[derive(Debug)]
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[derive(Debug)]
struct Staged {
    file: StagingGuard,
    name: Verified<String>,
    content_type: String,
    size: u64,
}

/// Validates and stores uploaded files.
pub struct UploadSanitizer {
    names: FilenameSanitizer,
    allowed_content_types: Vec<String>,
    max_file_size: u64,
    max_files: usize,
    scanner: Arc<dyn ContentScanner>,
    random: Arc<dyn RandomSource>,
}

impl UploadSanitizer {
    /// Builds a sanitizer with no content scanning.
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            names: FilenameSanitizer::new(
                config.allowed_extensions.clone(),
                config.max_filename_len,
            ),
            allowed_content_types: config
                .allowed_content_types
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            scanner: Arc::new(NoopScanner),
            random: Arc::new(OsRandom),
        }
    }

    /// Installs a content scanner.
    pub fn with_scanner(mut self, scanner: Arc<dyn ContentScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Replaces the staging-name source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Validates every part, then moves all of them into `final_dir`.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error for a bad name, type, size or part
    /// count; the scanner's error if it rejects a file; or an `Io` error.
    /// In every error case `final_dir` is left as it was and no staging
    /// file remains in `temp_dir`.
    pub fn accept_upload(
        &self,
        stream: &mut dyn MultipartStream,
        temp_dir: &Path,
        final_dir: &Path,
    ) -> Result<Vec<UploadedFile>> {
        let mut staged = Vec::new();
        while let Some(part) = stream.next_part()? {
            if staged.len() == self.max_files {
                tracing::warn!(max_files = self.max_files, "upload rejected: too many files");
                return Err(Error::validation("too many files in upload"));
            }
            let item = self.stage(part, temp_dir).inspect_err(|e| {
                tracing::warn!(kind = %e.kind(), "upload part rejected");
            })?;
            staged.push(item);
        }

        for item in &staged {
            self.scanner
                .scan(&item.file.path, &item.content_type)
                .inspect_err(|e| tracing::warn!(kind = %e.kind(), "upload rejected by scanner"))?;
        }

        let accepted = self.commit(staged, final_dir)?;
        tracing::debug!(files = accepted.len(), "upload accepted");
        Ok(accepted)
    }

    fn stage(&self, part: UploadPart, temp_dir: &Path) -> Result<Staged> {
        let name = self.names.sanitize(part.filename)?;

        let content_type = part
            .content_type
            .peek()
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !self.allowed_content_types.contains(&content_type) {
            return Err(Error::validation("content type not allowed"));
        }

        let (file, guard) = self.create_staging_file(temp_dir)?;
        let size = self.copy_bounded(part.body, file)?;

        Ok(Staged {
            file: guard,
            name,
            content_type,
            size,
        })
    }

    fn create_staging_file(&self, temp_dir: &Path) -> Result<(File, StagingGuard)> {
        let suffix: String = random_bytes(self.random.as_ref(), 16)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let path = temp_dir.join(format!("upload-{suffix}.part"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((file, StagingGuard::new(path)))
    }

    fn copy_bounded(&self, body: Box<dyn Read + Send>, mut file: File) -> Result<u64> {
        let mut limited = body.take(self.max_file_size.saturating_add(1));
        let size = io::copy(&mut limited, &mut file)?;
        if size > self.max_file_size {
            return Err(Error::validation("file exceeds maximum size"));
        }
        file.sync_all()?;
        Ok(size)
    }

    fn commit(&self, staged: Vec<Staged>, final_dir: &Path) -> Result<Vec<UploadedFile>> {
        let mut accepted: Vec<UploadedFile> = Vec::with_capacity(staged.len());
        for mut item in staged {
            match Self::move_into(&item, final_dir) {
                Ok((final_path, stored_name)) => {
                    item.file.disarm();
                    accepted.push(UploadedFile {
                        staging_path: item.file.path.clone(),
                        final_path,
                        original_name: item.name.into_inner(),
                        stored_name,
                        content_type: item.content_type,
                        size: item.size,
                    });
                }
                Err(err) => {
                    for done in &accepted {
                        let _ = fs::remove_file(&done.final_path);
                    }
                    tracing::warn!(kind = %err.kind(), moved = accepted.len(), "upload rolled back");
                    return Err(err);
                }
            }
        }
        Ok(accepted)
    }

    /// Reserves a free name in `final_dir` and moves the staged file onto it.
    fn move_into(item: &Staged, final_dir: &Path) -> Result<(PathBuf, String)> {
        let name = item.name.as_ref();
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                name.to_string()
            } else {
                format!("{stem}-{attempt}.{ext}")
            };
            let target = final_dir.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&target) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
            if let Err(rename_err) = fs::rename(&item.file.path, &target) {
                // Different filesystem: copy onto the reserved name instead.
                if let Err(copy_err) = fs::copy(&item.file.path, &target) {
                    let _ = fs::remove_file(&target);
                    tracing::debug!(rename = ?rename_err.kind(), "rename failed before copy");
                    return Err(copy_err.into());
                }
                let _ = fs::remove_file(&item.file.path);
            }
            return Ok((target, candidate));
        }
        Err(Error::validation("no free file name in upload directory"))
    }
}

impl std::fmt::Debug for UploadSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSanitizer")
            .field("names", &self.names)
            .field("allowed_content_types", &self.allowed_content_types)
            .field("max_file_size", &self.max_file_size)
            .field("max_files", &self.max_files)
            .finish_non_exhaustive()
    }
}
