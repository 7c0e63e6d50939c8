//! Storage module to manage uploaded photo files on disk.
//!
//! Files live flat under the upload directory and are keyed by their stored
//! filename. A stored filename is a sanitized, timestamp-prefixed name that
//! never contains a path separator, so every key maps to exactly one file
//! directly below the root.

use std::{
    fmt::Display,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Storage {
    root_path: PathBuf,
}

impl Storage {
    /// Creates a new `Storage` instance with the specified root path.
    ///
    /// # Arguments
    /// * `root` - Root directory path where all uploads will be stored.
    pub fn new(root: PathBuf) -> Storage {
        Storage { root_path: root }
    }

    /// Creates the root directory if it does not exist yet.
    pub fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root_path)?;
        Ok(())
    }

    /// Writes a new file into storage under the given name.
    ///
    /// Existing files are never overwritten.
    ///
    /// # Errors
    /// - `StorageError::NameCollision` if a file with the same name already exists.
    /// - `StorageError::Io` if directory creation or file writing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// # use photofinder::storage::{Storage, StoredFilename};
    /// # use tempfile::TempDir;
    /// let tmp = TempDir::new().unwrap();
    /// let storage = Storage::new(tmp.path().to_path_buf());
    /// let name = StoredFilename::try_from("1700000000_cat.png").unwrap();
    /// storage.create_file(&name, b"not really a png").unwrap();
    /// assert!(storage.exists(&name));
    /// ```
    pub fn create_file(&self, name: &StoredFilename, bytes: &[u8]) -> Result<(), StorageError> {
        self.ensure_root()?;

        let path = self.path_of(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::NameCollision {
                    existing_path: path,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            // A half-written file must not outlive the failed write.
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        Ok(())
    }

    /// Returns the absolute path a stored filename maps to, whether or not it exists.
    pub fn path_of(&self, name: &StoredFilename) -> PathBuf {
        self.root_path.join(name.as_str())
    }

    pub fn exists(&self, name: &StoredFilename) -> bool {
        self.path_of(name).is_file()
    }

    /// Reads the whole content of a stored file.
    ///
    /// # Errors
    /// - `StorageError::FileNotFound` if no such file exists.
    pub fn read(&self, name: &StoredFilename) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.path_of(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::FileNotFound {
                name: name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Ensures that the file with the given name does not exist.
    ///
    /// If the file exists, it is deleted.
    /// If the file does not exist, this function still succeeds.
    ///
    /// # Returns
    /// * `Ok(true)` if a file was removed by this call.
    /// * `Ok(false)` if there was nothing to remove.
    /// * `Err(StorageError::Io)` if an unexpected I/O error occurs.
    pub fn ensure_deleted(&self, name: &StoredFilename) -> Result<bool, StorageError> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A file with the same stored name already exists.
    #[error("Name collision detected. Existing file at: {}", existing_path.display())]
    NameCollision { existing_path: PathBuf },

    #[error("File not found: {name}")]
    FileNotFound { name: StoredFilename },

    /// Filesystem IO error.
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Name under which an upload is kept in storage and referenced from the database.
///
/// Only `[A-Za-z0-9_.-]` is allowed, and `.`/`..` are rejected, so a stored
/// filename can never escape the upload directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoredFilename(String);

impl StoredFilename {
    /// Builds the stored name for a client-supplied name uploaded at `timestamp`.
    ///
    /// `attempt` is zero for the first try; later attempts insert a
    /// discriminator after the timestamp so that same-second uploads of the
    /// same name do not collide.
    pub fn generate(timestamp: i64, client_name: Option<&str>, attempt: u32) -> StoredFilename {
        let base = match client_name.map(str::trim) {
            Some(name) if !name.is_empty() => truncate_base(sanitize(name)),
            _ => "upload".to_string(),
        };

        if attempt == 0 {
            StoredFilename(format!("{}_{}", timestamp, base))
        } else {
            StoredFilename(format!("{}-{}_{}", timestamp, attempt, base))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StoredFilename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for StoredFilename {
    type Error = StoredFilenameParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl TryFrom<String> for StoredFilename {
    type Error = StoredFilenameParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(StoredFilenameParseError::Empty);
        }
        if value == "." || value == ".." {
            return Err(StoredFilenameParseError::Reserved);
        }
        if !value.chars().all(is_allowed) {
            return Err(StoredFilenameParseError::InvalidCharacter);
        }

        Ok(StoredFilename(value))
    }
}

impl From<StoredFilename> for String {
    fn from(value: StoredFilename) -> Self {
        value.0
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum StoredFilenameParseError {
    #[error("stored filename must not be empty")]
    Empty,
    #[error("stored filename must not be `.` or `..`")]
    Reserved,
    #[error("stored filename may only contain A-Z, a-z, 0-9, `_`, `.` and `-`")]
    InvalidCharacter,
}

/// Longest sanitized client name kept in a stored filename, leaving room for
/// the timestamp prefix within the usual 255-byte filename limit.
const MAX_BASE_LEN: usize = 200;

/// Extensions longer than this are not treated as extensions when truncating.
const MAX_EXTENSION_LEN: usize = 16;

/// Shortens a sanitized name to [`MAX_BASE_LEN`], keeping its extension.
fn truncate_base(base: String) -> String {
    if base.len() <= MAX_BASE_LEN {
        return base;
    }

    // Sanitized names are ASCII, so byte offsets are char boundaries.
    let extension = match base.rfind('.') {
        Some(idx) if base.len() - idx <= MAX_EXTENSION_LEN => &base[idx..],
        _ => "",
    };

    format!("{}{}", &base[..MAX_BASE_LEN - extension.len()], extension)
}

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

#[cfg(test)]
mod tests {
    use crate::storage::{
        Storage, StorageError, StoredFilename, StoredFilenameParseError, sanitize,
    };
    use std::fs;
    use tempfile::TempDir;

    fn get_storage() -> (TempDir, Storage) {
        let tmp_dir = TempDir::new().unwrap();
        let storage = Storage::new(tmp_dir.path().to_path_buf());
        (tmp_dir, storage)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!("photo_name_.png", sanitize("photo name!.png"));
        assert_eq!("a-b_c.d", sanitize("a-b_c.d"));
        assert_eq!(".._.._", sanitize("../../"));
        assert_eq!("caf_.jpg", sanitize("café.jpg"));
    }

    #[test]
    fn test_generate() {
        assert_eq!(
            "1700000000_photo_name_.png",
            StoredFilename::generate(1700000000, Some("photo name!.png"), 0).as_str()
        );
        assert_eq!(
            "1700000000-2_photo_name_.png",
            StoredFilename::generate(1700000000, Some("photo name!.png"), 2).as_str()
        );
        assert_eq!(
            "1700000000_upload",
            StoredFilename::generate(1700000000, None, 0).as_str()
        );
        assert_eq!(
            "1700000000_upload",
            StoredFilename::generate(1700000000, Some("  "), 0).as_str()
        );
    }

    #[test]
    fn test_generate_truncates_long_names() {
        let long = format!("{}.jpeg", "a".repeat(400));

        let name = StoredFilename::generate(1700000000, Some(&long), 31);

        assert!(name.as_str().len() <= 255, "{}", name.as_str().len());
        assert!(name.as_str().starts_with("1700000000-31_aaaa"));
        assert!(name.as_str().ends_with("a.jpeg"));

        let no_extension = "b".repeat(400);
        let name = StoredFilename::generate(1700000000, Some(&no_extension), 0);
        assert_eq!(format!("1700000000_{}", "b".repeat(200)), name.as_str());
    }

    #[test]
    fn test_create_file_with_long_client_name() {
        let (_tmp_dir, storage) = get_storage();
        let long = format!("{}.png", "x".repeat(1000));
        let name = StoredFilename::generate(1700000000, Some(&long), 0);

        storage.create_file(&name, b"abc").unwrap();

        assert_eq!(b"abc".to_vec(), storage.read(&name).unwrap());
    }

    #[test]
    fn test_stored_filename_parse() {
        assert!(StoredFilename::try_from("1700000000_a.jpg").is_ok());
        assert_eq!(
            Err(StoredFilenameParseError::Empty),
            StoredFilename::try_from("")
        );
        assert_eq!(
            Err(StoredFilenameParseError::Reserved),
            StoredFilename::try_from("..")
        );
        assert_eq!(
            Err(StoredFilenameParseError::InvalidCharacter),
            StoredFilename::try_from("../etc/passwd")
        );
        assert_eq!(
            Err(StoredFilenameParseError::InvalidCharacter),
            StoredFilename::try_from("a b.png")
        );
    }

    #[test]
    fn test_create_file() {
        let (tmp_dir, storage) = get_storage();
        let name = StoredFilename::try_from("1_a.png").unwrap();

        storage.create_file(&name, b"abc").unwrap();

        assert_eq!(b"abc".to_vec(), fs::read(tmp_dir.path().join("1_a.png")).unwrap());
        assert_eq!(b"abc".to_vec(), storage.read(&name).unwrap());
    }

    #[test]
    fn test_create_file_creates_missing_root() {
        let tmp_dir = TempDir::new().unwrap();
        let storage = Storage::new(tmp_dir.path().join("nested/uploads"));
        let name = StoredFilename::try_from("1_a.png").unwrap();

        storage.create_file(&name, b"abc").unwrap();

        assert!(storage.exists(&name));
    }

    #[test]
    fn test_create_file_on_duplicated() {
        let (tmp_dir, storage) = get_storage();
        let name = StoredFilename::try_from("1_a.png").unwrap();

        storage.create_file(&name, b"first").unwrap();

        let result = storage.create_file(&name, b"second");
        let Err(StorageError::NameCollision { existing_path }) = result else {
            panic!("Expected NameCollision error, but got {:?}", result);
        };

        assert_eq!(tmp_dir.path().join("1_a.png"), existing_path);
        assert_eq!(b"first".to_vec(), storage.read(&name).unwrap());
    }

    #[test]
    fn test_read_missing() {
        let (_tmp_dir, storage) = get_storage();
        let name = StoredFilename::try_from("1_missing.png").unwrap();

        assert!(matches!(
            storage.read(&name),
            Err(StorageError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_ensure_deleted() {
        let (_tmp_dir, storage) = get_storage();
        let name = StoredFilename::try_from("1_a.png").unwrap();
        storage.create_file(&name, b"abc").unwrap();

        assert!(storage.ensure_deleted(&name).unwrap());
        assert!(!storage.ensure_deleted(&name).unwrap());
        assert!(!storage.exists(&name));
    }
}
