//! Interning of source file names into compact file identifiers.

use std::fmt;
use std::sync::Arc;

use foldhash::HashMap;
use parking_lot::Mutex;

/// Opaque identifier of the source file that requested an allocation.
///
/// The tracker only compares file identifiers; it never needs the file name itself. Identifiers
/// are usually obtained from a [`FileRegistry`] but hook layers that already have their own
/// numbering may use [`FileId::from_raw()`] directly.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FileId(u32);

impl FileId {
    /// Creates a file identifier from a caller-assigned number.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The number behind this identifier.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("#{}", self.0))
    }
}

/// Maps source file names to [`FileId`]s and back.
///
/// Only the last path component is kept, so `src/net/conn.rs` and `C:\work\src\net\conn.rs`
/// both intern as `conn.rs`. Identifiers are assigned densely in order of first use.
///
/// # Examples
///
/// ```
/// use alloc_sites::FileRegistry;
///
/// let files = FileRegistry::new();
///
/// let id = files.intern("src/buffers.rs");
/// assert_eq!(files.intern("buffers.rs"), id);
/// assert_eq!(files.name(id).as_deref(), Some("buffers.rs"));
/// ```
#[derive(Debug, Default)]
pub struct FileRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    ids: HashMap<Arc<str>, FileId>,

    // Indexed by `FileId::as_raw()`.
    names: Vec<Arc<str>>,
}

impl FileRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier of the file, registering it on first use.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` distinct file names are registered.
    pub fn intern(&self, path: &str) -> FileId {
        let name = file_name(path);

        let mut inner = self.inner.lock();

        if let Some(id) = inner.ids.get(name) {
            return *id;
        }

        let id = FileId(
            u32::try_from(inner.names.len())
                .expect("more than u32::MAX distinct source files is not a realistic scenario"),
        );

        let name: Arc<str> = Arc::from(name);
        inner.names.push(Arc::clone(&name));
        inner.ids.insert(name, id);

        id
    }

    /// Returns the file name registered for the identifier, if any.
    #[must_use]
    pub fn name(&self, id: FileId) -> Option<Arc<str>> {
        let index = usize::try_from(id.as_raw()).ok()?;

        self.inner.lock().names.get(index).cloned()
    }

    /// Number of distinct file names registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    /// Whether no file name has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The last component of a path, accepting both `/` and `\` as separators.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
