use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, trace};

use super::{record::ImageRecord, INDEX_FILE};

/// Display row for an image that carries metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub created: String,
}

impl FileInfo {
    /// Build the row from `root/namespace/name/index.yaml`, `None` when the
    /// metadata is missing or unreadable.
    pub fn load(root: &Path, namespace: &str, name: &str) -> Option<Self> {
        let path = root.join(namespace).join(name).join(INDEX_FILE);
        let content = fs::read_to_string(&path).ok()?;
        let record = ImageRecord::from_yaml(&content)
            .map_err(|e| debug!("ignoring unreadable metadata {}: {}", path.display(), e))
            .ok()?;

        Some(FileInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: record.description,
            version: record.version,
            created: record.created,
        })
    }

    pub fn header() -> String {
        format!(
            "{:<50} {:<50} {:<15} {:<20}",
            "Name", "Description", "Version", "Created"
        )
    }
}

impl Display for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<50} {:<50} {:<15} {:<20}",
            format!("{}/{}", self.namespace, self.name),
            self.description,
            self.version,
            self.created
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedImage {
    Described(FileInfo),
    /// Image directory without usable metadata.
    Bare { namespace: String, image: String },
    /// Image stored directly under the root, no namespace.
    Root(String),
}

impl Display for ListedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListedImage::Described(info) => write!(f, "{}", info),
            ListedImage::Bare { namespace, image } => write!(f, "{}/{}", namespace, image),
            ListedImage::Root(name) => write!(f, "{}", name),
        }
    }
}

/// A directory the scan could not read.
#[derive(Debug)]
pub struct ListWarning {
    pub path: PathBuf,
    pub error: io::Error,
}

impl Display for ListWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot read {}: {}", self.path.display(), self.error)
    }
}

#[derive(Debug, Default)]
pub struct Listing {
    pub entries: Vec<ListedImage>,
    pub warnings: Vec<ListWarning>,
}

impl Listing {
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

struct DirEntry {
    name: String,
    is_dir: bool,
}

fn read_sorted(path: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = fs::read_dir(path)?
        .map(|entry| {
            let entry = entry?;
            // lstat semantics: a symlinked directory counts as a plain file
            let is_dir = entry.file_type()?.is_dir();
            Ok(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            })
        })
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Walk `root/<namespace>/<image>` and collect what is stored.
pub fn scan(root: &Path) -> Listing {
    let mut listing = Listing::default();

    let namespaces = match read_sorted(root) {
        Ok(namespaces) => namespaces,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("repository {} does not exist yet", root.display());
            return listing;
        }
        Err(error) => {
            listing.warnings.push(ListWarning {
                path: root.to_path_buf(),
                error,
            });
            return listing;
        }
    };

    for namespace in namespaces.into_iter().filter(|n| n.is_dir) {
        let path = root.join(&namespace.name);
        let entries = read_sorted(&path).unwrap_or_else(|error| {
            listing.warnings.push(ListWarning { path, error });
            Vec::new()
        });

        let mut images = 0;
        let mut files = 0;
        for entry in entries {
            if !entry.is_dir {
                files += 1;
                continue;
            }

            images += 1;
            let listed = match FileInfo::load(root, &namespace.name, &entry.name) {
                Some(info) => ListedImage::Described(info),
                None => ListedImage::Bare {
                    namespace: namespace.name.clone(),
                    image: entry.name,
                },
            };
            trace!("listed {}", listed);
            listing.entries.push(listed);
        }

        if images == 0 && files != 0 {
            listing.entries.push(ListedImage::Root(namespace.name));
        }
    }

    listing
}
