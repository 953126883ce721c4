pub mod listing;
pub mod probe;
pub mod record;

use std::{
    fmt::Display,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, trace};

use self::{
    listing::Listing,
    probe::{FormatProber, HeaderProber, ImageFormat},
    record::ImageRecord,
};

pub const INDEX_FILE: &str = "index.yaml";
pub const TEMPLATE_FILE: &str = "Capstanfile";
const LOCK_FILE: &str = ".lock";

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}: unsupported image format", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("{}: no such file", .path.display())]
    SourceNotFound { path: PathBuf },
    #[error("{name}: no such image")]
    ImageNotFound { name: String },
    #[error("{name}: invalid image name")]
    InvalidName { name: String },
    #[error("{}: mkdir failed", .path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot lock repository at {}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialize(serde_yaml::Error),
    #[error(transparent)]
    Deserialize(serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hypervisor {
    Qemu,
    Vbox,
    Vmware,
}

impl Hypervisor {
    pub fn extension(&self) -> &'static str {
        match self {
            Hypervisor::Qemu => "qemu",
            Hypervisor::Vbox => "vbox",
            Hypervisor::Vmware => "vmware",
        }
    }

    pub fn for_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Qcow2 => Some(Hypervisor::Qemu),
            ImageFormat::Vdi => Some(Hypervisor::Vbox),
            ImageFormat::Vmdk => Some(Hypervisor::Vmware),
            ImageFormat::Unknown => None,
        }
    }
}

impl Display for Hypervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Hypervisor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qemu" => Ok(Hypervisor::Qemu),
            "vbox" => Ok(Hypervisor::Vbox),
            "vmware" => Ok(Hypervisor::Vmware),
            other => Err(format!("unknown hypervisor {}", other)),
        }
    }
}

/// Result of looking up an image file on disk.
#[derive(Debug)]
pub enum ImageStatus {
    Present,
    Absent,
    Inaccessible(io::Error),
}

impl ImageStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, ImageStatus::Present)
    }
}

/// Caller-supplied metadata for an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub version: String,
    pub created: String,
    pub description: String,
    pub build: String,
}

/// Local store of disk images laid out as `root/<name>/<base(name)>.<hypervisor>`.
///
/// Import and remove hold an advisory lock on `root/.lock`; reads never lock.
pub struct Repository {
    root: PathBuf,
    prober: Box<dyn FormatProber>,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_prober(root, Box::new(HeaderProber))
    }

    pub fn with_prober(root: impl Into<PathBuf>, prober: Box<dyn FormatProber>) -> Self {
        Self {
            root: root.into(),
            prober,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Always under the root: root, prefix, `.` and `..` components of
    /// `name` are dropped.
    pub fn image_path(&self, hypervisor: Hypervisor, name: &str) -> PathBuf {
        let relative = relative_name(name);
        let base = relative
            .file_name()
            .map(|base| base.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.root
            .join(relative)
            .join(format!("{}.{}", base, hypervisor))
    }

    /// Directory of a stored image. Names that do not point below the root
    /// are rejected.
    fn image_dir(&self, name: &str) -> Result<PathBuf, Error> {
        let has_parent = Path::new(name)
            .components()
            .any(|c| c == Component::ParentDir);
        let relative = relative_name(name);
        if has_parent || relative.as_os_str().is_empty() {
            return Err(Error::InvalidName {
                name: name.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }

    /// Copy `source` into the repository under `name` and write its metadata.
    ///
    /// Returns the path of the stored image. A failure while writing the
    /// metadata leaves the copied image in place.
    pub fn import_image(
        &self,
        name: &str,
        source: &Path,
        options: &ImportOptions,
    ) -> Result<PathBuf, Error> {
        let dir = self.image_dir(name)?;
        let format = self.prober.probe(source).map_err(|e| {
            debug!("probing {} failed: {}", source.display(), e);
            if e.kind() == io::ErrorKind::NotFound {
                Error::SourceNotFound {
                    path: source.to_path_buf(),
                }
            } else {
                Error::UnsupportedFormat {
                    path: source.to_path_buf(),
                }
            }
        })?;
        let hypervisor = Hypervisor::for_format(format).ok_or_else(|| Error::UnsupportedFormat {
            path: source.to_path_buf(),
        })?;

        if !source.exists() {
            return Err(Error::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        info!("Importing {}...", name);

        let _lock = self.lock()?;

        let destination = self.image_path(hypervisor, name);
        create_dirs(&dir).map_err(|source| Error::DirectoryCreateFailed {
            path: dir.clone(),
            source,
        })?;

        debug!(
            "copying {} ({}) to {}",
            source.display(),
            format,
            destination.display()
        );
        fs::copy(source, &destination)?;

        let record = ImageRecord::new(
            &options.version,
            &options.created,
            &options.description,
            &options.build,
        );
        let content = record.to_yaml().map_err(Error::Serialize)?;
        write_metadata(&dir.join(INDEX_FILE), content.as_bytes())?;

        trace!("imported {} as {}", name, destination.display());
        Ok(destination)
    }

    pub fn image_status(&self, hypervisor: Hypervisor, name: &str) -> ImageStatus {
        match fs::metadata(self.image_path(hypervisor, name)) {
            Ok(_) => ImageStatus::Present,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ImageStatus::Absent,
            Err(e) => ImageStatus::Inaccessible(e),
        }
    }

    pub fn image_exists(&self, hypervisor: Hypervisor, name: &str) -> bool {
        self.image_status(hypervisor, name).is_present()
    }

    /// Delete `root/name` with every hypervisor variant and its metadata.
    pub fn remove_image(&self, name: &str) -> Result<(), Error> {
        let path = self.image_dir(name)?;
        if !path.exists() {
            return Err(Error::ImageNotFound {
                name: name.to_string(),
            });
        }

        info!("Removing {}...", name);

        let _lock = self.lock()?;
        fs::remove_dir_all(&path)?;

        debug!("removed {}", path.display());
        Ok(())
    }

    pub fn image_record(&self, name: &str) -> Result<ImageRecord, Error> {
        let content = fs::read_to_string(self.image_dir(name)?.join(INDEX_FILE))?;
        ImageRecord::from_yaml(&content).map_err(Error::Deserialize)
    }

    pub fn list_images(&self) -> Listing {
        listing::scan(&self.root)
    }

    fn lock(&self) -> Result<RepositoryLock, Error> {
        let path = self.root.join(LOCK_FILE);
        let lock_err = |source| Error::Lock {
            path: path.clone(),
            source,
        };

        create_dirs(&self.root).map_err(|source| Error::DirectoryCreateFailed {
            path: self.root.clone(),
            source,
        })?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        trace!("waiting for {}", path.display());
        file.lock_exclusive().map_err(lock_err)?;

        Ok(RepositoryLock { _file: file })
    }
}

/// Held for the duration of a mutating operation, closing the file releases the lock.
struct RepositoryLock {
    _file: File,
}

fn relative_name(name: &str) -> PathBuf {
    Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Name of the image described by a `Capstanfile` in the working directory.
pub fn default_image() -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    default_image_in(&cwd)
}

pub fn default_image_in(dir: &Path) -> Option<String> {
    if !dir.join(TEMPLATE_FILE).is_file() {
        return None;
    }

    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(unix)]
fn create_dirs(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o775).create(path)
}

#[cfg(not(unix))]
fn create_dirs(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Write to a temp file in the same directory, then rename it over `path`.
fn write_metadata(path: &Path, content: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    if let Err(e) = write_synced(&temp, content) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    fs::rename(&temp, path)
}

fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
