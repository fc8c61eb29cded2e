use std::ops::BitOr;
use std::path::{Path, PathBuf};

/// Bit-set over the per-request deployment behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeployFlags(u8);

impl DeployFlags {
    pub const NONE: DeployFlags = DeployFlags(0);
    /// Inspect the file with ldd and fan out its dependencies.
    pub const LDD_DEPENDENCY: DeployFlags = DeployFlags(1);
    /// Rewrite the deployed copy's RPATH to $ORIGIN-relative form.
    pub const FIX_RPATH: DeployFlags = DeployFlags(1 << 1);
    /// During recursive deployment, ignore files that are not libraries.
    pub const ONLY_LIBRARIES: DeployFlags = DeployFlags(1 << 2);

    pub fn contains(self, other: DeployFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: DeployFlags) -> DeployFlags {
        DeployFlags(self.0 | other.0)
    }

    pub fn without(self, other: DeployFlags) -> DeployFlags {
        DeployFlags(self.0 & !other.0)
    }
}

impl BitOr for DeployFlags {
    type Output = DeployFlags;

    fn bitor(self, rhs: DeployFlags) -> DeployFlags {
        self.with(rhs)
    }
}

/// Unit of work on the libs, copy, and qt queues.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Directory prefix; empty means `source_path` is already absolute.
    pub source_root: PathBuf,
    /// Path relative to `source_root` (absolute when the root is empty).
    pub source_path: PathBuf,
    /// Destination-relative directory (".", "lib", "plugins", ...).
    pub target_path: PathBuf,
    pub flags: DeployFlags,
}

impl DeployRequest {
    pub fn new(
        source_root: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        flags: DeployFlags,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            source_path: source_path.into(),
            target_path: target_path.into(),
            flags,
        }
    }

    pub fn full_path(&self) -> PathBuf {
        if self.source_root.as_os_str().is_empty() {
            self.source_path.clone()
        } else {
            self.source_root.join(&self.source_path)
        }
    }

    pub fn basename(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn source_dir(&self) -> &Path {
        self.source_path.parent().unwrap_or(Path::new(""))
    }
}
