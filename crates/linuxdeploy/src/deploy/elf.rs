use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::tools;

use super::{DeployerInner, PathMsg};

pub(super) fn run_rpath_consumer(inner: Arc<DeployerInner>, rx: Receiver<PathMsg>) {
    let patchelf = tools::find_tool("patchelf");
    if patchelf.is_none() {
        inner.log("warning: patchelf cannot be found; RPATH fixing disabled");
    }

    let mut fixed = BTreeSet::<PathBuf>::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            PathMsg::Path(destination, token) => {
                if let Some(patchelf) = patchelf.as_deref() {
                    if fixed.insert(destination.clone()) {
                        fix_rpath(&inner, patchelf, &destination);
                    } else {
                        inner.log(&format!(
                            "RPATH has already been fixed for {}",
                            destination.display()
                        ));
                    }
                }
                // Strip runs after the rpath stage even when patchelf is
                // unavailable.
                inner.add_strip_task(destination);
                drop(token);
            }
            PathMsg::Shutdown => break,
        }
    }
    inner.log("rpath change requests processing finished");
}

fn fix_rpath(inner: &DeployerInner, patchelf: &Path, destination: &Path) {
    let Some(parent) = destination.parent() else {
        inner.log(&format!(
            "warning: no parent directory for {}",
            destination.display()
        ));
        return;
    };
    let Some(relative) = relative_path(parent, &inner.dest_root) else {
        inner.log(&format!(
            "warning: cannot relate {} to {}",
            parent.display(),
            inner.dest_root.display()
        ));
        return;
    };

    let rpath = format!("$ORIGIN:$ORIGIN/{}/lib/", relative.display());
    inner.log(&format!(
        "changing RPATH for {} to {}",
        destination.display(),
        rpath
    ));

    let args = [
        OsStr::new("--set-rpath"),
        OsStr::new(&rpath),
        destination.as_os_str(),
    ];
    if let Err(e) = tools::run_status(patchelf, args) {
        inner.log(&format!("warning: {e}"));
    }
}

pub(super) fn run_strip_consumer(inner: Arc<DeployerInner>, rx: Receiver<PathMsg>) {
    let strip = if inner.strip_enabled {
        let found = tools::find_tool("strip");
        if found.is_none() {
            inner.log("warning: strip cannot be found; stripping disabled");
        }
        found
    } else {
        None
    };

    let mut stripped = BTreeSet::<PathBuf>::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            PathMsg::Path(destination, token) => {
                if let Some(strip) = strip.as_deref() {
                    if stripped.insert(destination.clone()) {
                        inner.log(&format!("running strip on {}", destination.display()));
                        if let Err(e) = tools::run_status(strip, [destination.as_os_str()]) {
                            inner.log(&format!("warning: {e}"));
                        }
                    } else {
                        inner.log(&format!(
                            "{} has already been stripped",
                            destination.display()
                        ));
                    }
                }
                drop(token);
            }
            PathMsg::Shutdown => break,
        }
    }
    inner.log("strip requests processing finished");
}

/// Relative path from `from` to `to`. Both must be absolute or both
/// relative; `.` and redundant separators are ignored.
pub fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    if from.is_absolute() != to.is_absolute() {
        return None;
    }

    let from: Vec<Component<'_>> = from
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to: Vec<Component<'_>> = to
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_walks_up_to_root() {
        assert_eq!(
            relative_path(Path::new("/appdir/lib"), Path::new("/appdir")),
            Some(PathBuf::from(".."))
        );
        assert_eq!(
            relative_path(Path::new("/appdir/plugins/platforms"), Path::new("/appdir")),
            Some(PathBuf::from("../.."))
        );
    }

    #[test]
    fn relative_path_of_equal_dirs_is_dot() {
        assert_eq!(
            relative_path(Path::new("/appdir"), Path::new("/appdir")),
            Some(PathBuf::from("."))
        );
    }

    #[test]
    fn relative_path_crosses_siblings() {
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/c/d")),
            Some(PathBuf::from("../c/d"))
        );
    }

    #[test]
    fn relative_path_rejects_mixed_absoluteness() {
        assert_eq!(relative_path(Path::new("/a"), Path::new("b")), None);
    }

    #[test]
    fn rpath_formula_for_lib_dir() {
        // A library in <appdir>/lib searches $ORIGIN and $ORIGIN/../lib/.
        let dest = Path::new("/appdir/lib/libfoo.so.1");
        let rel = relative_path(dest.parent().expect("parent"), Path::new("/appdir"))
            .expect("relative");
        assert_eq!(
            format!("$ORIGIN:$ORIGIN/{}/lib/", rel.display()),
            "$ORIGIN:$ORIGIN/../lib/"
        );
    }

    #[test]
    fn rpath_formula_for_appdir_root() {
        let dest = Path::new("/appdir/hello");
        let rel = relative_path(dest.parent().expect("parent"), Path::new("/appdir"))
            .expect("relative");
        assert_eq!(
            format!("$ORIGIN:$ORIGIN/{}/lib/", rel.display()),
            "$ORIGIN:$ORIGIN/./lib/"
        );
    }
}
