use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::error::{Error, Result};

use super::request::{DeployFlags, DeployRequest};
use super::{DeployerInner, TaskMsg};

pub(super) fn run_copy_consumer(inner: Arc<DeployerInner>, rx: Receiver<TaskMsg>) {
    // Destination paths written so far. Owned by this consumer; the second
    // request for a destination is a log line, not a second write.
    let mut copied = BTreeSet::<PathBuf>::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            TaskMsg::Deploy(req, token) => {
                process_copy_task(&inner, &mut copied, req);
                drop(token);
            }
            TaskMsg::Shutdown => break,
        }
    }
    inner.log("copy requests processing finished");
}

fn process_copy_task(inner: &DeployerInner, copied: &mut BTreeSet<PathBuf>, req: DeployRequest) {
    let basename = req.basename();
    if basename.is_empty() {
        inner.log(&format!(
            "warning: copy request without a file name: {}",
            req.source_path.display()
        ));
        return;
    }

    let source = req.full_path();
    let destination = destination_for(&inner.dest_root, &req);

    if copied.contains(&destination) {
        inner.log(&format!("already copied to {}", destination.display()));
        return;
    }

    if let Err(e) = copy_file_contents(&source, &destination) {
        inner.log(&format!(
            "warning: failed to copy {} to {}: {e}",
            source.display(),
            destination.display()
        ));
        return;
    }

    copied.insert(destination.clone());
    inner.log(&format!(
        "copied {} to {}",
        source.display(),
        destination.display()
    ));

    // Qt libraries take the qt route; that stage schedules their rpath fix.
    if req.flags.contains(DeployFlags::LDD_DEPENDENCY)
        && basename.to_lowercase().starts_with("libqt")
    {
        inner.add_qt_lib_task(destination);
    } else if req.flags.contains(DeployFlags::FIX_RPATH) {
        inner.add_fix_rpath_task(destination);
    }
}

/// Destination path for a request: requests with a source root keep their
/// sub-tree shape under the target directory; absolute requests land flat.
pub(super) fn destination_for(dest_root: &Path, req: &DeployRequest) -> PathBuf {
    let prefix = if req.source_root.as_os_str().is_empty() {
        req.target_path.clone()
    } else {
        req.target_path.join(req.source_dir())
    };

    let mut destination = dest_root.to_path_buf();
    for component in prefix.components() {
        if !matches!(component, Component::CurDir) {
            destination.push(component.as_os_str());
        }
    }
    destination.push(req.basename());
    destination
}

fn copy_file_contents(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create {}: {e}", parent.display())))?;
    }

    let mut input = File::open(src)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", src.display())))?;
    let metadata = input
        .metadata()
        .map_err(|e| Error::msg(format!("failed to stat {}: {e}", src.display())))?;
    let mut output = File::create(dst)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", dst.display())))?;

    io::copy(&mut input, &mut output)
        .map_err(|e| Error::msg(format!("copy to {} failed: {e}", dst.display())))?;
    output
        .set_permissions(metadata.permissions())
        .map_err(|e| Error::msg(format!("failed to set mode on {}: {e}", dst.display())))?;
    output
        .sync_all()
        .map_err(|e| Error::msg(format!("sync of {} failed: {e}", dst.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_request_lands_flat_in_target() {
        let req = DeployRequest::new("", "/usr/lib/libfoo.so.1", "lib", DeployFlags::NONE);
        assert_eq!(
            destination_for(Path::new("/appdir"), &req),
            PathBuf::from("/appdir/lib/libfoo.so.1")
        );
    }

    #[test]
    fn main_exe_target_dot_lands_at_root() {
        let req = DeployRequest::new("", "/home/user/hello", ".", DeployFlags::NONE);
        assert_eq!(
            destination_for(Path::new("/appdir"), &req),
            PathBuf::from("/appdir/hello")
        );
    }

    #[test]
    fn rooted_request_preserves_subtree() {
        let req = DeployRequest::new(
            "/opt/qt/plugins",
            "platforms/libqxcb.so",
            "plugins",
            DeployFlags::NONE,
        );
        assert_eq!(
            destination_for(Path::new("/appdir"), &req),
            PathBuf::from("/appdir/plugins/platforms/libqxcb.so")
        );
    }

    #[test]
    fn rooted_request_at_root_level_drops_dot_component() {
        let req = DeployRequest::new("/opt/qt/libexec", "QtWebEngineProcess", "libexecs", DeployFlags::NONE);
        assert_eq!(
            destination_for(Path::new("/appdir"), &req),
            PathBuf::from("/appdir/libexecs/QtWebEngineProcess")
        );
    }

    #[test]
    fn copy_preserves_contents_and_mode() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("input");
        let dst = tmp.path().join("nested/dir/output");
        fs::write(&src, b"payload").expect("write src");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).expect("chmod src");
        }

        copy_file_contents(&src, &dst).expect("copy");
        assert_eq!(fs::read(&dst).expect("read dst"), b"payload");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dst).expect("stat dst").permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
