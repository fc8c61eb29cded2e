use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use crate::deploy::request::DeployFlags;
use crate::deploy::{DeployerInner, PathMsg};

use super::qtcore;
use super::translations;

pub(crate) fn run_qt_consumer(inner: Arc<DeployerInner>, rx: Receiver<PathMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            PathMsg::Path(library_path, token) => {
                process_qt_lib(&inner, &library_path);
                // Every deployed Qt library gets its RPATH rewritten; the
                // copy stage deliberately left that to this stage.
                inner.add_fix_rpath_task(library_path);
                drop(token);
            }
            PathMsg::Shutdown => break,
        }
    }
    inner.log("Qt libraries processing finished");
}

/// Schedule the plugins, QML trees, resources, and translation sources a
/// recognised Qt module drags along.
fn process_qt_lib(inner: &Arc<DeployerInner>, library_path: &Path) {
    let basename = library_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = basename.to_lowercase();

    if !name.starts_with("libqt") {
        inner.log(&format!(
            "warning: not a Qt library: {}",
            library_path.display()
        ));
        return;
    }

    inner.log(&format!("inspecting Qt library {basename}"));
    translations::account_qt_library(inner, &name);

    let deploy_flags =
        DeployFlags::LDD_DEPENDENCY | DeployFlags::ONLY_LIBRARIES | DeployFlags::FIX_RPATH;
    let plugins = inner.qt.plugins_path();

    if name.starts_with("libqt5gui") {
        add_qt_plugin_task(inner, "platforms/libqxcb.so");
        inner.deploy_recursively(&plugins, "imageformats", "plugins", deploy_flags);
    } else if name.starts_with("libqt5svg") {
        add_qt_plugin_task(inner, "iconengines/libqsvgicon.so");
    } else if name.starts_with("libqt5printsupport") {
        add_qt_plugin_task(inner, "printsupport/libcupsprintersupport.so");
    } else if name.starts_with("libqt5opengl") || name.starts_with("libqt5xcbqpa") {
        inner.deploy_recursively(&plugins, "xcbglintegrations", "plugins", deploy_flags);
    } else if name.starts_with("libqt5network") {
        inner.deploy_recursively(&plugins, "bearer", "plugins", deploy_flags);
    } else if name.starts_with("libqt5sql") {
        inner.deploy_recursively(&plugins, "sqldrivers", "plugins", deploy_flags);
    } else if name.starts_with("libqt5multimedia") {
        inner.deploy_recursively(&plugins, "mediaservice", "plugins", deploy_flags);
        inner.deploy_recursively(&plugins, "audio", "plugins", deploy_flags);
    } else if name.starts_with("libqt5webenginecore") {
        add_qt_dep_copy_task(
            inner,
            inner.qt.libexecs_path(),
            "QtWebEngineProcess",
            "libexecs",
        );
        inner.copy_recursively(inner.qt.data_path(), "resources", ".");
        inner.copy_recursively(
            inner.qt.translations_path(),
            "qtwebengine_locales",
            "translations",
        );
    } else if name.starts_with("libqt5core") {
        patch_qtcore_async(inner, library_path.to_path_buf());
    }
}

fn add_qt_plugin_task(inner: &DeployerInner, relpath: &str) {
    inner.log(&format!("deploying additional Qt plugin: {relpath}"));
    inner.add_lib_task(
        inner.qt.plugins_path(),
        relpath,
        "plugins",
        DeployFlags::FIX_RPATH,
    );
}

fn add_qt_dep_copy_task(
    inner: &DeployerInner,
    source_root: PathBuf,
    source_path: &str,
    target_path: &str,
) {
    inner.log(&format!(
        "copying once {} into {}",
        source_root.join(source_path).display(),
        target_path
    ));
    inner.add_copy_task(source_root, source_path, target_path, DeployFlags::FIX_RPATH);
}

// The patch rewrites the already-deployed copy in place; it runs off the
// consumer thread so a large QtCore does not stall plugin fan-out.
fn patch_qtcore_async(inner: &Arc<DeployerInner>, library_path: PathBuf) {
    let token = inner.pending.enter();
    let inner = Arc::clone(inner);
    std::thread::spawn(move || {
        let _work = token;
        inner.log(&format!("patching QtCore at {}", library_path.display()));
        match qtcore::patch_qtcore(&library_path, inner.sink.as_ref()) {
            Ok(()) => inner.log(&format!("patched {}", library_path.display())),
            Err(e) => inner.log(&format!("warning: QtCore patching failed: {e}")),
        }
    });
}
