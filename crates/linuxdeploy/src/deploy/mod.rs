mod copy;
mod elf;
mod libs;
pub mod pending;
pub mod request;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::blacklist;
use crate::error::{Error, Result};
use crate::ldd::LibraryResolver;
use crate::logging::LogSink;
use crate::qt::{self, QtEnv};
use crate::tools;

use pending::{PendingWork, WorkToken};
use request::{DeployFlags, DeployRequest};

pub use elf::relative_path;

/// Message on the libs, copy, and qt-library queues. The token inside a job
/// keeps the pending-work latch closed until the consumer finishes it.
pub(crate) enum TaskMsg {
    Deploy(DeployRequest, WorkToken),
    Shutdown,
}

/// Message on the rpath and strip queues.
pub(crate) enum PathMsg {
    Path(PathBuf, WorkToken),
    Shutdown,
}

struct Senders {
    libs: Sender<TaskMsg>,
    copy: Sender<TaskMsg>,
    qt: Sender<PathMsg>,
    rpath: Sender<PathMsg>,
    strip: Sender<PathMsg>,
}

/// Everything the run needs.
pub struct DeployConfig {
    pub exe_path: PathBuf,
    pub destination_root: PathBuf,
    pub extra_lib_dirs: Vec<String>,
    pub qml_import_dirs: Vec<PathBuf>,
    pub qmake_hint: Option<String>,
    pub strip_enabled: bool,
    pub blacklist_file: Option<PathBuf>,
    pub include_default_blacklist: bool,
}

/// Shared state of one deployment run. Consumers receive it behind an Arc;
/// the Qt environment and tool paths are immutable after construction.
pub(crate) struct DeployerInner {
    pub(crate) dest_root: PathBuf,
    pub(crate) exe_path: PathBuf,
    pub(crate) strip_enabled: bool,
    pub(crate) ldd_path: PathBuf,
    pub(crate) qt: QtEnv,
    pub(crate) qml_import_dirs: Vec<PathBuf>,
    pub(crate) resolver: LibraryResolver,
    processed: Mutex<BTreeSet<PathBuf>>,
    pub(crate) translations_required: Mutex<BTreeSet<String>>,
    pub(crate) pending: Arc<PendingWork>,
    pub(crate) sink: Arc<dyn LogSink>,
    chans: Senders,
}

impl DeployerInner {
    pub(crate) fn log(&self, msg: &str) {
        self.sink.line(msg);
    }

    pub(crate) fn is_processed(&self, path: &Path) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Record a path as accounted for. Returns false when it already was.
    pub(crate) fn mark_processed(&self, path: &Path) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf())
    }

    pub(crate) fn add_lib_task(
        &self,
        source_root: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        flags: DeployFlags,
    ) {
        let token = self.pending.enter();
        let req = DeployRequest::new(source_root, source_path, target_path, flags);
        if self.chans.libs.send(TaskMsg::Deploy(req, token)).is_err() {
            self.log("warning: libs queue is closed");
        }
    }

    pub(crate) fn add_copy_task(
        &self,
        source_root: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        flags: DeployFlags,
    ) {
        let token = self.pending.enter();
        let req = DeployRequest::new(source_root, source_path, target_path, flags);
        if self.chans.copy.send(TaskMsg::Deploy(req, token)).is_err() {
            self.log("warning: copy queue is closed");
        }
    }

    pub(crate) fn add_fix_rpath_task(&self, destination: PathBuf) {
        let token = self.pending.enter();
        if self.chans.rpath.send(PathMsg::Path(destination, token)).is_err() {
            self.log("warning: rpath queue is closed");
        }
    }

    /// No-op when stripping is disabled for the run.
    pub(crate) fn add_strip_task(&self, destination: PathBuf) {
        if !self.strip_enabled {
            return;
        }
        let token = self.pending.enter();
        if self.chans.strip.send(PathMsg::Path(destination, token)).is_err() {
            self.log("warning: strip queue is closed");
        }
    }

    /// No-op when the Qt environment could not be queried.
    pub(crate) fn add_qt_lib_task(&self, destination: PathBuf) {
        if !self.qt.is_set() {
            self.log("Qt environment is not set");
            return;
        }
        let token = self.pending.enter();
        if self.chans.qt.send(PathMsg::Path(destination, token)).is_err() {
            self.log("warning: qt queue is closed");
        }
    }

    /// Enqueue a plain copy task for every regular file under `root/path`.
    /// The walk runs on its own thread and counts as pending work itself.
    pub(crate) fn copy_recursively(
        self: &Arc<Self>,
        source_root: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
    ) {
        let source_root = source_root.into();
        let source_path = source_path.into();
        let target_path = target_path.into();
        let token = self.pending.enter();
        let inner = Arc::clone(self);

        std::thread::spawn(move || {
            let _walk = token;
            let rootpath = source_root.join(&source_path);
            inner.log(&format!(
                "copying recursively {} into {}",
                rootpath.display(),
                target_path.display()
            ));
            inner.walk_regular_files(&rootpath, |path| {
                let Ok(rel) = path.strip_prefix(&source_root) else {
                    return;
                };
                inner.add_copy_task(&source_root, rel, &target_path, DeployFlags::NONE);
            });
        });
    }

    /// Walk `root/path`: libraries become ldd-inspected lib tasks keeping the
    /// caller's flags; other files become plain copies unless the request is
    /// libraries-only.
    pub(crate) fn deploy_recursively(
        self: &Arc<Self>,
        source_root: impl Into<PathBuf>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        flags: DeployFlags,
    ) {
        let source_root = source_root.into();
        let source_path = source_path.into();
        let target_path = target_path.into();
        let token = self.pending.enter();
        let inner = Arc::clone(self);

        std::thread::spawn(move || {
            let _walk = token;
            let rootpath = source_root.join(&source_path);
            inner.log(&format!(
                "deploying recursively {} in {}",
                source_root.display(),
                source_path.display()
            ));
            inner.walk_regular_files(&rootpath, |path| {
                let Ok(rel) = path.strip_prefix(&source_root) else {
                    return;
                };
                if is_library_name(path) {
                    inner.add_lib_task(
                        &source_root,
                        rel,
                        &target_path,
                        flags | DeployFlags::LDD_DEPENDENCY,
                    );
                } else if !flags.contains(DeployFlags::ONLY_LIBRARIES) {
                    inner.add_copy_task(&source_root, rel, &target_path, DeployFlags::NONE);
                }
            });
        });
    }

    fn walk_regular_files(&self, root: &Path, mut visit: impl FnMut(&Path)) {
        for entry in walkdir::WalkDir::new(root) {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() {
                        visit(entry.path());
                    }
                }
                Err(e) => self.log(&format!("warning: walk of {}: {e}", root.display())),
            }
        }
    }
}

fn is_library_name(path: &Path) -> bool {
    let Some(basename) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    basename.starts_with("lib") && basename.contains(".so")
}

pub struct AppDeployer {
    config: DeployConfig,
    sink: Arc<dyn LogSink>,
}

impl AppDeployer {
    pub fn new(config: DeployConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    /// Run the whole pipeline to completion: wipe the destination, deploy
    /// the executable and everything it drags in, merge translations, then
    /// sweep blacklisted libraries.
    pub fn deploy(self) -> Result<()> {
        let AppDeployer { config, sink } = self;

        if !config.exe_path.is_file() {
            return Err(Error::msg(format!(
                "target executable not found: {}",
                config.exe_path.display()
            )));
        }

        let Some(ldd_path) = tools::find_tool("ldd") else {
            return Err(Error::msg("ldd cannot be found"));
        };

        recreate_destination(&config.destination_root)?;
        sink.line(&format!(
            "created directory {}",
            config.destination_root.display()
        ));

        let qmake = qt::resolve_qmake(config.qmake_hint.as_deref());
        let qt_env = QtEnv::query(qmake.as_deref(), sink.as_ref());

        let exe_dir = config
            .exe_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let mut resolver = LibraryResolver::new();
        for dir in &config.extra_lib_dirs {
            resolver.add_search_dir(dir, &exe_dir, sink.as_ref());
        }

        let (libs_tx, libs_rx) = channel();
        let (copy_tx, copy_rx) = channel();
        let (qt_tx, qt_rx) = channel();
        let (rpath_tx, rpath_rx) = channel();
        let (strip_tx, strip_rx) = channel();

        let inner = Arc::new(DeployerInner {
            dest_root: config.destination_root.clone(),
            exe_path: config.exe_path.clone(),
            strip_enabled: config.strip_enabled,
            ldd_path,
            qt: qt_env,
            qml_import_dirs: config.qml_import_dirs.clone(),
            resolver,
            processed: Mutex::new(BTreeSet::new()),
            translations_required: Mutex::new(BTreeSet::new()),
            pending: PendingWork::new(),
            sink: Arc::clone(&sink),
            chans: Senders {
                libs: libs_tx,
                copy: copy_tx,
                qt: qt_tx,
                rpath: rpath_tx,
                strip: strip_tx,
            },
        });

        let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        handles.push(("copy", spawn_consumer(&inner, copy_rx, copy::run_copy_consumer)));
        handles.push(("rpath", spawn_consumer(&inner, rpath_rx, elf::run_rpath_consumer)));
        handles.push(("strip", spawn_consumer(&inner, strip_rx, elf::run_strip_consumer)));
        handles.push(("qt", spawn_consumer(&inner, qt_rx, qt::fanout::run_qt_consumer)));

        if inner.qt.is_set() {
            let token = inner.pending.enter();
            let qml_inner = Arc::clone(&inner);
            std::thread::spawn(move || {
                let _work = token;
                qt::qml::deploy_qml_imports(&qml_inner);
            });
        }

        create_app_run_link(&inner);

        let seeded = process_main_exe(&inner);
        handles.push(("libs", spawn_consumer(&inner, libs_rx, libs::run_libs_consumer)));

        if seeded.is_ok() {
            inner.log("waiting for processing to finish");
            inner.pending.wait_idle();
            inner.log("processing has finished");
        }

        shutdown_consumers(&inner, handles);
        seeded?;

        qt::translations::deploy_qt_translations(&inner);

        let loaded = blacklist::load_blacklist(
            config.blacklist_file.as_deref(),
            config.include_default_blacklist,
            sink.as_ref(),
        );
        blacklist::remove_blacklisted(&inner.dest_root.join("lib"), &loaded, sink.as_ref());

        sink.line("deployment finished");
        Ok(())
    }
}

fn recreate_destination(dest: &Path) -> Result<()> {
    match fs::remove_dir_all(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::msg(format!(
                "failed to clear {}: {e}",
                dest.display()
            )));
        }
    }
    fs::create_dir_all(dest)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", dest.display())))
}

fn spawn_consumer<M: Send + 'static>(
    inner: &Arc<DeployerInner>,
    rx: Receiver<M>,
    body: fn(Arc<DeployerInner>, Receiver<M>),
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    std::thread::spawn(move || body(inner, rx))
}

/// Seed the pipeline with the main executable: copy it to the AppDir root
/// and fan out its direct dependencies. Failure here is fatal for the run.
fn process_main_exe(inner: &Arc<DeployerInner>) -> Result<()> {
    inner.add_copy_task(
        "",
        &inner.exe_path,
        ".",
        DeployFlags::LDD_DEPENDENCY | DeployFlags::FIX_RPATH,
    );

    let dependencies = libs::ldd_dependencies(inner, &inner.exe_path).map_err(|e| {
        Error::msg(format!(
            "dependency check of {} failed: {e}",
            inner.exe_path.display()
        ))
    })?;

    inner.mark_processed(&inner.exe_path);

    for dep in dependencies {
        if inner.is_processed(&dep) {
            inner.log(&format!("dependency already processed: {}", dep.display()));
            continue;
        }
        inner.add_lib_task(
            "",
            dep,
            "lib",
            DeployFlags::LDD_DEPENDENCY | DeployFlags::FIX_RPATH,
        );
    }

    inner.log("main exe processing finished");
    Ok(())
}

#[cfg(unix)]
fn create_app_run_link(inner: &DeployerInner) {
    use std::os::unix::fs as unix_fs;

    let Some(basename) = inner.exe_path.file_name() else {
        return;
    };
    let link = inner.dest_root.join("AppRun");
    match unix_fs::symlink(basename, &link) {
        Ok(()) => inner.log(&format!(
            "created AppRun -> {}",
            Path::new(basename).display()
        )),
        Err(e) => inner.log(&format!("warning: failed to create AppRun link: {e}")),
    }
}

#[cfg(not(unix))]
fn create_app_run_link(_inner: &DeployerInner) {}

fn shutdown_consumers(inner: &Arc<DeployerInner>, handles: Vec<(&'static str, JoinHandle<()>)>) {
    let _ = inner.chans.libs.send(TaskMsg::Shutdown);
    let _ = inner.chans.copy.send(TaskMsg::Shutdown);
    let _ = inner.chans.qt.send(PathMsg::Shutdown);
    let _ = inner.chans.rpath.send(PathMsg::Shutdown);
    let _ = inner.chans.strip.send(PathMsg::Shutdown);

    for (name, handle) in handles {
        if handle.join().is_err() {
            inner.log(&format!("warning: {name} consumer panicked"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_names_match_lib_prefix_and_so_marker() {
        assert!(is_library_name(Path::new("/x/libfoo.so")));
        assert!(is_library_name(Path::new("/x/libfoo.so.5.1")));
        assert!(!is_library_name(Path::new("/x/qmldir")));
        assert!(!is_library_name(Path::new("/x/foo.so")));
        assert!(!is_library_name(Path::new("/x/libREADME.txt")));
    }

    #[test]
    fn recreate_destination_wipes_existing_tree() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dest = tmp.path().join("appdir");
        fs::create_dir_all(dest.join("stale")).expect("mkdir stale");
        fs::write(dest.join("stale/file"), b"x").expect("write stale");

        recreate_destination(&dest).expect("recreate");
        assert!(dest.is_dir());
        assert!(!dest.join("stale").exists());
    }
}
