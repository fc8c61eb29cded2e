use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser};

use linuxdeploy::deploy::{AppDeployer, DeployConfig};
use linuxdeploy::logging::{FileSink, LogSink};
use linuxdeploy::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "linuxdeploy", version, about)]
struct CliArgs {
    /// Type of the generated output
    #[arg(long = "out", default_value = "appimage")]
    out_type: String,

    /// Path to the additional libraries blacklist file
    #[arg(long, default_value = "libs.blacklist")]
    blacklist: PathBuf,

    /// Add the built-in blacklist
    #[arg(long = "default-blacklist", default_value_t = false)]
    default_blacklist: bool,

    /// Generate a desktop file (handled outside the deployment core)
    #[arg(long = "gen-desktop", default_value_t = false)]
    gen_desktop: bool,

    /// Path to the logfile
    #[arg(long, default_value = "linuxdeploy.log")]
    log: PathBuf,

    /// Tee logs to stdout as well as the logfile
    #[arg(long, default_value_t = false)]
    stdout: bool,

    /// Path to the target executable
    #[arg(long)]
    exe: PathBuf,

    /// Path to the executable's icon (used for the desktop file)
    #[arg(long)]
    icon: Option<PathBuf>,

    /// Path to the AppDir to assemble
    #[arg(long)]
    appdir: PathBuf,

    /// Overwrite the AppDir if it already exists
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Path to qmake
    #[arg(long)]
    qmake: Option<String>,

    /// QML imports dir for the scanner (repeatable)
    #[arg(long = "qmldir", action = ArgAction::Append, value_name = "DIR")]
    qmldir: Vec<PathBuf>,

    /// Additional library search path (repeatable)
    #[arg(long = "libs", action = ArgAction::Append, value_name = "DIR")]
    libs: Vec<String>,

    /// Run strip on deployed binaries
    #[arg(long, default_value_t = false)]
    strip: bool,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    preflight(&args)?;

    let sink = Arc::new(FileSink::open(&args.log, args.stdout)?);

    if args.gen_desktop || args.icon.is_some() {
        sink.line("desktop file and icon handling happen outside the deployer; ignoring");
    }

    let config = DeployConfig {
        exe_path: absolutize(&args.exe),
        destination_root: absolutize(&args.appdir),
        extra_lib_dirs: args.libs,
        qml_import_dirs: args.qmldir,
        qmake_hint: args.qmake,
        strip_enabled: args.strip,
        blacklist_file: Some(args.blacklist),
        include_default_blacklist: args.default_blacklist,
    };

    AppDeployer::new(config, sink).deploy()
}

fn preflight(args: &CliArgs) -> Result<()> {
    if args.out_type != "appimage" {
        return Err(Error::msg(format!(
            "only the appimage output type is supported, got '{}'",
            args.out_type
        )));
    }

    if !args.exe.is_file() {
        return Err(Error::msg(format!(
            "target executable not found: {}",
            args.exe.display()
        )));
    }

    if args.appdir.is_dir() && !args.overwrite {
        return Err(Error::msg(
            "AppDir already exists. Set --overwrite to replace it",
        ));
    }

    Ok(())
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args_for(exe: &Path, appdir: &Path, extra: &[&str]) -> CliArgs {
        let mut argv = vec![
            "linuxdeploy".to_string(),
            "--exe".into(),
            exe.display().to_string(),
            "--appdir".into(),
            appdir.display().to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        CliArgs::parse_from(argv)
    }

    #[test]
    fn preflight_accepts_fresh_appdir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let exe = tmp.path().join("app");
        fs::write(&exe, b"binary").expect("write exe");

        let args = args_for(&exe, &tmp.path().join("appdir"), &[]);
        preflight(&args).expect("preflight");
    }

    #[test]
    fn preflight_rejects_missing_exe() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let args = args_for(&tmp.path().join("missing"), &tmp.path().join("appdir"), &[]);
        let err = preflight(&args).expect_err("missing exe");
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn preflight_rejects_existing_appdir_without_overwrite() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let exe = tmp.path().join("app");
        fs::write(&exe, b"binary").expect("write exe");
        let appdir = tmp.path().join("appdir");
        fs::create_dir_all(&appdir).expect("mkdir appdir");

        let err = preflight(&args_for(&exe, &appdir, &[])).expect_err("existing appdir");
        assert!(err.to_string().contains("overwrite"), "{err}");

        preflight(&args_for(&exe, &appdir, &["--overwrite"])).expect("overwrite accepted");
    }

    #[test]
    fn preflight_rejects_unknown_out_type() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let exe = tmp.path().join("app");
        fs::write(&exe, b"binary").expect("write exe");

        let args = args_for(&exe, &tmp.path().join("appdir"), &["--out", "flatpak"]);
        let err = preflight(&args).expect_err("bad out type");
        assert!(err.to_string().contains("appimage"), "{err}");
    }

    #[test]
    fn repeatable_flags_accumulate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let exe = tmp.path().join("app");
        fs::write(&exe, b"binary").expect("write exe");

        let args = args_for(
            &exe,
            &tmp.path().join("appdir"),
            &["--libs", "/a", "--libs", "/b", "--qmldir", "/qml/src"],
        );
        assert_eq!(args.libs, vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(args.qmldir, vec![PathBuf::from("/qml/src")]);
    }
}
