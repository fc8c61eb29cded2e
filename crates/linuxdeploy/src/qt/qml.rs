use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::deploy::DeployerInner;
use crate::deploy::request::DeployFlags;
use crate::tools;

/// One record of the JSON array emitted by qmlimportscanner.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QmlImport {
    pub classname: String,
    pub name: String,
    pub path: String,
    pub plugin: String,
    #[serde(rename = "type")]
    pub import_type: String,
    pub version: String,
}

/// One-shot task: scan the configured QML source roots and deploy every
/// module import into <appdir>/qml.
pub(crate) fn deploy_qml_imports(inner: &Arc<DeployerInner>) {
    if inner.qml_import_dirs.is_empty() {
        inner.log("no QML import dirs configured");
        return;
    }

    inner.log(&format!(
        "processing QML imports from {} dirs",
        inner.qml_import_dirs.len()
    ));

    let Some(scanner) = resolve_scanner(inner) else {
        inner.log("warning: cannot find qmlimportscanner");
        return;
    };
    inner.log(&format!("QML import scanner: {}", scanner.display()));

    let qml_root = inner.qt.qml_path();
    let mut args: Vec<String> = Vec::new();
    for dir in &inner.qml_import_dirs {
        args.push("-rootPath".into());
        args.push(dir.display().to_string());
    }
    args.push("-importPath".into());
    args.push(qml_root.display().to_string());

    let output = match tools::run_capture(&scanner, &args) {
        Ok(out) => out,
        Err(e) => {
            inner.log(&format!("warning: QML import scanner failed: {e}"));
            return;
        }
    };

    let imports: Vec<QmlImport> = match serde_json::from_str(&output) {
        Ok(imports) => imports,
        Err(e) => {
            inner.log(&format!("warning: cannot parse scanner output: {e}"));
            return;
        }
    };
    inner.log(&format!("parsed {} imports", imports.len()));

    process_imports(inner, &qml_root, &imports);
}

fn process_imports(inner: &Arc<DeployerInner>, qml_root: &Path, imports: &[QmlImport]) {
    let mut deployed = BTreeSet::<PathBuf>::new();
    let mut private_widgets_deployed = false;

    for import in imports {
        if import.name.is_empty() || import.path.is_empty() {
            inner.log(&format!("skipping import {:?}", import.name));
            continue;
        }
        if import.import_type != "module" {
            inner.log(&format!("skipping non-module import {}", import.name));
            continue;
        }

        let path = Path::new(&import.path);
        let Ok(relative) = path.strip_prefix(qml_root) else {
            inner.log(&format!(
                "skipping import outside the QML install root: {}",
                import.path
            ));
            continue;
        };

        if !deployed.insert(path.to_path_buf()) {
            inner.log(&format!("already deployed QML import {}", import.path));
            continue;
        }

        if import.name == "QtQuick.Controls" && !private_widgets_deployed {
            private_widgets_deployed = true;
            inner.log("deploying private widgets for QtQuick.Controls");
            inner.deploy_recursively(
                qml_root,
                "QtQuick/PrivateWidgets",
                "qml",
                DeployFlags::FIX_RPATH,
            );
        }

        inner.log(&format!("deploying QML import {}", import.path));
        inner.deploy_recursively(qml_root, relative, "qml", DeployFlags::FIX_RPATH);
    }
}

// Prefer the scanner that belongs to the queried Qt; fall back to PATH.
fn resolve_scanner(inner: &DeployerInner) -> Option<PathBuf> {
    let candidate = inner.qt.bins_path().join("qmlimportscanner");
    if candidate.is_file() {
        return Some(candidate);
    }
    tools::find_tool("qmlimportscanner")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scanner_records_with_defaults() {
        let raw = r#"[
            {"classname": "QtQuick2Plugin", "name": "QtQuick", "path": "/qt/qml/QtQuick.2",
             "plugin": "qtquick2plugin", "type": "module", "version": "2.15"},
            {"name": "", "type": "module"},
            {"name": "QtQml", "type": "javascript"}
        ]"#;

        let imports: Vec<QmlImport> = serde_json::from_str(raw).expect("parse");
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].name, "QtQuick");
        assert_eq!(imports[0].import_type, "module");
        assert_eq!(imports[0].path, "/qt/qml/QtQuick.2");
        assert!(imports[1].name.is_empty());
        assert!(imports[1].path.is_empty());
        assert_eq!(imports[2].import_type, "javascript");
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = r#"[{"name": "QtQuick", "path": "/p", "type": "module", "relativePath": "x"}]"#;
        let imports: Vec<QmlImport> = serde_json::from_str(raw).expect("parse");
        assert_eq!(imports[0].name, "QtQuick");
    }
}
