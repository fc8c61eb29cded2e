use std::fs;
use std::path::{Path, PathBuf};

use crate::deploy::DeployerInner;
use crate::tools;

// Lowercase library prefix (without "lib", up to ".so") to translation
// catalogue. Modules mapping to "" ship no translations of their own.
const MODULE_TRANSLATIONS: &[(&str, &str)] = &[
    ("qt5bluetooth", ""),
    ("qt5clucene", "qt_help"),
    ("qt5concurrent", "qtbase"),
    ("qt5core", "qtbase"),
    ("qt5declarative", "qtquick1"),
    ("qt5designercomponents", ""),
    ("qt5designer", ""),
    ("qt5gui", "qtbase"),
    ("qt5help", "qt_help"),
    ("qt5multimediawidgets", "qtmultimedia"),
    ("qt5multimediaquick_p", "qtmultimedia"),
    ("qt5multimedia", "qtmultimedia"),
    ("qt5network", "qtbase"),
    ("qt5nfc", ""),
    ("qt5opengl", ""),
    ("qt5positioning", ""),
    ("qt5printsupport", ""),
    ("qt5qmltooling", "qmltooling"),
    ("qt5qml", "qtdeclarative"),
    ("qt5quickparticles", ""),
    ("qt5quickwidgets", ""),
    ("qt5quick", "qtdeclarative"),
    ("qt5scripttools", "qtscript"),
    ("qt5script", "qtscript"),
    ("qt5sensors", ""),
    ("qt5serialport", ""),
    ("qt5sql", "qtbase"),
    ("qt5svg", ""),
    ("qt5test", ""),
    ("qt5widgets", "qtbase"),
    ("qt5xmlpatterns", "qtxmlpatterns"),
    ("qt5xml", "qtbase"),
    ("qt5webkitwidgets", ""),
    ("qt5webkit", "qtwebengine"),
    ("qt5websockets", "qtwebsockets"),
    ("enginio", ""),
    ("qt5webenginecore", ""),
    ("qt5webenginewidgets", ""),
    ("qt5webengine", ""),
    ("qt53dcore", ""),
    ("qt53drenderer", ""),
    ("qt53dquickrenderer", ""),
    ("qt53dquick", ""),
    ("qt53dinput", ""),
    ("qt5location", ""),
    ("qt5webchannel", ""),
    ("qt5texttospeech", ""),
    ("qt5serialbus", ""),
];

fn catalogue_for(libprefix: &str) -> Option<&'static str> {
    // Longest-prefix entries are listed before their shorter variants
    // (qt5multimediawidgets before qt5multimedia), so a scan suffices.
    MODULE_TRANSLATIONS
        .iter()
        .find(|(module, _)| libprefix == *module)
        .map(|(_, catalogue)| *catalogue)
}

/// Record the translation catalogue implied by a deployed Qt library.
/// `name` is the lowercase basename, e.g. "libqt5core.so.5".
pub(crate) fn account_qt_library(inner: &DeployerInner, name: &str) {
    let Some(extension) = name.rfind(".so") else {
        return;
    };
    let Some(libprefix) = name.get(3..extension) else {
        return;
    };

    match catalogue_for(libprefix) {
        Some("") => {}
        Some(catalogue) => {
            let inserted = inner
                .translations_required
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(catalogue.to_string());
            if inserted {
                inner.log(&format!("accounted translation {catalogue} for {name}"));
            }
        }
        None => inner.log(&format!("translations unknown for module: {name}")),
    }
}

/// Shutdown-phase step: merge the required per-module catalogues into one
/// qt_<lang>.qm per available language.
pub(crate) fn deploy_qt_translations(inner: &DeployerInner) {
    if !inner.qt.is_set() {
        return;
    }

    let qt_translations = inner.qt.translations_path();
    let languages = available_languages(&qt_translations);
    if languages.is_empty() {
        inner.log("no Qt translation languages found");
        return;
    }

    let required: Vec<String> = inner
        .translations_required
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .cloned()
        .collect();
    if required.is_empty() {
        inner.log("no Qt translation catalogues required");
        return;
    }

    let Some(lconvert) = resolve_lconvert(inner) else {
        inner.log("warning: cannot find lconvert");
        return;
    };

    let translations_root = inner.dest_root.join("translations");
    if let Err(e) = fs::create_dir_all(&translations_root) {
        inner.log(&format!(
            "warning: failed to create {}: {e}",
            translations_root.display()
        ));
        return;
    }

    inner.log(&format!(
        "generating merged translations for {} languages: {}",
        languages.len(),
        required.join(", ")
    ));

    for lang in &languages {
        deploy_language(inner, &lconvert, &qt_translations, &translations_root, lang, &required);
    }
    inner.log("translations generation finished");
}

fn deploy_language(
    inner: &DeployerInner,
    lconvert: &Path,
    qt_translations: &Path,
    translations_root: &Path,
    lang: &str,
    required: &[String],
) {
    let output_file = translations_root.join(format!("qt_{lang}.qm"));

    let mut args: Vec<String> = vec!["-o".into(), output_file.display().to_string()];
    for module in required {
        // Missing per-module inputs are tolerated; lconvert reports them.
        args.push(
            qt_translations
                .join(format!("{module}_{lang}.qm"))
                .display()
                .to_string(),
        );
    }

    match tools::run_status(lconvert, &args) {
        Ok(()) => inner.log(&format!("generated {}", output_file.display())),
        Err(e) => inner.log(&format!("warning: lconvert failed for {lang}: {e}")),
    }
}

/// Languages available in the Qt installation, derived from qtbase_<lang>.qm
/// files.
pub(crate) fn available_languages(translations_root: &Path) -> Vec<String> {
    let mut languages = Vec::new();
    if !translations_root.is_dir() {
        return languages;
    }

    for entry in walkdir::WalkDir::new(translations_root) {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy().to_lowercase();
        if let Some(stem) = basename.strip_suffix(".qm") {
            if let Some(lang) = stem.strip_prefix("qtbase_") {
                if !lang.is_empty() {
                    languages.push(lang.to_string());
                }
            }
        }
    }

    languages.sort();
    languages
}

fn resolve_lconvert(inner: &DeployerInner) -> Option<PathBuf> {
    let candidate = inner.qt.bins_path().join("lconvert");
    if candidate.is_file() {
        return Some(candidate);
    }
    tools::find_tool("lconvert")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lookup_covers_base_modules() {
        assert_eq!(catalogue_for("qt5core"), Some("qtbase"));
        assert_eq!(catalogue_for("qt5gui"), Some("qtbase"));
        assert_eq!(catalogue_for("qt5webkit"), Some("qtwebengine"));
        assert_eq!(catalogue_for("qt5qmltooling"), Some("qmltooling"));
    }

    #[test]
    fn longer_module_names_win_over_their_prefix() {
        assert_eq!(catalogue_for("qt5multimediawidgets"), Some("qtmultimedia"));
        assert_eq!(catalogue_for("qt5multimedia"), Some("qtmultimedia"));
        assert_eq!(catalogue_for("qt5scripttools"), Some("qtscript"));
    }

    #[test]
    fn modules_without_translations_map_to_empty() {
        assert_eq!(catalogue_for("qt5svg"), Some(""));
        assert_eq!(catalogue_for("qt5webenginecore"), Some(""));
    }

    #[test]
    fn unknown_modules_are_none() {
        assert_eq!(catalogue_for("qt5madeup"), None);
    }

    #[test]
    fn languages_come_from_qtbase_catalogues() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("qtbase_de.qm"), b"x").expect("write de");
        fs::write(tmp.path().join("qtbase_uk.qm"), b"x").expect("write uk");
        fs::write(tmp.path().join("qtbase_pt_br.qm"), b"x").expect("write pt_br");
        fs::write(tmp.path().join("qtdeclarative_de.qm"), b"x").expect("write decl");
        fs::write(tmp.path().join("README"), b"x").expect("write readme");

        let langs = available_languages(tmp.path());
        assert_eq!(langs, vec!["de", "pt_br", "uk"]);
    }

    #[test]
    fn missing_translations_dir_yields_no_languages() {
        assert!(available_languages(Path::new("/no/such/dir")).is_empty());
    }
}
