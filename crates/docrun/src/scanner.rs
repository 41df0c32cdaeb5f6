//! Discovery of runnable example files.

use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use regex::Regex;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::directive::extract_run_args;
use crate::error::{DocrunError, DocrunResult};
use crate::types::{AppObject, ExampleFile};

/// Finds example files and reads their directives and application object.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScanConfig,
    app_re: Regex,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Scanner {
    pub fn new(config: &ScanConfig) -> DocrunResult<Self> {
        let app_re = Regex::new(&config.app_pattern)
            .map_err(|e| DocrunError::Pattern(format!("app pattern: {e}")))?;
        Ok(Self {
            config: config.clone(),
            app_re,
            include: compile_globs(&config.include)?,
            exclude: compile_globs(&config.exclude)?,
        })
    }

    pub fn language(&self) -> &str {
        &self.config.language
    }

    /// Whether a path is an example candidate under the include/exclude globs.
    ///
    /// Globs are matched against `path` as given, so pass it relative to the
    /// root the globs were written for.
    pub fn matches(&self, path: &Path) -> bool {
        self.is_included(path) && !self.is_excluded(path)
    }

    pub fn is_included(&self, path: &Path) -> bool {
        self.include.iter().any(|p| p.matches_path(path))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }

    /// Scan in-memory source. `root` anchors the relative and module paths.
    pub fn scan_source(&self, path: &Path, root: &Path, content: &str) -> DocrunResult<ExampleFile> {
        let (cleaned, directives) = extract_run_args(content, &self.config.comment_prefix, path)?;
        let relative = relative_to(path, root);
        let module = module_path(&relative);
        let app = self.find_app(content);

        if let Some(app) = &app {
            tracing::trace!(file = %path.display(), app = %app.name, line = app.line, "found application object");
        }

        Ok(ExampleFile {
            path: path.to_path_buf(),
            relative,
            module,
            app,
            directives,
            cleaned,
            language: self.config.language.clone(),
        })
    }

    pub fn scan_file(&self, path: &Path, root: &Path) -> DocrunResult<ExampleFile> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DocrunError::io_with_path(e, path))?;
        self.scan_source(path, root, &content)
    }

    /// Walk `root` and return every runnable example, sorted by path.
    ///
    /// A runnable file without an application object is an error.
    pub fn scan_dir(&self, root: &Path) -> DocrunResult<Vec<ExampleFile>> {
        let mut examples = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_to(entry.path(), root);
            if !self.matches(&relative) {
                continue;
            }

            let example = self.scan_file(entry.path(), root)?;
            if !example.is_runnable() {
                continue;
            }
            example.require_app()?;

            tracing::debug!(
                file = %example.relative.display(),
                directives = example.directives.len(),
                "found runnable example"
            );
            examples.push(example);
        }

        Ok(examples)
    }

    /// First line matching the app pattern wins.
    fn find_app(&self, content: &str) -> Option<AppObject> {
        content.lines().enumerate().find_map(|(idx, line)| {
            self.app_re.captures(line).and_then(|caps| {
                caps.name("name").map(|m| AppObject {
                    name: m.as_str().to_string(),
                    line: idx + 1,
                })
            })
        })
    }
}

fn compile_globs(patterns: &[String]) -> DocrunResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| DocrunError::Pattern(format!("glob '{p}': {e}"))))
        .collect()
}

/// `path` relative to `root`, or its file name when it lies outside.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.to_path_buf()),
    }
}

/// Dotted module path: `docs/examples/hello.py` -> `docs.examples.hello`.
pub fn module_path(relative: &Path) -> String {
    let stem = relative.with_extension("");
    stem.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> Scanner {
        Scanner::new(&ScanConfig::default()).unwrap()
    }

    #[test]
    fn test_module_path() {
        assert_eq!(module_path(Path::new("docs/examples/hello.py")), "docs.examples.hello");
        assert_eq!(module_path(Path::new("app.py")), "app");
        assert_eq!(module_path(Path::new("./pkg/mod.py")), "pkg.mod");
    }

    #[test]
    fn test_relative_to_outside_root_uses_file_name() {
        assert_eq!(
            relative_to(Path::new("/srv/docs/a/b.py"), Path::new("/srv/docs")),
            PathBuf::from("a/b.py")
        );
        assert_eq!(
            relative_to(Path::new("/tmp/other/c.py"), Path::new("/srv/docs")),
            PathBuf::from("c.py")
        );
    }

    #[test]
    fn test_scan_source_finds_first_app() {
        let source = "\
import server

app = server.App()
app = server.App(debug=True)

# run: /
";
        let example = scanner()
            .scan_source(Path::new("/docs/examples/hello.py"), Path::new("/docs"), source)
            .unwrap();
        assert_eq!(example.module, "examples.hello");
        assert_eq!(
            example.app,
            Some(AppObject {
                name: "app".to_string(),
                line: 3
            })
        );
        assert_eq!(example.directives.len(), 1);
        assert!(!example.cleaned.contains("run:"));
        assert_eq!(example.language, "python");
    }

    #[test]
    fn test_comparison_is_not_an_app() {
        let example = scanner()
            .scan_source(Path::new("x.py"), Path::new("."), "app == other\n")
            .unwrap();
        assert!(example.app.is_none());
    }

    #[test]
    fn test_annotated_app_is_found() {
        let example = scanner()
            .scan_source(Path::new("x.py"), Path::new("."), "app: Server = Server()\n")
            .unwrap();
        assert_eq!(example.app.map(|a| a.name), Some("app".to_string()));
    }

    #[test]
    fn test_custom_app_pattern() {
        let config = ScanConfig {
            app_pattern: r"^(?P<name>\w+)\s*=\s*Router\(".to_string(),
            ..ScanConfig::default()
        };
        let scanner = Scanner::new(&config).unwrap();
        let example = scanner
            .scan_source(Path::new("x.py"), Path::new("."), "x = 1\napi = Router()\n")
            .unwrap();
        assert_eq!(
            example.app,
            Some(AppObject {
                name: "api".to_string(),
                line: 2
            })
        );
    }

    #[test]
    fn test_scan_dir_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::create_dir_all(root.join("skip")).unwrap();
        std::fs::write(root.join("b/second.py"), "app = App()\n# run: /b\n").unwrap();
        std::fs::write(root.join("a.py"), "app = App()\n# run: /a\n").unwrap();
        std::fs::write(root.join("plain.py"), "app = App()\n").unwrap();
        std::fs::write(root.join("notes.txt"), "# run: /txt\n").unwrap();
        std::fs::write(root.join("skip/third.py"), "app = App()\n# run: /c\n").unwrap();

        let config = ScanConfig {
            exclude: vec!["skip/*".to_string()],
            ..ScanConfig::default()
        };
        let examples = Scanner::new(&config).unwrap().scan_dir(root).unwrap();
        let found: Vec<_> = examples.iter().map(|e| e.module.as_str()).collect();
        assert_eq!(found, vec!["a", "b.second"]);
    }

    #[test]
    fn test_scan_dir_requires_app() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orphan.py"), "# run: /\n").unwrap();
        let err = scanner().scan_dir(dir.path()).unwrap_err();
        assert!(matches!(err, DocrunError::NoApplication(_)));
    }

    #[test]
    fn test_matches_uses_globs() {
        let s = scanner();
        assert!(s.matches(Path::new("docs/examples/hello.py")));
        assert!(!s.matches(Path::new("docs/index.rst")));
    }
}
