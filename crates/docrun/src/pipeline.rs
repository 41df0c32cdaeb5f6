//! Orchestration: scan, launch, request, splice, tear down.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DocrunConfig;
use crate::error::{DocrunError, DocrunResult};
use crate::launcher::{self, PortPool};
use crate::pages::{cleaned_copy_name, find_includes, IncludeBlock, PageKind};
use crate::runner::RequestRunner;
use crate::scanner::{relative_to, Scanner};
use crate::splice::render_admonition;
use crate::types::{BuildReport, ExampleFile, ExampleRun};

/// Runs examples and processes documentation trees.
///
/// A pipeline owns the port pool, so ports are never reused within one
/// build, and caches example runs so an example included by several pages
/// runs once.
pub struct Pipeline {
    config: DocrunConfig,
    scanner: Scanner,
    runner: RequestRunner,
    pool: PortPool,
    /// Root for module paths: the server working directory.
    module_root: PathBuf,
    runs: HashMap<PathBuf, ExampleRun>,
}

impl Pipeline {
    pub fn new(config: DocrunConfig) -> DocrunResult<Self> {
        config.validate()?;
        let scanner = Scanner::new(&config.scan)?;
        let runner = RequestRunner::new(&config.request)?;
        let pool = PortPool::from_config(&config.server);
        let module_root = match &config.server.working_dir {
            Some(dir) => absolute(dir)?,
            None => std::env::current_dir()?,
        };

        Ok(Self {
            config,
            scanner,
            runner,
            pool,
            module_root,
            runs: HashMap::new(),
        })
    }

    pub fn config(&self) -> &DocrunConfig {
        &self.config
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Scan one file with module paths relative to the server working directory.
    pub fn scan(&self, path: &Path) -> DocrunResult<ExampleFile> {
        let path = absolute(path)?;
        self.scanner.scan_file(&path, &self.module_root)
    }

    /// Start the example's server, run its directives, stop the server.
    ///
    /// The server is stopped whether or not the directives succeed.
    pub async fn run_example(&mut self, example: &ExampleFile) -> DocrunResult<ExampleRun> {
        let server = launcher::launch(example, &self.config.server, &mut self.pool).await?;
        let port = server.port();

        let result = self.runner.run_all(&server.base_url(), example).await;
        let stopped = server.shutdown().await;

        let transcripts = result?;
        stopped?;

        let run = ExampleRun {
            file: example.path.clone(),
            port,
            transcripts,
        };
        info!(
            file = %example.relative.display(),
            directives = run.transcripts.len(),
            failed = run.failed_count(),
            "example run complete"
        );
        Ok(run)
    }

    /// Scan and run a single file.
    pub async fn run_file(&mut self, path: &Path) -> DocrunResult<(ExampleFile, ExampleRun)> {
        let example = self.scan(path)?;
        if !example.is_runnable() {
            return Err(DocrunError::config(format!(
                "{} has no run directives",
                path.display()
            )));
        }
        let run = self.run_example(&example).await?;
        Ok((example, run))
    }

    /// Run an example once per pipeline, keyed by path.
    async fn run_cached(
        &mut self,
        example: &ExampleFile,
        report: &mut BuildReport,
    ) -> DocrunResult<ExampleRun> {
        if let Some(run) = self.runs.get(&example.path) {
            debug!(file = %example.path.display(), "reusing example run");
            return Ok(run.clone());
        }

        let run = self.run_example(example).await?;
        report.examples_run += 1;
        report.directives_run += run.transcripts.len();
        report.directives_failed += run.failed_count();
        self.runs.insert(example.path.clone(), run.clone());
        Ok(run)
    }

    /// Copy `source` into `out`, rewriting runnable `literalinclude` blocks.
    ///
    /// The cleaned-examples directory under `out` is recreated first, so
    /// nothing from a previous build survives in it.
    pub async fn build(&mut self, source: &Path, out: &Path) -> DocrunResult<BuildReport> {
        let source = source
            .canonicalize()
            .map_err(|e| DocrunError::io_with_path(e, source))?;
        std::fs::create_dir_all(out).map_err(|e| DocrunError::io_with_path(e, out))?;
        let out = out
            .canonicalize()
            .map_err(|e| DocrunError::io_with_path(e, out))?;

        let examples_dir = out.join(&self.config.render.examples_dir);
        if examples_dir.exists() {
            std::fs::remove_dir_all(&examples_dir)
                .map_err(|e| DocrunError::io_with_path(e, &examples_dir))?;
        }
        std::fs::create_dir_all(&examples_dir)
            .map_err(|e| DocrunError::io_with_path(e, &examples_dir))?;

        info!(source = %source.display(), out = %out.display(), "building documentation");
        self.runs.clear();
        let mut report = BuildReport::default();

        let walker = WalkDir::new(&source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.path().starts_with(&out));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_to(entry.path(), &source);
            let dest = out.join(&relative);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DocrunError::io_with_path(e, parent))?;
            }

            let rewritten = match PageKind::from_path(entry.path()) {
                Some(kind) => {
                    report.pages_scanned += 1;
                    let content = std::fs::read_to_string(entry.path())
                        .map_err(|e| DocrunError::io_with_path(e, entry.path()))?;
                    self.process_page(&source, &out, entry.path(), kind, &content, &mut report)
                        .await?
                }
                None => None,
            };

            match rewritten {
                Some(text) => {
                    report.pages_rewritten += 1;
                    std::fs::write(&dest, text).map_err(|e| DocrunError::io_with_path(e, &dest))?;
                    debug!(page = %relative.display(), "rewrote page");
                }
                None => {
                    std::fs::copy(entry.path(), &dest)
                        .map_err(|e| DocrunError::io_with_path(e, entry.path()))?;
                    report.files_copied += 1;
                }
            }
        }

        info!(
            pages = report.pages_scanned,
            rewritten = report.pages_rewritten,
            examples = report.examples_run,
            directives = report.directives_run,
            "build complete"
        );
        Ok(report)
    }

    /// The rewritten page, or `None` when no include in it is runnable.
    async fn process_page(
        &mut self,
        source: &Path,
        out: &Path,
        page: &Path,
        kind: PageKind,
        content: &str,
        report: &mut BuildReport,
    ) -> DocrunResult<Option<String>> {
        let lines: Vec<&str> = content.lines().collect();
        let blocks = find_includes(&lines, kind);
        if blocks.is_empty() {
            return Ok(None);
        }

        let page_dir = page.parent().unwrap_or(source);
        let mut output: Vec<String> = Vec::with_capacity(lines.len());
        let mut cursor = 0;
        let mut rewritten = false;

        for block in &blocks {
            output.extend(lines[cursor..block.start].iter().map(|l| l.to_string()));
            match self
                .expand_include(source, out, page_dir, kind, block, &lines, report)
                .await?
            {
                Some(replacement) => {
                    rewritten = true;
                    output.extend(replacement);
                }
                None => output.extend(lines[block.start..block.end].iter().map(|l| l.to_string())),
            }
            cursor = block.end;
        }
        output.extend(lines[cursor..].iter().map(|l| l.to_string()));

        if !rewritten {
            return Ok(None);
        }

        let mut text = output.join("\n");
        if content.ends_with('\n') {
            text.push('\n');
        }
        Ok(Some(text))
    }

    #[allow(clippy::too_many_arguments)]
    async fn expand_include(
        &mut self,
        source: &Path,
        out: &Path,
        page_dir: &Path,
        kind: PageKind,
        block: &IncludeBlock,
        lines: &[&str],
        report: &mut BuildReport,
    ) -> DocrunResult<Option<Vec<String>>> {
        if block.has_option("no-run") {
            return Ok(None);
        }

        let target = normalize(&block.resolve(source, page_dir));
        // scan globs are written relative to the docs source root
        let relative = relative_to(&target, source);
        if self.scanner.is_excluded(&relative) {
            debug!(target = %relative.display(), "include excluded by scan.exclude");
            return Ok(None);
        }
        let language_matches = block.option("language") == Some(self.scanner.language());
        if !language_matches && !self.scanner.is_included(&relative) {
            return Ok(None);
        }
        if !target.is_file() {
            warn!(target = %target.display(), "literalinclude target not found");
            return Err(DocrunError::io_with_path(
                std::io::Error::new(std::io::ErrorKind::NotFound, "literalinclude target not found"),
                target,
            ));
        }

        let target = target
            .canonicalize()
            .map_err(|e| DocrunError::io_with_path(e, &target))?;
        let example = self.scan(&target)?;
        if !example.is_runnable() {
            return Ok(None);
        }

        let run = self.run_cached(&example, report).await?;

        let name = cleaned_copy_name(&relative_to(&example.path, source));
        let copy = out.join(&self.config.render.examples_dir).join(&name);
        std::fs::write(&copy, &example.cleaned).map_err(|e| DocrunError::io_with_path(e, &copy))?;

        let new_target = format!("/{}/{}", self.config.render.examples_dir, name);
        let admonition = render_admonition(
            &self.config.render.admonition_title,
            &run.transcripts,
            kind.format(),
        );
        Ok(Some(block.rewrite(lines, &new_target, admonition.as_deref())))
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn absolute(path: &Path) -> DocrunResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_server() -> DocrunConfig {
        let mut config = DocrunConfig::default();
        config.server.command = vec!["docrun-test-no-such-program".to_string()];
        config
    }

    #[tokio::test]
    async fn test_build_copies_pages_without_runnable_includes() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let page = "\
Title
=====

.. literalinclude:: hello.py
   :no-run:

.. literalinclude:: data.json
";
        std::fs::write(src.path().join("index.rst"), page).unwrap();
        std::fs::write(src.path().join("hello.py"), "app = App()\n# run: /\n").unwrap();
        std::fs::write(src.path().join("data.json"), "{}\n").unwrap();
        std::fs::create_dir_all(src.path().join("static")).unwrap();
        std::fs::write(src.path().join("static/logo.svg"), "<svg/>").unwrap();

        let mut pipeline = Pipeline::new(config_without_server()).unwrap();
        let report = pipeline.build(src.path(), out.path()).await.unwrap();

        assert_eq!(report.pages_scanned, 1);
        assert_eq!(report.pages_rewritten, 0);
        assert_eq!(report.examples_run, 0);
        assert_eq!(report.files_copied, 4);
        assert_eq!(
            std::fs::read_to_string(out.path().join("index.rst")).unwrap(),
            page
        );
        assert!(out.path().join("static/logo.svg").exists());
        assert!(out.path().join("_examples").is_dir());
    }

    #[tokio::test]
    async fn test_build_clears_previous_examples() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.md"), "# Empty\n").unwrap();
        std::fs::create_dir_all(out.path().join("_examples")).unwrap();
        std::fs::write(out.path().join("_examples/stale.py"), "old").unwrap();

        let mut pipeline = Pipeline::new(config_without_server()).unwrap();
        pipeline.build(src.path(), out.path()).await.unwrap();
        assert!(!out.path().join("_examples/stale.py").exists());
    }

    #[tokio::test]
    async fn test_build_skips_nested_output_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.rst"), "Hello\n").unwrap();
        let out = src.path().join("_build");

        let mut pipeline = Pipeline::new(config_without_server()).unwrap();
        let first = pipeline.build(src.path(), &out).await.unwrap();
        let second = pipeline.build(src.path(), &out).await.unwrap();
        assert_eq!(first.files_copied, 1);
        assert_eq!(second.files_copied, 1);
        assert!(!out.join("_build").exists());
    }

    #[tokio::test]
    async fn test_missing_include_target_fails_build() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(
            src.path().join("index.rst"),
            ".. literalinclude:: /examples/missing.py\n",
        )
        .unwrap();

        let mut pipeline = Pipeline::new(config_without_server()).unwrap();
        let err = pipeline.build(src.path(), out.path()).await.unwrap_err();
        assert!(err.to_string().contains("missing.py"));
    }

    #[tokio::test]
    async fn test_excluded_include_is_left_alone() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let page = "\
.. literalinclude:: ../skip/app.py
   :language: python
";
        std::fs::create_dir_all(src.path().join("guide")).unwrap();
        std::fs::create_dir_all(src.path().join("skip")).unwrap();
        std::fs::write(src.path().join("guide/index.rst"), page).unwrap();
        std::fs::write(src.path().join("skip/app.py"), "app = App()\n# run: /\n").unwrap();

        let mut config = config_without_server();
        config.scan.exclude = vec!["skip/*".to_string()];
        let mut pipeline = Pipeline::new(config).unwrap();
        let report = pipeline.build(src.path(), out.path()).await.unwrap();

        assert_eq!(report.pages_rewritten, 0);
        assert_eq!(report.examples_run, 0);
        assert_eq!(
            std::fs::read_to_string(out.path().join("guide/index.rst")).unwrap(),
            page
        );
    }

    #[test]
    fn test_normalize_folds_parent_components() {
        assert_eq!(
            normalize(Path::new("/docs/guide/../examples/./app.py")),
            PathBuf::from("/docs/examples/app.py")
        );
    }

    #[tokio::test]
    async fn test_run_file_without_directives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.py");
        std::fs::write(&path, "app = App()\n").unwrap();

        let mut pipeline = Pipeline::new(config_without_server()).unwrap();
        let err = pipeline.run_file(&path).await.unwrap_err();
        assert!(err.to_string().contains("no run directives"));
    }
}
