use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

use crate::abi::UnitName;
use crate::classfile;
use crate::compiler::{CompileOutcome, CompileRequest, CompilerPort};
use crate::error::{BuildError, Result};

const WROTE_PREFIX: &str = "[wrote ";
const LEGACY_FILE_OBJECT: &str = "RegularFileObject[";

/// Runs the JDK `javac` executable as a child process.
#[derive(Debug, Clone)]
pub struct JavacCompiler {
    program: PathBuf,
}

impl JavacCompiler {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    fn command(&self) -> Command {
        #[cfg(windows)]
        {
            let lower = self.program.to_string_lossy().to_ascii_lowercase();
            if lower.ends_with(".cmd") || lower.ends_with(".bat") {
                let mut command = Command::new("cmd");
                command.arg("/C").arg(&self.program);
                return command;
            }
        }

        Command::new(&self.program)
    }

    fn arguments(request: &CompileRequest) -> Vec<OsString> {
        let mut classpath = OsString::from(&request.classpath);
        if !request.classpath.is_empty() {
            classpath.push(classpath_separator());
        }
        classpath.push(&request.destination);

        let mut args: Vec<OsString> = vec![
            "-d".into(),
            request.destination.clone().into_os_string(),
            "-classpath".into(),
            classpath,
            "-implicit:none".into(),
            "-verbose".into(),
        ];
        args.extend(
            request
                .sources
                .iter()
                .map(|s| request.source_root.join(s).into_os_string()),
        );
        args
    }
}

impl CompilerPort for JavacCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutcome> {
        if request.sources.is_empty() {
            return Ok(CompileOutcome {
                success: true,
                ..Default::default()
            });
        }

        debug!(
            program = %self.program.display(),
            sources = request.sources.len(),
            "invoking javac"
        );
        let output = self
            .command()
            .args(Self::arguments(request))
            .output()
            .map_err(|source| BuildError::CompilerUnavailable {
                program: self.program.display().to_string(),
                source,
            })?;

        let mut log = String::from_utf8_lossy(&output.stderr).into_owned();
        log.push('\n');
        log.push_str(&String::from_utf8_lossy(&output.stdout));

        let success = output.status.success();
        let mut produced = attribute_written(request, &written_class_files(&log))?;
        if success {
            for source in &request.sources {
                produced.entry(source.clone()).or_default();
            }
        }

        let mut diagnostics = group_diagnostics(request, &log);
        if !success && diagnostics.is_empty() {
            let unattributed: Vec<String> = log
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty() && !l.starts_with('['))
                .map(str::to_string)
                .collect();
            for source in &request.sources {
                diagnostics.insert(source.clone(), unattributed.clone());
            }
        }

        Ok(CompileOutcome {
            produced,
            success,
            diagnostics,
        })
    }
}

fn classpath_separator() -> &'static str {
    if cfg!(windows) { ";" } else { ":" }
}

/// Class files reported by `-verbose` as `[wrote …]`.
fn written_class_files(log: &str) -> Vec<PathBuf> {
    log.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix(WROTE_PREFIX)?.strip_suffix(']')?;
            let path = rest
                .strip_prefix(LEGACY_FILE_OBJECT)
                .and_then(|p| p.strip_suffix(']'))
                .unwrap_or(rest);
            path.ends_with(".class").then(|| PathBuf::from(path))
        })
        .collect()
}

/// Maps each written class to the input source it came from, using the
/// `SourceFile` attribute and the package directory.
fn attribute_written(
    request: &CompileRequest,
    written: &[PathBuf],
) -> Result<BTreeMap<String, BTreeSet<UnitName>>> {
    let mut produced: BTreeMap<String, BTreeSet<UnitName>> = BTreeMap::new();
    for path in written {
        let class_path = if path.is_absolute() {
            path.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.clone())
        };
        let bytes = std::fs::read(&class_path).map_err(|source| BuildError::Storage {
            path: class_path.clone(),
            source,
        })?;
        let (unit, source_file) =
            classfile::origin(&bytes).map_err(|e| BuildError::MalformedUnit {
                path: class_path.clone(),
                reason: e.to_string(),
            })?;

        match owning_source(&request.sources, &unit, source_file.as_deref()) {
            Some(source) => {
                produced.entry(source.to_string()).or_default().insert(unit);
            }
            None => warn!(class = %unit, "written class does not belong to any input source"),
        }
    }
    Ok(produced)
}

fn owning_source<'s>(
    sources: &'s [String],
    unit: &UnitName,
    source_file: Option<&str>,
) -> Option<&'s str> {
    let file_name = match source_file {
        Some(name) => name.to_string(),
        None => {
            let simple = unit.as_str().rsplit('.').next().unwrap_or(unit.as_str());
            let outer = simple.split('$').next().unwrap_or(simple);
            format!("{outer}.java")
        }
    };
    let package_dir = unit.package().replace('.', "/");

    let candidates: Vec<&str> = sources
        .iter()
        .map(String::as_str)
        .filter(|s| s.rsplit('/').next() == Some(file_name.as_str()))
        .collect();
    if candidates.len() <= 1 {
        return candidates.first().copied();
    }

    fn dir_of(s: &str) -> &str {
        s.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }
    candidates
        .iter()
        .find(|s| dir_of(s) == package_dir)
        .or_else(|| {
            candidates
                .iter()
                .find(|s| !package_dir.is_empty() && dir_of(s).ends_with(&package_dir))
        })
        .copied()
}

/// Groups `path:line: error: …` messages, with their continuation lines, by
/// input source.
fn group_diagnostics(request: &CompileRequest, log: &str) -> BTreeMap<String, Vec<String>> {
    let by_path: Vec<(String, &String)> = request
        .sources
        .iter()
        .map(|s| (request.source_root.join(s).display().to_string(), s))
        .collect();

    let mut diagnostics: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<&String> = None;
    for line in log.lines() {
        if line.starts_with('[') || line.trim().is_empty() {
            current = None;
            continue;
        }
        if let Some((source, is_error)) = diagnostic_header(&by_path, line) {
            current = None;
            if is_error {
                diagnostics
                    .entry(source.clone())
                    .or_default()
                    .push(line.to_string());
                current = Some(source);
            }
            continue;
        }
        if is_summary(line) {
            current = None;
            continue;
        }
        if let Some(source) = current
            && let Some(last) = diagnostics.get_mut(source).and_then(|m| m.last_mut())
        {
            last.push('\n');
            last.push_str(line);
        }
    }
    diagnostics
}

/// Matches `path:line: kind: …` for one of the inputs. The flag tells
/// whether the message is an error.
fn diagnostic_header<'a>(
    by_path: &'a [(String, &'a String)],
    line: &str,
) -> Option<(&'a String, bool)> {
    by_path.iter().find_map(|(path, source)| {
        let rest = line.strip_prefix(path.as_str())?.strip_prefix(':')?;
        let (line_no, tail) = rest.split_once(':')?;
        if line_no.is_empty() || !line_no.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((*source, tail.trim_start().starts_with("error:")))
    })
}

/// `3 errors`, `1 warning` and similar trailers.
fn is_summary(line: &str) -> bool {
    let mut words = line.split_whitespace();
    let counted = words
        .next()
        .is_some_and(|n| n.bytes().all(|b| b.is_ascii_digit()));
    counted
        && matches!(
            words.next(),
            Some("error" | "errors" | "warning" | "warnings")
        )
        && words.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ClassSpec;

    fn request(root: &str, sources: &[&str]) -> CompileRequest {
        CompileRequest {
            source_root: PathBuf::from(root),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            classpath: "lib/a.jar".to_string(),
            destination: PathBuf::from("/out"),
        }
    }

    #[test]
    fn arguments_append_destination_to_classpath() {
        let args = JavacCompiler::arguments(&request("/src", &["p/A.java"]));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let classpath = format!("lib/a.jar{}/out", classpath_separator());
        assert_eq!(
            args,
            vec![
                "-d",
                "/out",
                "-classpath",
                classpath.as_str(),
                "-implicit:none",
                "-verbose",
                "/src/p/A.java",
            ]
        );
    }

    #[test]
    fn written_lines_in_both_formats_are_recognised() {
        let log = "[parsing started SimpleFileObject[/src/A.java]]\n\
                   [wrote /out/p/A.class]\n\
                   [wrote RegularFileObject[/out/p/A$1.class]]\n\
                   [total 120ms]\n";
        assert_eq!(
            written_class_files(log),
            vec![PathBuf::from("/out/p/A.class"), PathBuf::from("/out/p/A$1.class")]
        );
    }

    #[test]
    fn owning_source_prefers_package_directory() {
        let sources = vec![
            "a/Util.java".to_string(),
            "b/Util.java".to_string(),
            "Main.java".to_string(),
        ];
        assert_eq!(
            owning_source(&sources, &UnitName::from("b.Util$1"), Some("Util.java")),
            Some("b/Util.java")
        );
        assert_eq!(
            owning_source(&sources, &UnitName::from("Main$Inner"), None),
            Some("Main.java")
        );
        assert_eq!(
            owning_source(&sources, &UnitName::from("Helper"), Some("Main.java")),
            Some("Main.java")
        );
        assert_eq!(owning_source(&sources, &UnitName::from("c.Util"), Some("Util.java")), None);
        assert_eq!(owning_source(&sources, &UnitName::from("Other"), None), None);
    }

    #[test]
    fn diagnostics_are_grouped_per_source_with_context() {
        let req = request("/src", &["p/A.java", "B.java"]);
        let log = "/src/p/A.java:3: error: cannot find symbol\n\
                   \x20   foo();\n\
                   \x20   ^\n\
                   /src/B.java:1: warning: deprecated\n\
                   /src/B.java:7: error: ';' expected\n\
                   2 errors\n";

        let grouped = group_diagnostics(&req, log);
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped["p/A.java"],
            vec!["/src/p/A.java:3: error: cannot find symbol\n    foo();\n    ^".to_string()]
        );
        assert_eq!(grouped["B.java"], vec!["/src/B.java:7: error: ';' expected".to_string()]);
    }

    #[test]
    fn attribute_written_reads_source_file_attribute() -> anyhow::Result<()> {
        let base = std::env::temp_dir().join(format!(
            "class_rebuild_javac_attr_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)?
                .as_nanos()
        ));
        std::fs::create_dir_all(base.join("p"))?;
        let helper = base.join("p/Helper.class");
        std::fs::write(&helper, ClassSpec::new("p/Helper").source_file("A.java").to_bytes())?;

        let req = request("/src", &["p/A.java"]);
        let produced = attribute_written(&req, &[helper])?;
        assert_eq!(
            produced["p/A.java"],
            [UnitName::from("p.Helper")].into_iter().collect::<BTreeSet<_>>()
        );

        std::fs::remove_dir_all(base)?;
        Ok(())
    }

    #[test]
    fn empty_request_does_not_run_javac() -> anyhow::Result<()> {
        let compiler = JavacCompiler::new(PathBuf::from("/nonexistent/javac"));
        let outcome = compiler.compile(&request("/src", &[]))?;
        assert!(outcome.success);
        assert!(outcome.produced.is_empty());
        Ok(())
    }

    #[test]
    fn missing_program_is_compiler_unavailable() {
        let compiler = JavacCompiler::new(PathBuf::from("/nonexistent/javac"));
        let err = compiler.compile(&request("/src", &["A.java"])).unwrap_err();
        assert!(matches!(err, BuildError::CompilerUnavailable { .. }));
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::fixture::ClassSpec;
    use std::fs;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "class_rebuild_javac_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    fn write_script(path: &Path, content: &str) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    #[test]
    fn successful_run_attributes_written_classes() -> anyhow::Result<()> {
        let base = temp_dir("success");
        let fixture = base.join("fixture/A.class");
        fs::create_dir_all(fixture.parent().unwrap())?;
        fs::write(&fixture, ClassSpec::new("p/A").to_bytes())?;

        let fake_javac = base.join("bin/javac");
        write_script(
            &fake_javac,
            &format!(
                r#"#!/bin/sh
set -e
mkdir -p "$2/p"
cp "{}" "$2/p/A.class"
echo "[wrote $2/p/A.class]" >&2
"#,
                fixture.display()
            ),
        )?;

        let req = CompileRequest {
            source_root: base.join("src"),
            sources: vec!["p/A.java".to_string(), "p/Empty.java".to_string()],
            classpath: String::new(),
            destination: base.join("out"),
        };
        let outcome = JavacCompiler::new(fake_javac).compile(&req)?;
        assert!(outcome.success);
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(
            outcome.produced["p/A.java"],
            [UnitName::from("p.A")].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(outcome.produced["p/Empty.java"].is_empty());

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn failing_run_reports_diagnostics() -> anyhow::Result<()> {
        let base = temp_dir("failure");
        let fake_javac = base.join("bin/javac");
        let src = base.join("src");
        write_script(
            &fake_javac,
            &format!(
                r#"#!/bin/sh
echo "{}/A.java:2: error: boom" >&2
echo "1 error" >&2
exit 1
"#,
                src.display()
            ),
        )?;

        let req = CompileRequest {
            source_root: src,
            sources: vec!["A.java".to_string(), "B.java".to_string()],
            classpath: String::new(),
            destination: base.join("out"),
        };
        let outcome = JavacCompiler::new(fake_javac).compile(&req)?;
        assert!(!outcome.success);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(outcome.diagnostics["A.java"][0].ends_with("error: boom"));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }
}
