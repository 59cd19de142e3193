//! JSONL codec and atomic writer.
//!
//! One JSON object per line, UTF-8, LF, sorted by issue ID so diffs are
//! stable. Dependencies and labels ride embedded under the owning issue.
//! Writes go through a temp file in the target directory followed by a
//! rename; a reader never observes a half-written file. If the JSONL is
//! replaced underneath us mid-write (a concurrent Git checkout), the rename
//! still wins atomically and the next import reconciles the result; no
//! cross-process locking is attempted.

use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::util::{content_hash, sha256_hex};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Result of one atomic JSONL write.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    /// IDs whose content was actually (re)exported. Skipped
    /// (timestamp-only) IDs are absent; the caller must leave their dirty
    /// flags in place.
    pub emitted_ids: Vec<String>,
    /// New `(id, content_hash)` pairs for the emitted IDs.
    pub hashes: Vec<(String, String)>,
    /// SHA-256 of the written file bytes.
    pub content_hash: String,
    /// Total lines written, including skipped-but-retained issues.
    pub total: usize,
}

/// Parse a JSONL file strictly.
///
/// Blank lines are ignored. Any malformed line aborts with its line number
/// and a snippet; the caller's database is untouched.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `Parse` on bad lines.
pub fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    let content = fs::read_to_string(path)?;
    parse_issues(&content, path)
}

/// Parse JSONL content already in memory (the import reads the file once
/// for its hash gate and reuses the bytes here).
///
/// # Errors
///
/// Returns `Parse` on the first malformed line.
pub fn parse_issues(content: &str, path: &Path) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let issue: Issue = serde_json::from_str(line).map_err(|e| BeadsError::Parse {
            path: path.to_path_buf(),
            line: line_num + 1,
            reason: format!("{e}: {}", snippet(line)),
        })?;
        issues.push(issue);
    }

    Ok(issues)
}

/// Parse a JSONL file leniently into an ID-keyed map.
///
/// Malformed lines are skipped with a warning instead of aborting; the
/// incremental flush path must not lose good lines because one is bad.
/// Returns the map and the number of skipped lines. A missing file is an
/// empty map.
///
/// # Errors
///
/// Returns `Io` only for errors other than the file being absent.
pub fn read_issue_map_lenient(path: &Path) -> Result<(BTreeMap<String, Issue>, usize)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((BTreeMap::new(), 0)),
        Err(e) => return Err(BeadsError::Io(e)),
    };
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);

    let mut map = BTreeMap::new();
    let mut skipped = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(&line) {
            Ok(issue) => {
                map.insert(issue.id.clone(), issue);
            }
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    "skipping malformed JSONL line: {e}"
                );
            }
        }
    }

    Ok((map, skipped))
}

/// Write issues to `target` atomically, sorted by ID.
///
/// Steps: create `<target>.tmp.<pid>` in the target's directory, write every
/// issue, sync, rename over the target, set mode 0644. On any failure the
/// temp file is unlinked and the target is untouched.
///
/// Timestamp-only elision: an issue whose content hash (timestamps excluded)
/// equals its stored export hash is still written, but is not reported as
/// emitted and its stored hash is not refreshed. The caller keeps its dirty
/// flag so a later content change still exports.
///
/// # Errors
///
/// Returns `Io` on any filesystem failure and `Json` if serialization fails.
pub fn write_issues_atomic(
    target: &Path,
    issues: &[Issue],
    prior_hashes: &HashMap<String, String>,
) -> Result<ExportOutcome> {
    let tmp_path = temp_path(target);

    let result = write_to_temp(&tmp_path, target, issues, prior_hashes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_to_temp(
    tmp_path: &Path,
    target: &Path,
    issues: &[Issue],
    prior_hashes: &HashMap<String, String>,
) -> Result<ExportOutcome> {
    let mut sorted: Vec<&Issue> = issues.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let file = File::create(tmp_path)?;
    let mut writer = BufWriter::new(file);
    let mut bytes: Vec<u8> = Vec::new();

    let mut outcome = ExportOutcome::default();

    for issue in sorted {
        let line = serde_json::to_string(issue)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        outcome.total += 1;

        let hash = content_hash(issue);
        if prior_hashes.get(&issue.id) == Some(&hash) {
            continue;
        }
        outcome.emitted_ids.push(issue.id.clone());
        outcome.hashes.push((issue.id.clone(), hash));
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    fs::rename(tmp_path, target)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(0o644))?;
    }

    outcome.content_hash = sha256_hex(&bytes);
    Ok(outcome)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(name)
}

fn snippet(line: &str) -> String {
    line.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyType};
    use tempfile::TempDir;

    fn issue(id: &str, title: &str) -> Issue {
        Issue::new(id, title)
    }

    #[test]
    fn round_trip_preserves_issues_and_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");

        let mut b = issue("bd-2", "second");
        b.dependencies.push(Dependency {
            issue_id: "bd-2".to_string(),
            depends_on_id: "bd-1".to_string(),
            dep_type: DependencyType::Blocks,
        });
        let issues = vec![b, issue("bd-10", "tenth"), issue("bd-1", "first")];

        let outcome = write_issues_atomic(&path, &issues, &HashMap::new()).unwrap();
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.emitted_ids.len(), 3);

        let decoded = read_issues(&path).unwrap();
        // ASCII order: bd-1 < bd-10 < bd-2
        let ids: Vec<&str> = decoded.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1", "bd-10", "bd-2"]);

        let b_back = decoded.iter().find(|i| i.id == "bd-2").unwrap();
        assert_eq!(b_back.dependencies.len(), 1);
        assert_eq!(b_back.dependencies[0].depends_on_id, "bd-1");
    }

    #[test]
    fn parse_error_reports_line_number() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        fs::write(
            &path,
            "{\"id\":\"bd-1\",\"title\":\"ok\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\nnot json\n",
        )
        .unwrap();

        let err = read_issues(&path).unwrap_err();
        match err {
            BeadsError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn lenient_reader_skips_bad_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        fs::write(
            &path,
            "{\"id\":\"bd-1\",\"title\":\"ok\",\"created_at\":\"2026-01-01T00:00:00Z\",\"updated_at\":\"2026-01-01T00:00:00Z\"}\nnot json\n",
        )
        .unwrap();

        let (map, skipped) = read_issue_map_lenient(&path).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(skipped, 1);
        assert!(map.contains_key("bd-1"));
    }

    #[test]
    fn missing_file_is_empty_map() {
        let temp = TempDir::new().unwrap();
        let (map, skipped) = read_issue_map_lenient(&temp.path().join("nope.jsonl")).unwrap();
        assert!(map.is_empty());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn timestamp_only_issue_written_but_not_emitted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");

        let a = issue("bd-1", "stable");
        let prior: HashMap<String, String> =
            [("bd-1".to_string(), content_hash(&a))].into_iter().collect();

        let outcome = write_issues_atomic(&path, &[a], &prior).unwrap();
        assert_eq!(outcome.total, 1);
        assert!(outcome.emitted_ids.is_empty());
        assert!(outcome.hashes.is_empty());
        // The line is still in the file
        assert_eq!(read_issues(&path).unwrap().len(), 1);
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        // Target directory does not exist: create of the temp file fails
        let path = temp.path().join("missing-dir/issues.jsonl");
        let result = write_issues_atomic(&path, &[issue("bd-1", "x")], &HashMap::new());
        assert!(result.is_err());
        assert!(fs::read_dir(temp.path()).unwrap().next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn written_file_mode_is_0644() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        write_issues_atomic(&path, &[issue("bd-1", "x")], &HashMap::new()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
