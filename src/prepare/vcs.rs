//! Version control provenance capture.
//!
//! Revision and working-tree status for each repository named in the
//! `vcs revisions` section is written into the run directory as
//! `<repo-dir-name>_rev.txt`, so a run can always be traced back to the
//! exact source it was built from.

use crate::fspath::{expanded_path, resolve_lossy};
use crate::prepare::fatal;
use crate::rundesc::{Req, RunDesc};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Working-tree paths whose changes are noise and never reported.
const IGNORE_UNCOMMITTED: [&str; 2] = ["CONFIG/cfg.txt", "TOOLS/COMPILE/full_key_list.txt"];

/// One version control system: repository discovery plus the two queries
/// the provenance file needs.
pub(crate) trait VcsBackend {
    fn name(&self) -> &'static str;
    /// Walk upward from `start` to the nearest repository root.
    fn locate_root(&self, start: &Path) -> Option<PathBuf>;
    /// Branch/revision/author/date/files/message lines for the current
    /// revision, formatted for the provenance file.
    fn revision_summary(&self, root: &Path) -> Result<Vec<String>>;
    /// `<change-type> <path>` lines for uncommitted working-tree changes.
    fn uncommitted_changes(&self, root: &Path) -> Result<Vec<String>>;
}

/// Record revision and status information for every repository declared
/// in the `vcs revisions` section.
pub(crate) fn record_vcs_revisions(run_desc: &RunDesc, run_dir: &Path) -> Result<()> {
    if run_desc.lookup(&["vcs revisions"]).is_err() {
        return Ok(());
    }
    let req = Req::new(run_desc, Some(run_dir));
    let tools = req.value(&["vcs revisions"])?;
    let Some(tools) = tools.as_mapping() else {
        return Err(fatal(
            Some(run_dir),
            "\"vcs revisions\" section must be a mapping of version control \
             tools to lists of repository paths"
                .to_string(),
        ));
    };
    for tool_name in tools.keys() {
        let Some(tool_name) = tool_name.as_str() else {
            continue;
        };
        let backend: Box<dyn VcsBackend> = match tool_name {
            "git" => Box::new(GitBackend),
            "hg" => Box::new(HgBackend),
            other => {
                return Err(fatal(
                    Some(run_dir),
                    format!("unknown version control tool: {other}"),
                ));
            }
        };
        let repos = req.value(&["vcs revisions", tool_name])?;
        let Some(repos) = repos.as_sequence() else {
            return Err(fatal(
                Some(run_dir),
                format!("\"vcs revisions: {tool_name}\" value must be a list of repository paths"),
            ));
        };
        for repo in repos {
            let Some(repo) = repo.as_str() else {
                continue;
            };
            write_repo_rev_file(Path::new(repo), run_dir, backend.as_ref())?;
        }
    }
    Ok(())
}

/// Write one repository's revision and status information to
/// `<repo-dir-name>_rev.txt` in the run directory.
fn write_repo_rev_file(repo: &Path, run_dir: &Path, backend: &dyn VcsBackend) -> Result<()> {
    let repo_path = resolve_lossy(&expanded_path(&repo.to_string_lossy()));
    let lines = repo_rev_file_lines(&repo_path, run_dir, backend)?;
    if lines.is_empty() {
        return Ok(());
    }
    let repo_name = repo_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .context("repository path has no directory name")?;
    let rev_file = run_dir.join(format!("{repo_name}_rev.txt"));
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&rev_file, content).with_context(|| format!("write {}", rev_file.display()))?;
    Ok(())
}

/// Gather the provenance lines for one repository. A nonexistent
/// repository path is a warning and an empty result, not an error;
/// a path with no repository root above it is fatal.
fn repo_rev_file_lines(
    repo: &Path,
    run_dir: &Path,
    backend: &dyn VcsBackend,
) -> Result<Vec<String>> {
    if !repo.exists() {
        tracing::warn!(
            "revision and status requested for non-existent repo: {}",
            repo.display()
        );
        return Ok(Vec::new());
    }
    let Some(root) = backend.locate_root(repo) else {
        return Err(fatal(
            Some(run_dir),
            format!(
                "unable to find {} repo root in or above {}",
                backend.name(),
                repo.display()
            ),
        ));
    };
    let mut lines = backend.revision_summary(&root)?;
    let changes: Vec<String> = backend
        .uncommitted_changes(&root)?
        .into_iter()
        .filter(|change| !IGNORE_UNCOMMITTED.iter().any(|noise| change.ends_with(noise)))
        .collect();
    if !changes.is_empty() {
        tracing::warn!("There are uncommitted changes in {}", repo.display());
        lines.push("uncommitted changes:".to_string());
        lines.extend(changes);
    }
    Ok(lines)
}

fn tool_output(tool: &str, root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(tool)
        .current_dir(root)
        .args(args)
        .output()
        .with_context(|| format!("run {tool} {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{tool} {} failed in {}: {}",
            args.join(" "),
            root.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .trim_end_matches('\n')
        .to_string())
}

pub(crate) struct GitBackend;

impl VcsBackend for GitBackend {
    fn name(&self) -> &'static str {
        "Git"
    }

    fn locate_root(&self, start: &Path) -> Option<PathBuf> {
        let mut dir = start;
        loop {
            if dir.join(".git").exists() {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }

    fn revision_summary(&self, root: &Path) -> Result<Vec<String>> {
        let branch = tool_output("git", root, &["branch", "--show-current"])?;
        let commit = tool_output("git", root, &["rev-parse", "HEAD"])?;
        let mut lines = vec![format!("branch: {branch}"), format!("commit: {commit}")];
        let tags = tool_output("git", root, &["tag", "--points-at", "HEAD"])?;
        for tag in tags.lines().filter(|tag| !tag.is_empty()) {
            lines.push(format!("tag:    {tag}"));
        }
        let author = tool_output("git", root, &["log", "-1", "--format=%an"])?;
        let date = tool_output(
            "git",
            root,
            &[
                "log",
                "-1",
                "--date=format:%a %b %d %H:%M:%S %Y %z",
                "--format=%ad",
            ],
        )?;
        let files = tool_output("git", root, &["show", "--pretty=", "--name-only", "HEAD"])?;
        lines.push(format!("author: {author}"));
        lines.push(format!("date:   {date}"));
        lines.push(format!(
            "files:  {}",
            files.lines().collect::<Vec<_>>().join(" ")
        ));
        lines.push("message:".to_string());
        lines.push(tool_output("git", root, &["log", "-1", "--format=%B"])?);
        Ok(lines)
    }

    fn uncommitted_changes(&self, root: &Path) -> Result<Vec<String>> {
        let status = tool_output("git", root, &["diff", "--name-status", "HEAD"])?;
        Ok(status
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                match line.split_once('\t') {
                    Some((change_type, path)) => format!("{change_type} {path}"),
                    None => line.to_string(),
                }
            })
            .collect())
    }
}

pub(crate) struct HgBackend;

impl VcsBackend for HgBackend {
    fn name(&self) -> &'static str {
        "Mercurial"
    }

    fn locate_root(&self, start: &Path) -> Option<PathBuf> {
        let mut dir = start;
        loop {
            if dir.join(".hg").exists() {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }

    fn revision_summary(&self, root: &Path) -> Result<Vec<String>> {
        let changeset = tool_output("hg", root, &["log", "-r", ".", "--template", "{rev}:{node}"])?;
        let mut lines = vec![format!("changeset:  {changeset}")];
        let tags = tool_output("hg", root, &["log", "-r", ".", "--template", "{tags}"])?;
        if !tags.is_empty() && tags != "tip" {
            lines.push(format!("tag:        {tags}"));
        }
        let user = tool_output("hg", root, &["log", "-r", ".", "--template", "{author}"])?;
        let date = tool_output("hg", root, &["log", "-r", ".", "--template", "{date|date}"])?;
        let files = tool_output("hg", root, &["log", "-r", ".", "--template", "{files}"])?;
        lines.push(format!("user:       {user}"));
        lines.push(format!("date:       {date}"));
        lines.push(format!("files:      {files}"));
        lines.push("description:".to_string());
        let description =
            tool_output("hg", root, &["log", "-r", ".", "--template", "{desc}"])?;
        lines.extend(description.lines().map(str::to_string));
        Ok(lines)
    }

    fn uncommitted_changes(&self, root: &Path) -> Result<Vec<String>> {
        let status = tool_output("hg", root, &["status", "-mardC"])?;
        Ok(status
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
