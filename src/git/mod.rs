//! Git gateway: a thin wrapper around the system `git` binary.
//!
//! All repository interaction funnels through [`GitRepo`] so every command
//! is logged and its output is available when something goes wrong.
//! Network-facing operations (fetch/push/ls-remote) surface failures as
//! `GatewayUnavailable`, which is safe to retry.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// A local git checkout with a known origin
pub struct GitRepo {
    /// Checkout directory
    pub path: PathBuf,
    /// Origin URL this checkout tracks
    pub origin: String,
}

/// Output of a raw git invocation
struct GitOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

impl GitRepo {
    /// Wrap the checkout at `path` tracking `origin`
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
        }
    }

    fn run_raw(&self, args: &[&str]) -> Result<GitOutput> {
        debug!(path = %self.path.display(), ?args, "git");
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()?;
        Ok(GitOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git, expect success, return stdout
    fn git(&self, args: &[&str]) -> Result<String> {
        let out = self.run_raw(args)?;
        if out.code != 0 {
            return Err(Error::Git(format!(
                "`git {}` exited with {}: {}",
                args.join(" "),
                out.code,
                if out.stderr.is_empty() { &out.stdout } else { &out.stderr }.trim()
            )));
        }
        Ok(out.stdout)
    }

    /// Run a network-facing git command; failure is a retryable gateway error
    fn git_net(&self, args: &[&str]) -> Result<String> {
        let out = self.run_raw(args)?;
        if out.code != 0 {
            return Err(Error::GatewayUnavailable(format!(
                "`git {}` exited with {}: {}",
                args.join(" "),
                out.code,
                if out.stderr.is_empty() { &out.stdout } else { &out.stderr }.trim()
            )));
        }
        Ok(out.stdout)
    }

    /// Initialize the checkout if needed, point origin at the configured URL
    /// and fetch with tag pruning. Idempotent.
    pub fn ensure_repo(&self) -> Result<()> {
        if !self.path.exists() {
            std::fs::create_dir_all(&self.path)?;
            self.git(&["init", "-q"])?;
        }
        if self.current_origin()?.as_deref() != Some(self.origin.as_str()) {
            // stale or missing remote; replace it
            let _ = self.run_raw(&["remote", "rm", "origin"]);
            self.git(&["remote", "add", "origin", &self.origin])?;
        }
        self.git_net(&[
            "fetch",
            "origin",
            "--tags",
            "--prune",
            "--prune-tags",
            "--force",
        ])?;
        Ok(())
    }

    /// URL of the `origin` remote, if configured
    pub fn current_origin(&self) -> Result<Option<String>> {
        let out = self.run_raw(&["remote", "get-url", "origin"])?;
        if out.code == 0 {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Fetch specific refspecs from a remote or URL
    pub fn fetch(&self, remote: &str, refspecs: &[&str]) -> Result<()> {
        let mut args = vec!["fetch", remote];
        args.extend_from_slice(refspecs);
        self.git_net(&args)?;
        Ok(())
    }

    /// Check out `branch`, optionally hard-resetting to origin and cleaning
    /// the work tree
    pub fn checkout(&self, branch: &str, reset: bool, clean: bool) -> Result<()> {
        if reset {
            self.git(&["checkout", "-q", "-f", branch])?;
            self.git(&["reset", "-q", "--hard", &format!("origin/{branch}")])?;
        } else {
            self.git(&["checkout", "-q", branch])?;
        }
        if clean {
            self.git(&["clean", "-d", "--force", "-q"])?;
        }
        Ok(())
    }

    /// Create (or reset) `branch` at `start_point` and check it out
    pub fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()> {
        self.git(&["checkout", "-q", "-B", branch, start_point])?;
        Ok(())
    }

    /// Resolve `rev` to a commit id; error if it does not exist
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self.git(&["rev-parse", "--verify", rev])?.trim().to_string())
    }

    /// Resolve `rev`, or `None` if it does not exist
    pub fn rev_parse_opt(&self, rev: &str) -> Result<Option<String>> {
        let out = self.run_raw(&["rev-parse", "--verify", "--quiet", rev])?;
        if out.code == 0 {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether `ancestor` is reachable from `descendant`
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let out = self.run_raw(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match out.code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(Error::Git(format!(
                "merge-base --is-ancestor {ancestor} {descendant} exited with {code}: {}",
                out.stderr.trim()
            ))),
        }
    }

    /// Merge `branch` into the current branch with an explicit message
    pub fn merge(&self, branch: &str, message: &str) -> Result<()> {
        self.git(&["merge", "-m", message, branch])?;
        Ok(())
    }

    /// Push branches to origin
    pub fn push(&self, branches: &[&str]) -> Result<()> {
        let mut args = vec!["push", "origin"];
        args.extend_from_slice(branches);
        self.git_net(&args)?;
        Ok(())
    }

    /// Push a single refspec to an arbitrary remote URL
    pub fn push_refspec(&self, remote: &str, refspec: &str, force: bool) -> Result<()> {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        args.push(refspec);
        self.git_net(&args)?;
        Ok(())
    }

    /// SHA a remote ref points at, queried without a local fetch
    pub fn ls_remote(&self, url: &str, reference: &str) -> Result<Option<String>> {
        let out = self.git_net(&["ls-remote", url, reference])?;
        Ok(out
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().next())
            .map(String::from))
    }

    /// Branch names a remote advertises under `pattern`
    /// (e.g. `refs/heads/topic/*`), queried without a local fetch
    pub fn ls_remote_heads(&self, url: &str, pattern: &str) -> Result<Vec<String>> {
        let out = self.git_net(&["ls-remote", "--heads", url, pattern])?;
        Ok(out
            .lines()
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|r| r.strip_prefix("refs/heads/"))
            .map(String::from)
            .collect())
    }

    /// Create an annotated tag at `commit`
    pub fn tag(&self, name: &str, commit: &str, message: &str) -> Result<()> {
        self.git(&["tag", "-a", "-m", message, name, commit])?;
        Ok(())
    }

    /// Commit a tag points at, if the tag exists locally
    pub fn tag_target(&self, name: &str) -> Result<Option<String>> {
        self.rev_parse_opt(&format!("{name}^{{commit}}"))
    }

    /// File contents at a specific revision
    pub fn show(&self, rev: &str, path: &str) -> Result<String> {
        self.git(&["show", &format!("{rev}:{path}")])
    }

    /// All branch names known to the checkout (local and remote-tracking)
    pub fn branches(&self) -> Result<Vec<String>> {
        Ok(self
            .git(&["branch", "--all", "--format=%(refname:short)"])?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// First capture group of `pattern` for every matching branch name
    pub fn match_branches(&self, pattern: &Regex) -> Result<Vec<String>> {
        Ok(self
            .branches()?
            .iter()
            .filter_map(|b| pattern.captures(b))
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect())
    }

    /// Stage paths
    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(&args)?;
        Ok(())
    }

    /// Commit staged changes
    pub fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Whether the work tree has uncommitted changes
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.git(&["status", "--porcelain"])?.trim().is_empty())
    }

    /// Absolute path of a file inside the checkout
    pub fn file_path(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}
