//! Lock reading and nix invocation for a flake rooted at a directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Lock file name, relative to the flake root.
pub const LOCK_FILE: &str = "flake.lock";

/// Prefix every realised build output must carry.
pub const STORE_PREFIX: &str = "/nix/store";

/// Locked input revisions read from `flake.lock`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Locks {
    #[serde(default)]
    pub nodes: BTreeMap<String, LockNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockNode {
    #[serde(default)]
    pub locked: LockInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockInfo {
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(default, rename = "lastModified")]
    pub last_modified: u64,
    #[serde(default, rename = "narHash")]
    pub nar_hash: String,
    #[serde(default)]
    pub rev: String,
}

impl Locks {
    pub fn read(buf: &[u8]) -> Result<Self> {
        serde_json::from_slice(buf).map_err(Error::LockParse)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let buf = fs::read(path).map_err(|err| Error::io("read", path, err))?;
        Self::read(&buf)
    }

    /// Revision of one input, or `None` when the input is missing from the
    /// lock document or its revision field is empty.
    pub fn input_rev(&self, input: &str) -> Option<&str> {
        let node = self.nodes.get(input)?;
        if node.locked.rev.is_empty() {
            None
        } else {
            Some(node.locked.rev.as_str())
        }
    }
}

/// Captured output of a build that is allowed to fail.
#[derive(Debug, Clone)]
pub struct BuildCapture {
    pub stdout: String,
    pub stderr: String,
    pub ok: bool,
}

/// Build-tool capabilities the update orchestrator consumes.
///
/// Kept narrow so tests can substitute an in-memory fake.
pub trait BuildTool {
    /// Current lock state of the flake.
    fn locks(&self) -> Result<Locks>;

    /// Refresh one input's lock entry in place.
    fn refresh_input(&self, input: &str) -> Result<()>;

    /// Build an attr path, capturing both output streams. A failed build
    /// still returns the streams with `ok` cleared; only a process that
    /// could not run at all is an error.
    fn build_captured(&self, attr_path: &str, sandbox: bool) -> Result<BuildCapture>;

    /// Build an attr path and return its realised main output path.
    fn build_for_output_path(&self, attr_path: &str) -> Result<PathBuf>;
}

/// A flake on disk, driven through the nix CLI.
pub struct NixFlake {
    root: PathBuf,
    nix_bin: PathBuf,
}

impl NixFlake {
    /// Locates the nix binary once; a missing binary is a fatal
    /// configuration error.
    pub fn new(root: &Path) -> Result<Self> {
        let nix_bin = which::which("nix").map_err(|_| Error::NixNotFound)?;
        Ok(Self {
            root: root.to_path_buf(),
            nix_bin,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_file_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.nix_bin);
        cmd.args(args).current_dir(&self.root).stdin(Stdio::null());
        cmd
    }

    fn spawn_error(args: &[String], err: &io::Error) -> Error {
        Error::BuildTool {
            command: args.join(" "),
            detail: err.to_string(),
        }
    }
}

impl BuildTool for NixFlake {
    fn locks(&self) -> Result<Locks> {
        Locks::read_file(&self.lock_file_path())
    }

    fn refresh_input(&self, input: &str) -> Result<()> {
        let args: Vec<String> = ["flake", "lock", "--update-input", input]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let status = self
            .command(&args)
            .status()
            .map_err(|err| Self::spawn_error(&args, &err))?;
        if !status.success() {
            return Err(Error::BuildTool {
                command: args.join(" "),
                detail: format!("exited with {status}"),
            });
        }
        Ok(())
    }

    fn build_captured(&self, attr_path: &str, sandbox: bool) -> Result<BuildCapture> {
        let mut args = vec!["build".to_string(), "-L".to_string()];
        if !sandbox {
            args.push("--option".to_string());
            args.push("build-use-sandbox".to_string());
            args.push("false".to_string());
        }
        args.push(format!(".#{attr_path}"));

        let child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Self::spawn_error(&args, &err))?;
        run_teed(child, &args)
    }

    fn build_for_output_path(&self, attr_path: &str) -> Result<PathBuf> {
        let args = vec![
            "build".to_string(),
            "--json".to_string(),
            "-L".to_string(),
            format!(".#{attr_path}"),
        ];
        // Stdout is mirrored live while being captured for parsing; stderr
        // carries the build log and goes straight through.
        let child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| Self::spawn_error(&args, &err))?;
        let capture = run_teed(child, &args)?;
        if !capture.ok {
            return Err(Error::BuildTool {
                command: args.join(" "),
                detail: "exited with failure".to_string(),
            });
        }
        parse_build_output(capture.stdout.trim())
    }
}

/// Waits for a spawned build while mirroring both of its streams to the
/// parent's, and returns the captured copies.
fn run_teed(mut child: Child, args: &[String]) -> Result<BuildCapture> {
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    let stdout_pump = thread::spawn(move || match child_stdout {
        Some(stream) => tee(stream, io::stdout()),
        None => Ok(Vec::new()),
    });
    let stderr_pump = thread::spawn(move || match child_stderr {
        Some(stream) => tee(stream, io::stderr()),
        None => Ok(Vec::new()),
    });

    let status = child.wait().map_err(|err| Error::BuildTool {
        command: args.join(" "),
        detail: err.to_string(),
    })?;
    let stdout = join_pump(stdout_pump, args)?;
    let stderr = join_pump(stderr_pump, args)?;

    Ok(BuildCapture {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        ok: status.success(),
    })
}

fn join_pump(
    pump: thread::JoinHandle<io::Result<Vec<u8>>>,
    args: &[String],
) -> Result<Vec<u8>> {
    let joined = pump.join().map_err(|_| Error::BuildTool {
        command: args.join(" "),
        detail: "output pump thread panicked".to_string(),
    })?;
    joined.map_err(|err| Error::BuildTool {
        command: args.join(" "),
        detail: err.to_string(),
    })
}

fn tee(mut from: impl Read, mut to: impl Write) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = from.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        to.write_all(&chunk[..n])?;
        captured.extend_from_slice(&chunk[..n]);
    }
    Ok(captured)
}

#[derive(Debug, Deserialize)]
struct BuildOutput {
    outputs: Option<BTreeMap<String, String>>,
}

fn parse_build_output(stdout: &str) -> Result<PathBuf> {
    let entries: Vec<BuildOutput> = serde_json::from_str(stdout)
        .map_err(|err| Error::BuildResultMalformed(format!("json: {err}")))?;
    if entries.len() != 1 {
        return Err(Error::BuildResultMalformed(
            "invalid root array length".to_string(),
        ));
    }
    let outputs = entries[0]
        .outputs
        .as_ref()
        .ok_or_else(|| Error::BuildResultMalformed("no outputs key".to_string()))?;
    let main_output = outputs
        .get("out")
        .ok_or_else(|| Error::BuildResultMalformed("main output not present".to_string()))?;
    if !main_output.starts_with(STORE_PREFIX) {
        return Err(Error::BuildResultMalformed(format!(
            "output does not start with {STORE_PREFIX}"
        )));
    }
    Ok(PathBuf::from(main_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_JSON: &str = r#"{
        "nodes": {
            "nixpkgs": {
                "locked": {
                    "type": "github",
                    "lastModified": 1669542132,
                    "narHash": "sha256-DRlg+6LLAJBIzXEwNWV59XLLcxh9CGGltEskuMDtZpk=",
                    "rev": "ffca9ffaaafb38c8979068cee98b2644bd3f14cb"
                }
            },
            "root": {}
        },
        "root": "root",
        "version": 7
    }"#;

    #[test]
    fn reads_input_rev_from_lock_document() {
        let locks = Locks::read(LOCK_JSON.as_bytes()).expect("parse");
        assert_eq!(
            locks.input_rev("nixpkgs"),
            Some("ffca9ffaaafb38c8979068cee98b2644bd3f14cb")
        );
    }

    #[test]
    fn missing_input_has_no_rev() {
        let locks = Locks::read(LOCK_JSON.as_bytes()).expect("parse");
        assert_eq!(locks.input_rev("nonexistent"), None);
    }

    #[test]
    fn empty_rev_reads_as_absent() {
        let locks = Locks::read(LOCK_JSON.as_bytes()).expect("parse");
        assert_eq!(locks.input_rev("root"), None);
    }

    #[test]
    fn invalid_lock_json_is_a_parse_error() {
        let err = Locks::read(b"not json").unwrap_err();
        assert!(matches!(err, Error::LockParse(_)));
    }

    #[test]
    fn build_output_happy_path() {
        let raw = r#"[{"outputs": {"out": "/nix/store/abc-pkg", "dev": "/nix/store/abc-pkg-dev"}}]"#;
        let path = parse_build_output(raw).expect("parse");
        assert_eq!(path, PathBuf::from("/nix/store/abc-pkg"));
    }

    #[test]
    fn build_output_rejects_multiple_entries() {
        let raw = r#"[{"outputs": {"out": "/nix/store/a"}}, {"outputs": {"out": "/nix/store/b"}}]"#;
        assert!(matches!(
            parse_build_output(raw),
            Err(Error::BuildResultMalformed(_))
        ));
    }

    #[test]
    fn build_output_rejects_missing_outputs() {
        assert!(matches!(
            parse_build_output(r#"[{}]"#),
            Err(Error::BuildResultMalformed(_))
        ));
    }

    #[test]
    fn build_output_rejects_missing_main_output() {
        assert!(matches!(
            parse_build_output(r#"[{"outputs": {"dev": "/nix/store/a"}}]"#),
            Err(Error::BuildResultMalformed(_))
        ));
    }

    #[test]
    fn build_output_rejects_non_store_path() {
        assert!(matches!(
            parse_build_output(r#"[{"outputs": {"out": "/tmp/evil"}}]"#),
            Err(Error::BuildResultMalformed(_))
        ));
    }

    #[cfg(unix)]
    fn stub_flake(dir: &Path, body: &str) -> NixFlake {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("nix");
        fs::write(&bin, body).expect("write stub");
        let mut perms = fs::metadata(&bin).expect("stat").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&bin, perms).expect("chmod");
        NixFlake {
            root: dir.to_path_buf(),
            nix_bin: bin,
        }
    }

    #[cfg(unix)]
    #[test]
    fn output_path_build_parses_captured_stdout() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let flake = stub_flake(
            dir.path(),
            "#!/bin/sh\nprintf '[{\"outputs\":{\"out\":\"/nix/store/abc-bump\"}}]'\n",
        );
        let path = flake.build_for_output_path("bump").expect("build");
        assert_eq!(path, PathBuf::from("/nix/store/abc-bump"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_output_path_build_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let flake = stub_flake(dir.path(), "#!/bin/sh\nexit 1\n");
        let err = flake.build_for_output_path("bump").unwrap_err();
        assert!(matches!(err, Error::BuildTool { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captured_build_reports_both_streams() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let flake = stub_flake(
            dir.path(),
            "#!/bin/sh\necho progress\necho trouble >&2\nexit 1\n",
        );
        let capture = flake.build_captured("pkg", true).expect("build");
        assert!(!capture.ok);
        assert_eq!(capture.stdout, "progress\n");
        assert_eq!(capture.stderr, "trouble\n");
    }
}
