//! Dependency-ordered execution of update tasks.
//!
//! A task runs as a strictly sequential pipeline: required tasks, input
//! refresh, derived-hash probes, update scripts, then verification builds.
//! Each phase reports the files it changed; the union is the task's result.
//! Errors propagate immediately and nothing already written to disk is
//! rolled back, so a later run can finish the job.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::changes::UpdateResult;
use crate::config::{DerivedHash, FreshenConfig, RunMode, UpdateScript, UpdateTask};
use crate::error::{Error, Result};
use crate::flake::{BuildTool, Locks, LOCK_FILE};
use crate::mismatch::find_hash_mismatch;
use crate::script::run_update_script;

/// Executes named update tasks from a [`FreshenConfig`] against a flake.
pub struct UpdateRunner<'a, F: BuildTool> {
    flake: &'a F,
    root: PathBuf,
    tasks: BTreeMap<&'a str, &'a UpdateTask>,
}

impl<'a, F: BuildTool> UpdateRunner<'a, F> {
    pub fn new(config: &'a FreshenConfig, flake: &'a F, root: &Path) -> Self {
        let tasks = config
            .update_tasks
            .iter()
            .map(|task| (task.name.as_str(), task))
            .collect();
        Self {
            flake,
            root: root.to_path_buf(),
            tasks,
        }
    }

    /// Run one named task, required tasks first.
    ///
    /// `check` forces the verification build and test phase even when no
    /// file changed; otherwise a task with nothing to do short-circuits.
    pub fn run_task(&self, name: &str, check: bool) -> Result<UpdateResult> {
        let task = self
            .tasks
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownTask {
                name: name.to_string(),
                known: self.known_names(),
            })?;

        let mut out = UpdateResult::new();

        tracing::info!(task = %task.name, "running required update tasks");
        for required in &task.required_update_tasks {
            if *required == task.name {
                return Err(Error::SelfReference {
                    name: task.name.clone(),
                });
            }
            let result =
                self.run_task(required, check)
                    .map_err(|source| Error::RequiredTaskFailed {
                        task: task.name.clone(),
                        required: required.clone(),
                        source: Box::new(source),
                    })?;
            out.union(result);
        }

        let old_locks = self.flake.locks()?;

        tracing::info!(task = %task.name, "updating inputs");
        let mut any_input_changed = false;
        for input in &task.inputs {
            match self.refresh_one_input(task, input, &old_locks)? {
                Some((old, new)) => {
                    tracing::info!(task = %task.name, input = %input, %old, %new, "input changed");
                    any_input_changed = true;
                }
                None => {
                    tracing::info!(task = %task.name, input = %input, "no input change");
                }
            }
        }
        if any_input_changed {
            out.add_path(LOCK_FILE);
        } else {
            tracing::info!(task = %task.name, "no inputs changed");
        }

        let derived = filter_work(&task.derived_hashes, |entry| entry.run_mode, any_input_changed);
        let scripts = filter_work(&task.update_scripts, |entry| entry.run_mode, any_input_changed);

        if out.is_empty() && derived.is_empty() && scripts.is_empty() && !check {
            return Ok(out);
        }

        tracing::info!(task = %task.name, "updating derived hashes");
        let mut any_derived_updated = false;
        for entry in derived {
            match self.update_derived_hash(task, entry)? {
                Some((old, new)) => {
                    tracing::info!(
                        task = %task.name,
                        attr_path = %entry.attr_path,
                        %old,
                        %new,
                        "derived hash changed"
                    );
                    out.add_path(entry.filename.clone());
                    any_derived_updated = true;
                }
                None => {
                    tracing::info!(task = %task.name, attr_path = %entry.attr_path, "no derived hash change");
                }
            }
        }
        if !any_derived_updated {
            tracing::info!(task = %task.name, "no derived hash changed");
        }

        for entry in scripts {
            tracing::info!(task = %task.name, attr_path = %entry.attr_path, "running update script");
            let result = self
                .run_one_script(entry)
                .map_err(|source| Error::ScriptFailed {
                    task: task.name.clone(),
                    attr_path: entry.attr_path.clone(),
                    source: Box::new(source),
                })?;
            out.union(result);
        }

        if out.is_empty() && !check {
            return Ok(out);
        }

        if task.main_attr_path.is_empty() {
            tracing::info!(task = %task.name, "no main build");
        } else {
            tracing::info!(task = %task.name, attr_path = %task.main_attr_path, "building main attr path");
            let capture = self.flake.build_captured(&task.main_attr_path, true)?;
            if !capture.ok {
                return Err(Error::MainBuildFailed {
                    task: task.name.clone(),
                    attr_path: task.main_attr_path.clone(),
                });
            }
        }

        tracing::info!(task = %task.name, "building tests");
        for test in &task.tests {
            tracing::info!(task = %task.name, attr_path = %test.attr_path, "building test");
            let capture = self
                .flake
                .build_captured(&test.attr_path, !test.disable_sandbox)?;
            if !capture.ok {
                return Err(Error::TestBuildFailed {
                    task: task.name.clone(),
                    attr_path: test.attr_path.clone(),
                });
            }
        }

        Ok(out)
    }

    fn known_names(&self) -> String {
        self.tasks.keys().copied().collect::<Vec<_>>().join(", ")
    }

    /// Refresh one input's lock entry and report `(old, new)` revisions when
    /// the refresh moved the pin.
    fn refresh_one_input(
        &self,
        task: &UpdateTask,
        input: &str,
        old_locks: &Locks,
    ) -> Result<Option<(String, String)>> {
        let old_rev = old_locks
            .input_rev(input)
            .ok_or_else(|| Error::MissingInput {
                task: task.name.clone(),
                input: input.to_string(),
            })?
            .to_string();

        let wrap = |source: Error| Error::InputFailed {
            task: task.name.clone(),
            input: input.to_string(),
            source: Box::new(source),
        };
        self.flake.refresh_input(input).map_err(&wrap)?;
        let new_locks = self.flake.locks().map_err(&wrap)?;
        let new_rev = new_locks
            .input_rev(input)
            .ok_or_else(|| Error::MissingInput {
                task: task.name.clone(),
                input: input.to_string(),
            })?
            .to_string();

        if old_rev == new_rev {
            Ok(None)
        } else {
            Ok(Some((old_rev, new_rev)))
        }
    }

    /// Probe one derived hash through a deliberately failing build and
    /// rewrite its stored value when it drifted. Reports `(old, new)` when
    /// the file was rewritten.
    fn update_derived_hash(
        &self,
        task: &UpdateTask,
        entry: &DerivedHash,
    ) -> Result<Option<(String, String)>> {
        let wrap = |source: Error| Error::DerivedHashFailed {
            task: task.name.clone(),
            attr_path: entry.attr_path.clone(),
            source: Box::new(source),
        };

        let capture = self
            .flake
            .build_captured(&entry.attr_path, true)
            .map_err(&wrap)?;
        if capture.ok {
            return Err(Error::UnexpectedBuildSuccess {
                attr_path: entry.attr_path.clone(),
            });
        }
        let mismatch = find_hash_mismatch(&capture.stderr).map_err(&wrap)?;

        let hash_path = self.root.join(&entry.filename);
        let old = read_json_string_file(&hash_path).map_err(&wrap)?;
        if old == mismatch.got {
            return Ok(None);
        }
        write_json_string_file(&mismatch.got, &hash_path).map_err(&wrap)?;
        Ok(Some((old, mismatch.got)))
    }

    fn run_one_script(&self, entry: &UpdateScript) -> Result<UpdateResult> {
        let script_output = self.flake.build_for_output_path(&entry.attr_path)?;
        run_update_script(&script_output, entry, &self.root)
    }
}

fn filter_work<T>(
    entries: &[T],
    run_mode: impl Fn(&T) -> RunMode,
    any_input_changed: bool,
) -> Vec<&T> {
    entries
        .iter()
        .filter(|entry| any_input_changed || run_mode(entry) == RunMode::Always)
        .collect()
}

/// Read a file containing exactly one JSON-encoded string.
///
/// A missing file reads as the empty string, so a hash file that was never
/// written before will always differ from the probed hash and be created on
/// the first run.
fn read_json_string_file(path: &Path) -> Result<String> {
    let buf = match fs::read(path) {
        Ok(buf) => buf,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(Error::io("read", path, err)),
    };
    serde_json::from_slice(&buf).map_err(|source| Error::HashFileParse {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_string_file(value: &str, path: &Path) -> Result<()> {
    let buf = serde_json::to_vec(value).map_err(|source| Error::HashFileParse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, buf).map_err(|err| Error::io("write", path, err))
}
