//! Stages backed by external programs.
//!
//! Every program runs in the project checkout and learns about the run through
//! environment variables:
//!
//! | variable             | content                                   |
//! |----------------------|-------------------------------------------|
//! | `PERFCI_VERSION`     | current revision                          |
//! | `PERFCI_VERSION_OLD` | old revision                              |
//! | `PERFCI_PROJECT`     | project checkout                          |
//! | `PERFCI_RESULTS`     | result folder of the version pair         |
//! | `PERFCI_CONFIG`      | measurement configuration as JSON         |
//! | `PERFCI_OUTPUT`      | file the stage writes its answer to       |
//! | `PERFCI_TESTS`       | selected tests as JSON list (measurement) |
//! | `PERFCI_TEST`        | analyzed test (call tree, node measurement) |

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;

use super::{CauseSearchConfig, MeasurementStage, TestSelectionStage, Workspace};
use crate::config::MeasurementConfig;
use crate::folders::ResultsFolders;
use crate::rca::{CallTreeNode, NodeMeasurer};
use crate::types::{TestCase, VersionPair};
use crate::utils::write_atomic;

const SELECTED_TESTS_FILE: &str = "selected-tests.json";
const MEASUREMENT_LOG: &str = "measurement.log";

struct Invocation<'a> {
    stage: &'static str,
    argv: &'a [String],
    project_dir: &'a Path,
    folders: &'a ResultsFolders,
    pair: &'a VersionPair,
    config: &'a MeasurementConfig,
    env: Vec<(&'static str, String)>,
    stdin: Option<Vec<u8>>,
}

impl Invocation<'_> {
    fn run(self) -> Result<Output> {
        let (program, args) = match self.argv.split_first() {
            Some(split) => split,
            None => bail!("no command configured for {}", self.stage),
        };
        let results = self.folders.version_dir(self.pair);
        std::fs::create_dir_all(&results)
            .with_context(|| format!("failed to create {}", results.display()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(self.project_dir)
            .env("PERFCI_VERSION", self.pair.current())
            .env("PERFCI_VERSION_OLD", self.pair.old())
            .env("PERFCI_PROJECT", self.project_dir)
            .env("PERFCI_RESULTS", &results)
            .env("PERFCI_CONFIG", serde_json::to_string(self.config)?)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Starting {}: {:?}", self.stage, self.argv);
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {} command {}", self.stage, program))?;
        // fed from a thread while stdout and stderr are drained
        let feeder = match (self.stdin, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(thread::spawn(move || stdin.write_all(&input))),
            _ => None,
        };
        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            match feeder.join() {
                Ok(Ok(())) => {}
                // the child may exit without reading all of its input
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e).context(format!("failed to feed {} input", self.stage)),
                Err(_) => bail!("{} input thread panicked", self.stage),
            }
        }
        debug!("{} exited with {}", self.stage, output.status);
        Ok(output)
    }
}

/// Keep the process output either in `file` or in the log.
fn store_output(stage: &str, output: &Output, file: Option<&Path>) -> Result<()> {
    match file {
        Some(file) => {
            let mut contents = output.stdout.clone();
            contents.extend_from_slice(&output.stderr);
            write_atomic(file, &contents)
                .with_context(|| format!("failed to write {}", file.display()))?;
            info!("{} output written to {}", stage, file.display());
        }
        None => {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!("[{}] {}", stage, line);
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                info!("[{}] {}", stage, line);
            }
        }
    }
    Ok(())
}

fn check_status(stage: &str, output: &Output) -> Result<()> {
    if !output.status.success() {
        bail!(
            "{} failed with {}\n{}",
            stage,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Test selection by an external program that writes a JSON list of `Class#method`
/// names to `$PERFCI_OUTPUT`. Its console output becomes the overall RTS log.
pub struct CommandTestSelection {
    command: Vec<String>,
}

impl CommandTestSelection {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl TestSelectionStage for CommandTestSelection {
    fn run(&self, config: &MeasurementConfig, workspace: &Workspace) -> Result<BTreeSet<TestCase>> {
        let output_file = workspace.folders.version_dir(&workspace.pair).join(SELECTED_TESTS_FILE);
        // a selection left over from an earlier run must not count as this run's answer
        match std::fs::remove_file(&output_file) {
            Ok(()) => debug!("Removed previous {}", output_file.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", output_file.display()))
            }
        }
        let output = Invocation {
            stage: "test selection",
            argv: &self.command,
            project_dir: &workspace.project_dir,
            folders: &workspace.folders,
            pair: &workspace.pair,
            config,
            env: vec![("PERFCI_OUTPUT", output_file.display().to_string())],
            stdin: None,
        }
        .run()?;

        let log_file = workspace.folders.rts_log_file(&workspace.pair);
        let redirect = config.redirect_subprocess_output_to_file.then_some(log_file.as_path());
        store_output("test selection", &output, redirect)?;
        check_status("test selection", &output)?;

        if !output_file.exists() {
            info!("Test selection wrote no {}, no tests selected", SELECTED_TESTS_FILE);
            return Ok(BTreeSet::new());
        }
        let content = std::fs::read_to_string(&output_file)?;
        let names: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", output_file.display()))?;
        let tests = names
            .iter()
            .map(|name| name.parse::<TestCase>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        info!("Selected {} tests", tests.len());
        Ok(tests)
    }
}

/// Measurement by an external program; exit code 0 signals usable results.
pub struct CommandMeasurement {
    command: Vec<String>,
}

impl CommandMeasurement {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl MeasurementStage for CommandMeasurement {
    fn run(
        &self,
        config: &MeasurementConfig,
        tests: &BTreeSet<TestCase>,
        workspace: &Workspace,
    ) -> Result<bool> {
        let names: Vec<&str> = tests.iter().map(TestCase::qualified_name).collect();
        let output = Invocation {
            stage: "measurement",
            argv: &self.command,
            project_dir: &workspace.project_dir,
            folders: &workspace.folders,
            pair: &workspace.pair,
            config,
            env: vec![("PERFCI_TESTS", serde_json::to_string(&names)?)],
            stdin: None,
        }
        .run()?;

        let log_file = workspace.folders.version_dir(&workspace.pair).join(MEASUREMENT_LOG);
        let redirect = config.redirect_subprocess_output_to_file.then_some(log_file.as_path());
        store_output("measurement", &output, redirect)?;
        Ok(output.status.success())
    }
}

/// Call trees and node significance from two external programs.
pub struct CommandNodeMeasurer {
    call_tree: Vec<String>,
    node_measurement: Vec<String>,
    project_dir: PathBuf,
    folders: ResultsFolders,
}

impl CommandNodeMeasurer {
    pub fn new(
        call_tree: Vec<String>,
        node_measurement: Vec<String>,
        project_dir: PathBuf,
        folders: ResultsFolders,
    ) -> Self {
        Self {
            call_tree,
            node_measurement,
            project_dir,
            folders,
        }
    }
}

impl NodeMeasurer for CommandNodeMeasurer {
    fn call_tree(&self, test: &TestCase, config: &CauseSearchConfig) -> Result<CallTreeNode> {
        let output = Invocation {
            stage: "call tree",
            argv: &self.call_tree,
            project_dir: &self.project_dir,
            folders: &self.folders,
            pair: &config.pair,
            config: &config.measurement,
            env: vec![("PERFCI_TEST", test.qualified_name().to_string())],
            stdin: None,
        }
        .run()?;
        check_status("call tree", &output)?;
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("call tree of {} is not valid JSON", test))
    }

    fn changed_nodes(
        &self,
        test: &TestCase,
        call_paths: &[String],
        config: &CauseSearchConfig,
    ) -> Result<BTreeSet<String>> {
        let output = Invocation {
            stage: "node measurement",
            argv: &self.node_measurement,
            project_dir: &self.project_dir,
            folders: &self.folders,
            pair: &config.pair,
            config: &config.measurement,
            env: vec![("PERFCI_TEST", test.qualified_name().to_string())],
            stdin: Some(serde_json::to_vec(call_paths)?),
        }
        .run()?;
        check_status("node measurement", &output)?;
        let changed: BTreeSet<String> = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("node measurement of {} is not valid JSON", test))?;
        Ok(changed)
    }
}
