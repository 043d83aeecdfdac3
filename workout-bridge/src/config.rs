//! Worker configuration and launch resolution.
//!
//! [`WorkerConfig`] is what the frontend sends on every init request.
//! [`LaunchSettings`] is the host-side configuration read once at startup,
//! and [`Launcher`] is the resolved result: a concrete interpreter, script
//! and argument policy used for every spawn.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Exercise type that lets the worker classify the exercise itself
pub const AUTOMATIC_DETECTION: &str = "Automatic Detection";

/// Default path of the worker script, relative to the install directory
pub const DEFAULT_WORKER_SCRIPT: &str = "workout_backend/app.py";

/// Interpreter options passed before the script (unbuffered stdout)
pub const DEFAULT_INTERPRETER_ARGS: &[&str] = &["-u"];

/// Time allowed for a terminated worker to be reaped (in milliseconds)
const DEFAULT_TERMINATE_GRACE_MS: u64 = 2_000;

/// Per-session worker configuration supplied by the frontend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Index of the camera the worker should open
    #[serde(default)]
    pub camera_index: u32,

    /// Exercise to track, or [`AUTOMATIC_DETECTION`]
    #[serde(default = "default_exercise_type")]
    pub exercise_type: String,
}

fn default_exercise_type() -> String {
    AUTOMATIC_DETECTION.to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            exercise_type: default_exercise_type(),
        }
    }
}

impl WorkerConfig {
    pub fn new(camera_index: u32, exercise_type: impl Into<String>) -> Self {
        Self {
            camera_index,
            exercise_type: exercise_type.into(),
        }
    }

    /// Command-line arguments understood by the worker script.
    pub fn worker_args(&self) -> Vec<String> {
        vec![
            "--camera_index".to_string(),
            self.camera_index.to_string(),
            "--exercise_type".to_string(),
            self.exercise_type.clone(),
        ]
    }
}

/// Host platform families with distinct interpreter layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Where to find the interpreter on a given platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterLocation {
    /// Bare program name, looked up on `PATH` at spawn time
    Named(&'static str),
    /// Path relative to the install directory
    InstallRelative(&'static str),
}

impl InterpreterLocation {
    fn resolve(self, install_dir: &Path) -> PathBuf {
        match self {
            InterpreterLocation::Named(name) => PathBuf::from(name),
            InterpreterLocation::InstallRelative(relative) => install_dir.join(relative),
        }
    }
}

/// Default interpreter per platform.
pub const INTERPRETER_TABLE: &[(Platform, InterpreterLocation)] = &[
    (Platform::Unix, InterpreterLocation::Named("python3")),
    (
        Platform::Windows,
        InterpreterLocation::InstallRelative("venv/Scripts/python.exe"),
    ),
];

/// Host-side launch configuration
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Directory the bridge is installed in; relative paths resolve here
    pub install_dir: PathBuf,

    /// Worker script, absolute or relative to `install_dir`
    pub script: PathBuf,

    /// Explicit interpreter, bypassing [`INTERPRETER_TABLE`]
    pub interpreter: Option<PathBuf>,

    /// Options placed between the interpreter and the script
    pub interpreter_args: Vec<String>,

    /// How long `terminate` waits for the worker to be reaped
    pub terminate_grace: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("."),
            script: PathBuf::from(DEFAULT_WORKER_SCRIPT),
            interpreter: None,
            interpreter_args: DEFAULT_INTERPRETER_ARGS.iter().map(|s| s.to_string()).collect(),
            terminate_grace: Duration::from_millis(DEFAULT_TERMINATE_GRACE_MS),
        }
    }
}

impl LaunchSettings {
    /// Read launch settings from environment variables.
    ///
    /// - `WORKOUT_INSTALL_DIR`: install directory (default: current directory)
    /// - `WORKOUT_WORKER_SCRIPT`: worker script path
    /// - `WORKOUT_PYTHON`: interpreter override
    /// - `WORKOUT_PYTHON_ARGS`: whitespace-separated interpreter options
    /// - `WORKOUT_TERMINATE_GRACE_MS`: terminate grace period
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let install_dir = std::env::var("WORKOUT_INSTALL_DIR")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or(defaults.install_dir);

        Self {
            install_dir,
            script: std::env::var("WORKOUT_WORKER_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.script),
            interpreter: std::env::var("WORKOUT_PYTHON").ok().map(PathBuf::from),
            interpreter_args: std::env::var("WORKOUT_PYTHON_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.interpreter_args),
            terminate_grace: std::env::var("WORKOUT_TERMINATE_GRACE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.terminate_grace),
        }
    }
}

/// Fully resolved spawn policy.
#[derive(Debug, Clone)]
pub struct Launcher {
    interpreter: PathBuf,
    interpreter_args: Vec<String>,
    script: PathBuf,
    terminate_grace: Duration,
}

impl Launcher {
    /// Resolve the interpreter and script for `platform`.
    pub fn resolve(settings: LaunchSettings, platform: Platform) -> BridgeResult<Self> {
        let interpreter = match settings.interpreter {
            Some(explicit) => explicit,
            None => INTERPRETER_TABLE
                .iter()
                .find(|(candidate, _)| *candidate == platform)
                .map(|(_, location)| location.resolve(&settings.install_dir))
                .ok_or_else(|| {
                    BridgeError::Config(format!("no interpreter known for {:?}", platform))
                })?,
        };

        let script = if settings.script.is_absolute() {
            settings.script
        } else {
            settings.install_dir.join(&settings.script)
        };
        Ok(Self {
            interpreter,
            interpreter_args: settings.interpreter_args,
            script,
            terminate_grace: settings.terminate_grace,
        })
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn terminate_grace(&self) -> Duration {
        self.terminate_grace
    }

    /// Full argument list passed to the interpreter for `config`.
    pub fn command_args(&self, config: &WorkerConfig) -> Vec<String> {
        let mut args = self.interpreter_args.clone();
        args.push(self.script.to_string_lossy().into_owned());
        args.extend(config.worker_args());
        args
    }
}
