// src/config.rs

//! Runtime configuration for the transaction manager and hook runner

use std::path::PathBuf;

/// Hook runner configuration
#[derive(Debug, Clone)]
pub struct HookRunnerConfig {
    /// Shell used to run hook bodies (`<shell> -c <body>`)
    pub shell: PathBuf,
    /// Working directory for every hook subprocess (default: user's home)
    pub working_dir: PathBuf,
}

impl Default for HookRunnerConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            working_dir: dirs::home_dir().unwrap_or_else(|| PathBuf::from("/")),
        }
    }
}

impl HookRunnerConfig {
    /// Set the shell interpreter
    pub fn with_shell<P: Into<PathBuf>>(mut self, shell: P) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the working directory for hook subprocesses
    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// Transaction manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Capacity of the backend event channel handed to each scheduling call
    pub event_buffer: usize,
    /// Capacity of the manager event broadcast channel
    pub broadcast_capacity: usize,
    /// Start with dispatch paused until `resume()` is called
    pub start_paused: bool,
    /// Hook runner settings
    pub runner: HookRunnerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            broadcast_capacity: 1024,
            start_paused: false,
            runner: HookRunnerConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the backend event channel capacity
    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size.max(1);
        self
    }

    /// Start the manager paused
    pub fn with_start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    /// Replace the hook runner settings
    pub fn with_runner(mut self, runner: HookRunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}
