//! CLI command implementations.

pub mod entities;
pub mod hex_utils;
pub mod hexdump;
pub mod run;
pub mod scan;

use anyhow::{Result, bail};
use mirage_core::ProcessHandle;

/// How the target process is chosen: by pid when given, otherwise by name
#[derive(Debug, Clone)]
pub struct ProcessSelector {
    pid: Option<u32>,
    name: Option<String>,
}

impl ProcessSelector {
    pub fn new(pid: Option<u32>, name: Option<String>) -> Self {
        Self { pid, name }
    }

    pub fn open(&self) -> Result<ProcessHandle> {
        if let Some(pid) = self.pid {
            return Ok(ProcessHandle::open(pid)?);
        }
        match &self.name {
            Some(name) => Ok(ProcessHandle::find_by_name(name)?),
            None => bail!("No target process given (use --pid or --process)"),
        }
    }

    pub fn describe(&self) -> String {
        match (self.pid, &self.name) {
            (Some(pid), _) => format!("pid {}", pid),
            (None, Some(name)) => name.clone(),
            (None, None) => "<none>".to_string(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.pid.is_some() || self.name.is_some()
    }
}
