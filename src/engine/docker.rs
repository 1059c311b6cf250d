// CLASSIFICATION: COMMUNITY
// Filename: docker.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-25

//! Container runtime bindings over the `docker` CLI.

use std::ffi::OsStr;
use std::process::Command;
use std::time::Duration;

use log::debug;

use crate::engine::{
    BackendSpec, BackendStatus, ContainerRuntime, EngineError, BACKEND_DATA_DIR, BACKEND_ENV,
    BACKEND_PORT,
};

/// Runtime client shelling out to the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    /// Probe the daemon and return a client.
    ///
    /// Fails when the binary is missing or the daemon does not answer; the
    /// caller treats this as fatal at bootstrap.
    pub fn connect() -> Result<Self, EngineError> {
        let cli = Self { bin: "docker".to_owned() };
        let version = cli
            .capture(["version", "--format", "{{.Server.Version}}"])
            .map_err(EngineError::RuntimeUnavailable)?;
        debug!("container runtime ready version={}", version.trim());
        Ok(cli)
    }

    fn capture<I, S>(&self, args: I) -> Result<String, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .map_err(|err| format!("failed to invoke {}: {err}", self.bin))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout)
            } else {
                stderr
            };
            return Err(text.trim().to_owned());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerRuntime for DockerCli {
    fn find_by_name(&self, name: &str) -> Result<Option<BackendStatus>, EngineError> {
        let filter = format!("name=^{name}$");
        let listing = self
            .capture([
                "ps",
                "--all",
                "--filter",
                &filter,
                "--format",
                "{{.ID}} {{.State}}",
            ])
            .map_err(EngineError::RuntimeUnavailable)?;
        Ok(listing
            .lines()
            .find(|line| !line.trim().is_empty())
            .and_then(parse_state_line))
    }

    fn create(&self, spec: &BackendSpec) -> Result<String, EngineError> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];
        for (key, value) in BACKEND_ENV {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        args.push("--network".into());
        args.push(spec.network.clone());
        args.push("--mount".into());
        args.push(format!(
            "type=bind,source={},target={BACKEND_DATA_DIR}",
            spec.data_source.display()
        ));
        args.push("--publish".into());
        args.push(format!("127.0.0.1:0:{BACKEND_PORT}"));
        args.push(spec.image.clone());

        let id = self.capture(&args).map_err(EngineError::CreateFailed)?;
        Ok(id.trim().to_owned())
    }

    fn start(&self, id: &str) -> Result<(), EngineError> {
        self.capture(["start", id])
            .map(drop)
            .map_err(EngineError::StartFailed)
    }

    fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        let timeout = grace.as_secs().to_string();
        self.capture(["stop", "--time", &timeout, name])
            .map(drop)
            .map_err(EngineError::RuntimeUnavailable)
    }

    fn host_port(&self, id: &str) -> Result<Option<u16>, EngineError> {
        let port_spec = format!("{BACKEND_PORT}/tcp");
        // `docker port` exits non-zero when no binding is published; the
        // manager turns the absence into NoPortBinding.
        let Ok(listing) = self.capture(["port", id, &port_spec]) else {
            return Ok(None);
        };
        Ok(listing
            .lines()
            .find(|line| !line.trim().is_empty())
            .and_then(parse_port_line))
    }
}

fn parse_state_line(line: &str) -> Option<BackendStatus> {
    let mut fields = line.split_whitespace();
    let id = fields.next()?;
    let state = fields.next()?;
    Some(BackendStatus {
        id: id.to_owned(),
        running: state == "running",
    })
}

fn parse_port_line(line: &str) -> Option<u16> {
    line.trim().rsplit_once(':')?.1.parse().ok()
}
