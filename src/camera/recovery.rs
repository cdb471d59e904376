use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;

/// One OS command in the recovery sequence. `{device}` in an argument is
/// replaced by the device node of each targeted camera.
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub program: String,
    pub args: Vec<String>,
    /// Run once per targeted device instead of once overall.
    pub per_device: bool,
    /// A non-zero exit fails the recovery.
    pub required: bool,
}

impl CommandStep {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            per_device: false,
            required: true,
        }
    }

    pub fn per_device(mut self) -> Self {
        self.per_device = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Pids listed by a holder query such as `fuser /dev/video0`, minus `own`.
///
/// fuser prints bare pids on stdout, sometimes with an access letter glued
/// on (`1234m`).
pub fn parse_holders(stdout: &str, own: u32) -> Vec<u32> {
    stdout
        .split_whitespace()
        .filter_map(|token| {
            token
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .parse::<u32>()
                .ok()
        })
        .filter(|pid| *pid != own)
        .collect()
}

/// Unsticks wedged capture devices at the OS level.
#[derive(Debug, Clone)]
pub struct ServiceRestarter {
    /// Lists the pids holding `{device}`; they are killed before the steps
    /// run. Never kills this process.
    holders: Option<CommandStep>,
    steps: Vec<CommandStep>,
    timeout: Duration,
}

impl ServiceRestarter {
    pub fn new(steps: Vec<CommandStep>, timeout: Duration) -> Self {
        Self {
            holders: None,
            steps,
            timeout,
        }
    }

    pub fn with_holder_query(mut self, query: CommandStep) -> Self {
        self.holders = Some(query);
        self
    }

    /// Kill whoever else holds the device nodes, then reload the UVC driver.
    #[cfg(target_os = "linux")]
    pub fn platform(timeout: Duration) -> Self {
        Self::new(
            vec![
                CommandStep::new("modprobe", &["-r", "uvcvideo"]),
                CommandStep::new("modprobe", &["uvcvideo"]),
            ],
            timeout,
        )
        .with_holder_query(CommandStep::new("fuser", &["{device}"]))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn platform(timeout: Duration) -> Self {
        Self::new(Vec::new(), timeout)
    }

    /// Run every step in order. Later steps still run after a failure; the
    /// first failure is returned.
    pub async fn restart(&self, indices: &[u32]) -> Result<()> {
        if self.steps.is_empty() && self.holders.is_none() {
            return Err(anyhow!("no camera service recovery on this platform"));
        }

        if let Some(query) = &self.holders {
            for index in indices {
                let device = format!("/dev/video{}", index);
                if let Err(err) = self.kill_holders(query, &device).await {
                    log::debug!("recovery: holders of {} left alone: {:#}", device, err);
                }
            }
        }

        let mut first_err = None;
        for step in &self.steps {
            let devices: Vec<Option<String>> = if step.per_device {
                indices
                    .iter()
                    .map(|i| Some(format!("/dev/video{}", i)))
                    .collect()
            } else {
                vec![None]
            };

            for device in devices {
                let args: Vec<String> = step
                    .args
                    .iter()
                    .map(|a| match &device {
                        Some(dev) => a.replace("{device}", dev),
                        None => a.clone(),
                    })
                    .collect();
                let result = self.run(&step.program, &args).await;
                match result {
                    Ok(()) => log::info!("recovery: {} {} ok", step.program, args.join(" ")),
                    Err(err) if !step.required => {
                        log::debug!("recovery: {} {} ignored: {:#}", step.program, args.join(" "), err)
                    }
                    Err(err) => {
                        log::warn!("recovery: {} {} failed: {:#}", step.program, args.join(" "), err);
                        first_err.get_or_insert(err);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn kill_holders(&self, query: &CommandStep, device: &str) -> Result<()> {
        let output = Command::new(&query.program)
            .args(query.args.iter().map(|a| a.replace("{device}", device)))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", query.program, self.timeout))?
            .with_context(|| format!("spawn {}", query.program))?;

        // fuser exits 1 when nobody holds the node.
        let pids = parse_holders(&String::from_utf8_lossy(&output.stdout), std::process::id());
        if pids.is_empty() {
            return Ok(());
        }
        let args: Vec<String> = std::iter::once("-9".to_string())
            .chain(pids.iter().map(|p| p.to_string()))
            .collect();
        log::info!("recovery: killing holders of {}: {:?}", device, pids);
        self.run("kill", &args).await
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<()> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", program))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.with_context(|| format!("wait for {}", program))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(anyhow!("{} timed out after {:?}", program, self.timeout));
            }
        };
        if !status.success() {
            return Err(anyhow!("{} exited with {}", program, status));
        }
        Ok(())
    }
}
