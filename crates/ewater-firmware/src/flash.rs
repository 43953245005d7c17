//! Firmware flash orchestrator
//!
//! ```text
//!   Idle ──start()──► Preparing ──► Flashing ──┬──► Succeeded
//!                         │                    └──► Failed
//!                         └─────────────────────────► Failed
//! ```
//!
//! Preparing releases the serial port and resolves the toolchain. Flashing
//! runs esptool and streams its merged stdout/stderr as progress events.
//! Every accepted job ends with exactly one [`FlashEvent::Finished`], after
//! which the event channel closes. A second `start()` while a job is
//! preparing or flashing is rejected. Jobs cannot be cancelled.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use ewater_link::PortRelease;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FlashError, ToolchainError};
use crate::progress::{parse_progress, SegmentSplitter};
use crate::toolchain::{self, FlashUtility, Probe, SystemProbe, ToolchainEnv};

/// Where an application-only image goes
pub const APPLICATION_OFFSET: u32 = 0x10000;

/// Where a full image (bootloader, partitions, app) goes
pub const FULL_IMAGE_OFFSET: u32 = 0x0000;

/// Phrase the user must type to flash a full image
pub const FULL_IMAGE_ACKNOWLEDGEMENT: &str = "FLASH FULL IMAGE AT 0x0000";

/// Proof that the user acknowledged a full-image flash
///
/// Writing an application image at offset 0 overwrites the bootloader and
/// bricks the device, so this can only be built from the exact phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullImageConfirmation(());

impl FullImageConfirmation {
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        (phrase == FULL_IMAGE_ACKNOWLEDGEMENT).then_some(Self(()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashImage {
    Application,
    Full(FullImageConfirmation),
}

impl FlashImage {
    pub fn offset(&self) -> u32 {
        match self {
            FlashImage::Application => APPLICATION_OFFSET,
            FlashImage::Full(_) => FULL_IMAGE_OFFSET,
        }
    }

    /// Offset as esptool expects it (`0x10000`, `0x0000`).
    pub fn offset_arg(&self) -> String {
        format!("{:#06x}", self.offset())
    }
}

#[derive(Debug, Clone)]
pub struct FlashRequest {
    pub firmware: PathBuf,
    pub port: String,
    pub baud: u32,
    pub image: FlashImage,
}

impl FlashRequest {
    /// Application image at the default baud rate.
    pub fn application(firmware: impl Into<PathBuf>, port: impl Into<String>) -> Self {
        Self {
            firmware: firmware.into(),
            port: port.into(),
            baud: crate::config::FlashConfig::default().baud,
            image: FlashImage::Application,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_image(mut self, image: FlashImage) -> Self {
        self.image = image;
        self
    }
}

/// esptool arguments after the interpreter.
pub fn esptool_args(utility: &FlashUtility, request: &FlashRequest) -> Vec<OsString> {
    let baud = request.baud.to_string();
    let offset = request.image.offset_arg();
    let mut args = utility.prefix_args();
    args.extend(
        [
            "--chip",
            "esp32",
            "--port",
            request.port.as_str(),
            "--baud",
            baud.as_str(),
            "--before",
            "default_reset",
            "--after",
            "hard_reset",
            "write_flash",
            "-z",
            offset.as_str(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(request.firmware.clone().into_os_string());
    args
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Idle,
    Preparing,
    Flashing,
    Succeeded,
    Failed,
}

impl FlashState {
    fn is_busy(self) -> bool {
        matches!(self, FlashState::Preparing | FlashState::Flashing)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlashFailure {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("Failed to start esptool: {0}")]
    Spawn(String),

    #[error("esptool exited with code {0}")]
    Exit(i32),

    #[error("esptool was terminated by a signal")]
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOutcome {
    Succeeded,
    Failed(FlashFailure),
}

impl FlashOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlashOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    State(FlashState),
    /// One segment of esptool output
    Progress {
        percent: Option<u8>,
        message: String,
    },
    /// Terminal; nothing follows
    Finished(FlashOutcome),
}

/// A running flash
pub struct FlashJob {
    events: mpsc::UnboundedReceiver<FlashEvent>,
    task: JoinHandle<FlashOutcome>,
}

impl FlashJob {
    /// Next event, or `None` once the job has finished and every event has
    /// been delivered.
    pub async fn next_event(&mut self) -> Option<FlashEvent> {
        self.events.recv().await
    }

    /// Wait for the outcome, discarding undelivered events.
    pub async fn wait(self) -> FlashOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => FlashOutcome::Failed(FlashFailure::Spawn(e.to_string())),
        }
    }
}

pub struct FlashOrchestrator {
    env: ToolchainEnv,
    probe: Arc<dyn Probe>,
    release: Option<Arc<dyn PortRelease>>,
    state: Arc<Mutex<FlashState>>,
}

impl FlashOrchestrator {
    pub fn new(env: ToolchainEnv, probe: Arc<dyn Probe>) -> Self {
        Self {
            env,
            probe,
            release: None,
            state: Arc::new(Mutex::new(FlashState::Idle)),
        }
    }

    /// Orchestrator for the current host.
    pub fn system() -> Self {
        Self::new(ToolchainEnv::from_env(), Arc::new(SystemProbe))
    }

    /// Close any serial connection on the target port before flashing.
    pub fn with_port_release(mut self, release: Arc<dyn PortRelease>) -> Self {
        self.release = Some(release);
        self
    }

    pub fn state(&self) -> FlashState {
        *self.state.lock()
    }

    pub fn start(&self, request: FlashRequest) -> Result<FlashJob, FlashError> {
        if request.port.trim().is_empty() {
            return Err(FlashError::MissingPort);
        }

        {
            let mut state = self.state.lock();
            if state.is_busy() {
                return Err(FlashError::Busy);
            }
            if !request.firmware.is_file() {
                return Err(FlashError::FirmwareNotFound(request.firmware.clone()));
            }
            *state = FlashState::Preparing;
        }

        info!(
            firmware = %request.firmware.display(),
            port = %request.port,
            baud = request.baud,
            offset = %request.image.offset_arg(),
            "Starting flash"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_job(
            request,
            self.env.clone(),
            self.probe.clone(),
            self.release.clone(),
            self.state.clone(),
            tx,
        ));

        Ok(FlashJob { events: rx, task })
    }
}

async fn run_job(
    request: FlashRequest,
    env: ToolchainEnv,
    probe: Arc<dyn Probe>,
    release: Option<Arc<dyn PortRelease>>,
    state: Arc<Mutex<FlashState>>,
    tx: mpsc::UnboundedSender<FlashEvent>,
) -> FlashOutcome {
    let _ = tx.send(FlashEvent::State(FlashState::Preparing));

    let outcome = match flash(&request, &env, probe.as_ref(), release, &state, &tx).await {
        Ok(()) => {
            info!(port = %request.port, "Flash succeeded");
            FlashOutcome::Succeeded
        }
        Err(failure) => {
            warn!(port = %request.port, error = %failure, "Flash failed");
            FlashOutcome::Failed(failure)
        }
    };

    *state.lock() = if outcome.is_success() {
        FlashState::Succeeded
    } else {
        FlashState::Failed
    };
    let _ = tx.send(FlashEvent::Finished(outcome.clone()));
    outcome
}

async fn flash(
    request: &FlashRequest,
    env: &ToolchainEnv,
    probe: &dyn Probe,
    release: Option<Arc<dyn PortRelease>>,
    state: &Mutex<FlashState>,
    tx: &mpsc::UnboundedSender<FlashEvent>,
) -> Result<(), FlashFailure> {
    if let Some(release) = release {
        if release.release(&request.port).await {
            info!(port = %request.port, "Closed serial connection for flashing");
        }
    }

    let toolchain = toolchain::resolve(env, probe).await?;
    let args = esptool_args(&toolchain.utility, request);
    debug!(python = %toolchain.python.display(), ?args, "Running esptool");

    *state.lock() = FlashState::Flashing;
    let _ = tx.send(FlashEvent::State(FlashState::Flashing));

    let mut child = tokio::process::Command::new(&toolchain.python)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FlashFailure::Spawn(e.to_string()))?;

    let readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|out| spawn_reader(out, tx.clone())),
        child.stderr.take().map(|err| spawn_reader(err, tx.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let status = child
        .wait()
        .await
        .map_err(|e| FlashFailure::Spawn(e.to_string()))?;

    // drain output before the terminal event
    for reader in readers {
        let _ = reader.await;
    }

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(FlashFailure::Exit(code)),
        None => Err(FlashFailure::Terminated),
    }
}

fn spawn_reader<R>(reader: R, tx: mpsc::UnboundedSender<FlashEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(forward_output(reader, tx))
}

async fn forward_output<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<FlashEvent>) {
    let mut splitter = SegmentSplitter::new();
    let mut buf = [0u8; 1024];
    let send = |message: String| {
        let _ = tx.send(FlashEvent::Progress {
            percent: parse_progress(&message),
            message,
        });
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for segment in splitter.push(&buf[..n]) {
                    send(segment);
                }
            }
            Err(e) => {
                debug!(error = %e, "esptool output closed");
                break;
            }
        }
    }
    if let Some(tail) = splitter.finish() {
        send(tail);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::toolchain::StaticProbe;
    use async_trait::async_trait;
    use std::path::Path;

    const SHELL: &str = "/bin/sh";

    struct Fixture {
        dir: tempfile::TempDir,
        firmware: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let firmware = dir.path().join("firmware.bin");
            std::fs::write(&firmware, [0xe9u8; 64]).unwrap();
            Self { dir, firmware }
        }

        /// An esptool stand-in run by `sh`.
        fn script(&self, body: &str) -> PathBuf {
            let path = self.dir.path().join("esptool.sh");
            std::fs::write(&path, body).unwrap();
            path
        }

        fn orchestrator(&self, script: &Path) -> FlashOrchestrator {
            let env = ToolchainEnv {
                home: None,
                python: Some(PathBuf::from(SHELL)),
                esptool_path: Some(script.to_path_buf()),
                windows: false,
            };
            FlashOrchestrator::new(env, Arc::new(StaticProbe::complete(SHELL)))
        }

        fn request(&self) -> FlashRequest {
            FlashRequest::application(&self.firmware, "/dev/ttyUSB0")
        }
    }

    async fn drain(job: &mut FlashJob) -> Vec<FlashEvent> {
        let mut events = Vec::new();
        while let Some(event) = job.next_event().await {
            events.push(event);
        }
        events
    }

    fn finished(events: &[FlashEvent]) -> Vec<&FlashOutcome> {
        events
            .iter()
            .filter_map(|e| match e {
                FlashEvent::Finished(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_esptool_args() {
        let request = FlashRequest::application("/tmp/app.bin", "/dev/ttyUSB0");
        let args = esptool_args(&FlashUtility::Module, &request);
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-m", "esptool", "--chip", "esp32", "--port", "/dev/ttyUSB0", "--baud",
                "460800", "--before", "default_reset", "--after", "hard_reset", "write_flash",
                "-z", "0x10000", "/tmp/app.bin"
            ]
        );
    }

    #[test]
    fn test_full_image_needs_exact_phrase() {
        assert!(FullImageConfirmation::from_phrase("yes").is_none());
        assert!(FullImageConfirmation::from_phrase("flash full image at 0x0000").is_none());
        let confirmation = FullImageConfirmation::from_phrase(FULL_IMAGE_ACKNOWLEDGEMENT).unwrap();
        let image = FlashImage::Full(confirmation);
        assert_eq!(image.offset(), 0);
        assert_eq!(image.offset_arg(), "0x0000");
        assert_eq!(FlashImage::Application.offset_arg(), "0x10000");
    }

    #[tokio::test]
    async fn test_successful_flash_streams_progress() {
        let fixture = Fixture::new();
        let args_file = fixture.dir.path().join("args.txt");
        let script = fixture.script(&format!(
            "echo \"$@\" > '{}'\n\
             printf 'Connecting....\\n'\n\
             printf 'Writing at 0x00010000... (10 %%)\\rWriting at 0x00020000... (55 %%)\\r'\n\
             printf 'Writing at 0x00030000... (100 %%)\\n' >&2\n\
             exit 0\n",
            args_file.display()
        ));
        let orchestrator = fixture.orchestrator(&script);

        let mut job = orchestrator.start(fixture.request()).unwrap();
        let events = drain(&mut job).await;
        let outcome = job.wait().await;

        assert_eq!(outcome, FlashOutcome::Succeeded);
        assert_eq!(orchestrator.state(), FlashState::Succeeded);
        assert_eq!(events.first(), Some(&FlashEvent::State(FlashState::Preparing)));
        assert!(events.contains(&FlashEvent::State(FlashState::Flashing)));
        assert_eq!(events.last(), Some(&FlashEvent::Finished(FlashOutcome::Succeeded)));
        assert_eq!(finished(&events).len(), 1);

        let mut percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                FlashEvent::Progress { percent, .. } => *percent,
                _ => None,
            })
            .collect();
        percents.sort_unstable();
        assert_eq!(percents, vec![10, 55, 100]);

        let recorded = std::fs::read_to_string(args_file).unwrap();
        assert!(recorded.contains("--port /dev/ttyUSB0 --baud 460800"));
        assert!(recorded.contains("write_flash -z 0x10000"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let fixture = Fixture::new();
        let script = fixture.script("echo 'A fatal error occurred' >&2\nexit 2\n");
        let orchestrator = fixture.orchestrator(&script);

        let mut job = orchestrator.start(fixture.request()).unwrap();
        let events = drain(&mut job).await;

        let expected = FlashOutcome::Failed(FlashFailure::Exit(2));
        assert_eq!(finished(&events), vec![&expected]);
        assert_eq!(events.last(), Some(&FlashEvent::Finished(expected.clone())));
        assert_eq!(job.wait().await, expected);
        assert_eq!(orchestrator.state(), FlashState::Failed);
        assert_eq!(expected_message(&expected), "esptool exited with code 2");
    }

    fn expected_message(outcome: &FlashOutcome) -> String {
        match outcome {
            FlashOutcome::Failed(failure) => failure.to_string(),
            FlashOutcome::Succeeded => String::new(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_flash_rejected() {
        let fixture = Fixture::new();
        let script = fixture.script("sleep 1\nexit 0\n");
        let orchestrator = fixture.orchestrator(&script);

        let job = orchestrator.start(fixture.request()).unwrap();
        let second = orchestrator.start(fixture.request());
        assert!(matches!(second, Err(FlashError::Busy)));

        assert!(job.wait().await.is_success());
        // a finished job frees the orchestrator
        let again = orchestrator.start(fixture.request()).unwrap();
        assert!(again.wait().await.is_success());
    }

    #[tokio::test]
    async fn test_missing_firmware_fails_early() {
        let fixture = Fixture::new();
        let script = fixture.script("exit 0\n");
        let orchestrator = fixture.orchestrator(&script);
        let request = FlashRequest::application(fixture.dir.path().join("nope.bin"), "COM3");

        let err = orchestrator.start(request).err().unwrap();
        assert!(matches!(err, FlashError::FirmwareNotFound(_)));
        assert_eq!(orchestrator.state(), FlashState::Idle);
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_terminal_failure() {
        let fixture = Fixture::new();
        let orchestrator = FlashOrchestrator::new(
            ToolchainEnv::default(),
            Arc::new(StaticProbe::default()),
        );

        let mut job = orchestrator.start(fixture.request()).unwrap();
        let events = drain(&mut job).await;

        assert_eq!(finished(&events).len(), 1);
        assert!(matches!(
            events.last(),
            Some(FlashEvent::Finished(FlashOutcome::Failed(FlashFailure::Toolchain(
                ToolchainError::ToolchainNotFound { .. }
            ))))
        ));
        assert!(!events.contains(&FlashEvent::State(FlashState::Flashing)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let fixture = Fixture::new();
        let script = fixture.script("exit 0\n");
        let missing = fixture.dir.path().join("no-python");
        let env = ToolchainEnv {
            python: Some(missing.clone()),
            esptool_path: Some(script),
            ..ToolchainEnv::default()
        };
        let orchestrator = FlashOrchestrator::new(env, Arc::new(StaticProbe::complete(missing)));

        let outcome = orchestrator.start(fixture.request()).unwrap().wait().await;
        assert!(matches!(
            outcome,
            FlashOutcome::Failed(FlashFailure::Spawn(_))
        ));
    }

    #[derive(Default)]
    struct RecordingRelease {
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PortRelease for RecordingRelease {
        async fn release(&self, port: &str) -> bool {
            self.released.lock().push(port.to_string());
            true
        }
    }

    #[tokio::test]
    async fn test_port_released_before_flashing() {
        let fixture = Fixture::new();
        let script = fixture.script("exit 0\n");
        let release = Arc::new(RecordingRelease::default());
        let orchestrator = fixture.orchestrator(&script).with_port_release(release.clone());

        orchestrator.start(fixture.request()).unwrap().wait().await;
        assert_eq!(*release.released.lock(), vec!["/dev/ttyUSB0"]);
    }
}
