use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{config::PARAMS_PLACEHOLDER, datatypes::ParameterVector, error::WaterbombError};

/// How often a running solver is checked for exit
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

static CAPTURE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Captured result of one FE batch run
#[derive(Debug)]
pub struct SolverOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Writes the script the FE tool executes for one design
///
/// # Arguments
/// * `script_file` - Output path of the launch script
/// * `template` - Script text with `{params}` placeholders
/// * `params` - The design to build and solve
pub fn write_launch_script(
    script_file: &Path,
    template: &str,
    params: &ParameterVector,
) -> Result<(), WaterbombError> {
    let script = template.replace(PARAMS_PLACEHOLDER, &params.to_string());

    let mut file = match std::fs::File::create(script_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(WaterbombError::SolverInvocation(format!(
                "Failed to create launch script {}: {err}",
                script_file.display()
            )))
        }
    };
    file.write_all(script.as_bytes())?;

    debug!("wrote launch script {}", script_file.display());
    Ok(())
}

/// Temporary file that receives one output stream of the solver
struct CaptureFile {
    path: PathBuf,
}

impl CaptureFile {
    fn new(stream: &str) -> CaptureFile {
        let n = CAPTURE_COUNTER.fetch_add(1, Ordering::SeqCst);
        CaptureFile {
            path: std::env::temp_dir().join(format!(
                "waterbomb-{}-{}.{}",
                std::process::id(),
                n,
                stream
            )),
        }
    }

    fn read(&self) -> Result<String, WaterbombError> {
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for CaptureFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Kills the solver together with every process it started
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::{
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };

    // the child leads its own group, so its pid is the group id
    if let Err(err) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        warn!("killing process group {} failed: {err}", child.id());
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Runs the FE tool to completion, or until the timeout expires
///
/// # Arguments
/// * `command` - Program followed by its arguments
/// * `working_dir` - Directory the tool runs in
/// * `timeout` - Wall-clock limit; `None` waits indefinitely
///
/// # Returns
/// The exit status and captured output streams
pub fn run_solver(
    command: &[String],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<SolverOutput, WaterbombError> {
    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => {
            return Err(WaterbombError::SolverInvocation(
                "No solver command configured".to_owned(),
            ))
        }
    };

    let stdout_capture = CaptureFile::new("stdout");
    let stderr_capture = CaptureFile::new("stderr");

    info!("running {}...", command.join(" "));
    let start = Instant::now();

    let mut solver = Command::new(program);
    solver
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(std::fs::File::create(&stdout_capture.path)?)
        .stderr(std::fs::File::create(&stderr_capture.path)?);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // processes the solver spawns must die with it on timeout
        solver.process_group(0);
    }

    let mut child = match solver.spawn() {
        Ok(child) => child,
        Err(err) => {
            return Err(WaterbombError::SolverInvocation(format!(
                "{program} failed to start: {err}"
            )))
        }
    };

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= limit {
                kill_process_group(&mut child);
                child.wait()?;
                return Err(WaterbombError::SolverTimeout(limit));
            }
            std::thread::sleep(POLL_INTERVAL);
        },
    };

    info!(
        "{program} exited with {status} after {:.1} seconds",
        start.elapsed().as_secs_f32()
    );

    Ok(SolverOutput {
        status,
        stdout: stdout_capture.read()?,
        stderr: stderr_capture.read()?,
    })
}
