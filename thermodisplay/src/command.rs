/*!
Local temperature source: runs a measurement program once per cycle and
parses the first line it prints.
*/

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, warn};

use shared::{parse_tenths, Classifier, Result, SharedError, TemperatureSource};

use crate::config::LocalConfig;

/// How often a running program is checked for exit
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// External measurement program
pub struct CommandSource {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            program: PathBuf::from(&config.program),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Run the program once and return the reading in tenths of a degree
    pub fn measure(&self) -> Result<i16> {
        self.check_program()?;
        let deadline = Instant::now() + self.timeout;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SharedError::unavailable(format!("cannot run {}: {}", self.program.display(), e))
            })?;

        // The first line is handed over as soon as it is read, the rest is
        // drained so a chatty program cannot block on a full pipe
        let (line_tx, line_rx) = bounded::<std::io::Result<String>>(1);
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                let result = reader.read_line(&mut line).map(|_| line);
                let _ = line_tx.send(result);
                let _ = std::io::copy(&mut reader, &mut std::io::sink());
            });
        }

        let status = self.wait(&mut child, deadline)?;

        // A leftover background process may keep stdout open after exit
        let grace = deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL);
        let output = match line_rx.recv_timeout(grace) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SharedError::unavailable(format!(
                    "{} exited but printed no complete line within {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }
            Err(RecvTimeoutError::Disconnected) => String::new(),
        };

        let first_line = output.trim();
        debug!("{} printed {:?} ({})", self.program.display(), first_line, status);

        if first_line.is_empty() {
            return Err(SharedError::unavailable(format!(
                "no data received from {}",
                self.program.display()
            )));
        }
        let tenths = parse_tenths(first_line)?;
        if !status.success() {
            return Err(SharedError::unavailable(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        Ok(tenths)
    }

    /// Wait for exit, killing the program once `deadline` has passed
    fn wait(&self, child: &mut Child, deadline: Instant) -> Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} did not finish within {:?}, killing it",
                    self.program.display(),
                    self.timeout
                );
                // Already gone is fine, it is reaped below
                let _ = child.kill();
                child.wait()?;
                return Err(SharedError::unavailable(format!(
                    "{} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// A program given as a path must exist and be executable; bare names go through PATH
    fn check_program(&self) -> Result<()> {
        if self.program.components().count() < 2 {
            return Ok(());
        }

        let metadata = std::fs::metadata(&self.program).map_err(|e| {
            SharedError::unavailable(format!("{}: {}", self.program.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(SharedError::unavailable(format!(
                "{} is not a file",
                self.program.display()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(SharedError::unavailable(format!(
                    "{} is not executable",
                    self.program.display()
                )));
            }
        }

        Ok(())
    }
}

impl TemperatureSource for CommandSource {
    fn acquire(&mut self, classifier: &mut Classifier, _budget: Duration) {
        let outcome = self.measure();
        classifier.record(outcome, Instant::now());
    }
}
