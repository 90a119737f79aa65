//! Loading technical-drawing sources, including EPS through Ghostscript.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::TransformError;

/// Executable names searched on `PATH`, in order.
const GHOSTSCRIPT_NAMES: &[&str] = &["gs", "gswin64c", "gswin32c"];

/// Longest a single Ghostscript run may take unless configured otherwise.
pub const GHOSTSCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A located Ghostscript executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ghostscript {
    executable: PathBuf,
    timeout: Duration,
}

impl Ghostscript {
    /// One-time capability check: the explicit `override_path` if it exists,
    /// otherwise the first Ghostscript found on `PATH`.
    pub fn locate(override_path: Option<&Path>) -> Option<Self> {
        if let Some(path) = override_path {
            return path.is_file().then(|| Self {
                executable: path.to_path_buf(),
                timeout: GHOSTSCRIPT_TIMEOUT,
            });
        }
        GHOSTSCRIPT_NAMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|executable| Self {
                executable,
                timeout: GHOSTSCRIPT_TIMEOUT,
            })
    }

    /// Kill a run that has not finished after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Rasterise the bounding box of an EPS file at `dpi`.
    ///
    /// The child process never outlives the call: once the timeout passes it
    /// is killed and reaped before the error is returned.
    pub fn rasterize(&self, eps: &Path, dpi: u32) -> Result<DynamicImage, TransformError> {
        let scratch = tempfile::tempdir()?;
        let png = scratch.path().join("page.png");
        let stderr_path = scratch.path().join("stderr.txt");

        let mut child = Command::new(&self.executable)
            .arg("-q")
            .arg("-dSAFER")
            .arg("-dBATCH")
            .arg("-dNOPAUSE")
            .arg("-dEPSCrop")
            .arg("-sDEVICE=png16m")
            .arg(format!("-r{dpi}"))
            .arg(format!("-sOutputFile={}", png.display()))
            .arg(eps)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .spawn()
            .map_err(|e| TransformError::Ghostscript(format!("cannot run: {e}")))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(
                        "Ghostscript on {} killed after {:?}",
                        eps.display(),
                        self.timeout
                    );
                    return Err(TransformError::Ghostscript(format!(
                        "timed out after {} ms",
                        self.timeout.as_millis()
                    )));
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(TransformError::Ghostscript(format!(
                "exited with {status}: {}",
                stderr.trim()
            )));
        }
        if !png.exists() {
            return Err(TransformError::Ghostscript(
                "produced no raster output".into(),
            ));
        }
        debug!("Rasterised {} at {dpi} dpi", eps.display());
        Ok(image::open(&png)?)
    }
}

/// Decodes drawing sources: raster formats directly, EPS via Ghostscript.
#[derive(Debug, Clone)]
pub struct DrawingSource {
    ghostscript: Option<Ghostscript>,
    eps_dpi: u32,
}

impl DrawingSource {
    pub fn new(ghostscript: Option<Ghostscript>, eps_dpi: u32) -> Self {
        Self {
            ghostscript,
            eps_dpi,
        }
    }

    pub fn supports_eps(&self) -> bool {
        self.ghostscript.is_some()
    }

    pub fn load(&self, path: &Path) -> Result<DynamicImage, TransformError> {
        if is_eps(path) {
            let gs = self.ghostscript.as_ref().ok_or_else(|| {
                TransformError::Ghostscript("not available for EPS sources".into())
            })?;
            return gs.rasterize(path, self.eps_dpi);
        }
        Ok(image::open(path)?)
    }
}

pub fn is_eps(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("eps"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn missing_override_means_no_ghostscript() {
        assert!(Ghostscript::locate(Some(Path::new("/no/such/gs"))).is_none());
    }

    #[test]
    fn eps_without_ghostscript_fails() {
        let source = DrawingSource::new(None, 300);
        assert!(!source.supports_eps());
        let err = source.load(Path::new("drawing.EPS")).unwrap_err();
        assert!(matches!(err, TransformError::Ghostscript(_)));
    }

    #[test]
    fn raster_sources_load_directly() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("d.jpg");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(12, 8, Rgb([0, 0, 0])))
            .save(&path)
            .unwrap();
        let img = DrawingSource::new(None, 300).load(&path).unwrap();
        assert_eq!((img.width(), img.height()), (12, 8));
    }

    #[cfg(unix)]
    fn fake_ghostscript(dir: &Path, body: &str) -> Ghostscript {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("gs");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Ghostscript::locate(Some(&script)).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn failing_ghostscript_reports_its_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let gs = fake_ghostscript(tmp.path(), "echo 'unrecoverable error in eps' >&2\nexit 1");
        let err = gs.rasterize(&tmp.path().join("a.eps"), 300).unwrap_err();
        match err {
            TransformError::Ghostscript(text) => assert!(text.contains("unrecoverable"), "{text}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hung_ghostscript_is_killed_at_the_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("gs.pid");
        let gs = fake_ghostscript(
            tmp.path(),
            &format!("echo $$ > '{}'\nexec sleep 20", pid_file.display()),
        )
        .with_timeout(Duration::from_millis(500));

        let started = Instant::now();
        let err = gs.rasterize(&tmp.path().join("stuck.eps"), 300).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(&err, TransformError::Ghostscript(text) if text.contains("timed out")));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "ghostscript {} still running", pid.trim());
    }

    #[test]
    fn eps_detection() {
        assert!(is_eps(Path::new("a/b.eps")));
        assert!(is_eps(Path::new("B.EPS")));
        assert!(!is_eps(Path::new("b.jpg")));
    }
}
