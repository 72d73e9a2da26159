// src/processor/unpack.rs

//! Payload unpacking
//!
//! The default [`CommandUnpacker`] runs an external program (tar unless
//! configured otherwise) with a deadline. A nonzero exit, abnormal
//! termination or a missed deadline are all reported with the archive path.

use crate::config::UnpackSection;
use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Extracts an archive into a destination directory
pub trait Unpacker: Send + Sync {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// Runs an external unpacker process
#[derive(Debug, Clone)]
pub struct CommandUnpacker {
    program: String,
    /// `{archive}` and `{dest}` are substituted per call
    args: Vec<String>,
    timeout: Duration,
}

impl CommandUnpacker {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(section: &UnpackSection) -> Self {
        Self::new(
            section.program.clone(),
            section.args.clone(),
            Duration::from_secs(section.timeout_secs),
        )
    }

    fn expand_args(&self, archive: &Path, dest: &Path) -> Vec<String> {
        let archive = archive.to_string_lossy();
        let dest = dest.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{archive}", &archive).replace("{dest}", &dest))
            .collect()
    }
}

impl Default for CommandUnpacker {
    fn default() -> Self {
        Self::from_config(&UnpackSection::default())
    }
}

impl Unpacker for CommandUnpacker {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<()> {
        let args = self.expand_args(archive, dest);
        debug!("Unpacking {} with {} {:?}", archive.display(), self.program, args);

        let failed = |exit_code: Option<i32>, reason: String| Error::Unpack {
            path: PathBuf::from(archive),
            exit_code,
            reason,
        };

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(None, format!("failed to start {}: {e}", self.program)))?;

        // Drained concurrently so a chatty child never blocks on a full pipe
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut stderr = String::new();
                let _ = pipe.read_to_string(&mut stderr);
                stderr
            })
        });
        match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => {
                let stderr = stderr_reader
                    .and_then(|handle| handle.join().ok())
                    .unwrap_or_default();
                if status.success() {
                    return Ok(());
                }

                let reason = match stderr.trim() {
                    "" => format!("{} failed", self.program),
                    msg => msg.to_string(),
                };
                warn!("Unpacking {} failed: {}", archive.display(), reason);
                Err(failed(status.code(), reason))
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::UnpackTimeout {
                    path: PathBuf::from(archive),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(failed(None, format!("failed waiting for {}: {e}", self.program)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_tar(dir: &Path) -> PathBuf {
        let path = dir.join("payload.tar");
        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let data = b"#!/bin/sh\necho hi\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "usr/bin/hello", &data[..])
            .unwrap();
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_default_tar_unpacks() {
        let dir = TempDir::new().unwrap();
        let archive = build_tar(dir.path());
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();

        CommandUnpacker::default().unpack(&archive, &dest).unwrap();
        assert!(dest.join("usr/bin/hello").is_file());
    }

    #[test]
    fn test_nonzero_exit_carries_code_and_path() {
        let unpacker = CommandUnpacker::new(
            "sh",
            vec!["-c".into(), "echo broken >&2; exit 3".into()],
            Duration::from_secs(10),
        );
        let err = unpacker
            .unpack(Path::new("/tmp/some.tar"), Path::new("/tmp"))
            .unwrap_err();
        match err {
            Error::Unpack {
                path,
                exit_code,
                reason,
            } => {
                assert_eq!(path, PathBuf::from("/tmp/some.tar"));
                assert_eq!(exit_code, Some(3));
                assert_eq!(reason, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_noisy_unpacker_succeeds() {
        let unpacker = CommandUnpacker::new(
            "sh",
            vec![
                "-c".into(),
                "head -c 300000 /dev/zero | tr '\\0' x >&2; exit 0".into(),
            ],
            Duration::from_secs(10),
        );
        unpacker
            .unpack(Path::new("/tmp/noisy.tar"), Path::new("/tmp"))
            .unwrap();
    }

    #[test]
    fn test_timeout_kills_unpacker() {
        let unpacker = CommandUnpacker::new(
            "sleep",
            vec!["5".into()],
            Duration::from_millis(200),
        );
        let err = unpacker
            .unpack(Path::new("/tmp/slow.tar"), Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, Error::UnpackTimeout { .. }));
    }

    #[test]
    fn test_missing_program() {
        let unpacker =
            CommandUnpacker::new("pallet-no-such-unpacker", vec![], Duration::from_secs(1));
        let err = unpacker.unpack(Path::new("a.tar"), Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, Error::Unpack { exit_code: None, .. }));
    }

    #[test]
    fn test_placeholders_substituted() {
        let unpacker = CommandUnpacker::default();
        let args = unpacker.expand_args(Path::new("/a/x.tar"), Path::new("/b"));
        assert_eq!(args, vec!["-xf", "/a/x.tar", "-C", "/b"]);
    }
}
