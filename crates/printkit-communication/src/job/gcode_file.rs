//! GCODE job file reader
//!
//! Streams a file line by line without loading it, strips comments and
//! skips blank lines. The byte offset of the reader drives job progress.

use printkit_core::{JobError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Line source for ASCII print jobs
pub struct GcodeFile {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    buf: Vec<u8>,
}

impl GcodeFile {
    /// Open a job file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| JobError::FileError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            position: 0,
            buf: Vec::with_capacity(256),
        })
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next command with comments removed, or `None` at end of file
    pub fn next_command(&mut self) -> Result<Option<String>> {
        loop {
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| JobError::FileError {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if n == 0 {
                return Ok(None);
            }
            self.position += n as u64;
            let line = String::from_utf8_lossy(&self.buf);
            let command = strip_comments(&line);
            if !command.is_empty() {
                return Ok(Some(command));
            }
        }
    }
}

/// Remove `;` and `( )` comments and surrounding whitespace
pub fn strip_comments(line: &str) -> String {
    let line = match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut out = String::with_capacity(line.len());
    let mut depth = 0u32;
    for c in line.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("G1 X10 ; move"), "G1 X10");
        assert_eq!(strip_comments("G1 (inline) X10\r\n"), "G1  X10");
        assert_eq!(strip_comments("; only a comment"), "");
        assert_eq!(strip_comments("   \n"), "");
    }

    #[test]
    fn test_reader_skips_blanks_and_tracks_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "; header\nG28\n\nG1 X10 F3000 ; go\n").unwrap();
        let mut gcode = GcodeFile::open(file.path()).unwrap();
        assert_eq!(gcode.next_command().unwrap().as_deref(), Some("G28"));
        assert_eq!(gcode.position(), 13);
        assert_eq!(
            gcode.next_command().unwrap().as_deref(),
            Some("G1 X10 F3000")
        );
        assert_eq!(gcode.next_command().unwrap(), None);
        assert_eq!(gcode.position(), 32);
    }
}
