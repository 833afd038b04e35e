use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use printd_lib::PrintdError;

/// Print the error payload as JSON on stdout and return the failure exit code.
pub fn render_error(err: PrintdError) -> ExitCode {
    let payload = err.to_payload();
    let content = serde_json::to_string(&payload)
        .unwrap_or_else(|_| "{\"category\":\"io\",\"message\":\"error\"}".into());
    println!("{content}");

    // Every failure exits 2; clap usage errors use 2 as well.
    ExitCode::from(2)
}

/// Write bytes to a file, or stdout when no path is given.
pub fn write_output(bytes: &[u8], output: Option<&Path>) -> Result<(), PrintdError> {
    match output {
        Some(path) => std::fs::write(path, bytes)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        write_output(b"%PDF-1.7", Some(&path)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.pdf");
        let err = write_output(b"x", Some(&path)).unwrap_err();
        assert!(matches!(err, PrintdError::Io(_)));
    }
}
