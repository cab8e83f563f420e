//! Capture-file reader.
//!
//! A capture file is a JSON array of [`Flow`] records. Loading is
//! all-or-nothing per file: a missing or unparsable file yields an error
//! and no flows.

use super::Flow;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse capture file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Load all flows from a capture file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Flow>, CaptureError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| CaptureError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let flows: Vec<Flow> = serde_json::from_str(&contents).map_err(|source| CaptureError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {} flow(s) from {}", flows.len(), path.display());
    Ok(flows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Request, Scheme};
    use std::io::Write;

    fn tflow() -> Flow {
        Flow::http(Request {
            method: "GET".into(),
            scheme: Scheme::Http,
            host: "example.com".into(),
            port: 80,
            path: "/".into(),
            headers: vec![],
            content: Some(vec![]),
            host_header: None,
        })
    }

    #[test]
    fn test_load_reads_all_flows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&vec![tflow(), tflow()]).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let flows = load(file.path()).unwrap();
        assert_eq!(flows.len(), 2);
        assert!(flows[0].request.is_some());
    }

    #[test]
    fn test_load_missing_file_is_an_open_error() {
        let err = load("/nonexistent/capture.json").unwrap_err();
        assert!(matches!(err, CaptureError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/capture.json"));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();

        let err = load(file.path()).unwrap_err();
        assert!(matches!(err, CaptureError::Parse { .. }));
    }
}
