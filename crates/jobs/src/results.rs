//! Job results extraction
//!
//! Processes are contracted to emit their result as the last line of stdout
//! in the form `{"plugin_results": ...}`; every other stdout record is a log
//! line. The helpers here pull that value out of a job's process log.

use std::path::Path;

use serde_json::Value;

use crate::logger::process_log_path;

/// Key the process I/O contract reserves for results.
pub const RESULTS_KEY: &str = "plugin_results";

/// Extract the `plugin_results` value from process log content.
///
/// Returns `None` when the log is empty, the last non-empty line is not
/// valid JSON, or the key is absent.
pub fn results_from_log(content: &str) -> Option<Value> {
    let last = content.lines().filter(|line| !line.trim().is_empty()).last()?;
    let value: Value = serde_json::from_str(last).ok()?;
    value.get(RESULTS_KEY).cloned()
}

/// Read a job's process log from disk and extract the results.
pub fn fetch_results(logs_dir: &Path, job_id: &str) -> std::io::Result<Option<Value>> {
    let content = std::fs::read_to_string(process_log_path(logs_dir, job_id))?;
    Ok(results_from_log(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_line_wins() {
        let content = "{\"plugin_results\": \"stale\"}\n{\"msg\": \"working\"}\n{\"plugin_results\": {\"value\": 42}}";
        assert_eq!(results_from_log(content), Some(json!({"value": 42})));
    }

    #[test]
    fn trailing_blank_lines_are_ignored() {
        let content = "{\"plugin_results\": [1, 2]}\n\n  \n";
        assert_eq!(results_from_log(content), Some(json!([1, 2])));
    }

    #[test]
    fn missing_key_or_garbage_yields_none() {
        assert_eq!(results_from_log("{\"msg\": \"no results\"}"), None);
        assert_eq!(results_from_log("not json at all"), None);
        assert_eq!(results_from_log(""), None);
    }

    #[test]
    fn fetch_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            process_log_path(dir.path(), "job-1"),
            "{\"plugin_results\": \"done\"}\n",
        )
        .unwrap();
        let results = fetch_results(dir.path(), "job-1").unwrap();
        assert_eq!(results, Some(json!("done")));
    }
}
