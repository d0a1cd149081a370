// utils.rs
// Description: Small helpers for text normalization, JSON record serialization,
//              atomic file replacement and wall clock timestamps.
// History:
// - 2026-10-12: Keep text normalization, retarget JSON helpers to visualization records.
// - 2026-10-14: Make the atomic write async so saves never block the playback timer.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PlaygroundError, Result};
use crate::persistence::VisualizationRecord;

pub fn normalize_text_ascii(s_text: &str) -> String {
    let mut s_out = s_text.to_string();

    while s_out.contains("  ") {
        s_out = s_out.replace("  ", " ");
    }

    for s_p in [".", ",", ":", ";", "!", "?", ")", "]", "}"] {
        s_out = s_out.replace(&format!(" {}", s_p), s_p);
    }
    for s_p in ["(", "[", "{"] {
        s_out = s_out.replace(&format!("{} ", s_p), s_p);
    }

    s_out.trim().to_string()
}

// ---- Record helpers (JSON) ----

pub fn record_to_json(record: &VisualizationRecord) -> Result<String> {
    serde_json::to_string_pretty(record)
        .map_err(|e| PlaygroundError::persistence(format!("record_serialize_error: {}", e)))
}

pub fn record_from_json(s_json: &str) -> Result<VisualizationRecord> {
    if s_json.trim().is_empty() {
        return Err(PlaygroundError::persistence("record_json_empty"));
    }
    serde_json::from_str(s_json)
        .map_err(|e| PlaygroundError::persistence(format!("record_deserialize_error: {}", e)))
}

pub async fn write_file_atomic(p_path: &Path, s_content: &str) -> Result<()> {
    if p_path.as_os_str().is_empty() {
        return Err(PlaygroundError::persistence("file_path_empty"));
    }

    if let Some(p_parent) = p_path.parent() {
        if !p_parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(p_parent)
                .await
                .map_err(|e| PlaygroundError::persistence(format!("record_mkdir_error: {}", e)))?;
        }
    }

    let mut s_tmp = p_path.as_os_str().to_owned();
    s_tmp.push(".tmp");
    let p_tmp = Path::new(&s_tmp);

    tokio::fs::write(p_tmp, s_content)
        .await
        .map_err(|e| PlaygroundError::persistence(format!("record_write_error: {}", e)))?;

    if let Err(e) = tokio::fs::rename(p_tmp, p_path).await {
        let _ = tokio::fs::remove_file(p_tmp).await;
        return Err(PlaygroundError::persistence(format!("record_rename_error: {}", e)));
    }

    Ok(())
}

pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
