pub const START_TIME: &str = "start_time";
pub const USAGE_TIME: &str = "usage_time";
pub const UPLOAD: &str = "upload";
pub const DOWNLOAD: &str = "download";
pub const TOTAL_TRANSFER: &str = "total_transfer";

pub const UPLOAD_GB: &str = "upload_gb";
pub const DOWNLOAD_GB: &str = "download_gb";
pub const TOTAL_TRANSFER_GB: &str = "total_transfer_gb";

/// Known misspellings in the session export, and their canonical form.
const SYNONYMS: &[(&str, &str)] = &[("seession_break_reason", "session_break_reason")];

/// Lower-case every header and correct known misspellings.
pub fn canonicalize_columns(headers: &[String]) -> Vec<String> {
    headers.iter().map(|h| canonical_name(h)).collect()
}

fn canonical_name(header: &str) -> String {
    let lowered = header.to_lowercase();
    SYNONYMS
        .iter()
        .fold(lowered, |name, &(wrong, right)| name.replace(wrong, right))
}
