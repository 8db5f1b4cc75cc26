use serde::Serialize;

/// Outcome of one organize pass. Per-file results are logged, not collected.
#[derive(Debug, Serialize, Clone)]
pub struct OrganizeReport {
    pub files_moved: usize,
    pub output_dir: String,
}
