// src/core/scanner/status.rs

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a scan instance.
///
/// `Created → Starting → Running → Finished`, or `Running → AbortRequested →
/// Aborted`, or `ErrorFailed` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum ScanStatus {
    Created,
    Starting,
    Running,
    Finished,
    AbortRequested,
    Aborted,
    ErrorFailed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Finished | ScanStatus::Aborted | ScanStatus::ErrorFailed
        )
    }
}
