//! Audit logging for privileged operations
//!
//! Every compile and apply is recorded as one JSON object per line under
//! the state directory, so the history of what was pushed into the kernel
//! survives across runs. Audit failures are logged and swallowed; they
//! must never take down a firewall run.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CompileRuleset,
    ApplyRuleset,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log instance
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        crate::utils::ensure_state_dir()?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Opens the audit log at an explicit path. Used by tests.
    pub fn at(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Appends an event to the audit log as one JSON line
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }
}

/// Records a successful compilation and persistence of a ruleset.
pub fn log_compile(line_count: usize, checksum: &str) {
    if let Ok(audit) = AuditLog::new() {
        let event = AuditEvent::new(
            EventType::CompileRuleset,
            true,
            serde_json::json!({
                "line_count": line_count,
                "checksum": checksum,
            }),
            None,
        );

        if let Err(e) = audit.log(&event) {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Records the outcome of an apply operation.
pub fn log_apply(success: bool, error: Option<String>) {
    if let Ok(audit) = AuditLog::new() {
        let event = AuditEvent::new(EventType::ApplyRuleset, success, serde_json::json!({}), error);

        if let Err(e) = audit.log(&event) {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = AuditEvent::new(
            EventType::ApplyRuleset,
            false,
            serde_json::json!({}),
            Some("restore failed".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("apply_ruleset"));
        assert!(json.contains("restore failed"));
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"compile_ruleset","success":true,"details":{"line_count":42},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert!(matches!(event.event_type, EventType::CompileRuleset));
        assert_eq!(event.details["line_count"], 42);
    }

    #[test]
    fn log_then_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));

        for i in 0..3 {
            let event = AuditEvent::new(
                EventType::CompileRuleset,
                true,
                serde_json::json!({"line_count": i}),
                None,
            );
            audit.log(&event).unwrap();
        }

        let events = audit.read_recent(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].details["line_count"], 2);
        assert_eq!(events[1].details["line_count"], 1);
    }
}
