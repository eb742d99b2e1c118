use chrono::{DateTime, Utc};
use fraud_infra_template::Template;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory under the output directory that receives the log files
pub const LOG_DIR_NAME: &str = "logs";

/// Structured log line for a synthesis or provisioning operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisLogEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub component: String,
    pub target: String,
    pub status: OperationStatus,
    pub duration_ms: Option<u64>,
    pub details: HashMap<String, String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "STARTED"),
            OperationStatus::Completed => write!(f, "COMPLETED"),
            OperationStatus::Failed => write!(f, "FAILED"),
            OperationStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Audit trail entry for one resource of the synthesized graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub synthesis_id: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub logical_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Declare,
    Add,
    Modify,
    Remove,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Declare => write!(f, "DECLARE"),
            AuditAction::Add => write!(f, "ADD"),
            AuditAction::Modify => write!(f, "MODIFY"),
            AuditAction::Remove => write!(f, "REMOVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthesisStatus {
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for SynthesisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisStatus::InProgress => write!(f, "IN_PROGRESS"),
            SynthesisStatus::Completed => write!(f, "COMPLETED"),
            SynthesisStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Timing and outcome of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub component: String,
    pub status: OperationStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSummaryReport {
    pub synthesis_id: String,
    pub stack_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SynthesisStatus,
    pub total_resources: usize,
    pub components: Vec<ComponentSummary>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Operation log, audit trail and summary of a synthesis run
pub struct SynthesisLogger {
    log_file_path: PathBuf,
    audit_file_path: PathBuf,
    current_summary: Option<SynthesisSummaryReport>,
}

impl SynthesisLogger {
    pub fn new<P: AsRef<Path>>(log_dir: P) -> std::io::Result<Self> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)?;

        Ok(Self {
            log_file_path: log_dir.join("synthesis.log"),
            audit_file_path: log_dir.join("audit.log"),
            current_summary: None,
        })
    }

    /// Logger writing into `<out_dir>/logs`
    pub fn in_out_dir<P: AsRef<Path>>(out_dir: P) -> std::io::Result<Self> {
        Self::new(out_dir.as_ref().join(LOG_DIR_NAME))
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn audit_file_path(&self) -> &Path {
        &self.audit_file_path
    }

    /// Start a new synthesis session and return its id
    pub fn start(&mut self, stack_name: &str) -> std::io::Result<String> {
        let start_time = Utc::now();
        let synthesis_id = format!("{}-{}", stack_name, start_time.format("%Y%m%d%H%M%S%3f"));
        self.current_summary = Some(SynthesisSummaryReport {
            synthesis_id: synthesis_id.clone(),
            stack_name: stack_name.to_string(),
            start_time,
            end_time: None,
            status: SynthesisStatus::InProgress,
            total_resources: 0,
            components: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        });

        self.log_operation(
            "synthesis_start",
            "stack",
            stack_name,
            OperationStatus::Started,
            None,
            HashMap::new(),
            None,
        )?;
        Ok(synthesis_id)
    }

    pub fn end(&mut self, status: SynthesisStatus) -> std::io::Result<()> {
        let Some(summary) = self.current_summary.as_mut() else {
            return Ok(());
        };
        summary.end_time = Some(Utc::now());
        summary.status = status;

        let stack_name = summary.stack_name.clone();
        let mut details = HashMap::new();
        details.insert(
            "total_resources".to_string(),
            summary.total_resources.to_string(),
        );
        details.insert(
            "components".to_string(),
            summary.components.len().to_string(),
        );
        details.insert("warnings".to_string(), summary.warnings.len().to_string());

        let operation_status = match status {
            SynthesisStatus::Failed => OperationStatus::Failed,
            _ => OperationStatus::Completed,
        };
        self.log_operation(
            "synthesis_end",
            "stack",
            &stack_name,
            operation_status,
            None,
            details,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_operation(
        &self,
        operation: &str,
        component: &str,
        target: &str,
        status: OperationStatus,
        duration_ms: Option<u64>,
        details: HashMap<String, String>,
        error: Option<String>,
    ) -> std::io::Result<()> {
        let entry = SynthesisLogEntry {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            component: component.to_string(),
            target: target.to_string(),
            status,
            duration_ms,
            details,
            error,
        };
        write_json_line(&self.log_file_path, &entry)?;

        match (&entry.error, status) {
            (Some(error), _) => tracing::error!(
                operation = %entry.operation,
                component = %entry.component,
                target = %entry.target,
                error = %error,
                "Operation failed"
            ),
            (None, OperationStatus::Started) => tracing::debug!(
                operation = %entry.operation,
                component = %entry.component,
                target = %entry.target,
                "Operation started"
            ),
            (None, _) => tracing::info!(
                operation = %entry.operation,
                component = %entry.component,
                target = %entry.target,
                status = %status,
                duration_ms = ?entry.duration_ms,
                "Operation finished"
            ),
        }
        Ok(())
    }

    pub fn log_audit(
        &self,
        action: AuditAction,
        resource_type: &str,
        logical_id: &str,
        metadata: HashMap<String, String>,
    ) -> std::io::Result<()> {
        let synthesis_id = self
            .current_summary
            .as_ref()
            .map(|summary| summary.synthesis_id.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let entry = AuditEntry {
            timestamp: Utc::now(),
            synthesis_id,
            action,
            resource_type: resource_type.to_string(),
            logical_id: logical_id.to_string(),
            metadata,
        };
        write_json_line(&self.audit_file_path, &entry)
    }

    /// One audit entry per resource of `template`, classified against the
    /// previously synthesized template when there is one. Resources dropped
    /// since then are recorded as `Remove`.
    pub fn audit_template(
        &mut self,
        template: &Template,
        previous: Option<&Template>,
    ) -> std::io::Result<()> {
        for (logical_id, resource) in &template.resources {
            let action = match previous.map(|previous| previous.resource(logical_id)) {
                None => AuditAction::Declare,
                Some(None) => AuditAction::Add,
                Some(Some(before)) if before != resource => AuditAction::Modify,
                Some(Some(_)) => AuditAction::Declare,
            };
            let mut metadata = HashMap::new();
            if !resource.depends_on.is_empty() {
                metadata.insert("depends_on".to_string(), resource.depends_on.join(","));
            }
            if let Some(policy) = resource.deletion_policy {
                metadata.insert("deletion_policy".to_string(), format!("{:?}", policy));
            }
            self.log_audit(action, &resource.resource_type, logical_id, metadata)?;
        }

        let removed = previous
            .into_iter()
            .flat_map(|previous| &previous.resources)
            .filter(|(logical_id, _)| !template.resources.contains_key(*logical_id));
        for (logical_id, resource) in removed {
            self.log_audit(
                AuditAction::Remove,
                &resource.resource_type,
                logical_id,
                HashMap::new(),
            )?;
        }

        if let Some(summary) = self.current_summary.as_mut() {
            summary.total_resources = template.resources.len();
        }
        Ok(())
    }

    pub fn record_component(
        &mut self,
        component: &str,
        status: OperationStatus,
        duration_ms: u64,
        error: Option<String>,
    ) {
        if let Some(summary) = self.current_summary.as_mut() {
            summary.components.push(ComponentSummary {
                component: component.to_string(),
                status,
                duration_ms,
                error,
            });
        }
    }

    pub fn add_error(&mut self, error: String) {
        if let Some(summary) = self.current_summary.as_mut() {
            summary.errors.push(error);
        }
    }

    pub fn add_warning(&mut self, warning: String) {
        if let Some(summary) = self.current_summary.as_mut() {
            summary.warnings.push(warning);
        }
    }

    pub fn summary(&self) -> Option<&SynthesisSummaryReport> {
        self.current_summary.as_ref()
    }
}

impl std::fmt::Display for SynthesisSummaryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "📊 Synthesis Summary")?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "Stack: {}", self.stack_name)?;
        writeln!(f, "Synthesis ID: {}", self.synthesis_id)?;
        writeln!(f, "Status: {}", self.status)?;
        if let Some(end_time) = self.end_time {
            let duration = end_time.signed_duration_since(self.start_time);
            writeln!(
                f,
                "Duration: {:.2}s",
                duration.num_milliseconds() as f64 / 1000.0
            )?;
        }
        writeln!(f, "Resources: {}", self.total_resources)?;

        if !self.components.is_empty() {
            writeln!(f, "\n📋 Components:")?;
            for component in &self.components {
                let status_icon = match component.status {
                    OperationStatus::Completed => "✅",
                    OperationStatus::Failed => "❌",
                    OperationStatus::Started => "🔄",
                    OperationStatus::Skipped => "⏭️",
                };
                writeln!(
                    f,
                    "  {} {} ({}ms)",
                    status_icon, component.component, component.duration_ms
                )?;
                if let Some(error) = &component.error {
                    writeln!(f, "    Error: {}", error)?;
                }
            }
        }

        if !self.errors.is_empty() {
            writeln!(f, "\n❌ Errors:")?;
            for error in &self.errors {
                writeln!(f, "  - {}", error)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f, "\n⚠️  Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  - {}", warning)?;
            }
        }
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}

fn write_json_line<T: Serialize>(path: &Path, entry: &T) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json_line = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(file, "{}", json_line)?;
    file.flush()
}

/// Run an operation and record its duration and outcome
pub trait TimedOperation {
    fn timed<F, R, E>(&mut self, operation: &str, component: &str, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: Display;
}

impl TimedOperation for SynthesisLogger {
    fn timed<F, R, E>(&mut self, operation: &str, component: &str, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: Display,
    {
        let start_time = std::time::Instant::now();
        let target = self
            .current_summary
            .as_ref()
            .map(|summary| summary.stack_name.clone())
            .unwrap_or_default();

        // Log write failures must not mask the outcome of the operation itself
        let _ = self.log_operation(
            operation,
            component,
            &target,
            OperationStatus::Started,
            None,
            HashMap::new(),
            None,
        );

        let result = f();
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let (status, error) = match &result {
            Ok(_) => (OperationStatus::Completed, None),
            Err(error) => (OperationStatus::Failed, Some(error.to_string())),
        };
        let _ = self.log_operation(
            operation,
            component,
            &target,
            status,
            Some(duration_ms),
            HashMap::new(),
            error.clone(),
        );
        self.record_component(component, status, duration_ms, error);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_infra_template::Resource;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_session_writes_operation_log() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::in_out_dir(temp_dir.path()).unwrap();

        let id = logger.start("FraudDetection").unwrap();
        assert!(id.starts_with("FraudDetection-"));
        logger.end(SynthesisStatus::Completed).unwrap();

        let log_dir = temp_dir.path().join(LOG_DIR_NAME);
        assert!(logger.log_file_path().starts_with(log_dir));
        let lines = read_lines(logger.log_file_path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["operation"], "synthesis_start");
        assert_eq!(lines[1]["status"], "Completed");
        assert_eq!(logger.summary().unwrap().status, SynthesisStatus::Completed);
    }

    #[test]
    fn test_timed_records_component_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::new(temp_dir.path()).unwrap();
        logger.start("Test").unwrap();

        let ok: Result<u32, String> = logger.timed("declare", "storage", || Ok(2));
        assert_eq!(ok.unwrap(), 2);
        let failed: Result<u32, String> =
            logger.timed("declare", "auth", || Err("role missing".to_string()));
        assert!(failed.is_err());

        let summary = logger.summary().unwrap();
        assert_eq!(summary.components.len(), 2);
        assert_eq!(summary.components[0].status, OperationStatus::Completed);
        assert_eq!(summary.components[1].status, OperationStatus::Failed);
        assert_eq!(summary.components[1].error.as_deref(), Some("role missing"));

        let lines = read_lines(logger.log_file_path());
        assert_eq!(lines.last().unwrap()["error"], "role missing");
    }

    #[test]
    fn test_audit_template_writes_one_entry_per_resource() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::new(temp_dir.path()).unwrap();
        logger.start("Test").unwrap();

        let mut template = Template::new(None);
        template
            .add_resource("Topic", Resource::new("AWS::SNS::Topic", json!({})))
            .unwrap();
        let queue = Resource::new("AWS::SQS::Queue", json!({}))
            .depends_on("Topic");
        template.add_resource("Queue", queue).unwrap();
        logger.audit_template(&template, None).unwrap();

        let lines = read_lines(logger.audit_file_path());
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line["action"] == "Declare"));
        let queue = lines
            .iter()
            .find(|line| line["logical_id"] == "Queue")
            .unwrap();
        assert_eq!(queue["metadata"]["depends_on"], "Topic");
        assert_eq!(logger.summary().unwrap().total_resources, 2);
    }

    #[test]
    fn test_warnings_without_session_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::new(temp_dir.path()).unwrap();
        logger.add_warning("unused".to_string());
        assert!(logger.summary().is_none());
    }

    #[test]
    fn test_audit_classifies_against_previous_template() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::new(temp_dir.path()).unwrap();
        logger.start("Test").unwrap();

        let mut previous = Template::new(None);
        for id in ["Topic", "Queue", "Old"] {
            previous
                .add_resource(id, Resource::new("AWS::SNS::Topic", json!({})))
                .unwrap();
        }
        let mut template = Template::new(None);
        template
            .add_resource("Topic", Resource::new("AWS::SNS::Topic", json!({})))
            .unwrap();
        template
            .add_resource(
                "Queue",
                Resource::new("AWS::SNS::Topic", json!({"TopicName": "renamed"})),
            )
            .unwrap();
        template
            .add_resource("New", Resource::new("AWS::SQS::Queue", json!({})))
            .unwrap();
        logger.audit_template(&template, Some(&previous)).unwrap();

        let actions: HashMap<String, String> = read_lines(logger.audit_file_path())
            .into_iter()
            .map(|line| {
                (
                    line["logical_id"].as_str().unwrap().to_string(),
                    line["action"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(actions["Topic"], "Declare");
        assert_eq!(actions["Queue"], "Modify");
        assert_eq!(actions["New"], "Add");
        assert_eq!(actions["Old"], "Remove");
        assert_eq!(logger.summary().unwrap().total_resources, 3);
    }

    #[test]
    fn test_summary_display_lists_components() {
        let temp_dir = TempDir::new().unwrap();
        let mut logger = SynthesisLogger::new(temp_dir.path()).unwrap();
        logger.start("FraudDetection").unwrap();
        let _: Result<(), String> = logger.timed("declare", "storage", || Ok(()));
        logger.add_warning("bucket has no lifecycle rule".to_string());
        logger.end(SynthesisStatus::Completed).unwrap();

        let rendered = logger.summary().unwrap().to_string();
        assert!(rendered.contains("Stack: FraudDetection"));
        assert!(rendered.contains("Status: COMPLETED"));
        assert!(rendered.contains("✅ storage"));
        assert!(rendered.contains("  - bucket has no lifecycle rule"));
    }
}
