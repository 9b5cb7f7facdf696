use async_trait::async_trait;
use ulid::Ulid;

/// Staff activity log. Recording is best effort: a failure is logged and
/// never undoes the action being audited.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn record(&self, actor: Ulid, action: &str, details: serde_json::Value) -> Result<(), String>;
}

/// Writes audit entries to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

#[async_trait]
impl AuditSink for TracingAudit {
    async fn record(&self, actor: Ulid, action: &str, details: serde_json::Value) -> Result<(), String> {
        tracing::info!(target: "audit", %actor, action, %details);
        Ok(())
    }
}
