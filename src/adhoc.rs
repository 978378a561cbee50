//! Ad hoc SQL for general inquiries.
//!
//! The model drafts one SELECT over the usage table. The instructions carry
//! the caller's account clause from the generation-hint checkpoint, and the
//! draft then goes through the same post-generation repair and execution
//! guard as template SQL.

use crate::catalog::templates::USAGE_TABLE;
use crate::error::{CostwiseError, Result};
use crate::execution::result::ColumnType;
use crate::llm::{generate_with_timeout, LlmProvider};
use crate::plan::{QueryPlan, ResolvedParams};
use crate::security::enforcer::AccountScopeEnforcer;
use crate::security::scope::ScopeContext;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MAX_COLUMNS: usize = 8;

/// Columns of the usage table the model may reference.
const USAGE_COLUMNS: &[(&str, &str)] = &[
    ("account_id", "12-digit billing account"),
    ("billing_period", "partition key, 'YYYY-MM'"),
    ("usage_date", "DATE of usage"),
    ("product_code", "service code such as AmazonEC2"),
    ("region", "region code such as eu-central-1"),
    ("purchase_option", "OnDemand, Reserved, SavingsPlan or Spot"),
    ("usage_type", "usage type string"),
    ("unblended_cost", "cost in USD"),
    ("commitment_used", "commitment amount used"),
    ("commitment_purchased", "commitment amount purchased"),
    ("cost_center_tag", "cost center tag, NULL when untagged"),
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DraftColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Draft {
    sql: String,
    columns: Vec<DraftColumn>,
}

pub struct AdHocSqlGenerator {
    llm: Arc<dyn LlmProvider>,
    enforcer: AccountScopeEnforcer,
    timeout: Duration,
}

impl AdHocSqlGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, enforcer: AccountScopeEnforcer, timeout: Duration) -> Self {
        Self { llm, enforcer, timeout }
    }

    /// Draft a plan. The returned plan still has to pass post-generation
    /// scoping before it can run.
    pub async fn draft(
        &self,
        utterance: &str,
        params: &ResolvedParams,
        scope: &ScopeContext,
        thread_id: Option<&str>,
    ) -> Result<QueryPlan> {
        let instructions = self.enforcer.generation_hint(
            &instructions(utterance, params),
            &params.accounts,
            scope,
            thread_id,
        )?;

        let value = generate_with_timeout(self.llm.as_ref(), &instructions, &draft_schema(), self.timeout).await?;
        let draft: Draft = serde_json::from_value(value)
            .map_err(|e| CostwiseError::Llm(format!("ad hoc SQL draft has the wrong shape: {}", e)))?;

        if draft.columns.is_empty() || draft.columns.len() > MAX_COLUMNS {
            return Err(CostwiseError::Llm(format!(
                "ad hoc SQL draft declares {} columns; expected 1 to {}",
                draft.columns.len(),
                MAX_COLUMNS
            )));
        }
        let columns = draft
            .columns
            .into_iter()
            .map(|c| {
                ColumnType::parse(&c.column_type)
                    .map(|t| (c.name.clone(), t))
                    .ok_or_else(|| CostwiseError::Llm(format!("column '{}' has unknown type '{}'", c.name, c.column_type)))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(sql = %draft.sql, "ad hoc SQL drafted");
        info!(columns = columns.len(), "ad hoc plan drafted");
        Ok(QueryPlan::ad_hoc(draft.sql, columns, params.accounts.clone(), params.time_range))
    }
}

fn instructions(utterance: &str, params: &ResolvedParams) -> String {
    let mut text = format!(
        "Write one read-only SQL SELECT statement (Trino dialect) over the table {} that answers the \
         question below. Use no other tables, no DDL or DML, and at most {} output columns. Aggregate; \
         do not return raw line items.\n\nColumns:\n",
        USAGE_TABLE, MAX_COLUMNS
    );
    for (name, description) in USAGE_COLUMNS {
        text.push_str(&format!("- {}: {}\n", name, description));
    }
    if let Some(range) = params.time_range {
        text.push_str(&format!(
            "\nRestrict usage_date to {} through {} and billing_period to the matching months.\n",
            range.start(),
            range.end()
        ));
    }
    text.push_str(&format!(
        "\nReturn JSON with `sql` and `columns` (name and type: numeric, date or string, in select order).\n\
         Question: {}",
        utterance
    ));
    text
}

fn draft_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["sql", "columns"],
        "properties": {
            "sql": { "type": "string" },
            "columns": {
                "type": "array",
                "minItems": 1,
                "maxItems": MAX_COLUMNS,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "type"],
                    "properties": {
                        "name": { "type": "string" },
                        "type": { "type": "string", "enum": ["numeric", "date", "string"] }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::security::scope::OrgRole;
    use crate::ups::schema::IntentType;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        reply: Value,
        prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl LlmProvider for Recording {
        async fn generate(&self, prompt: &str, _schema: &Value) -> std::result::Result<Value, LlmError> {
            *self.prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn scope() -> ScopeContext {
        ScopeContext::from_raw("alice", OrgRole::FinOps, ["111111111111"]).unwrap()
    }

    #[tokio::test]
    async fn test_instructions_carry_account_clause_and_draft_is_repaired() {
        let llm = Arc::new(Recording {
            reply: json!({
                "sql": "SELECT product_code, SUM(unblended_cost) AS cost FROM cost_usage GROUP BY product_code",
                "columns": [{"name": "product_code", "type": "string"}, {"name": "cost", "type": "numeric"}]
            }),
            prompt: Mutex::new(None),
        });
        let enforcer = AccountScopeEnforcer::default();
        let generator = AdHocSqlGenerator::new(llm.clone(), enforcer.clone(), Duration::from_secs(1));
        let params = ResolvedParams::new(IntentType::GeneralInquiry);

        let plan = generator.draft("what do we spend per service", &params, &scope(), Some("t1")).await.unwrap();
        let prompt = llm.prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("111111111111"));
        assert_eq!(plan.template_id(), "ad_hoc");

        let scoped = enforcer.post_generation(plan, &scope(), Some("t1")).unwrap();
        assert!(scoped.sql().contains("account_id IN ('111111111111')"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_column_type() {
        let llm = Arc::new(Recording {
            reply: json!({ "sql": "SELECT 1", "columns": [{"name": "x", "type": "blob"}] }),
            prompt: Mutex::new(None),
        });
        let generator = AdHocSqlGenerator::new(llm, AccountScopeEnforcer::default(), Duration::from_secs(1));
        let err = generator
            .draft("anything", &ResolvedParams::new(IntentType::GeneralInquiry), &scope(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::Llm(_)));
    }

    #[tokio::test]
    async fn test_empty_scope_denied_before_model_call() {
        let llm = Arc::new(Recording {
            reply: json!({}),
            prompt: Mutex::new(None),
        });
        let generator = AdHocSqlGenerator::new(llm.clone(), AccountScopeEnforcer::default(), Duration::from_secs(1));
        let empty = ScopeContext::new("bob", OrgRole::Viewer, Vec::new());
        let err = generator
            .draft("anything", &ResolvedParams::new(IntentType::GeneralInquiry), &empty, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CostwiseError::ScopeDenied(_)));
        assert!(llm.prompt.lock().unwrap().is_none());
    }
}
