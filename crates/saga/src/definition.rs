//! Saga definitions and their steps.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::error::{SagaError, StepError};

/// The mutable context shared by all steps of one saga instance.
pub type SagaContext = serde_json::Map<String, serde_json::Value>;

/// Result of a single step execution or compensation.
pub type StepResult<T> = std::result::Result<T, StepError>;

type ExecuteFn = dyn Fn(SagaContext) -> BoxFuture<'static, StepResult<SagaContext>> + Send + Sync;
type CompensateFn = dyn Fn(SagaContext) -> BoxFuture<'static, StepResult<()>> + Send + Sync;

/// A named unit of work with an optional compensating action.
///
/// `execute` receives a snapshot of the saga context and returns a partial
/// update that the orchestrator shallow-merges into the context once the
/// step has succeeded. `compensate` receives the context as it stood when
/// compensation began.
#[derive(Clone)]
pub struct SagaStep {
    name: String,
    execute: Arc<ExecuteFn>,
    compensate: Option<Arc<CompensateFn>>,
}

impl SagaStep {
    /// Creates a step without a compensating action.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<SagaContext>> + Send + 'static,
    {
        let execute: Arc<ExecuteFn> = Arc::new(move |ctx: SagaContext| f(ctx).boxed());
        Self {
            name: name.into(),
            execute,
            compensate: None,
        }
    }

    /// Attaches a compensating action to this step.
    pub fn with_compensation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<()>> + Send + 'static,
    {
        let compensate: Arc<CompensateFn> = Arc::new(move |ctx: SagaContext| f(ctx).boxed());
        self.compensate = Some(compensate);
        self
    }

    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if a compensating action is defined.
    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }

    pub(crate) fn execute(&self, ctx: SagaContext) -> BoxFuture<'static, StepResult<SagaContext>> {
        (self.execute)(ctx)
    }

    pub(crate) fn compensate(&self, ctx: SagaContext) -> Option<BoxFuture<'static, StepResult<()>>> {
        self.compensate.as_ref().map(|f| f(ctx))
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.has_compensation())
            .finish()
    }
}

/// A named, ordered list of saga steps.
///
/// Definitions are immutable once registered with the orchestrator.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    saga_type: String,
    steps: Vec<SagaStep>,
}

impl SagaDefinition {
    /// Creates an empty definition for the given saga type.
    pub fn new(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step to the definition.
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns the saga type name.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the steps in execution order.
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Looks up a step by name.
    pub fn step_named(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns the step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Checks that the definition has at least one step and no duplicate names.
    pub fn validate(&self) -> Result<(), SagaError> {
        if self.steps.is_empty() {
            return Err(SagaError::InvalidDefinition {
                saga_type: self.saga_type.clone(),
                reason: "definition has no steps".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(SagaError::InvalidDefinition {
                    saga_type: self.saga_type.clone(),
                    reason: format!("duplicate step name '{}'", step.name),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> SagaStep {
        SagaStep::new(name, |_ctx| async { Ok(SagaContext::new()) })
    }

    #[test]
    fn test_builder_preserves_order() {
        let def = SagaDefinition::new("order")
            .step(noop("a"))
            .step(noop("b"))
            .step(noop("c"));

        assert_eq!(def.saga_type(), "order");
        assert_eq!(def.step_names(), vec!["a", "b", "c"]);
        assert!(def.step_named("b").is_some());
        assert!(def.step_named("z").is_none());
    }

    #[test]
    fn test_validate_rejects_empty_definition() {
        let def = SagaDefinition::new("empty");
        assert!(matches!(
            def.validate(),
            Err(SagaError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_step_names() {
        let def = SagaDefinition::new("dup").step(noop("a")).step(noop("a"));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate step name 'a'"));
    }

    #[test]
    fn test_compensation_is_optional() {
        let plain = noop("a");
        assert!(!plain.has_compensation());

        let compensated = noop("b").with_compensation(|_ctx| async { Ok(()) });
        assert!(compensated.has_compensation());
        assert!(compensated.compensate(SagaContext::new()).is_some());
        assert!(plain.compensate(SagaContext::new()).is_none());
    }

    #[tokio::test]
    async fn test_execute_receives_context_snapshot() {
        let step = SagaStep::new("echo", |ctx| async move {
            let mut update = SagaContext::new();
            update.insert("seen".to_string(), ctx.get("input").cloned().unwrap_or_default());
            Ok(update)
        });

        let mut ctx = SagaContext::new();
        ctx.insert("input".to_string(), json!(42));

        let update = step.execute(ctx).await.unwrap();
        assert_eq!(update.get("seen"), Some(&json!(42)));
    }
}
