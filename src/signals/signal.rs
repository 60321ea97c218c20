//! The immutable `Signal` value.
//!
//! Fields are private and there are no setters. Growing the audit trail
//! yields a new `Signal` whose predecessor is the previous value:
//!
//! ```compile_fail
//! use sisas::signals::{Signal, SignalConfidence};
//!
//! fn tamper(signal: &mut Signal) {
//!     signal.confidence = SignalConfidence::Low;
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::body::SignalBody;
use super::hash::ContentHash;
use super::types::{AuditEntry, SignalCategory, SignalConfidence, SignalContext, SignalSource};
use crate::error::ConstructionError;

#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    signal_id: String,
    #[serde(flatten)]
    body: SignalBody,
    signal_type: &'static str,
    context: SignalContext,
    source: SignalSource,
    confidence: SignalConfidence,
    rationale: String,
    created_at: DateTime<Utc>,
    audit_trail: Vec<AuditEntry>,
    content_hash: ContentHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    predecessor_id: Option<String>,
    #[serde(skip)]
    predecessor: Option<Arc<Signal>>,
}

impl Signal {
    /// Build a signal. Fails if `context` or `source` is absent or empty.
    pub fn new(
        body: SignalBody,
        context: Option<SignalContext>,
        source: Option<SignalSource>,
        confidence: SignalConfidence,
        rationale: impl Into<String>,
    ) -> Result<Self, ConstructionError> {
        let context = context.ok_or(ConstructionError::MissingContext)?;
        let source = source.ok_or(ConstructionError::MissingSource)?;

        let context_problems = context.problems();
        if !context_problems.is_empty() {
            return Err(ConstructionError::InvalidContext(context_problems.join(", ")));
        }
        let source_problems = source.problems();
        if !source_problems.is_empty() {
            return Err(ConstructionError::InvalidSource(source_problems.join(", ")));
        }
        if !matches!(body.payload(), Value::Object(_) | Value::Null) {
            return Err(ConstructionError::InvalidPayload);
        }

        let rationale = rationale.into();
        let content_hash = hash_content(&body, &context, confidence, &rationale);
        let signal_type = body.signal_type();

        Ok(Self {
            signal_id: format!("sig-{}", Uuid::new_v4()),
            body,
            signal_type,
            context,
            source,
            confidence,
            rationale,
            created_at: Utc::now(),
            audit_trail: Vec::new(),
            content_hash,
            predecessor_id: None,
            predecessor: None,
        })
    }

    pub fn builder(body: SignalBody) -> SignalBuilder {
        SignalBuilder::new(body)
    }

    pub fn signal_id(&self) -> &str {
        &self.signal_id
    }

    pub fn category(&self) -> SignalCategory {
        self.body.category()
    }

    pub fn signal_type(&self) -> &'static str {
        self.signal_type
    }

    pub fn body(&self) -> &SignalBody {
        &self.body
    }

    pub fn payload(&self) -> &Value {
        self.body.payload()
    }

    pub fn context(&self) -> &SignalContext {
        &self.context
    }

    pub fn source(&self) -> &SignalSource {
        &self.source
    }

    pub fn confidence(&self) -> SignalConfidence {
        self.confidence
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Entries recorded on this value only. See [`Signal::full_audit_trail`].
    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    /// Digest fixed at construction.
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// Recompute the digest from the current content. Always equals `content_hash()`.
    pub fn compute_hash(&self) -> ContentHash {
        hash_content(&self.body, &self.context, self.confidence, &self.rationale)
    }

    pub fn predecessor(&self) -> Option<&Signal> {
        self.predecessor.as_deref()
    }

    pub fn predecessor_id(&self) -> Option<&str> {
        self.predecessor_id.as_deref()
    }

    /// Every problem that makes this signal structurally unusable.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = self.context.problems();
        errors.extend(self.source.problems());
        if self.signal_id.is_empty() {
            errors.push("signal_id is empty".to_string());
        }
        if SignalConfidence::from_value(self.confidence.value()).is_none() {
            errors.push(format!("confidence {} out of range", self.confidence.value()));
        }
        if self.content_hash != self.compute_hash() {
            errors.push("content hash does not match content".to_string());
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    /// A new signal carrying `entry`, linked back to `self`.
    ///
    /// The new value gets its own id; content (and therefore the hash) is unchanged.
    pub fn with_audit_entry(&self, entry: AuditEntry) -> Signal {
        Signal {
            signal_id: format!("sig-{}", Uuid::new_v4()),
            body: self.body.clone(),
            signal_type: self.signal_type,
            context: self.context.clone(),
            source: self.source.clone(),
            confidence: self.confidence,
            rationale: self.rationale.clone(),
            created_at: Utc::now(),
            audit_trail: vec![entry],
            content_hash: self.content_hash,
            predecessor_id: Some(self.signal_id.clone()),
            predecessor: Some(Arc::new(self.clone())),
        }
    }

    /// `self` followed by its predecessors, newest first.
    pub fn lineage(&self) -> impl Iterator<Item = &Signal> {
        std::iter::successors(Some(self), |s| s.predecessor())
    }

    /// Audit entries across the whole chain, oldest first.
    pub fn full_audit_trail(&self) -> Vec<AuditEntry> {
        let chain: Vec<&Signal> = self.lineage().collect();
        chain
            .into_iter()
            .rev()
            .flat_map(|s| s.audit_trail.iter().cloned())
            .collect()
    }

    /// Compact summary used in history records and logs.
    pub fn summary(&self) -> Value {
        json!({
            "signal_id": self.signal_id,
            "signal_type": self.signal_type,
            "category": self.category().as_str(),
            "confidence": self.confidence.as_str(),
            "content_hash": self.content_hash.to_hex(),
        })
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        self.signal_id == other.signal_id
    }
}

impl Eq for Signal {}

fn hash_content(
    body: &SignalBody,
    context: &SignalContext,
    confidence: SignalConfidence,
    rationale: &str,
) -> ContentHash {
    let logical = json!({
        "signal_type": body.signal_type(),
        "category": body.category().as_str(),
        "context": context,
        "confidence": confidence.value(),
        "rationale": rationale,
        "payload": body.payload(),
    });
    ContentHash::of_value(&logical)
}

/// Step-by-step construction; `build` enforces the same rules as [`Signal::new`].
#[derive(Debug, Clone)]
pub struct SignalBuilder {
    body: SignalBody,
    context: Option<SignalContext>,
    source: Option<SignalSource>,
    confidence: SignalConfidence,
    rationale: String,
}

impl SignalBuilder {
    pub fn new(body: SignalBody) -> Self {
        Self {
            body,
            context: None,
            source: None,
            confidence: SignalConfidence::Indeterminate,
            rationale: String::new(),
        }
    }

    pub fn context(mut self, context: SignalContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn source(mut self, source: SignalSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn confidence(mut self, confidence: SignalConfidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn build(self) -> Result<Signal, ConstructionError> {
        Signal::new(self.body, self.context, self.source, self.confidence, self.rationale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::body::{EpistemicKind, StructuralKind};
    use std::collections::HashSet;

    fn ctx() -> SignalContext {
        SignalContext::new("document", "doc-1", "extraction").with_policy_area("PA01")
    }

    fn src() -> SignalSource {
        SignalSource::new("evt-1", "evidence_extractor")
    }

    fn body(n: i64) -> SignalBody {
        SignalBody::epistemic(EpistemicKind::EmpiricalSupport, json!({"evidence_count": n}))
    }

    #[test]
    fn test_missing_context_or_source_fails() {
        assert_eq!(
            Signal::new(body(1), None, Some(src()), SignalConfidence::High, "r").unwrap_err(),
            ConstructionError::MissingContext
        );
        assert_eq!(
            Signal::new(body(1), Some(ctx()), None, SignalConfidence::High, "r").unwrap_err(),
            ConstructionError::MissingSource
        );
        assert!(matches!(
            Signal::builder(body(1)).source(src()).build(),
            Err(ConstructionError::MissingContext)
        ));
    }

    #[test]
    fn test_empty_source_fails() {
        let err = Signal::new(
            body(1),
            Some(ctx()),
            Some(SignalSource::new("", "x")),
            SignalConfidence::Low,
            "r",
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::InvalidSource(_)));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let b = SignalBody::structural(StructuralKind::SchemaConflict, json!([1, 2]));
        assert_eq!(
            Signal::new(b, Some(ctx()), Some(src()), SignalConfidence::Low, "r").unwrap_err(),
            ConstructionError::InvalidPayload
        );
    }

    #[test]
    fn test_hash_stable_over_1000_recomputations() {
        let s = Signal::new(body(3), Some(ctx()), Some(src()), SignalConfidence::High, "facts")
            .unwrap();
        let first = s.compute_hash();
        for _ in 0..1000 {
            assert_eq!(s.compute_hash(), first);
        }
        assert_eq!(s.content_hash(), first);
    }

    #[test]
    fn test_hash_ignores_identity_time_and_source() {
        let a =
            Signal::new(body(3), Some(ctx()), Some(src()), SignalConfidence::High, "r").unwrap();
        let other_src = SignalSource::new("evt-99", "another_vehicle").with_source_file("x.pdf");
        let b = Signal::new(body(3), Some(ctx()), Some(other_src), SignalConfidence::High, "r")
            .unwrap();
        assert_ne!(a.signal_id(), b.signal_id());
        assert_eq!(a.content_hash(), b.content_hash());

        let c =
            Signal::new(body(3), Some(ctx()), Some(src()), SignalConfidence::Medium, "r").unwrap();
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_distinct_payloads_distinct_hashes() {
        let hashes: HashSet<ContentHash> = (0..10_000)
            .map(|n| {
                Signal::new(body(n), Some(ctx()), Some(src()), SignalConfidence::Low, "r")
                    .unwrap()
                    .content_hash()
            })
            .collect();
        assert_eq!(hashes.len(), 10_000);
    }

    #[test]
    fn test_audit_chain_is_new_value() {
        let original =
            Signal::new(body(1), Some(ctx()), Some(src()), SignalConfidence::High, "r").unwrap();
        let reviewed = original.with_audit_entry(AuditEntry::new("qa", "reviewed"));
        let approved = reviewed.with_audit_entry(AuditEntry::new("lead", "approved"));

        assert!(original.audit_trail().is_empty());
        assert_eq!(approved.predecessor_id(), Some(reviewed.signal_id()));
        assert_eq!(approved.lineage().count(), 3);
        let actions: Vec<String> =
            approved.full_audit_trail().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["reviewed", "approved"]);
        assert_eq!(approved.content_hash(), original.content_hash());
        assert!(approved.is_valid());
    }

    #[test]
    fn test_serialized_form_omits_predecessor_value() {
        let s =
            Signal::new(body(1), Some(ctx()), Some(src()), SignalConfidence::High, "r").unwrap();
        let next = s.with_audit_entry(AuditEntry::new("a", "b"));
        let v = serde_json::to_value(&next).unwrap();
        assert_eq!(v["category"], "epistemic");
        assert_eq!(v["signal_type"], "EmpiricalSupportSignal");
        assert_eq!(v["predecessor_id"], s.signal_id());
        assert!(v.get("predecessor").is_none());
    }
}
