use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::bus::BusCategory;
use crate::error::HandlerError;
use crate::signals::{Signal, SignalCategory, SignalConfidence};

/// Consumer-side callbacks invoked by a bus during delivery.
///
/// `on_receive` runs under the bus callback timeout. An `Err` or a timeout
/// counts against the consumer's circuit breaker and schedules a retry.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn on_receive(&self, signal: Arc<Signal>) -> Result<(), HandlerError>;

    /// Called once the consumer has acknowledged the message.
    async fn on_complete(&self, _signal: &Signal) {}

    /// Called after every failed attempt, including the final one.
    async fn on_error(&self, _signal: &Signal, _error: &HandlerError) {}
}

/// Adapts an async closure into a [`SignalHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> SignalHandler for FnHandler<F>
where
    F: Fn(Arc<Signal>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn on_receive(&self, signal: Arc<Signal>) -> Result<(), HandlerError> {
        (self.f)(signal).await
    }
}

pub type SignalPredicate = Arc<dyn Fn(&Signal) -> bool + Send + Sync>;

/// What a consumer subscribes to. Empty type/category filters match everything.
#[derive(Clone)]
pub struct ConsumptionContract {
    contract_id: String,
    consumer_id: String,
    subscribed_buses: BTreeSet<BusCategory>,
    signal_types: BTreeSet<String>,
    categories: BTreeSet<SignalCategory>,
    min_confidence: Option<SignalConfidence>,
    predicate: Option<SignalPredicate>,
    handler: Option<Arc<dyn SignalHandler>>,
}

impl ConsumptionContract {
    pub fn new(contract_id: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Self {
            contract_id: contract_id.into(),
            consumer_id: consumer_id.into(),
            subscribed_buses: BTreeSet::new(),
            signal_types: BTreeSet::new(),
            categories: BTreeSet::new(),
            min_confidence: None,
            predicate: None,
            handler: None,
        }
    }

    pub fn with_buses(mut self, buses: impl IntoIterator<Item = BusCategory>) -> Self {
        self.subscribed_buses.extend(buses);
        self
    }

    pub fn with_signal_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signal_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = SignalCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn with_min_confidence(mut self, confidence: SignalConfidence) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Signal) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn SignalHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn contract_id(&self) -> &str {
        &self.contract_id
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn subscribed_buses(&self) -> &BTreeSet<BusCategory> {
        &self.subscribed_buses
    }

    pub fn signal_types(&self) -> &BTreeSet<String> {
        &self.signal_types
    }

    pub fn handler(&self) -> Option<&Arc<dyn SignalHandler>> {
        self.handler.as_ref()
    }

    pub fn matches_signal(&self, signal: &Signal) -> bool {
        if !self.signal_types.is_empty() && !self.signal_types.contains(signal.signal_type()) {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&signal.category()) {
            return false;
        }
        if let Some(min) = self.min_confidence {
            if signal.confidence() < min {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(signal))
    }
}

impl fmt::Debug for ConsumptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumptionContract")
            .field("contract_id", &self.contract_id)
            .field("consumer_id", &self.consumer_id)
            .field("subscribed_buses", &self.subscribed_buses)
            .field("signal_types", &self.signal_types)
            .field("categories", &self.categories)
            .field("min_confidence", &self.min_confidence)
            .field("has_predicate", &self.predicate.is_some())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
