use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use super::ChangeEvent;
use super::ChangeType;
use crate::Value;

/// Receives change events for the keys it is subscribed to.
///
/// Called synchronously from the detecting task, after detection locks are released; long work
/// should be handed off to another task. Events of one key arrive in detection order. A panic
/// is caught and logged and does not affect other listeners.
pub trait ChangeListener: Send + Sync + 'static {
    fn on_change(
        &self,
        event: &ChangeEvent,
    );
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    fn on_change(
        &self,
        event: &ChangeEvent,
    ) {
        self(event)
    }
}

pub type EventFilter = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// Per-subscription delivery options
#[derive(Clone, Default)]
pub struct WatchOptions {
    /// Events for which the predicate returns false are not delivered
    pub filter: Option<EventFilter>,
    /// Top-level object fields of interest.
    ///
    /// `updated` events that leave all of them unchanged are dropped, and delivered values
    /// only carry these fields.
    pub fields: Option<Vec<String>>,
    /// Trailing-edge debounce window
    pub debounce: Option<Duration>,
}

impl fmt::Debug for WatchOptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("fields", &self.fields)
            .field("debounce", &self.debounce)
            .finish()
    }
}

impl WatchOptions {
    pub fn with_filter<P>(
        mut self,
        predicate: P,
    ) -> Self
    where
        P: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn with_fields<I, S>(
        mut self,
        fields: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_debounce(
        mut self,
        window: Duration,
    ) -> Self {
        self.debounce = Some(window).filter(|w| !w.is_zero());
        self
    }

    /// The event as this subscription should see it, or `None` if it must not be delivered
    pub(crate) fn prepare(
        &self,
        event: &ChangeEvent,
    ) -> Option<ChangeEvent> {
        if let Some(filter) = &self.filter {
            if !filter(event) {
                return None;
            }
        }

        let Some(fields) = &self.fields else {
            return Some(event.clone());
        };

        if event.change_type == ChangeType::Updated {
            let touched = fields.iter().any(|f| {
                field_of(event.previous_value.as_ref(), f) != field_of(event.value.as_ref(), f)
            });
            if !touched {
                return None;
            }
        }

        let mut projected = event.clone();
        projected.value = event.value.as_ref().map(|v| project(v, fields));
        projected.previous_value = event.previous_value.as_ref().map(|v| project(v, fields));
        Some(projected)
    }
}

fn field_of<'a>(
    value: Option<&'a Value>,
    field: &str,
) -> Option<&'a Value> {
    value.and_then(|v| v.get(field))
}

/// Keeps only `fields` of an object; non-object values pass through untouched
fn project(
    value: &Value,
    fields: &[String],
) -> Value {
    match value {
        Value::Object(object) => {
            let kept: Map<String, Value> = fields
                .iter()
                .filter_map(|f| object.get(f).map(|v| (f.clone(), v.clone())))
                .collect();
            Value::Object(kept)
        }
        other => other.clone(),
    }
}
