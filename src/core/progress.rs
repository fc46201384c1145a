use serde::Serialize;

use super::errors::Component;

/// One progress report emitted while a model is being acquired.
#[derive(Debug, Clone, Serialize)]
pub struct LoadProgress {
    #[serde(serialize_with = "serialize_component")]
    pub component: Component,
    /// Fraction in [0, 1].
    pub progress: f32,
    pub message: String,
}

impl LoadProgress {
    pub fn new(component: Component, progress: f32, message: impl Into<String>) -> Self {
        Self {
            component,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
        }
    }
}

/// Progress callback; may borrow the caller's state.
pub type ProgressFn<'a> = dyn Fn(LoadProgress) + Send + Sync + 'a;

/// Progress sink for callers that do not care.
pub fn ignore_progress(_: LoadProgress) {}

fn serialize_component<S: serde::Serializer>(
    component: &Component,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(component.as_str())
}
