//! Application level spans around the benchmark phases.

use tracing::Span;

use crate::api::Api;

/// Creates the spans that wrap each phase, or nothing if spans are disabled.
///
/// Every span is named `phase`; the exported name is carried in the `otel.name` field so that
/// it shows up as e.g. `download.head` in the trace viewer. Spans record the object they operate
/// on and the [`Api`] in use.
#[derive(Clone, Copy, Debug)]
pub struct PhaseSpans {
    enabled: bool,
    api: Api,
}

impl PhaseSpans {
    /// Creates spans for the given transport mode.
    pub fn new(enabled: bool, api: Api) -> Self {
        Self { enabled, api }
    }

    /// Creates a span for `name`, as child of the current span.
    ///
    /// Returns [`Span::none`] if spans are disabled.
    pub fn phase(&self, name: &'static str, object: Option<&str>) -> Span {
        if !self.enabled {
            return Span::none();
        }

        tracing::info_span!("phase", otel.name = name, object, api = self.api.as_str())
    }
}
