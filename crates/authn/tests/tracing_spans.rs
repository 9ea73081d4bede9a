//! Integration test verifying that `#[instrument]` annotations produce the
//! expected spans, and that no token string ever reaches a span or event.

#![allow(clippy::expect_used)]

use std::{
    fmt::Write as _,
    sync::{Arc, Mutex},
    time::Duration,
};

use tollgate_authn::{AuthConfig, AuthService, Metadata};
use tollgate_storage::MemoryBackend;
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

/// Appends every recorded field to a string.
struct FieldWriter<'a>(&'a mut String);

impl Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, " {}={:?}", field.name(), value);
    }
}

/// Collecting layer that records span names and all field output.
#[derive(Clone, Default)]
struct Collector {
    spans: Arc<Mutex<Vec<String>>>,
    output: Arc<Mutex<String>>,
}

impl<S> tracing_subscriber::Layer<S> for Collector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
        attrs.record(&mut FieldWriter(&mut self.output.lock().expect("lock poisoned")));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        event.record(&mut FieldWriter(&mut self.output.lock().expect("lock poisoned")));
    }
}

#[tokio::test]
async fn credential_operations_create_spans_without_leaking_tokens() {
    let collector = Collector::default();
    let spans = Arc::clone(&collector.spans);
    let output = Arc::clone(&collector.output);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let service = AuthService::open(Arc::new(MemoryBackend::new()), AuthConfig::default())
        .await
        .expect("open");

    let admin = service.bootstrap_token().await.expect("bootstrap");
    service.authenticate(&admin, "UpsertDeployment", None).expect("authenticate");

    let invite = service
        .new_invite_token(Duration::from_secs(60), Metadata::new(), None)
        .await
        .expect("invite");
    let login = service.exchange_invite(&invite).await.expect("exchange");

    // A denial logs a warning; it must not include the token either.
    let _ = service.authenticate(&invite, "UpsertDeployment", None);

    let recorded = spans.lock().expect("lock poisoned");
    for name in [
        "open",
        "load_or_generate",
        "bootstrap",
        "new_login_token",
        "authenticate",
        "new_invite_token",
        "exchange_invite",
        "commit",
    ] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }

    let output = output.lock().expect("lock poisoned");
    for token in [&admin, &invite, &login] {
        assert!(!output.contains(token.as_str()), "token leaked into tracing output");
    }
    assert!(output.contains("audit_event"), "expected audit events in tracing output");
}
