use crate::{
    call::{routing::RoutingPolicy, AttemptTracker, CallFlow, InMemoryAttemptTracker},
    callrecord::{CallRecordStore, LocalCallRecordStore, MemoryCallRecordStore},
    classifier::{IntentClassifier, KeywordClassifier, LlmIntentClassifierBuilder},
    config::{CallRecordConfig, Config},
    event::EventBroadcaster,
    handler::middleware::request_log::log_requests,
    twiml::{ResponseEncoder, TwimlEncoder},
};
use anyhow::Result;
use axum::{middleware, Router};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, select};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub flow: Arc<CallFlow>,
    pub encoder: Arc<dyn ResponseEncoder>,
    pub events: Arc<EventBroadcaster>,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub store: Option<Arc<dyn CallRecordStore>>,
    pub classifier: Option<Arc<dyn IntentClassifier>>,
    pub tracker: Option<Arc<dyn AttemptTracker>>,
    pub events: Option<Arc<EventBroadcaster>>,
    pub encoder: Option<Arc<dyn ResponseEncoder>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            classifier: None,
            tracker: None,
            events: None,
            encoder: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CallRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn AttemptTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn ResponseEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let token = CancellationToken::new();

        let store = match self.store {
            Some(store) => store,
            None => match &config.callrecord {
                CallRecordConfig::Memory => {
                    Arc::new(MemoryCallRecordStore::new()) as Arc<dyn CallRecordStore>
                }
                CallRecordConfig::Local { root } => {
                    Arc::new(LocalCallRecordStore::new(root)?) as Arc<dyn CallRecordStore>
                }
            },
        };

        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None if config.classifier.api_key.is_some() => Arc::new(
                LlmIntentClassifierBuilder::new()
                    .with_config(&config.classifier)
                    .with_company(&config.gather.company_name)
                    .build()?,
            ) as Arc<dyn IntentClassifier>,
            None => {
                warn!("no classifier API key configured, using keyword classification");
                Arc::new(KeywordClassifier) as Arc<dyn IntentClassifier>
            }
        };

        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(InMemoryAttemptTracker::new()) as Arc<dyn AttemptTracker>);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(EventBroadcaster::new(config.broadcast.channel_capacity)));
        let encoder = self.encoder.unwrap_or_else(|| {
            Arc::new(TwimlEncoder::new(&config.routing, &config.gather)) as Arc<dyn ResponseEncoder>
        });

        if config.routing.emma_phone.is_none() {
            warn!("emma_phone not configured, Emma requests fall back to Michael");
        }
        if config.routing.michael_phone.is_none() {
            warn!("michael_phone not configured, business calls go to voicemail");
        }

        let flow = CallFlow::new(
            store,
            classifier,
            RoutingPolicy::new(config.routing.clone(), tracker),
            events.clone(),
            Duration::from_millis(config.classifier.timeout_ms),
            config.gather.company_name.clone(),
        );

        Ok(Arc::new(AppStateInner {
            config,
            flow: Arc::new(flow),
            encoder,
            events,
            token,
        }))
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();

    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on {}", addr);

    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);
    let skip_paths = Arc::new(state.config.access_log_skip_paths.clone());

    crate::handler::router()
        .with_state(state)
        .layer(middleware::from_fn_with_state(skip_paths, log_requests))
        .layer(cors)
}
