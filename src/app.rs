use crate::{
    callrecord::{CallRecordRepositoryRef, SqliteCallRecordRepository},
    config::Config,
    correlation::{run_sweeper, CorrelationStoreRef, MemoryCorrelationStore},
    dashboard::DashboardQueries,
    insights::{InsightGenerator, OpenAiInsightGenerator},
    scope::CallScope,
    telephony::{TelephonyClient, TelnyxClient},
    webhook::{WebhookProcessor, WebhookReceiver, WebhookSender},
};
use anyhow::Result;
use axum::Router;
use std::{net::SocketAddr, sync::Arc, time::Duration, time::Instant};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub scope: CallScope,
    pub repository: CallRecordRepositoryRef,
    pub dashboard: DashboardQueries,
    pub correlation: CorrelationStoreRef,
    pub webhook_sender: WebhookSender,
    pub telephony: Option<Arc<dyn TelephonyClient>>,
    pub insights: Option<Arc<dyn InsightGenerator>>,
    pub token: CancellationToken,
    pub started_at: Instant,
    processor: Arc<WebhookProcessor>,
    webhook_receiver: Mutex<Option<WebhookReceiver>>,
}

pub type AppState = Arc<AppStateInner>;

#[derive(Default)]
pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub repository: Option<SqliteCallRecordRepository>,
    pub correlation: Option<CorrelationStoreRef>,
    pub telephony: Option<Arc<dyn TelephonyClient>>,
    pub insights: Option<Arc<dyn InsightGenerator>>,
}

impl AppStateInner {
    /// Runs the webhook worker and the correlation sweeper until cancelled.
    ///
    /// The queue receiver can only be taken once; a second call returns at once.
    pub async fn serve_background(&self) {
        let Some(receiver) = self.webhook_receiver.lock().await.take() else {
            warn!("webhook processor already running");
            return;
        };
        let sweep_interval =
            Duration::from_secs(self.config.correlation.sweep_interval_secs.max(1));
        tokio::join!(
            self.processor
                .clone()
                .serve(receiver, self.token.child_token()),
            run_sweeper(
                self.correlation.clone(),
                sweep_interval,
                self.token.child_token()
            ),
        );
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn repository(mut self, repository: SqliteCallRecordRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn correlation(mut self, correlation: CorrelationStoreRef) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn telephony(mut self, telephony: Arc<dyn TelephonyClient>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    pub fn insights(mut self, insights: Arc<dyn InsightGenerator>) -> Self {
        self.insights = Some(insights);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let token = CancellationToken::new();
        let scope = CallScope::from_config(&config.telephony);

        let repository = match self.repository {
            Some(repository) => repository,
            None => SqliteCallRecordRepository::connect(&config.database_url).await?,
        };

        let correlation = self.correlation.unwrap_or_else(|| {
            Arc::new(MemoryCorrelationStore::new(
                Duration::from_secs(config.correlation.ttl_secs),
                Duration::from_secs(config.correlation.lookback_secs),
            ))
        });

        let telephony = match self.telephony {
            Some(telephony) => Some(telephony),
            None if config.telephony.api_key.is_some() => {
                Some(Arc::new(TelnyxClient::new(&config.telephony)?) as Arc<dyn TelephonyClient>)
            }
            None => {
                info!("telephony api key not set, recording sync disabled");
                None
            }
        };

        let insights = match (self.insights, config.llm.as_ref()) {
            (Some(insights), _) => Some(insights),
            (None, Some(llm)) if llm.api_key.is_some() => Some(
                Arc::new(OpenAiInsightGenerator::new(llm)?) as Arc<dyn InsightGenerator>,
            ),
            _ => {
                info!("llm api key not set, insights disabled");
                None
            }
        };

        let dashboard = DashboardQueries::new(
            repository.clone(),
            scope.assistant_id().map(str::to_string),
        );
        let repository: CallRecordRepositoryRef = Arc::new(repository);
        let processor = Arc::new(WebhookProcessor::new(
            correlation.clone(),
            repository.clone(),
            scope.clone(),
            config.storage_timeout(),
        ));
        let (webhook_sender, webhook_receiver) = tokio::sync::mpsc::unbounded_channel();

        Ok(Arc::new(AppStateInner {
            config,
            scope,
            repository,
            dashboard,
            correlation,
            webhook_sender,
            telephony,
            insights,
            token,
            started_at: Instant::now(),
            processor,
            webhook_receiver: Mutex::new(Some(webhook_receiver)),
        }))
    }
}

/// Serves on an already bound listener; used by `run` and by tests that need
/// an ephemeral port.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
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
        _ = state.serve_background() => {
            info!("background workers stopped");
        }
        _ = token.cancelled() => {
            info!("Application shutting down due to cancellation");
        }
    }
    token.cancel();
    Ok(())
}

pub async fn run(state: AppState) -> Result<()> {
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on {}", addr);
    serve(state, listener).await
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration to allow cross-origin requests
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    crate::handler::router().with_state(state).layer(cors)
}
