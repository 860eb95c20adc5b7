use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::cron::{CronReport, CronRunner};
use crate::relay::RelayEngine;
use crate::tenancy::TenantRouter;

mod channels;
mod crons;
mod health;
pub(crate) mod metrics;
mod prefs;
mod webhooks;

use channels::{
    create_message, fetch_messages, get_channel_info, post_last_viewed, post_request_access,
};
use crons::{alerts_index, cron_global, cron_showcase, cron_tenant, crons_index};
use health::{get_status, health_check};
use metrics::metrics_endpoint;
use prefs::{
    get_language, get_location, get_notification, post_language, post_location, post_notification,
};
use webhooks::{tenant_to_main_channel_activity, tenant_to_main_requests};

#[derive(Clone)]
pub struct WebState {
    pub config: Arc<Config>,
    pub router: Arc<TenantRouter>,
    pub relay: Arc<RelayEngine>,
    pub cron: Arc<CronRunner>,
    pub last_cron: Arc<RwLock<Option<CronReport>>>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(
        config: Arc<Config>,
        router: Arc<TenantRouter>,
        relay: Arc<RelayEngine>,
        cron: Arc<CronRunner>,
    ) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            config: config.clone(),
            router,
            relay,
            cron,
            last_cron: Arc::new(RwLock::new(None)),
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        info!("starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(root_router()).await;

        Ok(())
    }
}

pub fn root_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("api")
                .push(Router::with_path("alerts").get(alerts_index))
                .push(
                    Router::with_path("crons")
                        .get(crons_index)
                        .push(Router::with_path("global").get(cron_global))
                        .push(Router::with_path("tenant").get(cron_tenant))
                        .push(Router::with_path("elon").get(cron_showcase)),
                )
                .push(
                    Router::with_path("channels/{username}")
                        .get(get_channel_info)
                        .push(
                            Router::with_path("messages")
                                .get(fetch_messages)
                                .post(create_message),
                        )
                        .push(Router::with_path("last-viewed").post(post_last_viewed))
                        .push(Router::with_path("request-access").post(post_request_access)),
                )
                .push(
                    Router::with_path("user")
                        .push(
                            Router::with_path("language")
                                .get(get_language)
                                .post(post_language),
                        )
                        .push(
                            Router::with_path("notification")
                                .get(get_notification)
                                .post(post_notification),
                        )
                        .push(
                            Router::with_path("location")
                                .get(get_location)
                                .post(post_location),
                        ),
                )
                .push(
                    Router::with_path("webhooks")
                        .push(
                            Router::with_path("tenant-to-main-channel-activity")
                                .post(tenant_to_main_channel_activity),
                        )
                        .push(
                            Router::with_path("tenant-to-main-requests")
                                .post(tenant_to_main_requests),
                        ),
                ),
        )
}

pub(crate) fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(serde_json::json!({ "error": message })));
}
