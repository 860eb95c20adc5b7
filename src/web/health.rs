use salvo::prelude::*;
use serde_json::json;

use crate::web::web_state;

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render("OK");
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let state = web_state();
    let uptime_seconds = state.started_at.elapsed().as_secs();

    let pending_relays = state
        .router
        .global()
        .outbox_store()
        .count_pending()
        .await
        .unwrap_or(-1);

    let last_cron = state
        .last_cron
        .read()
        .as_ref()
        .map(|report| json!({ "job": report.job, "success": report.success }));

    let status = json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "tenants": state.router.registry().len(),
        "pending_relays": pending_relays,
        "last_cron": last_cron,
    });

    res.render(Json(status));
}
