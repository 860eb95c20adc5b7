use salvo::prelude::*;
use serde_json::json;

use crate::cron::CronReport;
use crate::web::metrics::Metrics;
use crate::web::web_state;

#[handler]
pub async fn alerts_index(res: &mut Response) {
    res.render(Json(json!({
        "endpoints": [
            "/api/webhooks/tenant-to-main-channel-activity",
            "/api/webhooks/tenant-to-main-requests",
        ],
        "description": "webhook receivers relaying tenant store changes into the global store",
    })));
}

#[handler]
pub async fn crons_index(res: &mut Response) {
    res.render(Json(json!({
        "endpoints": [
            "/api/crons/global",
            "/api/crons/tenant",
            "/api/crons/elon",
        ],
        "description": "scheduled content jobs, intended for external scheduler invocation",
    })));
}

fn remember(report: &CronReport) {
    Metrics::cron_run();
    *web_state().last_cron.write() = Some(report.clone());
}

#[handler]
pub async fn cron_global(res: &mut Response) {
    let report = web_state().cron.run_global().await;
    remember(&report);
    res.render(Json(json!({
        "success": report.success,
        "results": report.results,
    })));
}

#[handler]
pub async fn cron_tenant(res: &mut Response) {
    let report = web_state().cron.run_tenant().await;
    remember(&report);
    res.render(Json(json!({
        "success": report.success,
        "tenantResults": report.results,
    })));
}

#[handler]
pub async fn cron_showcase(res: &mut Response) {
    let report = web_state().cron.run_showcase().await;
    remember(&report);
    res.render(Json(json!({
        "success": report.success,
        "results": report.results,
    })));
}
