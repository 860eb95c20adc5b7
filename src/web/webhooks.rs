use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::access::TenantRequestRecord;
use crate::db::NewChannelActivity;
use crate::relay::{RelayEvent, RelayOutcome};
use crate::web::metrics::Metrics;
use crate::web::{render_error, web_state};

// Database-trigger notification shape posted by tenant stores.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    table: String,
    record: serde_json::Value,
}

fn is_relayable(event_type: &str) -> bool {
    matches!(event_type, "INSERT" | "UPDATE")
}

async fn parse_envelope(req: &mut Request, res: &mut Response) -> Option<WebhookEnvelope> {
    match req.parse_json().await {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            Metrics::webhook_rejected();
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("invalid webhook payload: {err}"),
            );
            None
        }
    }
}

#[handler]
pub async fn tenant_to_main_channel_activity(req: &mut Request, res: &mut Response) {
    Metrics::webhook_received();
    let Some(envelope) = parse_envelope(req, res).await else {
        return;
    };

    if envelope.table != "channels_activity" || !is_relayable(&envelope.event_type) {
        Metrics::webhook_skipped();
        res.render(Json(json!({ "success": true, "skipped": true })));
        return;
    }

    let record: NewChannelActivity = match serde_json::from_value(envelope.record) {
        Ok(record) => record,
        Err(err) => {
            Metrics::webhook_rejected();
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("invalid channels_activity record: {err}"),
            );
            return;
        }
    };

    let event = RelayEvent::ChannelActivity(record);
    match web_state().relay.enqueue_and_deliver(&event).await {
        Ok(Some(RelayOutcome::Activity(activity))) => {
            Metrics::relay_enqueued();
            res.render(Json(json!({ "success": true, "activity": activity })));
        }
        Ok(_) => {
            // persisted but not yet applied; the outbox worker owns it now
            Metrics::relay_enqueued();
            res.status_code(StatusCode::ACCEPTED);
            res.render(Json(json!({ "success": true, "queued": true })));
        }
        Err(err) => {
            Metrics::error_occurred();
            error!("activity relay enqueue failed: {}", err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}

#[handler]
pub async fn tenant_to_main_requests(req: &mut Request, res: &mut Response) {
    Metrics::webhook_received();
    let Some(envelope) = parse_envelope(req, res).await else {
        return;
    };

    if envelope.table != "tenant_requests" || !is_relayable(&envelope.event_type) {
        Metrics::webhook_skipped();
        res.render(Json(json!({ "success": true, "skipped": true })));
        return;
    }

    let record: TenantRequestRecord = match serde_json::from_value(envelope.record) {
        Ok(record) => record,
        Err(err) => {
            Metrics::webhook_rejected();
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("invalid tenant_requests record: {err}"),
            );
            return;
        }
    };

    // The acting user must exist before anything is persisted; an unknown
    // uid produces 404 and no outbox entry.
    let user = match web_state()
        .router
        .global()
        .user_store()
        .get_user(&record.uid)
        .await
    {
        Ok(user) => user,
        Err(err) => {
            Metrics::error_occurred();
            error!("user lookup for {} failed: {}", record.uid, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
            return;
        }
    };
    if user.is_none() {
        Metrics::webhook_rejected();
        render_error(
            res,
            StatusCode::NOT_FOUND,
            &format!("user not found: {}", record.uid),
        );
        return;
    }

    let event = RelayEvent::TenantRequest(record);
    match web_state().relay.enqueue_and_deliver(&event).await {
        Ok(Some(RelayOutcome::Request { request, activity })) => {
            Metrics::relay_enqueued();
            res.render(Json(json!({
                "success": true,
                "request": request,
                "activity": activity,
            })));
        }
        Ok(_) => {
            Metrics::relay_enqueued();
            res.status_code(StatusCode::ACCEPTED);
            res.render(Json(json!({ "success": true, "queued": true })));
        }
        Err(err) => {
            Metrics::error_occurred();
            error!("request relay enqueue failed: {}", err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}
