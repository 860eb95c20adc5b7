use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::access::TenantRequest;
use crate::feed::{
    FeedItemKind, FeedMetadata, InteractiveContent, MediaItem, NewFeedItem, PollContent,
    QuizContent, SurveyContent,
};
use crate::tenancy::RouteError;
use crate::utils::validate::{is_valid_user_id, is_valid_username};
use crate::web::metrics::Metrics;
use crate::web::{render_error, web_state};

fn route_error(res: &mut Response, err: RouteError) {
    match err {
        RouteError::ChannelNotFound(username) => {
            render_error(
                res,
                StatusCode::NOT_FOUND,
                &format!("channel not found: {username}"),
            );
        }
        RouteError::AccessRequestsUnsupported(username) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("channel {username} does not support access requests"),
            );
        }
        RouteError::Database(err) => {
            Metrics::error_occurred();
            error!("channel routing failed: {}", err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}

fn username_param(req: &Request, res: &mut Response) -> Option<String> {
    match req.param::<String>("username") {
        Some(username) if is_valid_username(&username) => Some(username),
        Some(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "invalid channel username");
            None
        }
        None => {
            render_error(res, StatusCode::BAD_REQUEST, "missing channel username");
            None
        }
    }
}

#[handler]
pub async fn get_channel_info(req: &mut Request, res: &mut Response) {
    let Some(username) = username_param(req, res) else {
        return;
    };

    match web_state().router.resolve(&username).await {
        Ok(resolved) => {
            res.render(Json(json!({
                "channel": resolved.channel,
                "uses_own_db": resolved.uses_own_db,
            })));
        }
        Err(err) => route_error(res, err),
    }
}

#[handler]
pub async fn fetch_messages(req: &mut Request, res: &mut Response) {
    let Some(username) = username_param(req, res) else {
        return;
    };

    let page_size = web_state().config.limits.feed_page_size;
    let limit = req
        .query::<i64>("limit")
        .unwrap_or(page_size)
        .clamp(1, page_size.max(1));

    let resolved = match web_state().router.resolve(&username).await {
        Ok(resolved) => resolved,
        Err(err) => {
            route_error(res, err);
            return;
        }
    };

    let feed_store = resolved.store.feed_store();
    let items = match feed_store.list_feed_items(&username, limit).await {
        Ok(items) => items,
        Err(err) => {
            Metrics::error_occurred();
            error!("feed fetch for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
            return;
        }
    };

    let count = match feed_store.count_feed_items(&username).await {
        Ok(count) => count,
        Err(err) => {
            Metrics::error_occurred();
            error!("feed count for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
            return;
        }
    };

    Metrics::messages_fetched();
    res.render(Json(json!({
        "channel": username,
        "messages": items,
        "count": count,
        "uses_own_db": resolved.uses_own_db,
    })));
}

// Wire shape of a create request: flat poll/quiz/survey sub-objects, nested
// under interactive_content keyed by type before storage.
#[derive(Debug, Deserialize)]
struct CreateMessageBody {
    #[serde(rename = "type")]
    item_type: FeedItemKind,
    #[serde(default)]
    content: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    media: Vec<MediaItem>,
    #[serde(default)]
    metadata: Option<FeedMetadata>,
    #[serde(default)]
    poll: Option<PollContent>,
    #[serde(default)]
    quiz: Option<QuizContent>,
    #[serde(default)]
    survey: Option<SurveyContent>,
}

#[handler]
pub async fn create_message(req: &mut Request, res: &mut Response) {
    let Some(username) = username_param(req, res) else {
        return;
    };

    let body: CreateMessageBody = match req.parse_json().await {
        Ok(body) => body,
        Err(err) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {err}"),
            );
            return;
        }
    };

    let interactive = match (body.poll, body.quiz, body.survey) {
        (Some(poll), None, None) => Some(InteractiveContent::Poll(poll)),
        (None, Some(quiz), None) => Some(InteractiveContent::Quiz(quiz)),
        (None, None, Some(survey)) => Some(InteractiveContent::Survey(survey)),
        (None, None, None) => None,
        _ => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "at most one of poll, quiz, survey may be set",
            );
            return;
        }
    };

    let item = NewFeedItem {
        channel_username: username.clone(),
        item_type: body.item_type,
        content: body.content,
        caption: body.caption,
        message: body.message,
        media: body.media,
        metadata: body.metadata,
        interactive_content: interactive,
    };

    if let Err(err) = item.validate() {
        render_error(res, StatusCode::BAD_REQUEST, &err.to_string());
        return;
    }

    let resolved = match web_state().router.resolve(&username).await {
        Ok(resolved) => resolved,
        Err(err) => {
            route_error(res, err);
            return;
        }
    };

    match resolved.store.feed_store().create_feed_item(&item).await {
        Ok(created) => {
            Metrics::feed_item_created();
            res.status_code(StatusCode::CREATED);
            res.render(Json(json!({ "success": true, "message": created })));
        }
        Err(err) => {
            Metrics::error_occurred();
            error!("feed insert for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}

#[derive(Debug, Deserialize)]
struct LastViewedBody {
    user_id: Option<String>,
}

#[handler]
pub async fn post_last_viewed(req: &mut Request, res: &mut Response) {
    let Some(username) = username_param(req, res) else {
        return;
    };

    let body: LastViewedBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "missing user_id");
            return;
        }
    };
    let Some(user_id) = body.user_id.filter(|id| is_valid_user_id(id)) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing user_id");
        return;
    };

    let resolved = match web_state().router.resolve(&username).await {
        Ok(resolved) => resolved,
        Err(err) => {
            route_error(res, err);
            return;
        }
    };

    // Count comes from wherever the channel's messages live; the per-user
    // rollup row always lives in the global store.
    let count = match resolved.store.message_store().count_messages(&username).await {
        Ok(count) => count,
        Err(err) => {
            Metrics::error_occurred();
            error!("message count for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
            return;
        }
    };

    match web_state()
        .router
        .global()
        .message_store()
        .upsert_last_viewed(&user_id, &username, count)
        .await
    {
        Ok(last_viewed) => {
            res.render(Json(json!({
                "success": true,
                "message_count": count,
                "last_viewed": last_viewed.last_viewed,
            })));
        }
        Err(err) => {
            Metrics::error_occurred();
            error!("last-viewed upsert for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}

#[derive(Debug, Deserialize)]
struct RequestAccessBody {
    user_id: Option<String>,
}

#[handler]
pub async fn post_request_access(req: &mut Request, res: &mut Response) {
    let Some(username) = username_param(req, res) else {
        return;
    };

    let body: RequestAccessBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "missing user_id");
            return;
        }
    };
    let Some(user_id) = body.user_id.filter(|id| is_valid_user_id(id)) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing user_id");
        return;
    };

    let resolved = match web_state().router.resolve_for_access_request(&username).await {
        Ok(resolved) => resolved,
        Err(err) => {
            route_error(res, err);
            return;
        }
    };

    let request = TenantRequest::new_pending("channel_access", &user_id, &username);
    match resolved.store.request_store().create_request(&request).await {
        Ok(created) => {
            res.status_code(StatusCode::CREATED);
            res.render(Json(json!({ "success": true, "request": created })));
        }
        Err(err) => {
            Metrics::error_occurred();
            error!("access request for {} failed: {}", username, err);
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
        }
    }
}
