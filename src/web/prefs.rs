use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::db::Language;
use crate::utils::validate::is_valid_user_id;
use crate::web::metrics::Metrics;
use crate::web::{render_error, web_state};

fn user_id_query(req: &Request, res: &mut Response) -> Option<String> {
    match req.query::<String>("userId") {
        Some(user_id) if is_valid_user_id(&user_id) => Some(user_id),
        _ => {
            render_error(res, StatusCode::BAD_REQUEST, "missing userId");
            None
        }
    }
}

fn database_error(res: &mut Response, context: &str, err: crate::db::DatabaseError) {
    Metrics::error_occurred();
    error!("{} failed: {}", context, err);
    render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "database error");
}

#[handler]
pub async fn get_language(req: &mut Request, res: &mut Response) {
    let Some(user_id) = user_id_query(req, res) else {
        return;
    };

    match web_state()
        .router
        .global()
        .user_store()
        .get_language(&user_id)
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({
                "success": true,
                "language": stored.map(|s| s.language),
            })));
        }
        Err(err) => database_error(res, "language lookup", err),
    }
}

#[derive(Debug, Deserialize)]
struct LanguageBody {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    language: Option<String>,
}

#[handler]
pub async fn post_language(req: &mut Request, res: &mut Response) {
    let body: LanguageBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "missing userId or language");
            return;
        }
    };

    let Some(user_id) = body.user_id.filter(|id| is_valid_user_id(id)) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing userId");
        return;
    };
    let Some(raw_language) = body.language else {
        render_error(res, StatusCode::BAD_REQUEST, "missing language");
        return;
    };

    // Outside the fixed enumeration: reject before any write happens.
    let language = match raw_language.parse::<Language>() {
        Ok(language) => language,
        Err(err) => {
            render_error(res, StatusCode::BAD_REQUEST, &err);
            return;
        }
    };

    match web_state()
        .router
        .global()
        .user_store()
        .set_language(&user_id, language)
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({
                "success": true,
                "language": stored.language,
            })));
        }
        Err(err) => database_error(res, "language update", err),
    }
}

#[handler]
pub async fn get_notification(req: &mut Request, res: &mut Response) {
    let Some(user_id) = user_id_query(req, res) else {
        return;
    };

    match web_state()
        .router
        .global()
        .user_store()
        .get_notifications(&user_id)
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({
                "success": true,
                "notifications_enabled": stored.map(|s| s.notifications_enabled),
            })));
        }
        Err(err) => database_error(res, "notification lookup", err),
    }
}

#[derive(Debug, Deserialize)]
struct NotificationBody {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    notifications_enabled: Option<bool>,
}

#[handler]
pub async fn post_notification(req: &mut Request, res: &mut Response) {
    let body: NotificationBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(
                res,
                StatusCode::BAD_REQUEST,
                "missing userId or notifications_enabled",
            );
            return;
        }
    };

    let Some(user_id) = body.user_id.filter(|id| is_valid_user_id(id)) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing userId");
        return;
    };
    let Some(enabled) = body.notifications_enabled else {
        render_error(res, StatusCode::BAD_REQUEST, "missing notifications_enabled");
        return;
    };

    match web_state()
        .router
        .global()
        .user_store()
        .set_notifications(&user_id, enabled)
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({
                "success": true,
                "notifications_enabled": stored.notifications_enabled,
            })));
        }
        Err(err) => database_error(res, "notification update", err),
    }
}

#[handler]
pub async fn get_location(req: &mut Request, res: &mut Response) {
    let Some(user_id) = user_id_query(req, res) else {
        return;
    };

    match web_state()
        .router
        .global()
        .user_store()
        .get_location(&user_id)
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({ "success": true, "location": stored })));
        }
        Err(err) => database_error(res, "location lookup", err),
    }
}

#[derive(Debug, Deserialize)]
struct LocationBody {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    place_name: Option<String>,
}

#[handler]
pub async fn post_location(req: &mut Request, res: &mut Response) {
    let body: LocationBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "missing userId or coordinates");
            return;
        }
    };

    let Some(user_id) = body.user_id.filter(|id| is_valid_user_id(id)) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing userId");
        return;
    };
    let (Some(latitude), Some(longitude)) = (body.latitude, body.longitude) else {
        render_error(res, StatusCode::BAD_REQUEST, "missing latitude or longitude");
        return;
    };
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        render_error(res, StatusCode::BAD_REQUEST, "coordinates out of range");
        return;
    }

    match web_state()
        .router
        .global()
        .user_store()
        .set_location(&user_id, latitude, longitude, body.place_name.as_deref())
        .await
    {
        Ok(stored) => {
            res.render(Json(json!({ "success": true, "location": stored })));
        }
        Err(err) => database_error(res, "location update", err),
    }
}
