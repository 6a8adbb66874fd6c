use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use log::error;
use serde_json::json;

use crate::AppData;
use crate::reminder;

fn bearer_token(request: &HttpRequest) -> Option<&str> {
    request.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Reminder sweep triggered by an external scheduler. Guarded by a shared
/// secret; an unconfigured secret rejects everything.
pub async fn check_reminders(ctx: web::Data<AppData>, request: HttpRequest) -> HttpResponse {
    let authorized = match (ctx.cron_secret.as_deref(), bearer_token(&request)) {
        (Some(secret), Some(token)) => secret == token,
        _ => false,
    };

    if !authorized {
        return HttpResponse::Unauthorized().json(json!({
            "error": "Unauthorized"
        }));
    }

    match reminder::run_sweep(&ctx).await {
        Ok(stats) => HttpResponse::Ok().json(json!({
            "success": true,
            "checked": stats.checked,
            "sent": stats.sent,
            "errors": stats.errors,
            "timestamp": Utc::now().to_rfc3339()
        })),
        Err(err) => {
            error!("Reminder sweep failed: {}", err);
            HttpResponse::InternalServerError().json(json!({
                "error": "Reminder sweep failed"
            }))
        }
    }
}
