use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;

use crate::AppData;
use crate::audit;
use crate::contact::VerificationStatus;

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SendWhatsappRequest {
    pub to: String,
    pub message: String,
}

/// Kuwaiti mobile numbers only: +965 followed by exactly 8 digits.
pub fn is_kuwait_number(number: &str) -> bool {
    match number.strip_prefix("+965") {
        Some(rest) => rest.len() == 8 && rest.bytes().all(|x| x.is_ascii_digit()),
        None => false,
    }
}

fn is_otp_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|x| x.is_ascii_digit())
}

pub async fn send_otp(ctx: web::Data<AppData>, data: web::Json<SendOtpRequest>) -> HttpResponse {
    if !is_kuwait_number(&data.phone_number) {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid phone number format. Use +965XXXXXXXX"
        }));
    }

    let twilio = match ctx.contacter.twilio() {
        Some(x) if x.can_verify() => x,
        _ => return HttpResponse::InternalServerError().json(json!({
            "error": "OTP service not configured"
        })),
    };

    match twilio.start_verification(&data.phone_number).await {
        Ok(status) => {
            if let Ok(conn) = ctx.pool.get() {
                audit::record_activity(&conn, None, "otp_sent", Some("/api/send_otp"), None);
            }
            HttpResponse::Ok().json(json!({
                "success": true,
                "status": status.as_str(),
                "to": data.phone_number
            }))
        },
        Err(details) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to send OTP",
            "details": details
        })),
    }
}

pub async fn verify_otp(ctx: web::Data<AppData>, data: web::Json<VerifyOtpRequest>) -> HttpResponse {
    if !is_kuwait_number(&data.phone_number) {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid phone number format. Use +965XXXXXXXX"
        }));
    }
    if !is_otp_code(&data.code) {
        return HttpResponse::BadRequest().json(json!({
            "error": "Invalid code format. Expected 6 digits"
        }));
    }

    let twilio = match ctx.contacter.twilio() {
        Some(x) if x.can_verify() => x,
        _ => return HttpResponse::InternalServerError().json(json!({
            "error": "OTP service not configured"
        })),
    };

    match twilio.check_verification(&data.phone_number, &data.code).await {
        Ok(VerificationStatus::Approved) => HttpResponse::Ok().json(json!({
            "success": true,
            "status": "approved"
        })),
        Ok(status) => HttpResponse::BadRequest().json(json!({
            "error": "Verification failed",
            "status": status.as_str()
        })),
        Err(details) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to verify OTP",
            "details": details
        })),
    }
}

pub async fn send_whatsapp(ctx: web::Data<AppData>, data: web::Json<SendWhatsappRequest>) -> HttpResponse {
    if data.to.is_empty() || data.message.is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "error": "Both 'to' and 'message' are required"
        }));
    }

    let twilio = match ctx.contacter.twilio() {
        Some(x) => x,
        None => return HttpResponse::InternalServerError().json(json!({
            "error": "WhatsApp service not configured"
        })),
    };

    match twilio.send_whatsapp(&data.to, &data.message).await {
        Ok(receipt) => HttpResponse::Ok().json(json!({
            "success": true,
            "sid": receipt.sid,
            "status": receipt.status
        })),
        Err(details) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to send WhatsApp message",
            "details": details
        })),
    }
}
