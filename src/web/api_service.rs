use actix_web::web;

use super::cron_service::check_reminders;
use super::graphql_service::{graphiql, graphql};
use super::twilio_service::{send_otp, send_whatsapp, verify_otp};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/graphql").route(web::post().to(graphql)))
            .service(web::resource("/graphiql").route(web::get().to(graphiql)))
            .service(web::resource("/send_otp").route(web::post().to(send_otp)))
            .service(web::resource("/verify_otp").route(web::post().to(verify_otp)))
            .service(web::resource("/send_whatsapp").route(web::post().to(send_whatsapp)))
            .service(web::resource("/cron/check_reminders").route(web::post().to(check_reminders)))
    );
}
