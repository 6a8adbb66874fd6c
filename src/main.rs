use actix::prelude::*;
use actix_identity::{CookieIdentityPolicy, IdentityService};
use actix_web::{App, HttpServer, middleware, web};

use tanktools_server::*;
use tanktools_server::web::api_service;

fn expect_env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{} must be set", name))
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let database_url = expect_env_var("DATABASE_URL");
    let cookie_secret_key = expect_env_var("COOKIE_SECRET_KEY");
    let password_secret_key = expect_env_var("PASSWORD_SECRET_KEY");

    let root_default_password = expect_env_var("ROOT_DEFAULT_PASSWORD");
    let root_password_override = std::env::var("ROOT_PASSWORD_OVERRIDE").map(|x| x.len() > 0).unwrap_or(false);

    let cron_secret = std::env::var("CRON_SECRET").ok();
    let domain: String = std::env::var("DOMAIN").unwrap_or_else(|_| "localhost".to_string());

    // create db connection pool
    let data = AppData::new(
        password_secret_key,
        database_url,
        contact::Contacter::new_from_env(),
        cron_secret,
    );

    data.setup_migrations().unwrap();
    data.setup_root_password(root_default_password, root_password_override).unwrap();

    let actor = reminder::ReminderActor {
        app_data: data.clone()
    };
    actor.start();

    // Start http server
    HttpServer::new(move || {
        App::new()
            .data(data.clone())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(cookie_secret_key.as_bytes())
                    .name("auth-cookie")
                    .domain(domain.as_str())
                    .secure(false)))
            // enable logger
            .wrap(middleware::Logger::default())
            // limit the maximum amount of data that server will accept
            .data(web::JsonConfig::default().limit(4096))
            .configure(api_service::config)
    })
        .bind("0.0.0.0:8080")?
        .run()
        .await
}
