#[macro_use]
extern crate diesel;
extern crate dotenv;
#[macro_use]
extern crate juniper;

#[macro_use]
extern crate diesel_migrations;

use std::sync::Arc;

use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;

use crate::contact::Contacter;
use crate::models::PermissionType;
use crate::security::SessionStore;
use crate::web::errors::ServiceResult;
use crate::web::graphql_schema::{create_schema, Schema};

pub mod audit;
pub mod calc;
pub mod contact;
pub mod fingerprint;
pub mod models;
pub mod reminder;
pub mod schema;
pub mod security;
pub mod web;

embed_migrations!();

#[derive(Clone)]
pub struct AppData {
    pub pool: models::Pool,
    pub graphql_schema: Arc<Schema>,
    pub sessions: SessionStore,
    pub contacter: Contacter,
    pub cron_secret: Option<String>,
}

impl AppData {
    pub fn new(password_secret_key: String, database_url: String, contacter: Contacter, cron_secret: Option<String>) -> Self {
        let pool = {
            let manager = ConnectionManager::<PgConnection>::new(database_url);
            r2d2::Pool::builder()
                .build(manager)
                .expect("Failed to create pool")
        };

        AppData {
            pool,
            graphql_schema: Arc::new(create_schema()),
            sessions: SessionStore::new(password_secret_key),
            contacter,
            cron_secret,
        }
    }

    pub fn setup_migrations(&self) -> ServiceResult<()> {
        let conn = self.pool.get()?;
        embedded_migrations::run(&conn).unwrap();
        Ok(())
    }

    pub fn setup_root_password(&self, password: String, replace: bool) -> ServiceResult<()> {
        use crate::models::User;
        use crate::schema::user_account::dsl;

        let conn = self.pool.get()?;

        let user = dsl::user_account
            .filter(dsl::username.eq("root"))
            .first::<User>(&conn)
            .optional()?;

        std::mem::drop(conn);

        match user {
            None => {
                self.sessions.add_user(self, "root".to_string(), password, PermissionType::Admin, None)?;
            },
            Some(ref user) if replace => {
                self.sessions.update_user(self, user.id, None, Some(password), Some(PermissionType::Admin), None, Some(true))?;
            },
            _ => {},
        }

        Ok(())
    }
}
