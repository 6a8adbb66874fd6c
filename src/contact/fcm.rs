use diesel::prelude::*;
use fcm::MessageBuilder;
use log::info;
use serde::Serialize;

use crate::models::IdType;

use super::contacter::{DbConnection, ReminderAlert};

const FCM_MAX_RECIPIENTS: usize = 1000;

pub struct FcmContacter {
    fcm_client: fcm::Client,
    api_key: String,
}

impl FcmContacter {
    pub fn new(api_key: String) -> Self {
        FcmContacter {
            fcm_client: fcm::Client::new(),
            api_key
        }
    }

    /// Registration ids of every device the user added an FCM contact from.
    fn get_user_receivers(&self, conn: &DbConnection, user_id: IdType) -> Result<Vec<String>, String> {
        use crate::schema::fcm_user_contact::dsl;

        dsl::fcm_user_contact
            .filter(dsl::user_id.eq(user_id))
            .select(dsl::registration_id)
            .distinct()
            .order_by(dsl::registration_id.asc())
            .load::<String>(conn)
            .map_err(|x| x.to_string())
    }

    pub async fn send_reminder(&self, conn: &DbConnection, alert: &ReminderAlert) -> Result<(), String> {
        let payload = ReminderMessagePayload {
            mex_type: "tank_reminder".to_string(),
            tank_number: alert.tank_number.clone(),
            department: alert.department_code.clone(),
            interval: alert.interval_minutes,
            minutes_remaining: alert.minutes_remaining,
            message: alert.message_text(),
        };

        let contacted = self.get_user_receivers(conn, alert.user_id)?;
        self.send_message(&payload, contacted).await
    }

    pub async fn send_message<T: Serialize>(&self, message: &T, ids: Vec<String>) -> Result<(), String> {
        for id_chunk in ids.chunks(FCM_MAX_RECIPIENTS) {
            let refs: Vec<&str> = id_chunk.iter().map(|x| x.as_str()).collect();
            let mut builder = MessageBuilder::new_multi(&self.api_key, &refs);
            builder.data(message).map_err(|x| x.to_string())?;

            let response = self.fcm_client.send(builder.finalize()).await
                .map_err(|err| format!("FCM send error: {:?}", err))?;
            info!("FCM batch sent: {:?} delivered", response.success);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReminderMessagePayload {
    #[serde(rename="type")]
    mex_type: String,
    tank_number: String,
    department: String,
    interval: i32,
    minutes_remaining: i64,
    message: String,
}
