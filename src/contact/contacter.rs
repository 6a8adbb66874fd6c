use std::sync::Arc;

use diesel::PgConnection;
use log::warn;

use crate::models::IdType;

use super::fcm::FcmContacter;
use super::twilio::TwilioContacter;

pub type DbConnection = PgConnection;

/// Everything a reminder message needs, already resolved from the database.
#[derive(Debug)]
pub struct ReminderAlert {
    pub user_id: IdType,
    pub tank_number: String,
    pub department_code: String,
    pub product: Option<String>,
    pub interval_minutes: i32,
    pub minutes_remaining: i64,
    pub phone_number: Option<String>,
}

impl ReminderAlert {
    pub fn message_text(&self) -> String {
        let product = self.product.as_deref().unwrap_or("-");
        format!(
            "Tank {} ({}) reaches its target in {} minutes (product: {}).",
            self.tank_number,
            self.department_code.to_uppercase(),
            self.minutes_remaining,
            product
        )
    }
}

/// Channel-agnostic notification dispatch. Each channel is optional and
/// built from the environment; a missing credential disables the channel
/// with a warning instead of failing requests later.
#[derive(Clone)]
pub struct Contacter {
    fcm_client: Option<Arc<FcmContacter>>,
    twilio_client: Option<Arc<TwilioContacter>>,
}

impl Contacter {
    pub fn new(fcm_key: Option<String>, twilio: Option<TwilioContacter>) -> Self {
        Contacter {
            fcm_client: fcm_key.map(|x| Arc::new(FcmContacter::new(x))),
            twilio_client: twilio.map(Arc::new),
        }
    }

    pub fn new_from_env() -> Self {
        let fcm_api_key = std::env::var("FCM_API_KEY").ok();
        if fcm_api_key.is_none() {
            warn!("No FCM api key found, disabling");
        }

        let twilio = TwilioContacter::new_from_env();
        if twilio.is_none() {
            warn!("No Twilio credentials found, disabling");
        }

        Self::new(fcm_api_key, twilio)
    }

    pub fn twilio(&self) -> Option<&TwilioContacter> {
        self.twilio_client.as_deref()
    }

    /// Delivers one reminder alert over every configured channel that applies:
    /// WhatsApp when the reminder carries a phone number, FCM to the owner's
    /// registered devices. Succeeds if at least one channel accepted it.
    pub async fn send_reminder(&self, conn: &DbConnection, alert: &ReminderAlert) -> Result<(), String> {
        let mut delivered = false;
        let mut last_error: Option<String> = None;

        if let (Some(twilio), Some(phone)) = (self.twilio_client.as_ref(), alert.phone_number.as_ref()) {
            match twilio.send_whatsapp(phone, &alert.message_text()).await {
                Ok(_) => delivered = true,
                Err(err) => last_error = Some(err),
            }
        }

        if let Some(fcm) = self.fcm_client.as_ref() {
            match fcm.send_reminder(conn, alert).await {
                Ok(_) => delivered = true,
                Err(err) => last_error = Some(err),
            }
        }

        match (delivered, last_error) {
            (true, _) => Ok(()),
            (false, Some(err)) => Err(err),
            (false, None) => {
                warn!("No notification channel available, skipping reminder alert");
                Ok(())
            }
        }
    }
}
