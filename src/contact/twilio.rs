use log::info;
use serde::Deserialize;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";
const TWILIO_VERIFY_BASE: &str = "https://verify.twilio.com/v2";
const DEFAULT_WHATSAPP_FROM: &str = "whatsapp:+14155238886";

/// Result of a Twilio message send.
#[derive(Debug, Clone)]
pub struct MessageReceipt {
    pub sid: String,
    pub status: String,
    pub to: String,
}

/// Outcome of an OTP verification check.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationStatus {
    Approved,
    Pending,
    Other(String),
}

impl VerificationStatus {
    fn from_api(status: &str) -> Self {
        match status {
            "approved" => VerificationStatus::Approved,
            "pending" => VerificationStatus::Pending,
            other => VerificationStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VerificationStatus::Approved => "approved",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Other(x) => x.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: Option<String>,
    status: Option<String>,
    message: Option<String>,
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TwilioVerifyResponse {
    status: Option<String>,
    message: Option<String>,
}

/// Thin client over the Twilio Messages and Verify REST APIs.
pub struct TwilioContacter {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    verify_service_sid: Option<String>,
    whatsapp_from: String,
}

impl TwilioContacter {
    pub fn new(account_sid: String, auth_token: String, verify_service_sid: Option<String>, whatsapp_from: Option<String>) -> Self {
        TwilioContacter {
            http: reqwest::Client::new(),
            account_sid,
            auth_token,
            verify_service_sid,
            whatsapp_from: whatsapp_from.unwrap_or_else(|| DEFAULT_WHATSAPP_FROM.to_string()),
        }
    }

    pub fn new_from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok()?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok()?;
        let verify_service_sid = std::env::var("TWILIO_VERIFY_SERVICE_SID").ok();
        let whatsapp_from = std::env::var("TWILIO_WHATSAPP_NUMBER").ok();

        Some(Self::new(account_sid, auth_token, verify_service_sid, whatsapp_from))
    }

    pub fn can_verify(&self) -> bool {
        self.verify_service_sid.is_some()
    }

    pub async fn send_whatsapp(&self, to: &str, body: &str) -> Result<MessageReceipt, String> {
        let to = normalize_whatsapp(to);
        let url = format!("{}/Accounts/{}/Messages.json", TWILIO_API_BASE, self.account_sid);

        let response = self.http.post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.whatsapp_from.as_str()),
                ("To", to.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|x| x.to_string())?;

        let ok = response.status().is_success();
        let data: TwilioMessageResponse = response.json().await.map_err(|x| x.to_string())?;

        if !ok {
            return Err(format!(
                "Twilio error {}: {}",
                data.code.unwrap_or(0),
                data.message.unwrap_or_else(|| "Unknown error".to_string())
            ));
        }

        let sid = data.sid.unwrap_or_default();
        info!("WhatsApp message sent: {}", sid);

        Ok(MessageReceipt {
            sid,
            status: data.status.unwrap_or_default(),
            to,
        })
    }

    /// Starts an SMS OTP verification, returning the verification status.
    pub async fn start_verification(&self, phone_number: &str) -> Result<VerificationStatus, String> {
        let service = self.verify_service_sid.as_ref()
            .ok_or_else(|| "Verify service not configured".to_string())?;
        let url = format!("{}/Services/{}/Verifications", TWILIO_VERIFY_BASE, service);

        let response = self.http.post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", phone_number), ("Channel", "sms")])
            .send()
            .await
            .map_err(|x| x.to_string())?;

        let ok = response.status().is_success();
        let data: TwilioVerifyResponse = response.json().await.map_err(|x| x.to_string())?;

        if !ok {
            return Err(data.message.unwrap_or_else(|| "Failed to send OTP".to_string()));
        }

        Ok(VerificationStatus::from_api(data.status.as_deref().unwrap_or("")))
    }

    /// Checks a received OTP code against the pending verification.
    pub async fn check_verification(&self, phone_number: &str, code: &str) -> Result<VerificationStatus, String> {
        let service = self.verify_service_sid.as_ref()
            .ok_or_else(|| "Verify service not configured".to_string())?;
        let url = format!("{}/Services/{}/VerificationCheck", TWILIO_VERIFY_BASE, service);

        let response = self.http.post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", phone_number), ("Code", code)])
            .send()
            .await
            .map_err(|x| x.to_string())?;

        let ok = response.status().is_success();
        let data: TwilioVerifyResponse = response.json().await.map_err(|x| x.to_string())?;

        if !ok {
            return Err(data.message.unwrap_or_else(|| "Failed to verify OTP".to_string()));
        }

        Ok(VerificationStatus::from_api(data.status.as_deref().unwrap_or("")))
    }
}

/// Twilio WhatsApp recipients need the `whatsapp:+<digits>` form.
pub fn normalize_whatsapp(to: &str) -> String {
    let mut formatted = if to.starts_with("whatsapp:") {
        to.to_string()
    } else {
        format!("whatsapp:{}", to)
    };

    if !formatted.contains('+') {
        formatted = formatted.replace("whatsapp:", "whatsapp:+");
    }
    formatted
}
