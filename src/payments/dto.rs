use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::Quote;
use crate::status::AnalysisType;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub image_count: i32,
    #[serde(default)]
    pub batch_name: Option<String>,
    #[serde(default)]
    pub analysis_type: Option<AnalysisType>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedPaymentResponse {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub session_id: String,
    pub checkout_url: Option<String>,
    pub pricing: Quote,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentBody {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub order_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub payment_status: String,
    pub order_status: String,
    pub processing_stage: String,
    pub verified: bool,
}
