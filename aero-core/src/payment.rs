use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Processing,
    Succeeded,
    Declined,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String, // Provider's ID (e.g., pi_123)
    pub reservation_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// External payment collaborator, invoked between hold and confirm.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Charge the locked price of a held reservation
    async fn charge(
        &self,
        reservation_id: Uuid,
        amount: i64,
        currency: &str,
        reference: Option<&str>,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>>;
}
