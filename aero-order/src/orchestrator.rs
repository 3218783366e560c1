use aero_core::payment::{PaymentAdapter, PaymentIntent, PaymentStatus};
use uuid::Uuid;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::manager::{ReservationError, ReservationManager};
use crate::models::Reservation;

/// Charges a held reservation through the payment collaborator and confirms it
/// only once the charge has succeeded.
pub struct PaymentOrchestrator {
    manager: Arc<ReservationManager>,
    adapter: Arc<dyn PaymentAdapter>,
}

/// Payment claim on one reservation. Released on drop unless kept.
struct Claim<'a> {
    manager: &'a ReservationManager,
    reservation_id: Uuid,
    release: bool,
}

impl Claim<'_> {
    /// The charge is still open at the provider; a second charge must not start.
    fn keep(mut self) {
        self.release = false;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.release {
            self.manager.end_payment(&self.reservation_id);
        }
    }
}

impl PaymentOrchestrator {
    pub fn new(manager: Arc<ReservationManager>, adapter: Arc<dyn PaymentAdapter>) -> Self {
        Self { manager, adapter }
    }

    /// At most one charge per reservation runs at a time; a concurrent call
    /// fails with `PaymentInProgress` before reaching the gateway.
    ///
    /// On a declined or failed charge the reservation stays `Held`; the caller
    /// may retry, cancel, or let it expire. A charge still processing keeps the
    /// claim, so the hold can only be settled through confirm, cancel or expiry.
    pub async fn pay_and_confirm(
        &self,
        reservation_id: &Uuid,
        reference: Option<&str>,
    ) -> Result<(Reservation, PaymentIntent), PaymentError> {
        let reservation = self.manager.begin_payment(reservation_id)?;
        let claim = Claim {
            manager: self.manager.as_ref(),
            reservation_id: reservation.id,
            release: true,
        };

        let intent = self
            .adapter
            .charge(reservation.id, reservation.price, &reservation.currency, reference)
            .await
            .map_err(|e| {
                error!("Payment gateway failed for reservation {}: {}", reservation.id, e);
                PaymentError::Gateway(e.to_string())
            })?;

        match intent.status {
            PaymentStatus::Succeeded => {}
            PaymentStatus::Processing => {
                info!("Payment {} for reservation {} is still processing", intent.id, reservation.id);
                claim.keep();
                return Err(PaymentError::Pending(intent.id));
            }
            PaymentStatus::Declined | PaymentStatus::Failed => {
                warn!("Payment {} for reservation {} was {:?}", intent.id, reservation.id, intent.status);
                return Err(PaymentError::Declined(intent.status));
            }
        }

        match self.manager.confirm(reservation_id) {
            Ok(confirmed) => {
                info!("Reservation {} paid ({}) and confirmed", confirmed.id, intent.id);
                Ok((confirmed, intent))
            }
            Err(e) => {
                // Charged but the hold was lost to cancel/expiry in between
                error!(
                    "Payment {} captured for reservation {} which could not be confirmed: {}. Refund required",
                    intent.id, reservation_id, e
                );
                Err(e.into())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error("Payment declined: {0:?}")]
    Declined(PaymentStatus),

    #[error("Payment {0} is still processing")]
    Pending(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),
}

/// Accepts every charge except the magic references used by tests and demos.
pub struct MockPaymentAdapter;

#[async_trait::async_trait]
impl PaymentAdapter for MockPaymentAdapter {
    async fn charge(
        &self,
        reservation_id: Uuid,
        amount: i64,
        currency: &str,
        reference: Option<&str>,
    ) -> Result<PaymentIntent, Box<dyn std::error::Error + Send + Sync>> {
        let status = match reference {
            Some("fail-gateway") => return Err("Simulated Payment Gateway Failure".into()),
            Some("decline") => PaymentStatus::Declined,
            Some("pending") => PaymentStatus::Processing,
            _ => PaymentStatus::Succeeded,
        };

        Ok(PaymentIntent {
            id: format!("mock_pi_{}", reservation_id.simple()),
            reservation_id,
            amount,
            currency: currency.to_string(),
            status,
            reference: reference.map(str::to_string),
            created_at: chrono::Utc::now(),
        })
    }
}
