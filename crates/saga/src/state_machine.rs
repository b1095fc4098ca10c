//! Reservation state machine: advances reservations on user requests and
//! saga outcomes, and issues the follow-on commands.

use std::sync::Arc;

use common::{ReservationId, WalletAddress};
use domain::{
    Aggregate, CancelReservation, CheckIn, CheckOut, CommandResult, CreateReservation, Reservation,
    ReservationService,
};
use ledger_gateway::{ContractCall, LedgerGateway, SubmitRequest};
use ledger_store::SagaStore;

use crate::bus::CommandDispatcher;
use crate::command::SagaCommand;
use crate::error::Result;
use crate::events::{OutcomeKind, SagaEvent};
use crate::services::{Collaborators, Notification, NotificationKind};

/// Consumes outcome events and user requests for reservations.
///
/// Every handler is safe to run twice for the same input. Side effects on
/// collaborators only happen when the transition was actually applied;
/// follow-on commands may be dispatched again, which the orchestrator
/// absorbs through its claim.
pub struct ReservationStateMachine<S: SagaStore> {
    store: S,
    reservations: ReservationService<S>,
    dispatcher: Arc<dyn CommandDispatcher>,
    gateway: Arc<dyn LedgerGateway>,
    collaborators: Collaborators,
}

impl<S: SagaStore + Clone> ReservationStateMachine<S> {
    pub fn new(
        store: S,
        dispatcher: Arc<dyn CommandDispatcher>,
        gateway: Arc<dyn LedgerGateway>,
        collaborators: Collaborators,
    ) -> Self {
        let reservations = ReservationService::with_fees(store.clone(), *gateway.fee_schedule());
        Self {
            store,
            reservations,
            dispatcher,
            gateway,
            collaborators,
        }
    }
}

impl<S: SagaStore> ReservationStateMachine<S> {
    pub fn reservations(&self) -> &ReservationService<S> {
        &self.reservations
    }

    /// Creates a PENDING reservation and issues `INITIATE_PAYMENT`.
    #[tracing::instrument(skip(self, cmd), fields(reservation_id = %cmd.reservation_id))]
    pub async fn create(&self, cmd: CreateReservation) -> Result<Reservation> {
        let result = self.reservations.create(cmd).await?;
        let reservation = result.aggregate;
        if let Some(id) = reservation.id() {
            self.dispatcher
                .dispatch(SagaCommand::InitiatePayment { reservation_id: id })
                .await?;
        }
        Ok(reservation)
    }

    /// Resolves a property owner's wallet through the catalog and the user
    /// directory. None when either collaborator has no answer.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_host_wallet(&self, property_id: &str) -> Result<Option<WalletAddress>> {
        let Some(owner) = self.collaborators.catalog.property_owner(property_id).await? else {
            return Ok(None);
        };
        Ok(self.collaborators.users.wallet_of(&owner).await?)
    }

    /// Clears a failed payment and issues `INITIATE_PAYMENT` again.
    #[tracing::instrument(skip(self))]
    pub async fn retry_payment(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let result = self.reservations.request_payment_retry(reservation_id).await?;
        self.dispatcher
            .dispatch(SagaCommand::InitiatePayment { reservation_id })
            .await?;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self, cmd), fields(reservation_id = %cmd.reservation_id))]
    pub async fn check_in(&self, cmd: CheckIn) -> Result<Reservation> {
        let result = self.reservations.check_in(cmd).await?;
        if !result.is_noop() {
            self.signal(&result.aggregate, |booking_id| ContractCall::CheckIn { booking_id })
                .await;
        }
        Ok(result.aggregate)
    }

    /// Completes the stay and issues `RELEASE_ESCROW`.
    #[tracing::instrument(skip(self, cmd), fields(reservation_id = %cmd.reservation_id))]
    pub async fn check_out(&self, cmd: CheckOut) -> Result<Reservation> {
        let reservation_id = cmd.reservation_id;
        let result = self.reservations.check_out(cmd).await?;
        if !result.is_noop() {
            self.signal(&result.aggregate, |booking_id| ContractCall::CheckOut { booking_id })
                .await;
        }
        if result.aggregate.awaits_release() {
            self.dispatcher
                .dispatch(SagaCommand::ReleaseEscrow { reservation_id })
                .await?;
        }
        Ok(result.aggregate)
    }

    /// Cancels the reservation, frees the calendar and issues `REFUND` when
    /// escrow was funded.
    #[tracing::instrument(skip(self, cmd), fields(reservation_id = %cmd.reservation_id))]
    pub async fn cancel(&self, cmd: CancelReservation) -> Result<Reservation> {
        let reservation_id = cmd.reservation_id;
        let result = self.reservations.cancel(cmd).await?;
        let reservation = &result.aggregate;
        if !result.is_noop() {
            self.collaborators
                .catalog
                .unblock_dates(reservation.property_id(), reservation_id)
                .await?;
            self.notify(reservation, NotificationKind::BookingCancelled, reservation.tenant_wallet())
                .await;
        }
        if reservation.awaits_refund() {
            self.dispatcher
                .dispatch(SagaCommand::Refund { reservation_id })
                .await?;
        }
        Ok(result.aggregate)
    }

    /// Applies an outcome event.
    #[tracing::instrument(skip(self, event), fields(reservation_id = %event.reservation_id, kind = %event.kind))]
    pub async fn handle_event(&self, event: &SagaEvent) -> Result<()> {
        let id = event.reservation_id;
        let tx_hash = event.tx_hash().cloned();

        match event.kind {
            OutcomeKind::PaymentConfirmed => {
                let result = self.reservations.confirm_payment(id, tx_hash).await?;
                self.on_payment_confirmed(result).await?;
            }
            OutcomeKind::PaymentFailed => {
                let result = self
                    .reservations
                    .record_payment_failure(id, event.reason())
                    .await?;
                if !result.is_noop() {
                    let reservation = &result.aggregate;
                    self.notify(reservation, NotificationKind::PaymentFailed, reservation.tenant_wallet())
                        .await;
                }
            }
            OutcomeKind::EscrowReleased => {
                let result = self.reservations.mark_escrow_released(id, tx_hash).await?;
                if !result.is_noop() {
                    let reservation = &result.aggregate;
                    self.notify(reservation, NotificationKind::EscrowReleased, reservation.host_wallet())
                        .await;
                }
            }
            OutcomeKind::EscrowReleaseFailed => {
                self.reservations
                    .record_release_failure(id, event.reason())
                    .await?;
            }
            OutcomeKind::RefundProcessed => {
                let result = self.reservations.mark_refunded(id, tx_hash).await?;
                if !result.is_noop() {
                    let reservation = &result.aggregate;
                    self.collaborators
                        .catalog
                        .unblock_dates(reservation.property_id(), id)
                        .await?;
                    self.notify(reservation, NotificationKind::RefundProcessed, reservation.tenant_wallet())
                        .await;
                }
            }
            OutcomeKind::RefundFailed => {
                self.reservations
                    .record_refund_failure(id, event.reason())
                    .await?;
            }
            OutcomeKind::CheckInRecorded | OutcomeKind::CheckOutRecorded => {
                tracing::debug!("ledger recorded stay milestone");
            }
        }
        Ok(())
    }

    async fn on_payment_confirmed(&self, result: CommandResult<Reservation>) -> Result<()> {
        let reservation = &result.aggregate;
        let Some(id) = reservation.id() else {
            return Ok(());
        };
        if result.is_noop() {
            return Ok(());
        }

        if reservation.awaits_refund() {
            // Funds arrived after the guest cancelled.
            tracing::warn!(reservation_id = %id, "payment confirmed on cancelled reservation, refunding");
            self.dispatcher
                .dispatch(SagaCommand::Refund { reservation_id: id })
                .await?;
            return Ok(());
        }

        if let Some((from, to)) = reservation.check_in_date().zip(reservation.check_out_date()) {
            self.collaborators
                .catalog
                .block_dates(reservation.property_id(), id, from, to)
                .await?;
        }
        self.notify(reservation, NotificationKind::BookingConfirmed, reservation.tenant_wallet())
            .await;
        Ok(())
    }

    async fn notify(
        &self,
        reservation: &Reservation,
        kind: NotificationKind,
        recipient: Option<&WalletAddress>,
    ) {
        let Some(id) = reservation.id() else {
            return;
        };
        let notification = Notification::new(id, kind, recipient.cloned())
            .with_detail(reservation.status().as_str());
        if let Err(e) = self.collaborators.notifier.notify(notification).await {
            tracing::warn!(reservation_id = %id, ?kind, error = %e, "notification not sent");
        }
    }

    /// Mirrors a stay milestone on the contract. Failures are logged only;
    /// the off-chain transition already happened.
    async fn signal(&self, reservation: &Reservation, call: impl FnOnce(common::BookingId) -> ContractCall) {
        let (Some(id), Some(tenant)) = (reservation.id(), reservation.tenant_wallet()) else {
            return;
        };
        let booking_id = match self.store.booking_for_reservation(id).await {
            Ok(Some(booking_id)) => booking_id,
            Ok(None) => {
                tracing::warn!(reservation_id = %id, "no ledger booking linked, skipping signal");
                return;
            }
            Err(e) => {
                tracing::warn!(reservation_id = %id, error = %e, "booking lookup failed");
                return;
            }
        };
        let request = SubmitRequest::signal(
            tenant.clone(),
            self.gateway.escrow_address().clone(),
            call(booking_id),
        );
        let name = request.call.name();
        match self.gateway.submit(request).await {
            Ok(provisional) => {
                tracing::info!(reservation_id = %id, call = name, tx_hash = %provisional.tx_hash, "stay milestone sent to ledger");
            }
            Err(e) => {
                metrics::counter!("ledger_signal_failures_total", "call" => name).increment(1);
                tracing::warn!(reservation_id = %id, call = name, error = %e, "stay milestone not sent to ledger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::services::{InMemoryCatalog, InMemoryUserDirectory, RecordingNotifier};
    use chrono::{Duration, Utc};
    use common::{Purpose, Wei};
    use domain::ReservationStatus;
    use ledger_gateway::{ChainConfig, EscrowGateway, GatewayConfig, SimulatedChain};
    use ledger_store::InMemoryStore;

    const ESCROW: &str = "0x00000000000000000000000000000000000e5c20";
    const PLATFORM: &str = "0x0000000000000000000000000000000000000a11";
    const TENANT: &str = "0x1111111111111111111111111111111111111111";
    const HOST: &str = "0x2222222222222222222222222222222222222222";

    struct Fixture {
        bus: InMemoryBus,
        catalog: InMemoryCatalog,
        users: InMemoryUserDirectory,
        notifier: RecordingNotifier,
        machine: ReservationStateMachine<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let chain = SimulatedChain::new(ChainConfig::new(ESCROW.into(), PLATFORM.into()));
        let gateway = EscrowGateway::new(chain, GatewayConfig::new(ESCROW.into(), PLATFORM.into()));
        let bus = InMemoryBus::recording();
        let catalog = InMemoryCatalog::new();
        let users = InMemoryUserDirectory::new();
        let notifier = RecordingNotifier::new();
        let collaborators = Collaborators::new(
            Arc::new(catalog.clone()),
            Arc::new(users.clone()),
            Arc::new(notifier.clone()),
        );
        let machine =
            ReservationStateMachine::new(store, Arc::new(bus.clone()), Arc::new(gateway), collaborators);
        Fixture {
            bus,
            catalog,
            users,
            notifier,
            machine,
        }
    }

    fn booking() -> CreateReservation {
        let today = Utc::now().date_naive();
        CreateReservation::new(
            "prop-1",
            TENANT.into(),
            HOST.into(),
            today + Duration::days(1),
            today + Duration::days(2),
            Wei::ether(1),
        )
    }

    fn confirmed(id: ReservationId) -> SagaEvent {
        SagaEvent::confirmed(id, Purpose::Payment, None, 1)
    }

    #[tokio::test]
    async fn create_issues_initiate_payment() {
        let f = fixture();
        let reservation = f.machine.create(booking()).await.unwrap();
        let id = reservation.id().unwrap();

        assert_eq!(reservation.status(), ReservationStatus::Pending);
        assert_eq!(
            f.bus.dispatched().await,
            vec![SagaCommand::InitiatePayment { reservation_id: id }]
        );
    }

    #[tokio::test]
    async fn payment_confirmed_blocks_calendar_once() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();

        f.machine.handle_event(&confirmed(id)).await.unwrap();
        f.machine.handle_event(&confirmed(id)).await.unwrap();

        let reservation = f.machine.reservations().require(id).await.unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Confirmed);
        assert!(f.catalog.is_blocked(id).await);
        assert_eq!(f.notifier.count(NotificationKind::BookingConfirmed).await, 1);
    }

    #[tokio::test]
    async fn payment_failure_keeps_reservation_pending() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();

        let failed = SagaEvent::failed(id, Purpose::Payment, None, "insufficient balance");
        f.machine.handle_event(&failed).await.unwrap();

        let reservation = f.machine.reservations().require(id).await.unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Pending);
        assert!(reservation.payment_failed());
        assert_eq!(f.notifier.count(NotificationKind::PaymentFailed).await, 1);

        f.machine.retry_payment(id).await.unwrap();
        assert_eq!(f.bus.dispatched().await.len(), 2);
    }

    #[tokio::test]
    async fn cancel_after_payment_issues_refund() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();
        f.machine.handle_event(&confirmed(id)).await.unwrap();

        let reservation = f
            .machine
            .cancel(CancelReservation::new(id, "plans changed"))
            .await
            .unwrap();

        assert_eq!(reservation.status(), ReservationStatus::Cancelled);
        assert!(!f.catalog.is_blocked(id).await);
        assert!(f.bus.dispatched().await.contains(&SagaCommand::Refund { reservation_id: id }));
    }

    #[tokio::test]
    async fn cancel_before_payment_needs_no_refund() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();

        f.machine
            .cancel(CancelReservation::new(id, "plans changed"))
            .await
            .unwrap();

        assert!(!f.bus.dispatched().await.contains(&SagaCommand::Refund { reservation_id: id }));
    }

    #[tokio::test]
    async fn late_payment_on_cancelled_reservation_is_refunded() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();
        f.machine
            .cancel(CancelReservation::new(id, "plans changed"))
            .await
            .unwrap();

        f.machine.handle_event(&confirmed(id)).await.unwrap();

        let reservation = f.machine.reservations().require(id).await.unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Cancelled);
        assert!(reservation.payment_confirmed());
        assert!(f.bus.dispatched().await.contains(&SagaCommand::Refund { reservation_id: id }));
        assert!(!f.catalog.is_blocked(id).await);
    }

    #[tokio::test]
    async fn terminal_reservation_rejects_check_in() {
        let f = fixture();
        let id = f.machine.create(booking()).await.unwrap().id().unwrap();
        f.machine
            .cancel(CancelReservation::new(id, "plans changed"))
            .await
            .unwrap();

        let err = f.machine.check_in(CheckIn::now(id)).await.unwrap_err();
        assert!(matches!(err, crate::SagaError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn host_wallet_resolves_through_owner() {
        let f = fixture();
        f.catalog.set_owner("prop-1", "user-7").await;
        f.users.set_wallet("user-7", HOST.into()).await;

        let wallet = f.machine.resolve_host_wallet("prop-1").await.unwrap();
        assert_eq!(wallet, Some(WalletAddress::new(HOST)));
        assert_eq!(f.machine.resolve_host_wallet("prop-2").await.unwrap(), None);
    }
}
