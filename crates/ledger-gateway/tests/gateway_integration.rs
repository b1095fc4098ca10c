//! Integration tests for the escrow gateway over the simulated chain.

use std::time::Duration;

use chrono::NaiveDate;
use common::{Purpose, WalletAddress, Wei};
use ledger_gateway::{
    ChainConfig, ContractCall, EscrowGateway, FailureCategory, GatewayConfig, GatewayError,
    LedgerGateway, Receipt, SimulatedChain, SubmitRequest,
};

const ESCROW: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";
const PLATFORM: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const TENANT: &str = "0x1111111111111111111111111111111111111111";

async fn setup() -> (SimulatedChain, EscrowGateway<SimulatedChain>) {
    let chain = SimulatedChain::new(ChainConfig::new(ESCROW.into(), PLATFORM.into()));
    chain.fund(&PLATFORM.into(), Wei::ether(1)).await;
    chain.fund(&TENANT.into(), Wei::ether(10)).await;
    let gateway = EscrowGateway::new(
        chain.clone(),
        GatewayConfig::new(ESCROW.into(), PLATFORM.into()),
    );
    (chain, gateway)
}

fn payment(amount: Wei) -> SubmitRequest {
    SubmitRequest::settlement(
        Purpose::Payment,
        TENANT.into(),
        ESCROW.into(),
        amount,
        ContractCall::CreateBooking {
            property_id: "7".to_string(),
            start: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 8, 4).unwrap(),
            rental_amount: Wei::ether(1),
        },
    )
}

mod preflight {
    use super::*;

    #[tokio::test]
    async fn valid_payment_is_broadcast_not_mined() {
        let (chain, gateway) = setup().await;

        let provisional = gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap();

        assert!(provisional.booking_id.is_some());
        assert_eq!(gateway.receipt_of(&provisional.tx_hash).await.unwrap(), Receipt::Pending);

        chain.mine().await;
        assert!(gateway.receipt_of(&provisional.tx_hash).await.unwrap().is_final());
    }

    #[tokio::test]
    async fn amount_must_match_fee_model() {
        let (chain, gateway) = setup().await;

        let err = gateway.submit(payment(Wei::ether(1))).await.unwrap_err();

        assert!(matches!(err, GatewayError::ContractRejected(_)));
        assert_eq!(chain.send_attempts().await, 0);
    }

    #[tokio::test]
    async fn malformed_address_never_reaches_the_network() {
        let (chain, gateway) = setup().await;
        let mut request = payment(Wei::new(1_050_000_000_000_000_000));
        request.payer = WalletAddress::new("0x1234");

        let err = gateway.submit(request).await.unwrap_err();

        assert!(matches!(err, GatewayError::InvalidAddress(_)));
        assert_eq!(err.category(), FailureCategory::TerminalRequest);
        assert_eq!(chain.send_attempts().await, 0);
    }

    #[tokio::test]
    async fn payer_needs_fee_buffer() {
        let (chain, gateway) = setup().await;
        let total = Wei::new(1_050_000_000_000_000_000);
        chain.set_balance(&TENANT.into(), total).await;

        let err = gateway.submit(payment(total)).await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::InsufficientBalance { available, .. } if available == total
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn depleted_fee_wallet_is_operational_failure() {
        let (chain, gateway) = setup().await;
        chain.set_balance(&PLATFORM.into(), Wei::ZERO).await;

        let err = gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::FeeWalletDepleted { .. }));
        assert_eq!(err.category(), FailureCategory::TerminalOperational);
    }
}

mod network {
    use super::*;

    #[tokio::test]
    async fn network_failures_are_retryable() {
        let (chain, gateway) = setup().await;
        chain.fail_next_sends(1).await;

        let err = gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_node_times_out_as_network_unavailable() {
        let (chain, _) = setup().await;
        let gateway = EscrowGateway::new(
            chain.clone(),
            GatewayConfig::new(ESCROW.into(), PLATFORM.into())
                .with_call_timeout(Duration::from_secs(5)),
        );
        chain.set_latency(Some(Duration::from_secs(60))).await;

        let err = gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn events_since_block_are_inclusive() {
        let (chain, gateway) = setup().await;
        gateway
            .submit(payment(Wei::new(1_050_000_000_000_000_000)))
            .await
            .unwrap();
        let block = chain.mine().await;

        assert_eq!(gateway.events(block).await.unwrap().len(), 2);
        assert!(gateway.events(block + 1).await.unwrap().is_empty());
        assert_eq!(gateway.head_block().await.unwrap(), block);
    }
}
