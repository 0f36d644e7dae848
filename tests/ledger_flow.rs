//! Ledger flow tests: a scripted gateway driven through the service API,
//! checking the campaign total against its donations after every step.
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use donation_ledger::config::AmountLimits;
use donation_ledger::domain::{
    Campaign, CampaignStatus, DonationStatus, EventBus, LedgerEvent, NewCampaign, PaymentMethod,
    transaction_code,
};
use donation_ledger::error::LedgerError;
use donation_ledger::gateway::{
    GatewayFailure, GatewayOrderStatus, OrderHandle, OrderRequest, PaymentGateway, RefundReceipt,
    RefundRequest, VerifiedPayment,
};
use donation_ledger::persistence::MemoryLedger;
use donation_ledger::service::{CreateOrder, DonationLedger, ReconcileOutcome};

/// Gateway that accepts everything instantly, or never answers.
#[derive(Debug, Clone, Default)]
struct InstantGateway {
    hang: bool,
}

impl PaymentGateway for InstantGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Zalopay
    }

    fn currency(&self) -> &str {
        "VND"
    }

    fn amount_limits(&self) -> AmountLimits {
        AmountLimits {
            min: 1_000,
            max: 5_000_000,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(40)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayFailure> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(OrderHandle {
            order_url: Some(format!("https://pay.test/{}", order.transaction_code)),
            gateway_order_id: Some(format!("tok-{}", order.transaction_code)),
            ..OrderHandle::default()
        })
    }

    async fn query_order(&self, _code: &str) -> Result<GatewayOrderStatus, GatewayFailure> {
        Ok(GatewayOrderStatus {
            return_code: 3,
            return_message: "processing".to_string(),
            is_paid: false,
            is_processing: true,
            gateway_transaction_id: None,
            amount: None,
            discount_amount: 0,
        })
    }

    async fn refund(&self, refund: &RefundRequest) -> Result<RefundReceipt, GatewayFailure> {
        Ok(RefundReceipt {
            refund_id: format!("rf-{}", refund.gateway_transaction_id),
            return_code: 1,
            return_message: "refunded".to_string(),
        })
    }
}

type Ledger = DonationLedger<MemoryLedger, InstantGateway>;

async fn setup(gateway: InstantGateway) -> (Arc<Ledger>, Campaign) {
    let ledger = DonationLedger::new(MemoryLedger::new(), gateway, EventBus::new(256));
    let Ok(campaign) = ledger
        .create_campaign(NewCampaign {
            name: "Flood relief Quang Binh".to_string(),
            description: "Rebuilding homes".to_string(),
            target_amount: 1_000_000,
            end_date: None,
            status: CampaignStatus::Active,
        })
        .await
    else {
        panic!("campaign creation failed");
    };
    (Arc::new(ledger), campaign)
}

fn donate(campaign: &Campaign, donor: &str, amount: u64) -> CreateOrder {
    CreateOrder {
        campaign_id: campaign.id,
        donor_id: donor.to_string(),
        donor_name: donor.to_uppercase(),
        amount,
        message: Some("for the families".to_string()),
        redirect_url: None,
        is_anonymous: false,
    }
}

fn paid(code: &str, amount: u64, gateway_id: &str) -> VerifiedPayment {
    VerifiedPayment {
        transaction_code: code.to_string(),
        amount,
        gateway_transaction_id: gateway_id.to_string(),
    }
}

async fn open(ledger: &Ledger, order: CreateOrder) -> String {
    match ledger.create_order(order).await {
        Ok(created) => created.donation.transaction_code,
        Err(err) => panic!("order failed: {err}"),
    }
}

async fn assert_consistent(ledger: &Ledger, campaign: &Campaign, expected: u64) {
    let Ok(audit) = ledger.audit_campaign(campaign.id).await else {
        panic!("audit failed");
    };
    assert!(audit.consistent, "{audit:?}");
    assert_eq!(audit.running_total, expected);
}

#[tokio::test]
async fn single_donation_is_credited_once() {
    let (ledger, campaign) = setup(InstantGateway::default()).await;
    let code = open(&ledger, donate(&campaign, "an", 50_000)).await;
    assert_eq!(transaction_code::suffix(&code).len(), 16);

    let payment = paid(&code, 50_000, "240000001");
    let Ok(ReconcileOutcome::Credited { campaign_total, .. }) =
        ledger.apply_verified_payment(&payment).await
    else {
        panic!("first delivery must credit");
    };
    assert_eq!(campaign_total, 50_000);

    let Ok(ReconcileOutcome::Duplicate(donation)) = ledger.apply_verified_payment(&payment).await
    else {
        panic!("redelivery must be a duplicate");
    };
    assert_eq!(donation.status, DonationStatus::Successful);
    assert_consistent(&ledger, &campaign, 50_000).await;
}

#[tokio::test]
async fn mixed_sequence_keeps_total_equal_to_successful_donations() {
    let (ledger, campaign) = setup(InstantGateway::default()).await;
    let mut events = ledger.event_bus().subscribe();
    let mut feed = ledger
        .event_bus()
        .subscribe_for(campaign.id, campaign.current_total);

    let first = open(&ledger, donate(&campaign, "an", 50_000)).await;
    let second = open(&ledger, donate(&campaign, "binh", 120_000)).await;
    let third = open(&ledger, donate(&campaign, "chi", 30_000)).await;
    let fourth = open(&ledger, donate(&campaign, "dung", 200_000)).await;
    assert_consistent(&ledger, &campaign, 0).await;

    assert!(ledger.apply_verified_payment(&paid(&first, 50_000, "zp-1")).await.is_ok());
    assert_consistent(&ledger, &campaign, 50_000).await;

    let mismatch = ledger.apply_verified_payment(&paid(&second, 100_000, "zp-2")).await;
    assert!(matches!(mismatch, Err(LedgerError::AmountMismatch { .. })));
    assert_consistent(&ledger, &campaign, 50_000).await;

    assert!(ledger.apply_verified_payment(&paid(&second, 120_000, "zp-2")).await.is_ok());
    assert!(ledger.mark_failed(&third, "declined").await.is_ok());
    let late = ledger.apply_verified_payment(&paid(&third, 30_000, "zp-3")).await;
    assert!(matches!(late, Ok(ReconcileOutcome::Unreconciled(_))));
    assert_consistent(&ledger, &campaign, 170_000).await;

    let Ok((fourth_donation, _)) = ledger.donation_by_code(&fourth).await else {
        panic!("fourth donation missing");
    };
    let early = ledger.refund(fourth_donation.id, None).await;
    assert!(matches!(early, Err(LedgerError::Conflict(_))));

    assert!(ledger.apply_verified_payment(&paid(&fourth, 200_000, "zp-4")).await.is_ok());
    assert_consistent(&ledger, &campaign, 370_000).await;

    let Ok(refund) = ledger
        .refund_by_gateway_transaction("zp-4", 200_000, Some("donor request".to_string()))
        .await
    else {
        panic!("refund failed");
    };
    assert_eq!(refund.receipt.refund_id, "rf-zp-4");
    assert_eq!(refund.campaign_total, 170_000);
    assert_eq!(refund.donation.status, DonationStatus::Refunded);
    assert_consistent(&ledger, &campaign, 170_000).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push((event.event_type_str(), event.transaction_code().to_string()));
    }
    let expected = vec![
        ("donation_created", first.clone()),
        ("donation_created", second.clone()),
        ("donation_created", third.clone()),
        ("donation_created", fourth.clone()),
        ("donation_succeeded", first),
        ("donation_succeeded", second),
        ("donation_failed", third),
        ("donation_succeeded", fourth.clone()),
        ("donation_refunded", fourth),
    ];
    assert_eq!(kinds, expected);

    let mut seen = 0;
    while feed.try_recv().is_ok() {
        seen += 1;
    }
    assert_eq!(seen, 9);
    assert_eq!(feed.total(), 170_000);
}

#[tokio::test]
async fn racing_callbacks_and_overrides_credit_once() {
    let (ledger, campaign) = setup(InstantGateway::default()).await;
    let code = open(&ledger, donate(&campaign, "em", 75_000)).await;
    let Ok((donation, _)) = ledger.donation_by_code(&code).await else {
        panic!("donation missing");
    };
    let donation_id = donation.id;

    let mut tasks = Vec::new();
    for i in 0..6 {
        let ledger = Arc::clone(&ledger);
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger
                    .apply_verified_payment(&paid(&code, 75_000, "zp-race"))
                    .await
                    .map(|_| ())
            } else {
                ledger
                    .override_status(donation_id, DonationStatus::Successful)
                    .await
                    .map(|_| ())
            }
        }));
    }
    for task in tasks {
        let Ok(result) = task.await else {
            panic!("task panicked");
        };
        assert!(result.is_ok(), "{result:?}");
    }

    assert_consistent(&ledger, &campaign, 75_000).await;
}

#[tokio::test]
async fn unanswered_order_is_failed_and_never_credited() {
    let (ledger, campaign) = setup(InstantGateway { hang: true }).await;
    let mut events = ledger.event_bus().subscribe();

    let result = ledger.create_order(donate(&campaign, "giang", 50_000)).await;
    assert!(matches!(result, Err(LedgerError::GatewayTimeout)));

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let LedgerEvent::DonationFailed {
            transaction_code, ..
        } = event
        {
            failed = Some(transaction_code);
        }
    }
    let Some(code) = failed else {
        panic!("no failure event");
    };

    let late = ledger.apply_verified_payment(&paid(&code, 50_000, "zp-late")).await;
    assert!(matches!(late, Ok(ReconcileOutcome::Unreconciled(_))));
    assert_consistent(&ledger, &campaign, 0).await;
}

#[tokio::test]
async fn status_query_does_not_write() {
    let (ledger, campaign) = setup(InstantGateway::default()).await;
    let code = open(&ledger, donate(&campaign, "hoa", 10_000)).await;

    let Ok(view) = ledger.query_status(&code).await else {
        panic!("query failed");
    };
    assert!(view.gateway.is_processing);
    let Some(donation) = view.donation else {
        panic!("local donation missing from the view");
    };
    assert_eq!(donation.status, DonationStatus::Pending);
    assert_consistent(&ledger, &campaign, 0).await;
}
