mod common;

use common::{admin, bank_transfer, money, operator, payment, TestCore};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use water_billing_service::error::{BillingError, ErrorKind};
use water_billing_service::models::{
    Invoice, InvoiceStatus, Money, Payment, PaymentMethod, PaymentStatus,
};

fn completed_sum(payments: &[Payment]) -> Money {
    payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum()
}

fn assert_consistent(invoice: &Invoice, payments: &[Payment]) {
    assert_eq!(invoice.amount_paid, completed_sum(payments));
    assert_eq!(invoice.amount_due, invoice.total_amount - invoice.amount_paid);
    assert_eq!(
        invoice.status == InvoiceStatus::Paid,
        invoice.amount_due.is_zero()
    );
}

#[tokio::test]
async fn partial_then_full_then_overpayment() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    let id = invoice.invoice_id;

    let (payment, invoice) = core
        .state
        .ledger
        .apply_payment(bank_transfer(id, 100_000, "TRX1"), &operator())
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.reference_number.as_deref(), Some("TRX1"));
    assert_eq!(payment.recorded_by, "operator-1");
    assert!(payment.receipt_number.starts_with("RCP-20240201-"));
    assert_eq!(invoice.status, InvoiceStatus::Partial);
    assert_eq!(invoice.amount_due, money(160_000));

    let (_, invoice) = core
        .state
        .ledger
        .apply_payment(bank_transfer(id, 160_000, "TRX2"), &operator())
        .await
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.amount_due, Money::ZERO);

    let err = core
        .state
        .ledger
        .apply_payment(payment_of(id, 1), &operator())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Overpayment { .. }));

    let payments = core.state.ledger.payments_for_invoice(id).await.unwrap();
    assert_eq!(payments.len(), 2);
    assert_consistent(&invoice, &payments);
}

fn payment_of(invoice_id: uuid::Uuid, amount: i64) -> water_billing_service::models::CreatePayment {
    payment(invoice_id, amount, PaymentMethod::Cash, None)
}

#[tokio::test]
async fn overpayment_leaves_state_untouched() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;

    let err = core
        .state
        .ledger
        .apply_payment(payment_of(invoice.invoice_id, 260_001), &operator())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let current = core.state.ledger.get_invoice(invoice.invoice_id).await.unwrap();
    assert_eq!(current, invoice);
    assert!(core
        .state
        .ledger
        .payments_for_invoice(invoice.invoice_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn non_cash_payment_requires_reference() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;

    for method in [
        PaymentMethod::BankTransfer,
        PaymentMethod::Card,
        PaymentMethod::EWallet,
        PaymentMethod::Other,
    ] {
        for reference in [None, Some("   ")] {
            let err = core
                .state
                .ledger
                .apply_payment(payment(invoice.invoice_id, 1_000, method, reference), &operator())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?}", method);
        }
    }

    // Cash needs none.
    core.state
        .ledger
        .apply_payment(payment_of(invoice.invoice_id, 1_000), &operator())
        .await
        .unwrap();
}

#[tokio::test]
async fn voiding_payment_on_paid_invoice_reverts_to_partial() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    let id = invoice.invoice_id;

    let (first, _) = core
        .state
        .ledger
        .apply_payment(bank_transfer(id, 100_000, "TRX1"), &operator())
        .await
        .unwrap();
    core.state
        .ledger
        .apply_payment(bank_transfer(id, 160_000, "TRX2"), &operator())
        .await
        .unwrap();

    let (voided, invoice) = core
        .state
        .ledger
        .void_payment(first.payment_id, Some("Bounced".to_string()), &admin())
        .await
        .unwrap();
    assert_eq!(voided.status, PaymentStatus::Voided);
    assert_eq!(voided.void_reason.as_deref(), Some("Bounced"));
    assert_eq!(voided.voided_by.as_deref(), Some("admin-1"));
    assert_eq!(invoice.status, InvoiceStatus::Partial);
    assert_eq!(invoice.amount_due, money(100_000));

    // Retained for audit.
    let stored = core.state.ledger.get_payment(first.payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Voided);
    let payments = core.state.ledger.payments_for_invoice(id).await.unwrap();
    assert_eq!(payments.len(), 2);
    assert_consistent(&invoice, &payments);

    // Double void.
    let err = core
        .state
        .ledger
        .void_payment(first.payment_id, None, &admin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[tokio::test]
async fn voiding_only_payment_reverts_to_unpaid() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;

    let (payment, _) = core
        .state
        .ledger
        .apply_payment(bank_transfer(invoice.invoice_id, 50_000, "TRX1"), &operator())
        .await
        .unwrap();
    let (_, invoice) = core
        .state
        .ledger
        .void_payment(payment.payment_id, None, &admin())
        .await
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Unpaid);
    assert_eq!(invoice.amount_due, invoice.total_amount);
}

#[tokio::test]
async fn payments_on_void_invoice_are_frozen() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    let (payment, _) = core
        .state
        .ledger
        .apply_payment(bank_transfer(invoice.invoice_id, 50_000, "TRX1"), &operator())
        .await
        .unwrap();
    core.state
        .ledger
        .void_invoice(invoice.invoice_id, None, &admin())
        .await
        .unwrap();

    let err = core
        .state
        .ledger
        .void_payment(payment.payment_id, None, &admin())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    let stored = core.state.ledger.get_payment(payment.payment_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_never_overpay() {
    let core = TestCore::new();
    let invoice = core.scenario_invoice().await;
    let id = invoice.invoice_id;

    // Twenty 20,000 payments race for a 260,000 balance: exactly thirteen fit.
    let attempts = (0..20).map(|i| {
        let ledger = core.state.ledger.clone();
        tokio::spawn(async move {
            ledger
                .apply_payment(bank_transfer(id, 20_000, &format!("TRX{}", i)), &operator())
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("payment task panicked"))
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 13);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, BillingError::Overpayment { .. }), "{}", err);
    }

    let invoice = core.state.ledger.get_invoice(id).await.unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    let payments = core.state.ledger.payments_for_invoice(id).await.unwrap();
    assert_eq!(payments.len(), 13);
    assert_consistent(&invoice, &payments);
}

#[tokio::test]
async fn balance_holds_after_random_apply_and_void_sequences() {
    let core = TestCore::new();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..10 {
        let invoice = core.scenario_invoice().await;
        let id = invoice.invoice_id;
        let mut receipts = Vec::new();

        for step in 0..25 {
            let void = !receipts.is_empty() && rng.gen_bool(0.3);
            if void {
                let index = rng.gen_range(0..receipts.len());
                let payment_id = receipts.swap_remove(index);
                core.state
                    .ledger
                    .void_payment(payment_id, None, &admin())
                    .await
                    .unwrap();
            } else {
                let amount = rng.gen_range(1..=120_000);
                let reference = format!("TRX{}", step);
                match core
                    .state
                    .ledger
                    .apply_payment(bank_transfer(id, amount, &reference), &operator())
                    .await
                {
                    Ok((payment, _)) => receipts.push(payment.payment_id),
                    Err(BillingError::Overpayment { .. }) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }

            let current = core.state.ledger.get_invoice(id).await.unwrap();
            let payments = core.state.ledger.payments_for_invoice(id).await.unwrap();
            assert_consistent(&current, &payments);
            assert!(!current.amount_due.is_negative());
        }
    }
}
