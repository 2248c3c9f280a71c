mod support;

use std::sync::{Arc, atomic::Ordering};

use api_billing::{
    error::WebhookError,
    models::event::EventKind,
    services::reconciler::{FAILED_PAYMENT_REASON, ReconcileOutcome, SkipReason},
    store::{BillingStore, CommitOutcome, Reconciliation},
};
use chrono::{DateTime, Utc};
use common::plans::Plan;
use db::{
    dtos::{
        payment::PaymentCreateRequest,
        subscription::{SubscriptionKey, SubscriptionPatch, SubscriptionUpdate},
    },
    models::{payment::PaymentStatus, subscription::SubscriptionStatus},
};
use mailer::DunningNotice;
use serde_json::json;
use support::*;

async fn deliver(harness: &Harness, payload: &[u8]) -> Result<ReconcileOutcome, WebhookError> {
    harness
        .reconciler
        .handle_event(payload, Some(&sign(payload)))
        .await
}

fn subscription_updated(id: &str, status: &str, price: &str) -> Vec<u8> {
    event(
        id,
        "customer.subscription.updated",
        json!({
            "id": "sub_1",
            "object": "subscription",
            "customer": "cus_1",
            "status": status,
            "current_period_end": 1_702_592_000,
            "cancel_at_period_end": true,
            "trial_end": null,
            "items": { "data": [{ "price": { "id": price } }] },
            "metadata": { "userId": "u1", "plan": "pro" }
        }),
    )
}

#[tokio::test]
async fn checkout_completion_upgrades_plan_and_welcomes() {
    let h = harness();

    let outcome = deliver(&h, &checkout_completed("evt_1")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Processed(EventKind::CheckoutCompleted));

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Pro);
    assert_eq!(sub.status, SubscriptionStatus::Trialing);
    assert_eq!(sub.stripe_customer_id.as_deref(), Some("cus_1"));
    assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_1"));
    assert_eq!(sub.stripe_price_id.as_deref(), Some("price_pro_m"));
    assert_eq!(
        sub.stripe_current_period_end,
        Some("2023-11-14T22:13:20Z".parse::<DateTime<Utc>>().unwrap())
    );
    assert_eq!(sub.trial_ends_at, sub.stripe_current_period_end);

    assert_eq!(
        h.mailer.sent(),
        vec![SentEmail::Welcome {
            to: "ada@example.com".into(),
            plan: "Pro".into()
        }]
    );
}

#[tokio::test]
async fn replayed_event_is_skipped_without_side_effects() {
    let h = harness();
    let payload = checkout_completed("evt_1");

    deliver(&h, &payload).await.unwrap();
    let after_first = h.store.subscription_for("u1").unwrap();

    let outcome = deliver(&h, &payload).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(h.store.subscription_for("u1").unwrap(), after_first);
    assert_eq!(h.mailer.sent().len(), 1);
    assert_eq!(h.store.processed_events().unwrap(), 1);
}

#[tokio::test]
async fn unknown_remote_status_falls_back_to_active() {
    let h = harness();
    h.provider.set_status("some_future_status");

    deliver(&h, &checkout_completed("evt_1")).await.unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn checkout_without_user_metadata_is_acknowledged() {
    let h = harness();
    let payload = event(
        "evt_2",
        "checkout.session.completed",
        json!({ "id": "cs_2", "customer": "cus_9", "subscription": "sub_9", "metadata": {} }),
    );

    let outcome = deliver(&h, &payload).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Acknowledged(EventKind::CheckoutCompleted));
    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap().plan, Plan::Free);
    assert_eq!(h.store.processed_events().unwrap(), 1);
    assert!(h.mailer.sent().is_empty());

    // recorded, so a redelivery is a duplicate
    assert_eq!(
        deliver(&h, &payload).await.unwrap(),
        ReconcileOutcome::Skipped(SkipReason::Duplicate)
    );
}

#[tokio::test]
async fn subscription_update_mirrors_remote_state() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Trialing);

    deliver(&h, &subscription_updated("evt_3", "active", "price_business_y"))
        .await
        .unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Business);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.stripe_price_id.as_deref(), Some("price_business_y"));
    assert!(sub.stripe_cancel_at_period_end);
    assert_eq!(sub.trial_ends_at, None);
    assert_eq!(
        sub.stripe_current_period_end,
        DateTime::<Utc>::from_timestamp(1_702_592_000, 0)
    );
}

#[tokio::test]
async fn subscription_update_with_unknown_price_keeps_plan() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);

    deliver(&h, &subscription_updated("evt_4", "past_due", "price_legacy"))
        .await
        .unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Pro);
    assert_eq!(sub.status, SubscriptionStatus::PastDue);
}

#[tokio::test]
async fn subscription_deletion_downgrades_to_free() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);

    let payload = event(
        "evt_5",
        "customer.subscription.deleted",
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "canceled",
            "metadata": { "userId": "u1" }
        }),
    );
    deliver(&h, &payload).await.unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Free);
    assert_eq!(sub.status, SubscriptionStatus::Canceled);
    assert_eq!(sub.stripe_subscription_id, None);
    assert_eq!(sub.stripe_price_id, None);
    assert!(sub.canceled_at.is_some());
    // the customer is kept for a later re-subscription
    assert_eq!(sub.stripe_customer_id.as_deref(), Some("cus_1"));
}

#[tokio::test]
async fn paid_invoice_reactivates_past_due_subscription() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::PastDue);

    let outcome = deliver(&h, &invoice("evt_6", "invoice.paid", 2)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Processed(EventKind::InvoicePaid));

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);

    let payments = h.store.payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Paid);
    assert_eq!(payments[0].amount, 4900);
    assert_eq!(payments[0].currency, "usd");
    assert_eq!(payments[0].stripe_invoice_id, "in_1");
    assert_eq!(payments[0].stripe_payment_intent_id.as_deref(), Some("pi_1"));
    assert_eq!(
        payments[0].paid_at,
        DateTime::<Utc>::from_timestamp(1_700_000_400, 0)
    );
}

#[tokio::test]
async fn paid_invoice_does_not_override_other_statuses() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Trialing);

    deliver(&h, &invoice("evt_7", "invoice.paid", 1)).await.unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Trialing);
    assert_eq!(h.store.payments().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_payment_marks_past_due_and_sends_final_notice() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);

    deliver(&h, &invoice("evt_8", "invoice.payment_failed", 3))
        .await
        .unwrap();

    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PastDue);

    let payments = h.store.payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(payments[0].amount, 4900);
    assert_eq!(payments[0].paid_at, None);
    assert_eq!(payments[0].failure_reason.as_deref(), Some(FAILED_PAYMENT_REASON));

    assert_eq!(
        h.mailer.sent(),
        vec![SentEmail::Dunning {
            to: "ada@example.com".into(),
            notice: DunningNotice {
                amount: 4900,
                currency: "usd".into(),
                portal_url: PORTAL_URL.into(),
                attempt: 3,
            },
        }]
    );
    assert!(mailer::templates::is_final_notice(3));
}

#[tokio::test]
async fn repeated_failures_append_payment_rows() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);

    deliver(&h, &invoice("evt_9", "invoice.payment_failed", 1))
        .await
        .unwrap();
    deliver(&h, &invoice("evt_10", "invoice.payment_failed", 2))
        .await
        .unwrap();

    let payments = h.store.payments().unwrap();
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p.stripe_invoice_id == "in_1"));
    assert_eq!(
        h.store.subscription_for("u1").unwrap().unwrap().status,
        SubscriptionStatus::PastDue
    );
    assert_eq!(h.mailer.sent().len(), 2);
}

#[tokio::test]
async fn invoice_for_unknown_customer_is_acknowledged() {
    let h = harness();

    let outcome = deliver(&h, &invoice("evt_11", "invoice.paid", 1)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Acknowledged(EventKind::InvoicePaid));
    assert!(h.store.payments().unwrap().is_empty());
}

#[tokio::test]
async fn provider_failure_leaves_no_trace_and_allows_retry() {
    let h = harness();
    h.provider.fail(true);
    let payload = checkout_completed("evt_12");

    let err = deliver(&h, &payload).await.unwrap_err();
    assert!(matches!(err, WebhookError::Handler(_)));
    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap().plan, Plan::Free);
    assert_eq!(h.store.processed_events().unwrap(), 0);
    assert!(h.mailer.sent().is_empty());

    h.provider.fail(false);
    let outcome = deliver(&h, &payload).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Processed(EventKind::CheckoutCompleted));
    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap().plan, Plan::Pro);
}

#[tokio::test]
async fn portal_failure_aborts_payment_failure_handling() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);
    h.provider.fail(true);

    let err = deliver(&h, &invoice("evt_13", "invoice.payment_failed", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::Handler(_)));
    assert!(h.store.payments().unwrap().is_empty());
    assert_eq!(
        h.store.subscription_for("u1").unwrap().unwrap().status,
        SubscriptionStatus::Active
    );
    assert_eq!(h.provider.portal_sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn email_failure_does_not_fail_delivery() {
    let h = harness();
    h.mailer.failing.store(true, Ordering::SeqCst);

    let outcome = deliver(&h, &checkout_completed("evt_14")).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Processed(EventKind::CheckoutCompleted));
    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap().plan, Plan::Pro);
    assert_eq!(h.store.processed_events().unwrap(), 1);
}

#[tokio::test]
async fn unhandled_event_type_is_ignored_and_not_recorded() {
    let h = harness();
    let payload = event("evt_15", "customer.created", json!({ "id": "cus_1" }));

    let outcome = deliver(&h, &payload).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored("customer.created".into()));
    assert_eq!(h.store.processed_events().unwrap(), 0);
}

#[tokio::test]
async fn rejects_missing_and_invalid_signatures() {
    let h = harness();
    let payload = checkout_completed("evt_16");

    let missing = h.reconciler.handle_event(&payload, None).await.unwrap_err();
    assert!(matches!(missing, WebhookError::Validation(_)));

    let mut tampered = payload.clone();
    tampered.extend_from_slice(b" ");
    let forged = h
        .reconciler
        .handle_event(&tampered, Some(&sign(&payload)))
        .await
        .unwrap_err();
    assert!(matches!(forged, WebhookError::Authentication(_)));

    let stale = api_billing::services::signature::WebhookVerifier::new(SECRET, 300)
        .sign(&payload, Utc::now().timestamp() - 600)
        .unwrap();
    let expired = h
        .reconciler
        .handle_event(&payload, Some(&stale))
        .await
        .unwrap_err();
    assert!(matches!(expired, WebhookError::Authentication(_)));

    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap().plan, Plan::Free);
    assert_eq!(h.store.processed_events().unwrap(), 0);
}

#[tokio::test]
async fn rejects_signed_payload_that_is_not_an_event() {
    let h = harness();
    let payload = br#"{"hello":"world"}"#;

    let err = deliver(&h, payload).await.unwrap_err();
    assert!(matches!(err, WebhookError::Validation(_)));
}

#[tokio::test]
async fn starter_checkout_scenario() {
    let h = harness();
    h.provider.set_status("active");
    let payload = event(
        "evt_1",
        "checkout.session.completed",
        json!({
            "id": "cs_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "metadata": { "userId": "u1", "plan": "starter" }
        }),
    );

    deliver(&h, &payload).await.unwrap();
    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    assert_eq!(sub.plan, Plan::Starter);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(
        sub.stripe_current_period_end.map(|t| t.to_rfc3339()),
        Some("2023-11-14T22:13:20+00:00".to_string())
    );

    assert_eq!(
        deliver(&h, &payload).await.unwrap(),
        ReconcileOutcome::Skipped(SkipReason::Duplicate)
    );
    assert_eq!(h.store.subscription_for("u1").unwrap().unwrap(), sub);
    assert_eq!(
        h.mailer.sent(),
        vec![SentEmail::Welcome {
            to: "ada@example.com".into(),
            plan: "Starter".into()
        }]
    );
}

#[tokio::test]
async fn failure_while_past_due_keeps_status_and_appends_row() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::PastDue);

    deliver(&h, &invoice("evt_20", "invoice.payment_failed", 2))
        .await
        .unwrap();

    assert_eq!(
        h.store.subscription_for("u1").unwrap().unwrap().status,
        SubscriptionStatus::PastDue
    );
    let payments = h.store.payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
}

#[tokio::test]
async fn dunning_goes_to_the_customer_owner() {
    let h = harness();
    h.store
        .insert_user(db::models::user::User {
            id: "u2".into(),
            email: "grace@example.com".into(),
            name: None,
            created_at: Utc::now(),
        })
        .unwrap();
    let mut sub = db::models::subscription::Subscription::free("u2");
    sub.plan = Plan::Starter;
    sub.stripe_customer_id = Some("cus_1".into());
    h.store.insert_subscription(sub).unwrap();

    deliver(&h, &invoice("evt_21", "invoice.payment_failed", 3))
        .await
        .unwrap();

    let sub = h.store.subscription_for("u2").unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PastDue);
    let payments = h.store.payments().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].subscription_id, sub.id);
    assert_eq!(payments[0].amount, 4900);
    match &h.mailer.sent()[..] {
        [SentEmail::Dunning { to, notice }] => {
            assert_eq!(to, "grace@example.com");
            assert_eq!(notice.attempt, 3);
            assert!(mailer::templates::is_final_notice(notice.attempt));
        }
        other => panic!("unexpected emails: {other:?}"),
    }
}

#[tokio::test]
async fn checkout_for_unknown_user_is_acknowledged() {
    let h = harness();
    let payload = event(
        "evt_40",
        "checkout.session.completed",
        json!({
            "id": "cs_40",
            "customer": "cus_40",
            "subscription": "sub_40",
            "metadata": { "userId": "ghost", "plan": "pro" }
        }),
    );

    let outcome = deliver(&h, &payload).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Acknowledged(EventKind::CheckoutCompleted));
    assert!(h.store.subscription_for("ghost").unwrap().is_none());
    assert_eq!(h.store.processed_events().unwrap(), 1);
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn subscription_events_for_unknown_user_are_acknowledged() {
    let h = harness();
    let object = json!({
        "id": "sub_41",
        "customer": "cus_41",
        "status": "active",
        "items": { "data": [{ "price": { "id": "price_pro_m" } }] },
        "metadata": { "userId": "ghost" }
    });

    let updated = event("evt_41", "customer.subscription.updated", object.clone());
    assert_eq!(
        deliver(&h, &updated).await.unwrap(),
        ReconcileOutcome::Acknowledged(EventKind::SubscriptionUpdated)
    );
    let deleted = event("evt_42", "customer.subscription.deleted", object);
    assert_eq!(
        deliver(&h, &deleted).await.unwrap(),
        ReconcileOutcome::Acknowledged(EventKind::SubscriptionDeleted)
    );
    assert!(h.store.subscription_for("ghost").unwrap().is_none());
    assert_eq!(h.store.processed_events().unwrap(), 2);
}

#[tokio::test]
async fn concurrent_delivery_loses_the_claim_and_is_skipped() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);
    // both deliveries pass the pre-check; the claim at commit decides
    let racing = reconciler(
        Arc::new(RacingStore(h.store.clone())),
        h.provider.clone(),
        h.mailer.clone(),
    );
    let payload = invoice("evt_43", "invoice.payment_failed", 1);

    let first = racing
        .handle_event(&payload, Some(&sign(&payload)))
        .await
        .unwrap();
    let second = racing
        .handle_event(&payload, Some(&sign(&payload)))
        .await
        .unwrap();

    assert_eq!(first, ReconcileOutcome::Processed(EventKind::InvoicePaymentFailed));
    assert_eq!(second, ReconcileOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(h.store.payments().unwrap().len(), 1);
    assert_eq!(h.store.processed_events().unwrap(), 1);
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn payment_row_already_recorded_rejects_the_whole_commit() {
    let h = harness();
    make_paying(&h, SubscriptionStatus::Active);
    let sub = h.store.subscription_for("u1").unwrap().unwrap();
    let payment = PaymentCreateRequest {
        subscription_id: sub.id,
        stripe_event_id: "evt_44".into(),
        stripe_invoice_id: "in_44".into(),
        stripe_payment_intent_id: None,
        amount: 4900,
        currency: "usd".into(),
        status: PaymentStatus::Failed,
        paid_at: None,
        failure_reason: Some(FAILED_PAYMENT_REASON.into()),
    };

    let first = Reconciliation {
        subscription: None,
        payment: Some(payment.clone()),
    };
    assert_eq!(
        h.store
            .commit("evt_44", "invoice.payment_failed", &first)
            .await
            .unwrap(),
        CommitOutcome::Applied
    );

    // fresh claim, but the payment's event id is taken
    let second = Reconciliation {
        subscription: Some(SubscriptionUpdate {
            key: SubscriptionKey::Id(sub.id),
            patch: SubscriptionPatch {
                status: Some(SubscriptionStatus::Canceled),
                ..Default::default()
            },
            only_if_status: None,
        }),
        payment: Some(payment),
    };
    assert_eq!(
        h.store
            .commit("evt_45", "invoice.payment_failed", &second)
            .await
            .unwrap(),
        CommitOutcome::Duplicate
    );

    assert_eq!(h.store.payments().unwrap().len(), 1);
    assert_eq!(h.store.processed_events().unwrap(), 1);
    assert_eq!(
        h.store.subscription_for("u1").unwrap().unwrap().status,
        SubscriptionStatus::Active
    );
}
