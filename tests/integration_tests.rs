use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use serial_test::serial;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use settlebot::bot::gateway::{CallbackEvent, InboundUpdate, InlineAction, TelegramGateway};
use settlebot::bot::{PaymentCallbackHandler, PollOutcome, PollRunner};
use settlebot::database::models::{ConfirmationStatus, Member};
use settlebot::database::DatabaseOperations;
use settlebot::error::SettleBotError;

// Mock gateway recording every outbound call, in place of the Telegram API.
#[derive(Clone, Default)]
struct MockGateway {
    updates: Arc<Mutex<Vec<InboundUpdate>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    interactive: Arc<Mutex<Vec<(String, String, Vec<InlineAction>)>>>,
    edits: Arc<Mutex<Vec<(String, i64, String)>>>,
    answered: Arc<Mutex<Vec<String>>>,
    fail_interactive: Arc<Mutex<bool>>,
    next_message_id: Arc<Mutex<i64>>,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            next_message_id: Arc::new(Mutex::new(1000)),
            ..Self::default()
        }
    }

    async fn queue_update(&self, id: i64, callback: Option<CallbackEvent>) {
        self.updates
            .lock()
            .await
            .push(InboundUpdate { id, callback });
    }

    async fn set_fail_interactive(&self, fail: bool) {
        *self.fail_interactive.lock().await = fail;
    }

    async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    async fn interactive_messages(&self) -> Vec<(String, String, Vec<InlineAction>)> {
        self.interactive.lock().await.clone()
    }

    async fn edited_messages(&self) -> Vec<(String, i64, String)> {
        self.edits.lock().await.clone()
    }

    async fn answered_callbacks(&self) -> Vec<String> {
        self.answered.lock().await.clone()
    }
}

#[async_trait]
impl TelegramGateway for MockGateway {
    async fn fetch_updates(&self, after_id: i64, _timeout_secs: u32) -> Vec<InboundUpdate> {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|u| u.id > after_id)
            .cloned()
            .collect()
    }

    async fn send_text(&self, telegram_id: &str, text: &str) -> bool {
        self.sent
            .lock()
            .await
            .push((telegram_id.to_string(), text.to_string()));
        true
    }

    async fn send_interactive(
        &self,
        telegram_id: &str,
        text: &str,
        actions: &[InlineAction],
    ) -> Option<i64> {
        if *self.fail_interactive.lock().await {
            return None;
        }
        self.interactive.lock().await.push((
            telegram_id.to_string(),
            text.to_string(),
            actions.to_vec(),
        ));
        let mut next = self.next_message_id.lock().await;
        *next += 1;
        Some(*next)
    }

    async fn edit_message(&self, telegram_id: &str, message_id: i64, text: &str) -> bool {
        self.edits
            .lock()
            .await
            .push((telegram_id.to_string(), message_id, text.to_string()));
        true
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        _text: Option<&str>,
        _emphasize: bool,
    ) -> bool {
        self.answered.lock().await.push(callback_id.to_string());
        true
    }
}

async fn setup_db() -> (DatabaseOperations, NamedTempFile) {
    let file = NamedTempFile::new().expect("temp db file");
    let db = DatabaseOperations::new(file.path().to_str().unwrap())
        .await
        .expect("open database");
    (db, file)
}

/// Alice owes Bob 50.00 for one expense Bob paid.
async fn setup_members(db: &DatabaseOperations) -> (Member, Member) {
    let alice = db
        .create_member("Alice", "111111", None, None)
        .await
        .unwrap();
    let bob = db
        .create_member("Bob", "222222", Some("ACME Bank"), Some("123456789"))
        .await
        .unwrap();
    db.create_expense(
        "Test Expense",
        bob.id.unwrap(),
        &[(alice.id.unwrap(), dec!(50.00))],
    )
    .await
    .unwrap();
    (alice, bob)
}

fn make_handler(gateway: &MockGateway, db: &DatabaseOperations) -> PaymentCallbackHandler {
    PaymentCallbackHandler::new(Arc::new(gateway.clone()), db.clone())
}

fn event(data: &str, actor_telegram_id: &str) -> CallbackEvent {
    CallbackEvent {
        callback_id: "cb123".to_string(),
        data: data.to_string(),
        actor_telegram_id: actor_telegram_id.to_string(),
        origin_chat_id: actor_telegram_id.to_string(),
    }
}

#[tokio::test]
async fn test_initiate_creates_pending_confirmation() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Pending);
    assert_eq!(confirmation.total_amount, dec!(50.00));
    assert_eq!(confirmation.initiated_by_id, alice.id.unwrap());
    assert_eq!(confirmation.record_ids, vec![1]);
    assert!(confirmation.confirmation_message_id.is_some());

    // Interactive request went to the counterparty (Bob) with both actions.
    let interactive = gateway.interactive_messages().await;
    assert_eq!(interactive.len(), 1);
    let (target, text, actions) = &interactive[0];
    assert_eq!(target, "222222");
    assert!(text.contains("50.00"));
    assert!(text.contains("Test Expense"));
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].data, "confirm_payment:1");
    assert_eq!(actions[1].data, "reject_payment:1");

    // Initiator got a success notice.
    let sent = gateway.sent_messages().await;
    assert!(sent
        .iter()
        .any(|(to, text)| to == "111111" && text.contains("Bob")));
}

#[tokio::test]
async fn test_initiate_by_stranger_is_unauthorized_and_creates_nothing() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    let result = handler
        .initiate("999999", alice.id.unwrap(), bob.id.unwrap())
        .await;
    assert!(matches!(result, Err(SettleBotError::Unauthorized { .. })));

    // No confirmation row was created.
    assert!(matches!(
        db.confirmation_by_id(1).await,
        Err(SettleBotError::ConfirmationNotFound { .. })
    ));
    assert!(gateway.interactive_messages().await.is_empty());
}

#[tokio::test]
async fn test_initiate_with_no_debt_fails() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    // Reversed pair: Bob owes Alice nothing.
    let result = handler
        .initiate("222222", bob.id.unwrap(), alice.id.unwrap())
        .await;
    assert!(matches!(result, Err(SettleBotError::NothingToSettle { .. })));
}

#[tokio::test]
async fn test_second_initiate_fails_with_duplicate_pending() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    let second = handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await;
    assert!(matches!(second, Err(SettleBotError::DuplicatePending { .. })));

    // Only one row exists in storage.
    assert!(db.confirmation_by_id(1).await.is_ok());
    assert!(matches!(
        db.confirmation_by_id(2).await,
        Err(SettleBotError::ConfirmationNotFound { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_initiations_create_exactly_one_pending() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let debtor_id = alice.id.unwrap();
    let lender_id = bob.id.unwrap();

    let first = db.create_confirmation(debtor_id, lender_id, debtor_id, dec!(50.00), &[1]);
    let second = db.create_confirmation(debtor_id, lender_id, lender_id, dec!(50.00), &[1]);
    let (a, b) = tokio::join!(first, second);

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let duplicate = [a, b].into_iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        duplicate,
        Err(SettleBotError::DuplicatePending { .. })
    ));
}

#[tokio::test]
async fn test_confirm_settles_debt_and_notifies_both_parties() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    // Bob (counterparty) presses "Received".
    let handled = handler.handle_callback(&event("confirm_payment:1", "222222")).await;
    assert!(handled);

    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);
    assert!(confirmation.confirmed_at.is_some());

    // Every linked record is paid; nothing remains between the pair.
    let remaining = db
        .unpaid_total(alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining, dec!(0));

    // The interactive message was edited into its terminal form.
    let edits = gateway.edited_messages().await;
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "222222");
    assert!(edits[0].2.contains("CONFIRMED"));

    // Both parties were notified; Alice's notice reports a zero balance.
    let sent = gateway.sent_messages().await;
    assert!(sent
        .iter()
        .any(|(to, text)| to == "111111" && text.contains("all settled up")));
    assert!(sent
        .iter()
        .any(|(to, text)| to == "222222" && text.contains("Received from Alice")));
}

#[tokio::test]
async fn test_confirm_by_initiator_is_unauthorized() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    // Alice initiated, so Alice cannot confirm her own claim.
    let result = handler.confirm("111111", 1).await;
    assert!(matches!(result, Err(SettleBotError::Unauthorized { .. })));

    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Pending);
    let remaining = db
        .unpaid_total(alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining, dec!(50.00));
}

#[tokio::test]
async fn test_confirm_twice_fails_with_already_processed() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    handler.confirm("222222", 1).await.unwrap();

    let second = handler.confirm("222222", 1).await;
    assert!(matches!(
        second,
        Err(SettleBotError::AlreadyProcessed {
            status: ConfirmationStatus::Confirmed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_reject_never_touches_the_ledger() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    let handled = handler.handle_callback(&event("reject_payment:1", "222222")).await;
    assert!(handled);

    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Rejected);

    // Paid flags untouched.
    let remaining = db
        .unpaid_total(alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining, dec!(50.00));

    // Terminal edit on Bob's message plus a rejection notice to Alice.
    let edits = gateway.edited_messages().await;
    assert_eq!(edits.len(), 1);
    assert!(edits[0].2.contains("REJECTED"));
    let sent = gateway.sent_messages().await;
    assert!(sent
        .iter()
        .any(|(to, text)| to == "111111" && text.contains("not received")));
}

#[tokio::test]
async fn test_reject_after_terminal_state_is_silent() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    handler.confirm("222222", 1).await.unwrap();

    let result = handler.reject("222222", 1).await;
    assert!(result.is_ok());
    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);
}

#[tokio::test]
async fn test_snapshot_semantics_exclude_later_expenses() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    // A new expense lands between initiation and confirmation; it is not
    // part of the snapshot and must stay unpaid.
    db.create_expense(
        "Late Expense",
        bob.id.unwrap(),
        &[(alice.id.unwrap(), dec!(20.00))],
    )
    .await
    .unwrap();

    handler.confirm("222222", 1).await.unwrap();

    let remaining = db
        .unpaid_total(alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining, dec!(20.00));

    // Alice's notice reports the freshly recomputed remainder.
    let sent = gateway.sent_messages().await;
    assert!(sent
        .iter()
        .any(|(to, text)| to == "111111" && text.contains("still owe Bob") && text.contains("20.00")));
}

#[tokio::test]
async fn test_initiate_survives_send_failure_with_null_handle() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    gateway.set_fail_interactive(true).await;
    let handler = make_handler(&gateway, &db);

    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    // Record creation is not rolled back by the failed send.
    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Pending);
    assert!(confirmation.confirmation_message_id.is_none());
}

#[tokio::test]
async fn test_dispatch_answers_callback_before_anything_else() {
    let (db, _file) = setup_db().await;
    setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    let handled = handler.handle_callback(&event("unknown_action:123", "111111")).await;
    assert!(!handled);
    assert_eq!(gateway.answered_callbacks().await, vec!["cb123".to_string()]);
}

#[tokio::test]
async fn test_cursor_defaults_to_zero_and_never_regresses() {
    let (db, _file) = setup_db().await;

    assert_eq!(db.cursor().await.unwrap(), 0);

    db.advance_cursor(100).await.unwrap();
    assert_eq!(db.cursor().await.unwrap(), 100);

    // A stale writer cannot move the cursor backwards.
    db.advance_cursor(50).await.unwrap();
    assert_eq!(db.cursor().await.unwrap(), 100);

    db.advance_cursor(200).await.unwrap();
    assert_eq!(db.cursor().await.unwrap(), 200);
}

#[tokio::test]
#[serial]
async fn test_poller_consumes_each_event_once_despite_failures() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);
    handler
        .initiate("111111", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    // id 100: dispatch fails (no such confirmation); id 101: irrelevant
    // update; id 102: Bob's valid confirm.
    gateway
        .queue_update(100, Some(event("confirm_payment:999", "222222")))
        .await;
    gateway.queue_update(101, None).await;
    gateway
        .queue_update(102, Some(event("confirm_payment:1", "222222")))
        .await;

    let lock_file = NamedTempFile::new().unwrap();
    let runner = PollRunner::new(
        Arc::new(gateway.clone()),
        make_handler(&gateway, &db),
        db.clone(),
        lock_file.path(),
    );

    let outcome = runner.run_once(0).await.unwrap();
    let summary = match outcome {
        PollOutcome::Ran(summary) => summary,
        PollOutcome::AlreadyRunning => panic!("runner should have acquired the lock"),
    };

    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.errors, 1);

    // Cursor sits past the whole batch, failed event included.
    assert_eq!(db.cursor().await.unwrap(), 102);

    // The valid event was dispatched exactly once.
    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Confirmed);

    // A second run sees nothing new: no event is reprocessed.
    let outcome = runner.run_once(0).await.unwrap();
    match outcome {
        PollOutcome::Ran(summary) => assert_eq!(summary.total, 0),
        PollOutcome::AlreadyRunning => panic!("runner should have acquired the lock"),
    }
}

#[tokio::test]
#[serial]
async fn test_second_poller_instance_exits_immediately() {
    let (db, _file) = setup_db().await;
    let gateway = MockGateway::new();
    let lock_file = NamedTempFile::new().unwrap();

    // Simulate a concurrent invocation holding the lock.
    let held = std::fs::OpenOptions::new()
        .write(true)
        .open(lock_file.path())
        .unwrap();
    held.try_lock().unwrap();

    gateway.queue_update(1, None).await;
    let runner = PollRunner::new(
        Arc::new(gateway.clone()),
        make_handler(&gateway, &db),
        db.clone(),
        lock_file.path(),
    );

    let outcome = runner.run_once(0).await.unwrap();
    assert!(matches!(outcome, PollOutcome::AlreadyRunning));

    // Nothing was fetched or processed; the cursor did not move.
    assert_eq!(db.cursor().await.unwrap(), 0);

    held.unlock().unwrap();
}

#[tokio::test]
async fn test_debt_reminder_lists_shares_and_offers_initiate_buttons() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let carol = db
        .create_member("Carol", "333333", None, None)
        .await
        .unwrap();
    db.create_expense(
        "Taxi",
        carol.id.unwrap(),
        &[(alice.id.unwrap(), dec!(12.50))],
    )
    .await
    .unwrap();

    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    let delivered = handler.send_debt_reminder(alice.id.unwrap()).await.unwrap();
    assert!(delivered);

    let interactive = gateway.interactive_messages().await;
    assert_eq!(interactive.len(), 1);
    let (target, text, actions) = &interactive[0];
    assert_eq!(target, "111111");
    assert!(text.contains("Test Expense"));
    assert!(text.contains("Taxi"));
    assert!(text.contains("62.50"));

    // One initiate button per lender.
    assert_eq!(actions.len(), 2);
    let expected_bob = format!("initiate_payment:{}:{}", alice.id.unwrap(), bob.id.unwrap());
    let expected_carol = format!(
        "initiate_payment:{}:{}",
        alice.id.unwrap(),
        carol.id.unwrap()
    );
    assert!(actions.iter().any(|a| a.data == expected_bob));
    assert!(actions.iter().any(|a| a.data == expected_carol));

    // A member with nothing unpaid gets no reminder.
    let delivered = handler.send_debt_reminder(bob.id.unwrap()).await.unwrap();
    assert!(!delivered);
}

#[tokio::test]
async fn test_full_round_trip_initiated_by_lender() {
    let (db, _file) = setup_db().await;
    let (alice, bob) = setup_members(&db).await;
    let gateway = MockGateway::new();
    let handler = make_handler(&gateway, &db);

    // Bob (the lender) initiates; Alice is the counterparty who confirms.
    handler
        .initiate("222222", alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();

    let confirmation = db.confirmation_by_id(1).await.unwrap();
    assert_eq!(confirmation.initiated_by_id, bob.id.unwrap());
    assert_eq!(confirmation.counterparty_id(), alice.id.unwrap());

    // The interactive request went to Alice this time.
    let interactive = gateway.interactive_messages().await;
    assert_eq!(interactive[0].0, "111111");

    handler.confirm("111111", 1).await.unwrap();
    let remaining = db
        .unpaid_total(alice.id.unwrap(), bob.id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining, dec!(0));
}
