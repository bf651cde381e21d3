#![allow(dead_code)]

use ledgerlock_crypto::{KdfParams, Record};
use ledgerlock_session::{EncryptionManager, MemorySaltCache};
use ledgerlock_storage::{MemoryStore, RecordStore, RecordUpdate};
use serde_json::{json, Value};
use std::sync::Arc;

pub const PASSPHRASE: &str = "correct-horse-battery";
pub const NEW_PASSPHRASE: &str = "staple-gun-sunrise-9";

pub fn record(v: Value) -> Record {
    v.as_object().cloned().unwrap()
}

pub fn manager(store: Arc<MemoryStore>) -> EncryptionManager {
    EncryptionManager::new(store, Arc::new(MemorySaltCache::new()), "u1")
        .with_kdf_params(KdfParams::fast_insecure())
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub mgr: EncryptionManager,
    pub codes: Vec<String>,
    /// Every seeded (path, plaintext record) pair.
    pub originals: Vec<(String, Record)>,
    /// Path of one known expense, for targeted assertions.
    pub expense_path: String,
}

impl Fixture {
    pub fn total_records(&self) -> u64 {
        self.originals.len() as u64
    }
}

/// Enables encryption for user `u1` and seeds a realistic plaintext
/// dataset: every collection the engines walk, including a repayments
/// subcollection under a loan. All mapped fields are present so a clean
/// migration fully encrypts every record.
pub async fn enabled_user_with_plaintext() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager(store.clone());
    let codes = mgr.enable(PASSPHRASE).await.unwrap();

    let loan_id = uuid::Uuid::new_v4().to_string();
    let expense_path = format!("users/u1/expenses/{}", uuid::Uuid::new_v4());

    let mut originals: Vec<(String, Record)> = vec![
        (
            format!("users/u1/incomes/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 1200, "description": "Salary", "date": "2024-06-01"})),
        ),
        (
            format!("users/u1/incomes/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 85.25, "description": "Refund", "date": "2024-06-03"})),
        ),
        (
            expense_path.clone(),
            record(json!({"amount": 42.50, "description": "Coffee", "date": "2024-06-02"})),
        ),
        (
            format!("users/u1/expenses/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 310, "description": "Rent share", "date": "2024-06-05"})),
        ),
        (
            format!("users/u1/expenses/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 9.99, "description": "Streaming", "date": "2024-06-07"})),
        ),
        (
            format!("users/u1/budgets/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 600, "month": "2024-06"})),
        ),
        (
            format!("users/u1/loans/{loan_id}"),
            record(json!({
                "lender": "Credit Union",
                "initialAmount": 15000,
                "amountRemaining": 9421.37,
                "interestRate": 4.25,
            })),
        ),
        (
            format!("users/u1/loans/{loan_id}/repayments/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 250, "notes": "June payment", "loanId": loan_id})),
        ),
        (
            format!("users/u1/loans/{loan_id}/repayments/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 250, "notes": "July payment", "loanId": loan_id})),
        ),
        (
            format!("users/u1/recurringTransactions/{}", uuid::Uuid::new_v4()),
            record(json!({"amount": 15.0, "description": "Gym", "frequency": "monthly"})),
        ),
        (
            format!("users/u1/sharedExpenses/{}", uuid::Uuid::new_v4()),
            record(json!({
                "amount": 90.0,
                "description": "Dinner",
                "splits": [
                    {"payerId": "u2", "amount": 30.0},
                    {"payerId": "u3", "amount": 60.0},
                ],
            })),
        ),
        (
            format!("users/u1/debts/{}", uuid::Uuid::new_v4()),
            record(json!({
                "amount": 120.0,
                "description": "Concert tickets",
                "fromUserName": "Ana",
                "toUserName": "Sam",
            })),
        ),
    ];
    originals.sort_by(|a, b| a.0.cmp(&b.0));

    let updates = originals
        .iter()
        .map(|(path, fields)| RecordUpdate::new(path.clone(), fields.clone()))
        .collect();
    store.batch_write(updates).await.unwrap();

    Fixture {
        store,
        mgr,
        codes,
        originals,
        expense_path,
    }
}

/// Flips one character of the ciphertext segment while keeping the
/// sealed shape intact — the detector still says "encrypted" but the
/// authentication tag can never verify.
pub fn corrupt_ciphertext(value: &str) -> String {
    let (iv, ct) = value.split_once(':').expect("sealed value");
    let mut chars: Vec<char> = ct.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    format!("{iv}:{}", chars.into_iter().collect::<String>())
}
