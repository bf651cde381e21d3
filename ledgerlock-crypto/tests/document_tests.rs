use ledgerlock_crypto::{
    decrypt_document, decrypt_document_strict, derive_key, encrypt_document,
    has_fully_encrypted_fields, is_encrypted_value, EntityKind, KdfParams, Record, Salt,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn test_key(passphrase: &str) -> ledgerlock_crypto::DerivedKey {
    let salt = Salt::from_bytes([7u8; 16]);
    derive_key(passphrase, &salt, &KdfParams::fast_insecure()).unwrap()
}

#[test]
fn expense_roundtrip_preserves_values_exactly() {
    let key = test_key("correct-horse-battery");
    let expense = record(json!({
        "amount": 42.50,
        "description": "Coffee",
        "date": "2024-06-01",
        "categoryId": "cat-3",
    }));

    let sealed = encrypt_document(&expense, EntityKind::Expense, &key).unwrap();
    assert!(is_encrypted_value(&sealed["amount"]));
    assert!(is_encrypted_value(&sealed["description"]));
    // Unmapped fields pass through untouched
    assert_eq!(sealed["date"], json!("2024-06-01"));
    assert_eq!(sealed["categoryId"], json!("cat-3"));

    let opened = decrypt_document(&sealed, EntityKind::Expense, &key);
    assert_eq!(opened, expense);
}

#[test]
fn wrong_key_leaves_ciphertext_in_place() {
    let key = test_key("correct-horse-battery");
    let wrong = test_key("wrong-pass-here");
    let expense = record(json!({"amount": 42.50, "description": "Coffee"}));

    let sealed = encrypt_document(&expense, EntityKind::Expense, &key).unwrap();
    let opened = decrypt_document(&sealed, EntityKind::Expense, &wrong);

    // Tolerant decryption keeps both fields as ciphertext rather than
    // nulling them or returning garbage
    assert_eq!(opened["amount"], sealed["amount"]);
    assert_eq!(opened["description"], sealed["description"]);
    assert!(is_encrypted_value(&opened["amount"]));
}

#[test]
fn strict_decryption_fails_on_wrong_key() {
    let key = test_key("correct-horse-battery");
    let wrong = test_key("wrong-pass-here");
    let sealed = encrypt_document(
        &record(json!({"amount": 10, "description": "Lunch"})),
        EntityKind::Expense,
        &key,
    )
    .unwrap();

    assert!(decrypt_document_strict(&sealed, EntityKind::Expense, &wrong).is_err());
    assert!(decrypt_document_strict(&sealed, EntityKind::Expense, &key).is_ok());
}

#[test]
fn encryption_is_idempotent() {
    let key = test_key("correct-horse-battery");
    let income = record(json!({"amount": 1200, "description": "Salary", "source": "employer"}));

    let once = encrypt_document(&income, EntityKind::Income, &key).unwrap();
    let twice = encrypt_document(&once, EntityKind::Income, &key).unwrap();

    // Second pass is a no-op: already-sealed fields are detected and
    // skipped, not double-encrypted
    assert_eq!(once, twice);
}

#[test]
fn integer_amounts_come_back_as_integers() {
    let key = test_key("correct-horse-battery");
    let budget = record(json!({"amount": 500, "month": "2024-06"}));

    let sealed = encrypt_document(&budget, EntityKind::Budget, &key).unwrap();
    let opened = decrypt_document(&sealed, EntityKind::Budget, &key);
    assert_eq!(opened["amount"], json!(500));
}

#[test]
fn missing_fields_stay_missing() {
    let key = test_key("correct-horse-battery");
    let repayment = record(json!({"amount": 75.0, "loanId": "l1"}));

    let sealed = encrypt_document(&repayment, EntityKind::Repayment, &key).unwrap();
    assert!(!sealed.contains_key("notes"));
    // A record with a mapped field absent is not "fully encrypted"
    assert!(!has_fully_encrypted_fields(&sealed, EntityKind::Repayment));
}

#[test]
fn loan_fields_roundtrip() {
    let key = test_key("correct-horse-battery");
    let loan = record(json!({
        "lender": "Credit Union",
        "initialAmount": 15000,
        "amountRemaining": 9421.37,
        "interestRate": 4.25,
        "startDate": "2023-01-15",
    }));

    let sealed = encrypt_document(&loan, EntityKind::Loan, &key).unwrap();
    assert!(has_fully_encrypted_fields(&sealed, EntityKind::Loan));
    assert!(is_encrypted_value(&sealed["lender"]));

    let opened = decrypt_document(&sealed, EntityKind::Loan, &key);
    assert_eq!(opened, loan);
}

#[test]
fn split_amounts_are_sealed_per_entry() {
    let key = test_key("correct-horse-battery");
    let shared = record(json!({
        "amount": 90.0,
        "description": "Dinner",
        "splits": [
            {"payerId": "u2", "amount": 30.0},
            {"payerId": "u3", "amount": 60.0},
        ],
    }));

    let sealed = encrypt_document(&shared, EntityKind::SharedExpense, &key).unwrap();
    let splits = sealed["splits"].as_array().unwrap();
    // List structure survives; only each amount is ciphertext
    assert_eq!(splits.len(), 2);
    assert_eq!(splits[0]["payerId"], json!("u2"));
    assert!(is_encrypted_value(&splits[0]["amount"]));
    assert!(is_encrypted_value(&splits[1]["amount"]));
    assert!(has_fully_encrypted_fields(&sealed, EntityKind::SharedExpense));

    let opened = decrypt_document(&sealed, EntityKind::SharedExpense, &key);
    assert_eq!(opened, shared);
}

#[test]
fn mixed_record_decrypts_only_sealed_fields() {
    let key = test_key("correct-horse-battery");
    // Mid-migration shape: amount sealed, description still plaintext
    let sealed_amount = ledgerlock_crypto::encrypt_value("19.99", &key).unwrap();
    let mixed = record(json!({"amount": sealed_amount, "description": "Book"}));

    let opened = decrypt_document(&mixed, EntityKind::Expense, &key);
    assert_eq!(opened["amount"], json!(19.99));
    assert_eq!(opened["description"], json!("Book"));
}

#[test]
fn opaque_kinds_pass_through() {
    let key = test_key("correct-horse-battery");
    let user = record(json!({"email": "a@b.c", "isEncrypted": true}));

    let sealed = encrypt_document(&user, EntityKind::User, &key).unwrap();
    assert_eq!(sealed, user);
    assert_eq!(decrypt_document(&user, EntityKind::User, &key), user);
}

#[test]
fn non_numeric_decrypted_output_stays_string() {
    let key = test_key("correct-horse-battery");
    let debt = record(json!({
        "amount": "to be agreed",
        "description": "IOU",
        "fromUserName": "Ana",
        "toUserName": "Sam",
    }));

    let sealed = encrypt_document(&debt, EntityKind::Debt, &key).unwrap();
    let opened = decrypt_document(&sealed, EntityKind::Debt, &key);
    assert_eq!(opened["amount"], json!("to be agreed"));
}
