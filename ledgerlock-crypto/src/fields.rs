//! Per-entity field maps: which fields of each record type are sealed.
//!
//! Field names are the storage provider's camelCase names — records pass
//! through this crate in their persisted shape, not as typed structs.

use serde_json::{Map, Value};

/// A stored record in its wire shape.
pub type Record = Map<String, Value>;

/// The record types this subsystem understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Income,
    Expense,
    Budget,
    Loan,
    Repayment,
    Debt,
    RecurringTransaction,
    SharedExpense,
    User,
}

impl EntityKind {
    /// Fields that must be encrypted for this kind, in map order.
    ///
    /// Kinds with an empty map are opaque to the encryption subsystem.
    pub fn encrypted_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Income => &["amount", "description"],
            EntityKind::Expense => &["amount", "description"],
            EntityKind::Budget => &["amount"],
            EntityKind::Loan => &["initialAmount", "amountRemaining", "interestRate", "lender"],
            EntityKind::Repayment => &["amount", "notes"],
            EntityKind::Debt => &["amount", "description", "fromUserName", "toUserName"],
            EntityKind::RecurringTransaction => &["amount", "description"],
            EntityKind::SharedExpense => &["amount", "description", "splits"],
            EntityKind::User => &[],
        }
    }

    /// Whether `field` holds a number that must be parsed back after
    /// decryption (amounts are stored as numbers when plaintext).
    pub fn is_numeric_field(field: &str) -> bool {
        matches!(
            field,
            "amount" | "initialAmount" | "amountRemaining" | "interestRate"
        )
    }

    /// Detects the record kind from its collection or document path.
    ///
    /// Paths look like `users/{uid}/expenses` or
    /// `users/{uid}/loans/{loanId}/repayments/{id}`. More specific
    /// segments are checked first so nested collections resolve to the
    /// child kind.
    pub fn from_path(path: &str) -> Option<EntityKind> {
        let normalized = path.trim().trim_matches('/');

        let has_segment = |name: &str| {
            normalized == name || normalized.contains(format!("/{name}").as_str())
        };

        if has_segment("incomes") {
            return Some(EntityKind::Income);
        }
        if has_segment("expenses") {
            return Some(EntityKind::Expense);
        }
        if has_segment("repayments") {
            return Some(EntityKind::Repayment);
        }
        if has_segment("loans") {
            return Some(EntityKind::Loan);
        }
        if has_segment("budgets") {
            return Some(EntityKind::Budget);
        }
        if has_segment("recurringTransactions") {
            return Some(EntityKind::RecurringTransaction);
        }
        if has_segment("sharedExpenses") {
            return Some(EntityKind::SharedExpense);
        }
        if has_segment("debts") {
            return Some(EntityKind::Debt);
        }

        // The user root record: exactly "users/{uid}"
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() == 2 && segments[0] == "users" {
            return Some(EntityKind::User);
        }

        None
    }

    /// Structural fallback for legacy records whose path is unavailable.
    pub fn from_record(record: &Record) -> Option<EntityKind> {
        if record.contains_key("type")
            && (record.contains_key("amount") || record.contains_key("description"))
        {
            match record.get("type").and_then(Value::as_str) {
                Some("income") => return Some(EntityKind::Income),
                Some("expense") => return Some(EntityKind::Expense),
                _ => {}
            }
        }
        if record.contains_key("month") && record.contains_key("amount") {
            return Some(EntityKind::Budget);
        }
        if record.contains_key("lender") && record.contains_key("initialAmount") {
            return Some(EntityKind::Loan);
        }
        if record.contains_key("loanId") && record.contains_key("amount") {
            return Some(EntityKind::Repayment);
        }
        if record.contains_key("fromUserId") && record.contains_key("toUserId") {
            return Some(EntityKind::Debt);
        }
        if record.contains_key("frequency") && record.contains_key("nextDueDate") {
            return Some(EntityKind::RecurringTransaction);
        }
        if record.contains_key("groupId") && record.contains_key("splits") {
            return Some(EntityKind::SharedExpense);
        }
        if record.contains_key("email") && record.contains_key("isEncrypted") {
            return Some(EntityKind::User);
        }
        None
    }
}

/// Collection paths holding a user's encryptable records.
///
/// Loan repayments live in per-loan subcollections and are discovered by
/// listing `loans` first; they are not included here.
pub fn user_collection_paths(user_id: &str) -> Vec<String> {
    [
        "incomes",
        "expenses",
        "budgets",
        "loans",
        "recurringTransactions",
        "sharedExpenses",
        "debts",
    ]
    .iter()
    .map(|c| format!("users/{user_id}/{c}"))
    .collect()
}

/// Path of the repayments subcollection nested under one loan.
pub fn repayments_path(user_id: &str, loan_id: &str) -> String {
    format!("users/{user_id}/loans/{loan_id}/repayments")
}

/// Path of the user's root record, where encryption metadata lives.
pub fn user_root_path(user_id: &str) -> String {
    format!("users/{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_detection() {
        assert_eq!(
            EntityKind::from_path("users/u1/expenses"),
            Some(EntityKind::Expense)
        );
        assert_eq!(
            EntityKind::from_path("users/u1/loans/l1/repayments/r1"),
            Some(EntityKind::Repayment)
        );
        assert_eq!(
            EntityKind::from_path("users/u1/loans/l1"),
            Some(EntityKind::Loan)
        );
        assert_eq!(EntityKind::from_path("users/u1"), Some(EntityKind::User));
        assert_eq!(EntityKind::from_path("somewhere/else"), None);
    }

    #[test]
    fn nested_repayments_win_over_parent_loans() {
        assert_eq!(
            EntityKind::from_path("users/u1/loans/l1/repayments"),
            Some(EntityKind::Repayment)
        );
    }

    #[test]
    fn record_fallback_detection() {
        let loan = json!({"lender": "bank", "initialAmount": 1000})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(EntityKind::from_record(&loan), Some(EntityKind::Loan));

        let unknown = json!({"foo": 1}).as_object().cloned().unwrap();
        assert_eq!(EntityKind::from_record(&unknown), None);
    }

    #[test]
    fn user_kind_is_opaque() {
        assert!(EntityKind::User.encrypted_fields().is_empty());
    }
}
