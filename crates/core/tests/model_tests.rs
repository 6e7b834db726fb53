// ═══════════════════════════════════════════════════════════════════
// Model Tests — accounts, ledger categories, marks, settings, book
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use networth_core::models::account::Account;
use networth_core::models::account_mark::{AccountMark, MarkWrite};
use networth_core::models::book::Book;
use networth_core::models::fund_flow::{AccountUnits, FundFlowEvent, FundFlowRequest};
use networth_core::models::ledger::{
    LedgerCategory, CATEGORY_DEPOSIT, CATEGORY_OPENING_BALANCE, CATEGORY_WITHDRAWAL,
};
use networth_core::models::mark::{Mark, RecomputeReport};
use networth_core::models::settings::Settings;
use networth_core::models::unit_ledger::UnitLedgerEntry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Account
// ═══════════════════════════════════════════════════════════════════

mod account {
    use super::*;

    #[test]
    fn new_account_is_active_from_genesis() {
        let acc = Account::new("Checking", d(2017, 1, 1));
        assert_eq!(acc.name, "Checking");
        assert!(acc.is_active());
        assert!(!acc.is_active_on(d(2016, 12, 31)));
        assert!(acc.is_active_on(d(2017, 1, 1)));
        assert!(acc.is_active_on(d(2099, 1, 1)));
    }

    #[test]
    fn deactivation_date_is_exclusive() {
        let mut acc = Account::new("Loan", d(2017, 1, 1));
        acc.deactivated_on = Some(d(2018, 1, 1));
        assert!(!acc.is_active());
        assert!(acc.is_active_on(d(2017, 12, 31)));
        assert!(!acc.is_active_on(d(2018, 1, 1)));
    }

    #[test]
    fn ids_are_unique() {
        let a = Account::new("A", d(2017, 1, 1));
        let b = Account::new("A", d(2017, 1, 1));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serde_tolerates_missing_deactivation() {
        let acc = Account::new("A", d(2017, 1, 1));
        let mut json: serde_json::Value = serde_json::to_value(&acc).unwrap();
        json.as_object_mut().unwrap().remove("deactivated_on");
        let back: Account = serde_json::from_value(json).unwrap();
        assert_eq!(back, acc);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Ledger categories
// ═══════════════════════════════════════════════════════════════════

mod ledger_category {
    use super::*;

    #[test]
    fn built_in_categories() {
        let all = LedgerCategory::all();
        let ids: Vec<u32> = all.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(
            LedgerCategory::by_id(CATEGORY_OPENING_BALANCE).unwrap().label,
            "Opening Balance"
        );
        assert!(LedgerCategory::by_id(0).is_none());
    }

    #[test]
    fn for_amount_follows_sign() {
        assert_eq!(LedgerCategory::for_amount(dec!(10)), CATEGORY_DEPOSIT);
        assert_eq!(LedgerCategory::for_amount(dec!(-10)), CATEGORY_WITHDRAWAL);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Fund flows, marks
// ═══════════════════════════════════════════════════════════════════

mod flows_and_marks {
    use super::*;

    #[test]
    fn fund_flow_direction() {
        let acc = Account::new("A", d(2017, 1, 1));
        let deposit = FundFlowEvent::new(acc.id, d(2017, 2, 1), dec!(500), "salary");
        let withdrawal = FundFlowEvent::new(acc.id, d(2017, 2, 1), dec!(-50), String::new());
        assert!(deposit.is_deposit());
        assert!(!withdrawal.is_deposit());
        assert_eq!(deposit.note, "salary");
        assert_ne!(deposit.id, withdrawal.id);
    }

    #[test]
    fn fund_flow_request_category() {
        let acc = Account::new("A", d(2017, 1, 1));
        let request = FundFlowRequest::new(acc.id, d(2017, 1, 1), dec!(100), "opening");
        assert_eq!(request.category_id, None);
        let opening = request.with_category(CATEGORY_OPENING_BALANCE);
        assert_eq!(opening.category_id, Some(CATEGORY_OPENING_BALANCE));
        assert_eq!(opening.note, "opening");
    }

    #[test]
    fn mark_write_changed() {
        assert!(MarkWrite::Inserted.changed());
        assert!(MarkWrite::Updated {
            previous: dec!(1)
        }
        .changed());
        assert!(!MarkWrite::Unchanged.changed());
    }

    #[test]
    fn empty_recompute_report() {
        let report = RecomputeReport::empty(d(2020, 1, 1));
        assert_eq!(report.from, d(2020, 1, 1));
        assert_eq!(report.marks_written, 0);
    }

    #[test]
    fn mark_serde_keeps_decimal_scale() {
        let mark = Mark {
            date: d(2017, 3, 1),
            total_net_worth: dec!(1650.00),
            total_units: dec!(1500.00),
            price_per_unit: dec!(1.10),
        };
        let json = serde_json::to_string(&mark).unwrap();
        assert!(json.contains("\"1650.00\""));
        let back: Mark = serde_json::from_str(&json).unwrap();
        assert_eq!(back.price_per_unit.to_string(), "1.10");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════

mod settings {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.bootstrap_price_per_unit, Decimal::ONE);
        assert_eq!(s.max_conflict_retries, 3);
        assert_eq!(s.retry_backoff_ms, 10);
        assert_eq!(s.identity_epsilon, dec!(0.000001));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let s = Settings::from_json(r#"{"bootstrap_price_per_unit": "100"}"#).unwrap();
        assert_eq!(s.bootstrap_price_per_unit, dec!(100));
        assert_eq!(s.max_conflict_retries, 3);
    }

    #[test]
    fn from_json_validates() {
        assert!(Settings::from_json(r#"{"bootstrap_price_per_unit": "0"}"#).is_err());
        assert!(Settings::from_json(r#"{"identity_epsilon": "-1"}"#).is_err());
        assert!(Settings::from_json("not json").is_err());
    }

    #[test]
    fn backoff_doubles() {
        let s = Settings {
            retry_backoff_ms: 10,
            ..Settings::default()
        };
        assert_eq!(s.backoff_for(1), Duration::from_millis(10));
        assert_eq!(s.backoff_for(2), Duration::from_millis(20));
        assert_eq!(s.backoff_for(4), Duration::from_millis(80));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Book upserts keep date order
// ═══════════════════════════════════════════════════════════════════

mod book {
    use super::*;

    #[test]
    fn account_marks_are_sorted_and_unique_per_date() {
        let acc = Account::new("A", d(2017, 1, 1));
        let mut book = Book::new();
        book.upsert_account(acc.clone());
        book.upsert_account_mark(AccountMark::new(acc.id, d(2017, 3, 1), dec!(3)));
        book.upsert_account_mark(AccountMark::new(acc.id, d(2017, 1, 1), dec!(1)));
        book.upsert_account_mark(AccountMark::new(acc.id, d(2017, 3, 1), dec!(30)));

        let marks = &book.account_marks[&acc.id];
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].date, d(2017, 1, 1));
        assert_eq!(marks[1].balance, dec!(30));
    }

    #[test]
    fn unit_ledger_and_marks_upsert() {
        let mut book = Book::new();
        book.upsert_unit_ledger_entry(UnitLedgerEntry::new(d(2017, 2, 1), dec!(1500)));
        book.upsert_unit_ledger_entry(UnitLedgerEntry::new(d(2017, 1, 1), dec!(1000)));
        book.upsert_unit_ledger_entry(UnitLedgerEntry::new(d(2017, 2, 1), dec!(1400)));
        assert_eq!(book.unit_ledger.len(), 2);
        assert_eq!(book.unit_ledger[1].total_units, dec!(1400));

        let mark = |date, nw| Mark {
            date,
            total_net_worth: nw,
            total_units: dec!(1),
            price_per_unit: nw,
        };
        book.upsert_mark(mark(d(2017, 2, 1), dec!(2)));
        book.upsert_mark(mark(d(2017, 1, 1), dec!(1)));
        book.upsert_mark(mark(d(2017, 2, 1), dec!(3)));
        assert_eq!(book.marks.len(), 2);
        assert_eq!(book.marks[0].date, d(2017, 1, 1));
        assert_eq!(book.marks[1].total_net_worth, dec!(3));
    }

    #[test]
    fn replace_account_units_keeps_other_accounts() {
        let a = Account::new("A", d(2017, 1, 1));
        let b = Account::new("B", d(2017, 1, 1));
        let row = |account: &Account, units| AccountUnits {
            event_id: None,
            account_id: account.id,
            date: d(2017, 1, 1),
            units,
            amount: units,
            price_per_unit: Decimal::ONE,
            note: String::new(),
        };

        let mut book = Book::new();
        book.account_units = vec![row(&a, dec!(1)), row(&b, dec!(2)), row(&a, dec!(3))];
        book.replace_account_units(&a.id, &[row(&a, dec!(10))]);

        assert_eq!(book.account_units, vec![row(&b, dec!(2)), row(&a, dec!(10))]);
        assert!(book.account_units[1].is_genesis());
    }

    #[test]
    fn upsert_account_replaces_by_id() {
        let mut acc = Account::new("A", d(2017, 1, 1));
        let mut book = Book::new();
        book.upsert_account(acc.clone());
        acc.deactivated_on = Some(d(2018, 1, 1));
        book.upsert_account(acc.clone());
        assert_eq!(book.accounts, vec![acc]);
    }
}
