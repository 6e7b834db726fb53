// ═══════════════════════════════════════════════════════════════════
// Storage Tests — encryption, snapshot format, StorageManager, repository
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use networth_core::errors::CoreError;
use networth_core::models::book::Book;
use networth_core::storage::encryption::{random_nonce, random_salt, KdfParams, SnapshotKey};
use networth_core::storage::format::{self, CURRENT_VERSION, HEADER_SIZE, MAGIC};
use networth_core::storage::manager::StorageManager;
use networth_core::storage::memory::InMemoryRepository;
use networth_core::storage::traits::{LedgerReader, LedgerRepository};
use networth_core::NetWorthTracker;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Cheap Argon2 settings so round-trips stay fast.
const FAST_KDF: KdfParams = KdfParams {
    memory_cost: 1024,
    time_cost: 1,
    parallelism: 1,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// A small but non-trivial book: two accounts, flows, marks and a deactivation.
fn sample_book() -> Book {
    let repo = Arc::new(InMemoryRepository::new());
    let tracker = NetWorthTracker::new(repo.clone());
    let a = tracker.create_account("Checking", d(2017, 1, 1), dec!(1000.00)).unwrap();
    let b = tracker.create_account("Brokerage", d(2017, 1, 1), dec!(250.50)).unwrap();
    tracker.apply_fund_flow(&a.id, d(2017, 2, 1), dec!(500.00), "Salary").unwrap();
    tracker.record_mark(&b.id, d(2017, 3, 1), dec!(301.123456)).unwrap();
    tracker.deactivate_account(&b.id, d(2017, 6, 1)).unwrap();
    Book::clone(&repo.snapshot())
}

// ═══════════════════════════════════════════════════════════════════
// KdfParams
// ═══════════════════════════════════════════════════════════════════

mod kdf_params {
    use super::*;

    #[test]
    fn default_values() {
        let p = KdfParams::default();
        assert_eq!(p.memory_cost, 65_536);
        assert_eq!(p.time_cost, 3);
        assert_eq!(p.parallelism, 4);
        assert!(p.check_bounds().is_ok());
    }

    #[test]
    fn bounds_are_inclusive() {
        let low = KdfParams {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        };
        let high = KdfParams {
            memory_cost: 1_048_576,
            time_cost: 20,
            parallelism: 16,
        };
        assert!(low.check_bounds().is_ok());
        assert!(high.check_bounds().is_ok());
    }

    #[test]
    fn out_of_bounds_names_the_field() {
        let cases = [
            (KdfParams { memory_cost: 7, ..FAST_KDF }, "memory_cost"),
            (KdfParams { time_cost: 0, ..FAST_KDF }, "time_cost"),
            (KdfParams { time_cost: 21, ..FAST_KDF }, "time_cost"),
            (KdfParams { parallelism: 17, ..FAST_KDF }, "parallelism"),
        ];
        for (params, field) in cases {
            match params.check_bounds() {
                Err(CoreError::InvalidFileFormat(msg)) => assert!(msg.contains(field), "{msg}"),
                other => panic!("expected InvalidFileFormat for {field}, got {other:?}"),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Key derivation & AES-GCM
// ═══════════════════════════════════════════════════════════════════

mod encryption {
    use super::*;

    #[test]
    fn same_password_and_salt_give_same_key() {
        let salt = [42u8; 16];
        let k1 = SnapshotKey::derive("same-password", &salt, &FAST_KDF).unwrap();
        let k2 = SnapshotKey::derive("same-password", &salt, &FAST_KDF).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(format!("{k1:?}"), "SnapshotKey(..)");
    }

    #[test]
    fn key_depends_on_password_and_salt() {
        let k1 = SnapshotKey::derive("password-a", &[1u8; 16], &FAST_KDF).unwrap();
        let k2 = SnapshotKey::derive("password-b", &[1u8; 16], &FAST_KDF).unwrap();
        let k3 = SnapshotKey::derive("password-a", &[2u8; 16], &FAST_KDF).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn sealed_bytes_open_with_the_same_key() {
        let key = SnapshotKey::from_bytes([7u8; 32]);
        let nonce = [9u8; 12];
        let sealed = key.seal(&nonce, b"ledger bytes").unwrap();
        assert_eq!(sealed.len(), b"ledger bytes".len() + 16);
        assert_eq!(key.open(&nonce, &sealed).unwrap(), b"ledger bytes");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = SnapshotKey::from_bytes([1u8; 32]).seal(&[0u8; 12], b"secret").unwrap();
        assert!(matches!(
            SnapshotKey::from_bytes([2u8; 32]).open(&[0u8; 12], &sealed),
            Err(CoreError::Decryption)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = SnapshotKey::from_bytes([3u8; 32]);
        let nonce = [4u8; 12];
        let mut sealed = key.seal(&nonce, b"secret").unwrap();
        sealed[0] ^= 0xFF;
        assert!(matches!(key.open(&nonce, &sealed), Err(CoreError::Decryption)));
    }

    #[test]
    fn salts_and_nonces_are_fresh() {
        assert_ne!(random_salt().unwrap(), random_salt().unwrap());
        assert_ne!(random_nonce().unwrap(), random_nonce().unwrap());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Snapshot format — write_file / read_file
// ═══════════════════════════════════════════════════════════════════

mod file_format {
    use super::*;

    fn make_test_file(ciphertext: &[u8]) -> Vec<u8> {
        format::write_file(CURRENT_VERSION, &FAST_KDF, &[0xAA; 16], &[0xBB; 12], ciphertext)
    }

    #[test]
    fn write_read_round_trip() {
        let file_bytes = make_test_file(b"encrypted-data-here");
        let (header, ct) = format::read_file(&file_bytes).unwrap();
        assert_eq!(header.version, CURRENT_VERSION);
        assert_eq!(header.salt, [0xAA; 16]);
        assert_eq!(header.nonce, [0xBB; 12]);
        assert_eq!(header.kdf_params.memory_cost, 1024);
        assert_eq!(header.ciphertext_len, 19);
        assert_eq!(ct, b"encrypted-data-here");
    }

    #[test]
    fn layout() {
        let file_bytes = make_test_file(b"1234567890");
        assert_eq!(&file_bytes[0..4], MAGIC);
        assert_eq!(MAGIC, b"NWLG");
        assert_eq!(u16::from_le_bytes([file_bytes[4], file_bytes[5]]), CURRENT_VERSION);
        assert_eq!(HEADER_SIZE, 54);
        assert_eq!(file_bytes.len(), HEADER_SIZE + 10);
    }

    #[test]
    fn file_too_small() {
        match format::read_file(&vec![0u8; HEADER_SIZE - 1]) {
            Err(CoreError::InvalidFileFormat(msg)) => assert!(msg.contains("too small")),
            other => panic!("Expected InvalidFileFormat, got {:?}", other),
        }
    }

    #[test]
    fn wrong_magic_bytes() {
        let mut file_bytes = make_test_file(b"test");
        file_bytes[..4].copy_from_slice(b"SVTK");
        match format::read_file(&file_bytes) {
            Err(CoreError::InvalidFileFormat(msg)) => assert!(msg.contains("magic")),
            other => panic!("Expected InvalidFileFormat, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_versions() {
        for version in [0, CURRENT_VERSION + 1] {
            let file_bytes =
                format::write_file(version, &FAST_KDF, &[0; 16], &[0; 12], b"test");
            match format::read_file(&file_bytes) {
                Err(CoreError::UnsupportedVersion(v)) => assert_eq!(v, version),
                other => panic!("Expected UnsupportedVersion, got {:?}", other),
            }
        }
    }

    #[test]
    fn truncated_ciphertext() {
        let mut file_bytes = make_test_file(b"some ciphertext data here!!");
        file_bytes.truncate(file_bytes.len() - 10);
        match format::read_file(&file_bytes) {
            Err(CoreError::InvalidFileFormat(msg)) => assert!(msg.contains("truncated")),
            other => panic!("Expected InvalidFileFormat, got {:?}", other),
        }
    }

    #[test]
    fn crafted_kdf_params_rejected() {
        let hostile = KdfParams {
            memory_cost: u32::MAX,
            ..FAST_KDF
        };
        let file_bytes = format::write_file(CURRENT_VERSION, &hostile, &[0; 16], &[0; 12], b"");
        match format::read_file(&file_bytes) {
            Err(CoreError::InvalidFileFormat(msg)) => assert!(msg.contains("memory_cost")),
            other => panic!("Expected InvalidFileFormat, got {:?}", other),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// StorageManager
// ═══════════════════════════════════════════════════════════════════

mod storage_manager {
    use super::*;

    #[test]
    fn save_load_preserves_book() {
        let book = sample_book();
        let bytes = StorageManager::save_with_params(&book, "pw", &FAST_KDF).unwrap();
        let loaded = StorageManager::load_from_bytes(&bytes, "pw").unwrap();

        assert_eq!(loaded.accounts, book.accounts);
        assert_eq!(loaded.account_marks, book.account_marks);
        assert_eq!(loaded.fund_flows, book.fund_flows);
        assert_eq!(loaded.account_units, book.account_units);
        assert_eq!(loaded.unit_ledger, book.unit_ledger);
        assert_eq!(loaded.marks, book.marks);
        assert_eq!(loaded.ledger, book.ledger);
        assert_eq!(loaded.version, book.version);
    }

    #[test]
    fn decimals_survive_exactly() {
        let book = sample_book();
        let bytes = StorageManager::save_with_params(&book, "pw", &FAST_KDF).unwrap();
        let loaded = StorageManager::load_from_bytes(&bytes, "pw").unwrap();

        let balances: Vec<_> = loaded
            .account_marks
            .values()
            .flatten()
            .map(|m| m.balance.to_string())
            .collect();
        assert!(balances.contains(&"301.123456".to_string()));
        assert!(balances.contains(&"1500.00".to_string()));
    }

    #[test]
    fn wrong_password_fails() {
        let bytes = StorageManager::save_with_params(&Book::default(), "right", &FAST_KDF).unwrap();
        assert!(matches!(
            StorageManager::load_from_bytes(&bytes, "wrong"),
            Err(CoreError::Decryption)
        ));
    }

    #[test]
    fn garbage_data_fails() {
        assert!(StorageManager::load_from_bytes(&[], "pw").is_err());
        assert!(StorageManager::load_from_bytes(&[0x42; 200], "pw").is_err());
    }

    #[test]
    fn save_rejects_out_of_bounds_params() {
        let params = KdfParams {
            parallelism: 0,
            ..FAST_KDF
        };
        assert!(matches!(
            StorageManager::save_with_params(&Book::default(), "pw", &params),
            Err(CoreError::InvalidFileFormat(_))
        ));
    }

    #[test]
    fn save_produces_different_bytes_each_time() {
        let book = Book::default();
        let b1 = StorageManager::save_with_params(&book, "pw", &FAST_KDF).unwrap();
        let b2 = StorageManager::save_with_params(&book, "pw", &FAST_KDF).unwrap();
        assert_ne!(b1, b2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// File I/O & repository restore
// ═══════════════════════════════════════════════════════════════════

mod file_io {
    use super::*;

    #[test]
    fn repository_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.nwlg");
        let path = path.to_str().unwrap();

        let repo = InMemoryRepository::from_book(sample_book());
        repo.save_to_file(path, "file-pw").unwrap();

        let raw = std::fs::read(path).unwrap();
        assert_eq!(&raw[0..4], b"NWLG");

        let restored = InMemoryRepository::load_from_file(path, "file-pw").unwrap();
        let view = restored.read_view().unwrap();
        assert_eq!(view.load_marks().unwrap(), repo.snapshot().marks);
        assert_eq!(view.load_accounts().unwrap().len(), 2);
    }

    #[test]
    fn restored_repository_keeps_working() {
        let bytes = StorageManager::save_with_params(&sample_book(), "pw", &FAST_KDF).unwrap();
        let book = StorageManager::load_from_bytes(&bytes, "pw").unwrap();
        let tracker = NetWorthTracker::new(Arc::new(InMemoryRepository::from_book(book)));

        let checking = tracker.get_account_by_name("checking").unwrap();
        tracker
            .apply_fund_flow(&checking.id, d(2017, 7, 1), dec!(100), "after restore")
            .unwrap();
        assert!(tracker.verify_valuation_identity().unwrap().is_empty());
    }

    #[test]
    fn load_nonexistent_file_fails() {
        assert!(matches!(
            InMemoryRepository::load_from_file("/nonexistent/path/ledger.nwlg", "pw"),
            Err(CoreError::FileIO(_))
        ));
    }
}
