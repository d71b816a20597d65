//! Property-based tests using proptest
//!
//! These tests verify invariants across randomized inputs, helping catch
//! edge cases that might be missed by example-based testing.

use lunar_vault::config::WalletConfig;
use lunar_vault::format::{format_file_size, strip_scheme, truncate_hash};
use lunar_vault::ledger::{AssetStatus, Ledger, VaultedAsset};
use lunar_vault::marketplace::{display_price, parse_price};
use lunar_vault::verify::Verifier;
use lunar_vault::wallet::WalletAdapter;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Strategies
// =============================================================================

fn arb_hash_id() -> impl Strategy<Value = String> {
    "Qm[A-Za-z0-9]{10,46}"
}

fn asset(id: usize, hash: &str) -> VaultedAsset {
    VaultedAsset {
        id: id.to_string(),
        file_name: format!("file-{}.bin", id),
        file_type: "application/octet-stream".to_string(),
        file_size: 1024,
        content_hash: format!("dh://{}", hash),
        timestamp: 1_708_876_800,
        creator: "0x0000000000000000000000000000000000000001".to_string(),
        status: AssetStatus::Verified,
    }
}

// =============================================================================
// Formatting
// =============================================================================

proptest! {
    /// Output is a one-decimal number and a known unit, or "0 B"
    #[test]
    fn file_size_has_one_decimal_and_known_unit(bytes in any::<u64>()) {
        let formatted = format_file_size(bytes);
        if bytes == 0 {
            prop_assert_eq!(formatted, "0 B");
        } else {
            let (value, unit) = formatted.split_once(' ').unwrap();
            prop_assert!(["B", "KB", "MB", "GB"].contains(&unit));
            let (_, decimals) = value.split_once('.').unwrap();
            prop_assert_eq!(decimals.len(), 1);
        }
    }

    /// Below the GB cap the displayed value stays under 1024
    #[test]
    fn file_size_picks_largest_fitting_unit(bytes in 1u64..(1u64 << 40)) {
        let formatted = format_file_size(bytes);
        let (value, _) = formatted.split_once(' ').unwrap();
        let value: f64 = value.parse().unwrap();
        prop_assert!(value < 1024.05);
    }

    #[test]
    fn strip_scheme_is_idempotent(id in arb_hash_id(), scheme in "[a-z]{1,8}") {
        let prefixed = format!("{}://{}", scheme, id);
        prop_assert_eq!(strip_scheme(&prefixed), id.as_str());
        prop_assert_eq!(strip_scheme(strip_scheme(&prefixed)), id.as_str());
    }

    /// Truncation keeps both ends of the hash
    #[test]
    fn truncated_hash_keeps_ends(id in "Qm[A-Za-z0-9]{40,46}", len in 4usize..12) {
        let hash = format!("dh://{}", id);
        let short = truncate_hash(&hash, len);
        prop_assert!(short.len() < hash.len());
        prop_assert!(hash.starts_with(short.split("...").next().unwrap()));
        prop_assert!(hash.ends_with(short.rsplit("...").next().unwrap()));
    }

    /// Displayed prices parse back to the same amount
    #[test]
    fn display_price_parses_back(wei in 1u64..u64::MAX) {
        let wei = ethers::types::U256::from(wei);
        prop_assert_eq!(parse_price(&display_price(wei)).unwrap(), wei);
    }
}

// =============================================================================
// Verification
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every recorded hash verifies, with or without its scheme prefix
    #[test]
    fn every_vaulted_hash_verifies(ids in prop::collection::hash_set(arb_hash_id(), 1..20)) {
        let ids: Vec<String> = ids.into_iter().collect();

        tokio_test::block_on(async {
            let ledger = Arc::new(Ledger::new());
            for (i, id) in ids.iter().enumerate() {
                ledger.prepend(asset(i, id)).await;
            }
            let verifier = Verifier::new(ledger, Duration::ZERO);

            for id in &ids {
                let prefixed = verifier.verify(&format!("dh://{}", id)).await.unwrap();
                prop_assert!(prefixed.found);
                prop_assert_eq!(prefixed.asset.unwrap().content_hash, format!("dh://{}", id));

                let bare = verifier.verify(id).await.unwrap();
                prop_assert!(bare.found);
            }
            Ok(())
        })?;
    }

    /// Hashes that were never recorded are not found
    #[test]
    fn unknown_hash_is_not_found(
        ids in prop::collection::hash_set(arb_hash_id(), 0..10),
        candidate in "Zz[A-Za-z0-9]{10,20}",
    ) {
        tokio_test::block_on(async {
            let ledger = Arc::new(Ledger::new());
            for (i, id) in ids.iter().enumerate() {
                ledger.prepend(asset(i, id)).await;
            }
            let verifier = Verifier::new(ledger, Duration::ZERO);
            let result = verifier.verify(&candidate).await.unwrap();
            prop_assert!(!result.found);
            prop_assert!(result.asset.is_none());
            Ok(())
        })?;
    }
}

// =============================================================================
// Network check
// =============================================================================

proptest! {
    /// Without a connection the network is never considered correct
    #[test]
    fn disconnected_wallet_is_never_on_correct_network(target in 1u64..u64::MAX) {
        let config = WalletConfig {
            target_chain_id: target,
            ..Default::default()
        };

        let correct = tokio_test::block_on(WalletAdapter::new(None, config).is_correct_network());
        prop_assert!(!correct);
    }

    #[test]
    fn accepted_chain_is_target_or_local(target in 1u64..100_000, candidate in 1u64..100_000) {
        let config = WalletConfig {
            target_chain_id: target,
            ..Default::default()
        };
        let expected = candidate == target || candidate == 31337;
        prop_assert_eq!(config.is_accepted_chain(candidate), expected);
    }
}
