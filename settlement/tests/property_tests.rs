//! Property-based tests for stablecoin netting
//!
//! - Activate then cleanup restores Owned and SSEQ within one unit of the
//!   coarser exponent
//! - Activation covers the shortfall whenever the sources can
//! - Cleanup only ever shrinks SSEQ exposure

use ledger_core::{config::asset, Amount, AssetId, AssetRegistry, AssetUsage, Position};
use proptest::prelude::*;
use settlement::{activate, cleanup};

fn registry(target_decimals: u32, source_decimals: u32) -> AssetRegistry {
    AssetRegistry::new([
        asset("USD", target_decimals, true, AssetUsage::default()).unwrap(),
        asset("USDC", source_decimals, true, AssetUsage::default()).unwrap(),
    ])
}

fn holding(usd: u64, usdc: u64) -> Position {
    let mut position = Position::initial("alice");
    position.add(&Amount::parse("USD", usd).unwrap()).unwrap();
    position.add(&Amount::parse("USDC", usdc).unwrap()).unwrap();
    position
}

fn id(s: &str) -> AssetId {
    AssetId::new(s).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Property: activate then cleanup is the identity up to coarse-unit dust
    #[test]
    fn prop_netting_round_trip(
        target_decimals in 0u32..8,
        source_decimals in 0u32..8,
        usd in 0u64..1_000_000,
        usdc in 0u64..1_000_000_000,
        required in 1u64..2_000_000,
    ) {
        let registry = registry(target_decimals, source_decimals);
        let original = holding(usd, usdc);
        let mut position = original.clone();

        activate(&mut position, &Amount::parse("USD", required).unwrap(), &registry).unwrap();
        while cleanup(&mut position, &registry).unwrap().is_some() {}

        let coarse = target_decimals.min(source_decimals);
        let dust = |decimals: u32| 10i64.pow(decimals - coarse);
        for (asset, decimals) in [("USD", target_decimals), ("USDC", source_decimals)] {
            let before = original.owned().get(&id(asset));
            let after = position.owned().get(&id(asset));
            prop_assert!((after - before).abs() <= dust(decimals), "{} {} -> {}", asset, before, after);
            prop_assert!(position.sseq().get(&id(asset)).abs() <= dust(decimals));
        }
    }

    /// Property: with enough whole dollars in the source, the shortfall is covered
    #[test]
    fn prop_activate_covers_shortfall(
        usd in 0u64..10_000,
        required in 1u64..100_000,
        spare_dollars in 0u64..100,
    ) {
        let registry = registry(2, 6);
        let dollars_needed = required.saturating_sub(usd).div_ceil(100);
        let mut position = holding(usd, (dollars_needed + spare_dollars) * 1_000_000);

        let conversions = activate(&mut position, &Amount::parse("USD", required).unwrap(), &registry).unwrap();
        prop_assert!(position.available(&id("USD")) >= required);
        // never converts more than one dollar past the shortfall
        let gained: u64 = conversions.iter().map(|c| c.gain.quantity).sum();
        prop_assert!(gained < required.saturating_sub(usd) + 100 || gained == 0);
        prop_assert_eq!(position.sseq().is_empty(), conversions.is_empty());
        prop_assert_eq!(conversions.is_empty(), usd >= required);
    }

    /// Property: one cleanup step never grows any SSEQ entry
    #[test]
    fn prop_cleanup_shrinks_exposure(
        usdc in 1_000_000u64..100_000_000,
        required in 1u64..10_000,
        spend in 0u64..10_000,
    ) {
        let registry = registry(2, 6);
        let mut position = holding(0, usdc);
        activate(&mut position, &Amount::parse("USD", required).unwrap(), &registry).unwrap();
        let spend = spend.min(position.available(&id("USD")));
        if spend > 0 {
            position.sub(&Amount::parse("USD", spend).unwrap()).unwrap();
        }

        let before = position.sseq().clone();
        cleanup(&mut position, &registry).unwrap();
        for asset in ["USD", "USDC"] {
            prop_assert!(position.sseq().get(&id(asset)).abs() <= before.get(&id(asset)).abs());
        }
    }
}
