//! Pool eligibility and candidate picking.
//!
//! A barcode is in a user's pool if the user owns it, or if it is a shared
//! Dynamic barcode whose profile gender equals the user's filter. Pool members
//! the user does not own are then dropped while globally hot, unless the
//! user's own recent assignment makes them sticky.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use campus_core::UserId;

use crate::{Barcode, Gender, Windows};

/// A catalog barcode joined with its optional profile gender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub barcode: Barcode,
    pub gender: Option<Gender>,
}

/// Recency facts about one barcode, relative to one requesting user.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Recency {
    /// Last use by anyone (usage ledger).
    pub last_used_at: Option<DateTime<Utc>>,
    /// Last assignment to the requesting user (assignment history).
    pub last_assigned_to_user: Option<DateTime<Utc>>,
}

/// Pool membership (before recency exclusion).
///
/// Barcodes without a profile never match a gender filter, not even `Unknown`.
pub fn is_pool_member(barcode: &Barcode, gender: Option<Gender>, user: UserId, filter: Gender) -> bool {
    barcode.is_owned_by(user) || (barcode.is_shared_dynamic() && gender == Some(filter))
}

/// Whether a pool member survives the recency exclusion.
///
/// Owned barcodes are always available.
pub fn is_available(
    barcode: &Barcode,
    user: UserId,
    recency: Recency,
    now: DateTime<Utc>,
    windows: &Windows,
) -> bool {
    if barcode.is_owned_by(user) {
        return true;
    }

    match recency.last_used_at {
        Some(last_used) if windows.is_globally_hot(last_used, now) => recency
            .last_assigned_to_user
            .is_some_and(|assigned| windows.is_sticky(assigned, now)),
        _ => true,
    }
}

/// Chooses one barcode among eligible candidates.
///
/// Implementations must return `None` only for an empty slice.
pub trait Picker: Send + Sync {
    fn pick_one<'a>(&self, candidates: &'a [Barcode]) -> Option<&'a Barcode>;
}

/// Uniform random choice. Spreads load evenly over shared barcodes.
#[derive(Debug, Default)]
pub struct RandomPicker {
    seeded: Option<Mutex<StdRng>>,
}

impl RandomPicker {
    /// Backed by the thread-local RNG.
    pub fn new() -> Self {
        Self { seeded: None }
    }

    /// Reproducible sequence of picks (simulations, soak tests).
    pub fn seeded(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Picker for RandomPicker {
    fn pick_one<'a>(&self, candidates: &'a [Barcode]) -> Option<&'a Barcode> {
        match &self.seeded {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                candidates.choose(&mut *rng)
            }
            None => candidates.choose(&mut rand::thread_rng()),
        }
    }
}

/// Always the first candidate. Deterministic; for tests and fixtures.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstPicker;

impl Picker for FirstPicker {
    fn pick_one<'a>(&self, candidates: &'a [Barcode]) -> Option<&'a Barcode> {
        candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BarcodeType;
    use chrono::Duration;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn barcode(owner: UserId, code: &str, ty: BarcodeType, shareable: bool) -> Barcode {
        Barcode::new(owner, code, ty, shareable, now()).unwrap()
    }

    #[test]
    fn pool_is_owned_plus_matching_shared_dynamic() {
        let user = UserId::new();
        let other = UserId::new();

        let a = barcode(user, "A", BarcodeType::Other, false);
        let b = barcode(other, "B", BarcodeType::Dynamic, true);
        let c = barcode(other, "C", BarcodeType::Dynamic, true);

        assert!(is_pool_member(&a, Some(Gender::Male), user, Gender::Male));
        assert!(is_pool_member(&b, Some(Gender::Male), user, Gender::Male));
        assert!(!is_pool_member(&c, Some(Gender::Female), user, Gender::Male));
    }

    #[test]
    fn unknown_filter_matches_only_unknown_profiles() {
        let user = UserId::new();
        let b = barcode(UserId::new(), "B", BarcodeType::Dynamic, true);

        assert!(is_pool_member(&b, Some(Gender::Unknown), user, Gender::Unknown));
        assert!(!is_pool_member(&b, Some(Gender::Male), user, Gender::Unknown));
        assert!(!is_pool_member(&b, None, user, Gender::Unknown));
    }

    #[test]
    fn unshared_or_non_dynamic_foreign_barcodes_are_not_pooled() {
        let user = UserId::new();
        let other = UserId::new();
        let private = barcode(other, "P", BarcodeType::Dynamic, false);
        let ident = barcode(other, "I", BarcodeType::Identification, true);

        assert!(!is_pool_member(&private, Some(Gender::Male), user, Gender::Male));
        assert!(!is_pool_member(&ident, Some(Gender::Male), user, Gender::Male));
    }

    #[test]
    fn hot_foreign_barcode_is_excluded_unless_sticky() {
        let user = UserId::new();
        let b = barcode(UserId::new(), "B", BarcodeType::Dynamic, true);
        let w = Windows::default();

        let hot = Recency {
            last_used_at: Some(now() - Duration::minutes(2)),
            last_assigned_to_user: None,
        };
        assert!(!is_available(&b, user, hot, now(), &w));

        let sticky = Recency {
            last_assigned_to_user: Some(now() - Duration::minutes(8)),
            ..hot
        };
        assert!(is_available(&b, user, sticky, now(), &w));

        let expired = Recency {
            last_assigned_to_user: Some(now() - Duration::minutes(12)),
            ..hot
        };
        assert!(!is_available(&b, user, expired, now(), &w));

        let cold = Recency {
            last_used_at: Some(now() - Duration::minutes(6)),
            last_assigned_to_user: None,
        };
        assert!(is_available(&b, user, cold, now(), &w));
    }

    #[test]
    fn owned_barcodes_ignore_recency() {
        let user = UserId::new();
        let a = barcode(user, "A", BarcodeType::Dynamic, true);
        let hot = Recency {
            last_used_at: Some(now()),
            last_assigned_to_user: None,
        };
        assert!(is_available(&a, user, hot, now(), &Windows::default()));
    }

    #[test]
    fn pickers_return_none_only_when_empty() {
        let user = UserId::new();
        let items = vec![
            barcode(user, "X", BarcodeType::Other, false),
            barcode(user, "Y", BarcodeType::Other, false),
        ];

        assert!(FirstPicker.pick_one(&[]).is_none());
        assert_eq!(FirstPicker.pick_one(&items).map(|b| b.code.as_str()), Some("X"));

        let random = RandomPicker::new();
        assert!(random.pick_one(&[]).is_none());
        assert!(random.pick_one(&items).is_some());
    }

    #[test]
    fn seeded_picker_is_reproducible() {
        let user = UserId::new();
        let items: Vec<Barcode> = (0..16)
            .map(|i| barcode(user, &format!("C{i}"), BarcodeType::Other, false))
            .collect();

        let a = RandomPicker::seeded(7);
        let b = RandomPicker::seeded(7);
        for _ in 0..32 {
            assert_eq!(a.pick_one(&items).map(|x| x.id), b.pick_one(&items).map(|x| x.id));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a random pick is always a member of the candidate slice.
        #[test]
        fn random_pick_is_a_candidate(len in 1usize..32, seed in any::<u64>()) {
            let user = UserId::new();
            let items: Vec<Barcode> = (0..len)
                .map(|i| barcode(user, &format!("C{i}"), BarcodeType::Other, false))
                .collect();

            let picked = RandomPicker::seeded(seed).pick_one(&items).unwrap();
            prop_assert!(items.iter().any(|b| b.id == picked.id));
        }
    }
}
