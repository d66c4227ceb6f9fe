//! Hat registry
//!
//! Stores immutable redirection policies and splits amounts among their
//! recipients. Every recipient except the last receives
//! `floor(amount * p_i / Σp)`; the last receives the remainder, so a
//! split always sums exactly to its input.

use crate::math;
use crate::types::{AccountId, Hat, HatId};
use crate::{Error, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Default cap on recipients per hat
pub const MAX_HAT_RECIPIENTS: usize = 50;

/// One recipient's part of a split
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    /// Recipient
    pub recipient: AccountId,
    /// Loan value assigned
    pub loan: Decimal,
    /// Internal savings units assigned
    pub units: Decimal,
}

/// Immutable hats by ID
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HatRegistry {
    hats: BTreeMap<u64, Hat>,
}

impl HatRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted hats
    pub fn from_hats(hats: impl IntoIterator<Item = Hat>) -> Self {
        Self {
            hats: hats.into_iter().map(|h| (h.id.0, h)).collect(),
        }
    }

    /// Reject malformed definitions
    pub fn validate(
        recipients: &[AccountId],
        proportions: &[u32],
        max_recipients: usize,
    ) -> Result<()> {
        if recipients.is_empty() {
            return Err(Error::InvalidHatDefinition("no recipients".to_string()));
        }
        if recipients.len() != proportions.len() {
            return Err(Error::InvalidHatDefinition(format!(
                "{} recipients but {} proportions",
                recipients.len(),
                proportions.len()
            )));
        }
        if recipients.len() > max_recipients {
            return Err(Error::InvalidHatDefinition(format!(
                "{} recipients exceeds the limit of {}",
                recipients.len(),
                max_recipients
            )));
        }
        if recipients.iter().any(AccountId::is_zero) {
            return Err(Error::InvalidHatDefinition(
                "recipient cannot be the zero account".to_string(),
            ));
        }
        if proportions.iter().any(|p| *p == 0) {
            return Err(Error::InvalidHatDefinition(
                "proportions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Highest ID assigned so far (0 when none)
    pub fn max_hat_id(&self) -> HatId {
        HatId(self.hats.keys().next_back().copied().unwrap_or(0))
    }

    /// ID the next created hat receives
    pub fn next_id(&self) -> HatId {
        HatId(self.max_hat_id().0 + 1)
    }

    /// True for reserved IDs and created hats
    pub fn exists(&self, id: HatId) -> bool {
        id.is_self_directed() || self.hats.contains_key(&id.0)
    }

    /// Hat definition; `None` for the reserved IDs
    pub fn get(&self, id: HatId) -> Result<Option<&Hat>> {
        if id.is_self_directed() {
            return Ok(None);
        }
        self.hats.get(&id.0).map(Some).ok_or(Error::UnknownHat(id))
    }

    /// All created hats, ascending by ID
    pub fn iter(&self) -> impl Iterator<Item = &Hat> {
        self.hats.values()
    }

    /// Number of created hats
    pub fn len(&self) -> usize {
        self.hats.len()
    }

    /// True when no hat was created
    pub fn is_empty(&self) -> bool {
        self.hats.is_empty()
    }

    pub(crate) fn insert(&mut self, hat: Hat) {
        self.hats.insert(hat.id.0, hat);
    }

    pub(crate) fn remove(&mut self, id: HatId) {
        self.hats.remove(&id.0);
    }

    /// Split `amount` loan value and `units` savings units under hat `id`
    ///
    /// Reserved hats route everything to `owner`.
    pub fn split(
        &self,
        id: HatId,
        owner: &AccountId,
        amount: Decimal,
        units: Decimal,
    ) -> Result<Vec<Share>> {
        let Some(hat) = self.get(id)? else {
            return Ok(vec![Share {
                recipient: owner.clone(),
                loan: amount,
                units,
            }]);
        };

        let total = Decimal::from(hat.total_proportion());
        let last = hat.recipients.len() - 1;
        let mut shares = Vec::with_capacity(hat.recipients.len());
        let mut loan_left = amount;
        let mut units_left = units;

        for (i, (recipient, proportion)) in hat.recipients.iter().zip(&hat.proportions).enumerate() {
            let (loan, share_units) = if i == last {
                (loan_left, units_left)
            } else {
                let weight = Decimal::from(*proportion);
                (
                    math::mul_div(amount, weight, total)?,
                    math::mul_div(units, weight, total)?,
                )
            };
            loan_left -= loan;
            units_left -= share_units;
            shares.push(Share {
                recipient: recipient.clone(),
                loan,
                units: share_units,
            });
        }

        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn account(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn registry_with(recipients: &[&str], proportions: &[u32]) -> HatRegistry {
        let mut registry = HatRegistry::new();
        registry.insert(Hat {
            id: registry.next_id(),
            recipients: recipients.iter().map(|r| account(r)).collect(),
            proportions: proportions.to_vec(),
        });
        registry
    }

    #[test]
    fn test_validate_rejects_malformed_hats() {
        let two = vec![account("a"), account("b")];
        assert!(HatRegistry::validate(&two, &[1, 2], MAX_HAT_RECIPIENTS).is_ok());
        assert!(matches!(
            HatRegistry::validate(&[], &[], MAX_HAT_RECIPIENTS),
            Err(Error::InvalidHatDefinition(_))
        ));
        assert!(matches!(
            HatRegistry::validate(&two, &[1], MAX_HAT_RECIPIENTS),
            Err(Error::InvalidHatDefinition(_))
        ));
        assert!(matches!(
            HatRegistry::validate(&two, &[1, 0], MAX_HAT_RECIPIENTS),
            Err(Error::InvalidHatDefinition(_))
        ));
        assert!(matches!(
            HatRegistry::validate(&[account("")], &[1], MAX_HAT_RECIPIENTS),
            Err(Error::InvalidHatDefinition(_))
        ));
        assert!(matches!(
            HatRegistry::validate(&two, &[1, 1], 1),
            Err(Error::InvalidHatDefinition(_))
        ));
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut registry = HatRegistry::new();
        assert_eq!(registry.max_hat_id(), HatId(0));
        for expected in 1..=3 {
            let id = registry.next_id();
            assert_eq!(id, HatId(expected));
            registry.insert(Hat {
                id,
                recipients: vec![account("a")],
                proportions: vec![1],
            });
        }
        assert_eq!(registry.max_hat_id(), HatId(3));
    }

    #[test]
    fn test_reserved_hats_route_to_owner() {
        let registry = HatRegistry::new();
        let shares = registry
            .split(HatId::SELF, &account("alice"), Decimal::from(100), Decimal::from(100))
            .unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].recipient, account("alice"));
        assert_eq!(shares[0].loan, Decimal::from(100));
    }

    #[test]
    fn test_unknown_hat() {
        let registry = HatRegistry::new();
        assert!(matches!(registry.get(HatId(9)), Err(Error::UnknownHat(HatId(9)))));
        assert!(!registry.exists(HatId(9)));
        assert!(registry.exists(HatId::DEFAULT));
    }

    #[test]
    fn test_split_remainder_goes_to_last() {
        let registry = registry_with(&["a", "b", "c"], &[1, 1, 1]);
        let shares = registry
            .split(HatId(1), &account("owner"), Decimal::from(10), Decimal::from(10))
            .unwrap();

        let third = Decimal::from_str("3.333333333333333333").unwrap();
        assert_eq!(shares[0].loan, third);
        assert_eq!(shares[1].loan, third);
        assert_eq!(shares[2].loan, Decimal::from(10) - third - third);

        let total: Decimal = shares.iter().map(|s| s.loan).sum();
        assert_eq!(total, Decimal::from(10));
    }

    #[test]
    fn test_split_uses_raw_proportions() {
        let registry = registry_with(&["a", "b"], &[90, 10]);
        let shares = registry
            .split(HatId(1), &account("owner"), Decimal::from(50), Decimal::from(40))
            .unwrap();
        assert_eq!(shares[0].loan, Decimal::from(45));
        assert_eq!(shares[1].loan, Decimal::from(5));
        assert_eq!(shares[0].units, Decimal::from(36));
        assert_eq!(shares[1].units, Decimal::from(4));
    }
}
