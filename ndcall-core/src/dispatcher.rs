#![forbid(unsafe_code)]

//! Type-id keyed lookup used by dispatch callables.

use std::collections::HashMap;

use ndcall_types::TypeId;
use tracing::{debug, trace, warn};

use crate::config::{DispatchConfig, DuplicatePolicy};

/// A registration refused by [`DuplicatePolicy::Reject`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateKey(pub Vec<TypeId>);

/// No entry accepts a key. `position` is the first argument at which every
/// entry of matching arity has been ruled out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoMatch {
    pub position: usize,
}

/// Entries kept in registration order, with an index for exact lookup.
#[derive(Clone, Debug)]
pub struct Dispatcher<T> {
    entries: Vec<(Vec<TypeId>, T)>,
    index: HashMap<Vec<TypeId>, usize>,
    config: DispatchConfig,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Dispatcher::with_config(DispatchConfig::default())
    }
}

fn joined(key: &[TypeId]) -> String {
    key.iter().map(TypeId::to_string).collect::<Vec<_>>().join(", ")
}

impl<T> Dispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Dispatcher {
            entries: Vec::new(),
            index: HashMap::new(),
            config,
        }
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (Vec<TypeId>, T)>,
        config: DispatchConfig,
    ) -> Result<Self, DuplicateKey> {
        let mut d = Dispatcher::with_config(config);
        for (key, value) in entries {
            d.insert(key, value)?;
        }
        Ok(d)
    }

    pub fn insert(&mut self, key: Vec<TypeId>, value: T) -> Result<(), DuplicateKey> {
        match self.index.get(&key) {
            None => {
                trace!(key = %joined(&key), "dispatch entry registered");
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                Ok(())
            }
            Some(&i) => match self.config.duplicate_policy {
                DuplicatePolicy::FirstWins => {
                    warn!(key = %joined(&key), "duplicate dispatch key ignored");
                    Ok(())
                }
                DuplicatePolicy::LastWins => {
                    warn!(key = %joined(&key), "duplicate dispatch key replaces earlier entry");
                    self.entries[i].1 = value;
                    Ok(())
                }
                DuplicatePolicy::Reject => Err(DuplicateKey(key)),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[TypeId], &T)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v))
    }

    fn accepts(&self, entry: &[TypeId], key: &[TypeId]) -> bool {
        entry.len() == key.len()
            && entry.iter().zip(key).all(|(&want, &have)| {
                have == want || (self.config.promotion && have.can_promote_to(want))
            })
    }

    /// Exact key if registered; otherwise, with promotion enabled, the first
    /// entry in registration order that every argument promotes to.
    pub fn dispatch(&self, key: &[TypeId]) -> Result<&T, NoMatch> {
        if let Some(&i) = self.index.get(key) {
            return Ok(&self.entries[i].1);
        }
        if let Some((k, value)) = self.entries.iter().find(|(k, _)| self.accepts(k, key)) {
            debug!(key = %joined(key), entry = %joined(k), "dispatched by promotion");
            return Ok(value);
        }
        Err(NoMatch {
            position: self.first_rejected(key),
        })
    }

    fn first_rejected(&self, key: &[TypeId]) -> usize {
        let candidates: Vec<&[TypeId]> = self
            .entries
            .iter()
            .map(|(k, _)| k.as_slice())
            .filter(|k| k.len() == key.len())
            .collect();
        (0..key.len())
            .find(|&i| {
                !candidates
                    .iter()
                    .any(|k| self.accepts(&k[..=i], &key[..=i]))
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(policy: DuplicatePolicy, promotion: bool) -> DispatchConfig {
        DispatchConfig {
            duplicate_policy: policy,
            promotion,
        }
    }

    #[test]
    fn exact_key_wins_over_promotion() {
        let d = Dispatcher::from_entries(
            [
                (vec![TypeId::Float64, TypeId::Float64], "f64"),
                (vec![TypeId::Int32, TypeId::Int32], "i32"),
            ],
            DispatchConfig::default(),
        )
        .unwrap();
        assert_eq!(d.dispatch(&[TypeId::Int32, TypeId::Int32]), Ok(&"i32"));
        assert_eq!(d.dispatch(&[TypeId::Int16, TypeId::Int32]), Ok(&"f64"));
    }

    #[test]
    fn promotion_can_be_disabled() {
        let d = Dispatcher::from_entries(
            [(vec![TypeId::Int64], "i64")],
            cfg(DuplicatePolicy::FirstWins, false),
        )
        .unwrap();
        assert_eq!(d.dispatch(&[TypeId::Int8]), Err(NoMatch { position: 0 }));
    }

    #[test]
    fn duplicate_policies() {
        let key = vec![TypeId::Int32];
        let first = Dispatcher::from_entries(
            [(key.clone(), 1), (key.clone(), 2)],
            cfg(DuplicatePolicy::FirstWins, true),
        )
        .unwrap();
        assert_eq!(first.dispatch(&key), Ok(&1));

        let last = Dispatcher::from_entries(
            [(key.clone(), 1), (key.clone(), 2)],
            cfg(DuplicatePolicy::LastWins, true),
        )
        .unwrap();
        assert_eq!(last.dispatch(&key), Ok(&2));
        assert_eq!(last.len(), 1);

        let err = Dispatcher::from_entries(
            [(key.clone(), 1), (key.clone(), 2)],
            cfg(DuplicatePolicy::Reject, true),
        )
        .unwrap_err();
        assert_eq!(err, DuplicateKey(key));
    }

    #[test]
    fn reports_first_rejected_position() {
        let d = Dispatcher::from_entries(
            [(vec![TypeId::Int32, TypeId::Int32], ())],
            DispatchConfig::default(),
        )
        .unwrap();
        let miss = d.dispatch(&[TypeId::Int32, TypeId::Float64]).unwrap_err();
        assert_eq!(miss.position, 1);
        let miss = d.dispatch(&[TypeId::Float32, TypeId::Int32]).unwrap_err();
        assert_eq!(miss.position, 0);
    }
}
