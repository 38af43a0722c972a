// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider address selection.

use super::config::SelectorKind;
use crate::metadata::ServiceKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks one address out of the live set for a call.
pub trait Selector: Send + Sync + 'static {
    fn select<'a>(&self, key: &ServiceKey, addresses: &'a [String]) -> Option<&'a String>;
}

/// Cycles through the addresses.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl Selector for RoundRobin {
    fn select<'a>(&self, _key: &ServiceKey, addresses: &'a [String]) -> Option<&'a String> {
        if addresses.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        addresses.get(n % addresses.len())
    }
}

/// Always the first address.
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl Selector for FirstAvailable {
    fn select<'a>(&self, _key: &ServiceKey, addresses: &'a [String]) -> Option<&'a String> {
        addresses.first()
    }
}

impl SelectorKind {
    pub fn build(self) -> Arc<dyn Selector> {
        match self {
            Self::RoundRobin => Arc::new(RoundRobin::default()),
            Self::FirstAvailable => Arc::new(FirstAvailable),
        }
    }
}
