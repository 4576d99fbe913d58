// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Frame planning.
//!
//! The planner packs a device's variables into as few protocol-legal reads as
//! it can. Every protocol binding maps its variables to [`PlanItem`]s, with a
//! group key for the wire operation they need (coil read vs register read, S7
//! area and DB, ...) and an address/size in the protocol's own units. It then
//! turns the resulting [`Span`]s into request frames.
//!
//! The packing is greedy by contiguity:
//!
//! 1. group by key, sort by address then bit;
//! 2. extend the open span while `max_end - start` stays within the limit;
//! 3. otherwise close it and open a new span at the item's address.
//!
//! Items whose ranges overlap (several bit-fields of one register, or a
//! byte inside a word) land in the same span and share the bytes they
//! alias. Each one still gets its own decode entry.

use std::fmt;

// =============================================================================
// Items and spans
// =============================================================================

/// One variable as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem<K> {
    /// Read-operation group.
    pub key: K,
    /// Start address in protocol units.
    pub address: u32,
    /// Bit within the first unit, used as a tie-break.
    pub bit: Option<u8>,
    /// Units covered (at least one).
    pub units: u32,
    /// Caller-side index of the variable.
    pub index: usize,
}

impl<K> PlanItem<K> {
    /// Creates a plan item.
    pub fn new(key: K, address: u32, units: u32, index: usize) -> Self {
        Self {
            key,
            address,
            bit: None,
            units,
            index,
        }
    }

    /// Sets the tie-break bit.
    pub fn with_bit(mut self, bit: Option<u8>) -> Self {
        self.bit = bit;
        self
    }

    fn end(&self) -> u64 {
        self.address as u64 + self.units.max(1) as u64
    }
}

/// A variable placed inside a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanMember {
    /// Caller-side index of the variable.
    pub index: usize,
    /// Offset from the span start, in units.
    pub offset: u32,
    /// Units the variable covers.
    pub units: u32,
    /// Bit within the first unit.
    pub bit: Option<u8>,
}

/// A contiguous range read by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span<K> {
    /// Read-operation group.
    pub key: K,
    /// First unit.
    pub start: u32,
    /// Units covered.
    pub units: u32,
    /// Variables inside the range, in address order.
    pub members: Vec<SpanMember>,
}

impl<K> Span<K> {
    /// One past the last unit.
    pub fn end(&self) -> u64 {
        self.start as u64 + self.units as u64
    }
}

/// A single item is wider than one request may cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oversized {
    /// Caller-side index of the variable.
    pub index: usize,
    /// Units the variable needs.
    pub units: u32,
    /// Limit it exceeds.
    pub max_span: u32,
}

impl fmt::Display for Oversized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {} needs {} units, limit is {}",
            self.index, self.units, self.max_span
        )
    }
}

// =============================================================================
// Packing
// =============================================================================

/// Packs items into spans no wider than `max_span` units.
///
/// Returns spans ordered by key, then start address. An empty input yields an
/// empty plan.
pub fn pack<K>(mut items: Vec<PlanItem<K>>, max_span: u32) -> Result<Vec<Span<K>>, Oversized>
where
    K: Ord + Clone,
{
    let max_span = max_span.max(1);
    if let Some(item) = items.iter().find(|i| i.units.max(1) > max_span) {
        return Err(Oversized {
            index: item.index,
            units: item.units,
            max_span,
        });
    }

    items.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then(a.address.cmp(&b.address))
            .then(a.bit.cmp(&b.bit))
            .then(a.index.cmp(&b.index))
    });

    let mut spans: Vec<Span<K>> = Vec::new();
    let mut open: Option<(Span<K>, Vec<PlanItem<K>>)> = None;

    for item in items {
        let fits = match &open {
            Some((span, _)) => {
                span.key == item.key
                    && item.end().max(span.end()) - span.start as u64 <= max_span as u64
            }
            None => false,
        };

        if fits {
            if let Some((span, members)) = open.as_mut() {
                let end = item.end().max(span.end());
                span.units = (end - span.start as u64) as u32;
                members.push(item);
            }
        } else {
            if let Some((span, members)) = open.take() {
                spans.push(close(span, members));
            }
            let span = Span {
                key: item.key.clone(),
                start: item.address,
                units: item.units.max(1),
                members: Vec::new(),
            };
            open = Some((span, vec![item]));
        }
    }

    if let Some((span, members)) = open.take() {
        spans.push(close(span, members));
    }
    Ok(spans)
}

fn close<K>(mut span: Span<K>, items: Vec<PlanItem<K>>) -> Span<K> {
    span.members = items
        .into_iter()
        .map(|item| SpanMember {
            index: item.index,
            offset: item.address - span.start,
            units: item.units.max(1),
            bit: item.bit,
        })
        .collect();
    span
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_span_limit_scenario() {
        let items = vec![PlanItem::new(0u8, 0, 1, 0), PlanItem::new(0u8, 50, 1, 1)];
        let spans = pack(items, 40).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].units), (0, 1));
        assert_eq!((spans[1].start, spans[1].units), (50, 1));
    }

    #[test]
    fn test_contiguous_items_share_span() {
        let items = vec![
            PlanItem::new(0u8, 4, 2, 0),
            PlanItem::new(0u8, 0, 2, 1),
            PlanItem::new(0u8, 10, 1, 2),
        ];
        let spans = pack(items, 125).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].units, 11);
        let offsets: Vec<(usize, u32)> = spans[0].members.iter().map(|m| (m.index, m.offset)).collect();
        assert_eq!(offsets, vec![(1, 0), (0, 4), (2, 10)]);
    }

    #[test]
    fn test_groups_never_mix() {
        let items = vec![
            PlanItem::new("coil", 0, 1, 0),
            PlanItem::new("holding", 1, 1, 1),
            PlanItem::new("coil", 1, 1, 2),
        ];
        let spans = pack(items, 100).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].key, "coil");
        assert_eq!(spans[0].members.len(), 2);
        assert_eq!(spans[1].key, "holding");
    }

    #[test]
    fn test_aliased_bits_share_offset() {
        let items = vec![
            PlanItem::new(0u8, 7, 1, 0).with_bit(Some(3)),
            PlanItem::new(0u8, 7, 1, 1).with_bit(Some(0)),
            PlanItem::new(0u8, 7, 1, 2).with_bit(Some(15)),
        ];
        let spans = pack(items, 125).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].units, 1);
        let members: Vec<(usize, u32, Option<u8>)> = spans[0]
            .members
            .iter()
            .map(|m| (m.index, m.offset, m.bit))
            .collect();
        assert_eq!(members, vec![(1, 0, Some(0)), (0, 0, Some(3)), (2, 0, Some(15))]);
    }

    #[test]
    fn test_overlapping_item_does_not_shrink_span() {
        // a 4-unit value followed by a 1-unit alias inside it
        let items = vec![PlanItem::new(0u8, 0, 4, 0), PlanItem::new(0u8, 1, 1, 1)];
        let spans = pack(items, 125).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].units, 4);
    }

    #[test]
    fn test_oversized_item() {
        let items = vec![PlanItem::new(0u8, 0, 130, 3)];
        assert_eq!(
            pack(items, 125),
            Err(Oversized {
                index: 3,
                units: 130,
                max_span: 125
            })
        );
    }

    #[test]
    fn test_empty_input_yields_no_spans() {
        let spans = pack::<u8>(Vec::new(), 125).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn test_packing_completeness_randomized() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let max_span = rng.gen_range(1..=130u32);
            let count = rng.gen_range(0..60usize);
            let items: Vec<PlanItem<u8>> = (0..count)
                .map(|index| {
                    PlanItem::new(
                        rng.gen_range(0..3u8),
                        rng.gen_range(0..1000u32),
                        rng.gen_range(1..=max_span.min(8)),
                        index,
                    )
                })
                .collect();

            let spans = pack(items.clone(), max_span).unwrap();

            let mut seen = vec![0usize; count];
            for span in &spans {
                assert!(!span.members.is_empty());
                assert!(span.units <= max_span);
                for member in &span.members {
                    seen[member.index] += 1;
                    let item = &items[member.index];
                    assert_eq!(item.key, span.key);
                    assert_eq!(span.start + member.offset, item.address);
                    assert!(item.end() <= span.end());
                }
            }
            assert!(seen.iter().all(|n| *n == 1));
        }
    }
}
