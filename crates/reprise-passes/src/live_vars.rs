//! Live slot analysis for suspension sites.
//!
//! A slot is live at a program point when some path from that point reads it
//! before writing it. Only slots live after a suspension site need to be
//! captured and restored. The analysis is a backward fixed point over the
//! control-flow graph, including exception edges into try-region handlers.

use reprise_ir::{Instr, MethodDef};

/// Fixed-size bitset over local slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotSet {
    words: Vec<u64>,
}

impl SlotSet {
    pub fn with_capacity(slots: u16) -> Self {
        Self {
            words: vec![0; (slots as usize).div_ceil(64)],
        }
    }

    pub fn insert(&mut self, slot: u16) {
        let (word, bit) = (slot as usize / 64, slot as usize % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    pub fn remove(&mut self, slot: u16) {
        let (word, bit) = (slot as usize / 64, slot as usize % 64);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << bit);
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        let (word, bit) = (slot as usize / 64, slot as usize % 64);
        self.words.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    /// Union `other` into `self`, returning whether anything changed.
    pub fn union_with(&mut self, other: &SlotSet) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | theirs;
            changed |= merged != *mine;
            *mine = merged;
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            (0..64)
                .filter(move |&bit| word & (1u64 << bit) != 0)
                .map(move |bit| (i * 64 + bit) as u16)
        })
    }
}

/// Per-offset live-in sets for one method body.
#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<SlotSet>,
}

impl Liveness {
    pub fn compute(method: &MethodDef) -> Self {
        let len = method.code.len();
        let mut live_in = vec![SlotSet::with_capacity(method.max_locals); len];

        let mut changed = true;
        while changed {
            changed = false;
            for offset in (0..len).rev() {
                let instr = &method.code[offset];
                let mut set = live_out_of(method, &live_in, offset);
                if let Some(slot) = instr.slot_written() {
                    set.remove(slot);
                }
                if let Some(slot) = instr.slot_read() {
                    set.insert(slot);
                }
                if set != live_in[offset] {
                    live_in[offset] = set;
                    changed = true;
                }
            }
        }

        Self { live_in }
    }

    pub fn live_in(&self, offset: usize) -> &SlotSet {
        &self.live_in[offset]
    }

    /// Slots live immediately after the instruction at `offset` completes.
    pub fn live_out(&self, method: &MethodDef, offset: usize) -> SlotSet {
        live_out_of(method, &self.live_in, offset)
    }
}

fn live_out_of(method: &MethodDef, live_in: &[SlotSet], offset: usize) -> SlotSet {
    let instr = &method.code[offset];
    let mut out = SlotSet::with_capacity(method.max_locals);
    for succ in successors(instr, offset) {
        if let Some(set) = live_in.get(succ) {
            out.union_with(set);
        }
    }
    if instr.can_throw() {
        for region in method.try_regions.iter().filter(|r| r.covers(offset)) {
            if let Some(set) = live_in.get(region.handler) {
                out.union_with(set);
            }
        }
    }
    out
}

/// Normal (non-exceptional) successors of an instruction.
pub(crate) fn successors(instr: &Instr, offset: usize) -> Vec<usize> {
    let mut succ = instr.jump_targets();
    if instr.falls_through() {
        succ.push(offset + 1);
    }
    succ
}
